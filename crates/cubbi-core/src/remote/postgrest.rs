//! Hosted backend client speaking the PostgREST dialect (`/rest/v1/<table>`).

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::Value;

use super::{RemoteDataGateway, RemoteError, RemoteResult, RemoteSession, SelectQuery};
use crate::config::RemoteConfig;
use crate::error::{Error, Result};
use crate::models::{Collection, SessionUser};
use crate::util::compact_text;

const HTTP_TIMEOUT_SECS: u64 = 15;

#[derive(Clone)]
pub struct PostgrestGateway {
    rest_url: String,
    anon_key: String,
    session: Option<RemoteSession>,
    client: Client,
}

impl fmt::Debug for PostgrestGateway {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("PostgrestGateway")
            .field("rest_url", &self.rest_url)
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

impl PostgrestGateway {
    pub fn new(config: &RemoteConfig) -> Result<Self> {
        let config = config.clone().normalized()?;
        let session = match (config.access_token, config.user_id) {
            (Some(access_token), Some(id)) => Some(RemoteSession {
                access_token,
                user: SessionUser {
                    id,
                    email: config.user_email,
                },
            }),
            _ => None,
        };

        let client = Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()
            .map_err(|error| Error::InvalidInput(format!("failed to build HTTP client: {error}")))?;

        Ok(Self {
            rest_url: format!("{}/rest/v1", config.url),
            anon_key: config.anon_key,
            session,
            client,
        })
    }

    fn table_url(&self, collection: Collection) -> String {
        format!("{}/{}", self.rest_url, collection.as_str())
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        let token = self
            .session
            .as_ref()
            .map_or(self.anon_key.as_str(), |session| session.access_token.as_str());
        request
            .header("apikey", &self.anon_key)
            .bearer_auth(token)
            .header(reqwest::header::ACCEPT, "application/json")
    }

    async fn send(request: RequestBuilder) -> RemoteResult<Response> {
        let response = request.send().await.map_err(transport_error)?;
        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(RemoteError::from_status(
            status.as_u16(),
            parse_api_error(status, &body),
        ))
    }

    async fn rows(response: Response) -> RemoteResult<Vec<Value>> {
        response
            .json::<Vec<Value>>()
            .await
            .map_err(|error| RemoteError::InvalidResponse(error.to_string()))
    }

    async fn single_row(response: Response, what: &str) -> RemoteResult<Value> {
        Self::rows(response)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| RemoteError::Rejected {
                status: 404,
                message: format!("{what} returned no row"),
            })
    }
}

#[async_trait]
impl RemoteDataGateway for PostgrestGateway {
    async fn insert(&self, collection: Collection, payload: &Value) -> RemoteResult<Value> {
        let request = self
            .authorize(self.client.post(self.table_url(collection)))
            .header("Prefer", "return=representation")
            .json(payload);
        let response = Self::send(request).await?;
        Self::single_row(response, &format!("insert into {collection}")).await
    }

    async fn update(&self, collection: Collection, id: &str, patch: &Value) -> RemoteResult<Value> {
        let request = self
            .authorize(self.client.patch(self.table_url(collection)))
            .query(&[("id", format!("eq.{id}"))])
            .header("Prefer", "return=representation")
            .json(patch);
        let response = Self::send(request).await?;
        Self::single_row(response, &format!("update of {collection}/{id}")).await
    }

    async fn delete(&self, collection: Collection, id: &str) -> RemoteResult<()> {
        let request = self
            .authorize(self.client.delete(self.table_url(collection)))
            .query(&[("id", format!("eq.{id}"))]);
        Self::send(request).await?;
        Ok(())
    }

    async fn select_all(
        &self,
        collection: Collection,
        query: &SelectQuery,
    ) -> RemoteResult<Vec<Value>> {
        let request = self
            .authorize(self.client.get(self.table_url(collection)))
            .query(&query_pairs(query));
        let response = Self::send(request).await?;
        Self::rows(response).await
    }

    async fn current_session(&self) -> Option<RemoteSession> {
        self.session.clone()
    }
}

/// Query-string pairs for a select (`col=eq.v`, `order=col.desc`, `limit=n`)
fn query_pairs(query: &SelectQuery) -> Vec<(String, String)> {
    let mut pairs = vec![("select".to_string(), "*".to_string())];
    for (column, value) in &query.filters {
        pairs.push((column.clone(), format!("eq.{}", filter_value(value))));
    }
    if let Some((column, descending)) = &query.order_by {
        let direction = if *descending { "desc" } else { "asc" };
        pairs.push(("order".to_string(), format!("{column}.{direction}")));
    }
    if let Some(limit) = query.limit {
        pairs.push(("limit".to_string(), limit.to_string()));
    }
    pairs
}

fn filter_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn transport_error(error: reqwest::Error) -> RemoteError {
    if error.is_timeout() {
        RemoteError::Timeout
    } else {
        RemoteError::Network(compact_text(&error.to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: Option<String>,
    error: Option<String>,
    hint: Option<String>,
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error).or(payload.hint) {
            return compact_text(&message);
        }
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        compact_text(trimmed)
    }
}
