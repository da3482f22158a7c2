//! Runtime configuration for the sync core.
//!
//! [`SyncConfig`] tunes the engine; [`RemoteConfig`] locates the hosted
//! backend and is normally read from the environment.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::util::{is_http_url, normalize_text_option};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_RECORD_HYDRATION_CAP: usize = 500;

pub const ENV_SUPABASE_URL: &str = "CUBBI_SUPABASE_URL";
pub const ENV_SUPABASE_ANON_KEY: &str = "CUBBI_SUPABASE_ANON_KEY";
pub const ENV_ACCESS_TOKEN: &str = "CUBBI_ACCESS_TOKEN";
pub const ENV_USER_ID: &str = "CUBBI_USER_ID";
pub const ENV_USER_EMAIL: &str = "CUBBI_USER_EMAIL";

/// Engine tuning knobs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncConfig {
    /// Period of the backstop poll that re-checks queue depth and drains
    pub poll_interval: Duration,
    /// Maximum records loaded per child by a scope hydration
    pub record_hydration_cap: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            record_hydration_cap: DEFAULT_RECORD_HYDRATION_CAP,
        }
    }
}

impl SyncConfig {
    #[must_use]
    pub const fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    #[must_use]
    pub const fn with_record_hydration_cap(mut self, cap: usize) -> Self {
        self.record_hydration_cap = cap;
        self
    }
}

/// Hosted backend endpoint and credentials.
///
/// The anon key is public; the access token belongs to the signed-in user.
#[derive(Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RemoteConfig {
    pub url: String,
    pub anon_key: String,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub user_email: Option<String>,
}

impl std::fmt::Debug for RemoteConfig {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("RemoteConfig")
            .field("url", &self.url)
            .field("anon_key", &self.anon_key)
            .field(
                "access_token",
                &self.access_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("user_id", &self.user_id)
            .field("user_email", &self.user_email)
            .finish()
    }
}

impl RemoteConfig {
    /// Read the remote configuration from `CUBBI_*` environment variables.
    ///
    /// Returns `Ok(None)` when no backend URL is set.
    pub fn from_env() -> Result<Option<Self>> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (the environment in production)
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Option<Self>> {
        let Some(url) = normalize_text_option(lookup(ENV_SUPABASE_URL)) else {
            return Ok(None);
        };
        let anon_key = normalize_text_option(lookup(ENV_SUPABASE_ANON_KEY)).ok_or_else(|| {
            Error::InvalidInput(format!("{ENV_SUPABASE_ANON_KEY} is required when {ENV_SUPABASE_URL} is set"))
        })?;

        Self {
            url,
            anon_key,
            access_token: lookup(ENV_ACCESS_TOKEN),
            user_id: lookup(ENV_USER_ID),
            user_email: lookup(ENV_USER_EMAIL),
        }
        .normalized()
        .map(Some)
    }

    /// Trim values, drop empty optionals and validate the URL scheme.
    pub fn normalized(self) -> Result<Self> {
        let url = normalize_text_option(Some(self.url))
            .ok_or_else(|| Error::InvalidInput("remote url must not be empty".to_string()))?;
        if !is_http_url(&url) {
            return Err(Error::InvalidInput(
                "remote url must include http:// or https://".to_string(),
            ));
        }
        let anon_key = normalize_text_option(Some(self.anon_key))
            .ok_or_else(|| Error::InvalidInput("anon key must not be empty".to_string()))?;

        Ok(Self {
            url: url.trim_end_matches('/').to_string(),
            anon_key,
            access_token: normalize_text_option(self.access_token),
            user_id: normalize_text_option(self.user_id),
            user_email: normalize_text_option(self.user_email),
        })
    }

    /// Whether the config carries enough to act as a signed-in user
    pub const fn has_session(&self) -> bool {
        self.access_token.is_some() && self.user_id.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(key, value)| ((*key).to_string(), (*value).to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn sync_config_defaults_and_builders() {
        let config = SyncConfig::default();
        assert_eq!(config.poll_interval, Duration::from_secs(10));
        assert_eq!(config.record_hydration_cap, 500);

        let tuned = config
            .with_poll_interval(Duration::from_millis(50))
            .with_record_hydration_cap(3);
        assert_eq!(tuned.poll_interval, Duration::from_millis(50));
        assert_eq!(tuned.record_hydration_cap, 3);
    }

    #[test]
    fn missing_url_means_no_remote() {
        assert_eq!(RemoteConfig::from_lookup(lookup(&[])).unwrap(), None);
        assert_eq!(
            RemoteConfig::from_lookup(lookup(&[(ENV_SUPABASE_URL, "   ")])).unwrap(),
            None
        );
    }

    #[test]
    fn from_lookup_normalizes_values() {
        let config = RemoteConfig::from_lookup(lookup(&[
            (ENV_SUPABASE_URL, " https://project.supabase.co/ "),
            (ENV_SUPABASE_ANON_KEY, "anon"),
            (ENV_ACCESS_TOKEN, "jwt"),
            (ENV_USER_ID, "u1"),
            (ENV_USER_EMAIL, "  "),
        ]))
        .unwrap()
        .unwrap();

        assert_eq!(config.url, "https://project.supabase.co");
        assert_eq!(config.user_email, None);
        assert!(config.has_session());
    }

    #[test]
    fn rejects_invalid_urls_and_missing_keys() {
        assert!(RemoteConfig::from_lookup(lookup(&[(ENV_SUPABASE_URL, "https://x.co")])).is_err());
        assert!(RemoteConfig::from_lookup(lookup(&[
            (ENV_SUPABASE_URL, "project.supabase.co"),
            (ENV_SUPABASE_ANON_KEY, "anon"),
        ]))
        .is_err());
    }

    #[test]
    fn deserialization_rejects_unknown_fields() {
        let error = serde_json::from_str::<RemoteConfig>(
            r#"{"url": "https://x.co", "anon_key": "a", "region": "eu"}"#,
        )
        .unwrap_err();
        assert!(error.to_string().contains("unknown field"));
    }

    #[test]
    fn debug_redacts_access_token() {
        let config = RemoteConfig {
            url: "https://x.co".into(),
            anon_key: "anon".into(),
            access_token: Some("secret-jwt".into()),
            ..Default::default()
        };
        assert!(!format!("{config:?}").contains("secret-jwt"));
    }
}
