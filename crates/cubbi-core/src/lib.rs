//! cubbi-core - Core library for Cubbi
//!
//! This crate contains the offline-first data layer shared by every Cubbi
//! client: the local cache, the pending-operation queue, connectivity
//! tracking, and the engine that reconciles local state with the hosted
//! backend.

pub mod config;
pub mod connectivity;
pub mod db;
pub mod error;
pub mod models;
pub mod remote;
pub mod services;
pub mod state;
pub mod sync;
pub mod util;

pub use config::{RemoteConfig, SyncConfig};
pub use connectivity::ConnectivityMonitor;
pub use db::Database;
pub use error::{Error, Result};
pub use models::{Child, Collection, Incident, Patch, Record, SyncEntity};
pub use services::SyncService;
pub use state::SyncState;
pub use sync::{Confirmation, DrainReport, SyncStatus};
