//! Services exposed to UI collaborators.

mod sync_service;

pub use sync_service::{CollectionSnapshot, ScopedCollection, SyncService};
