//! Offline-first synchronization: optimistic mutations, queue replay,
//! cache hydration and remote change observation.

mod changefeed;
mod engine;
mod hydrator;
mod status;

pub use changefeed::{spawn_change_observer, RemoteChange};
pub use engine::{Confirmation, DrainReport, Identity, MutationOutcome, SyncEngine, SyncHandle};
pub use hydrator::{CacheHydrator, HydrationReport, ScopeHydration};
pub use status::SyncStatus;
