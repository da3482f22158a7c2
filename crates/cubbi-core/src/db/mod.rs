//! Local persistence for Cubbi: cache collections and the pending queue

mod connection;
mod migrations;
mod pending_log;
mod store;

pub use connection::Database;
pub use pending_log::{PendingOperationLog, QueueDepth};
pub use store::{LocalStore, PinGuard};
