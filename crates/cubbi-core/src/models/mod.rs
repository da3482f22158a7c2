//! Data models for Cubbi

mod child;
mod collection;
mod entity;
mod incident;
mod pending;
mod record;
mod watermark;

pub use child::{Child, NewChild};
pub use collection::Collection;
pub use entity::{Patch, SessionUser, SyncEntity};
pub use incident::{Incident, IncidentSeverity, IncidentStatus, NewIncident};
pub use pending::{OperationKind, PendingOperation};
pub use record::{NewRecord, Record, RecordKind, SymptomType, FEVER_THRESHOLD};
pub use watermark::SyncWatermark;
