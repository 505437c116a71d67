//! Scout core - domain types, wire envelopes, and target validation.
//!
//! Everything that crosses the bus or a store boundary is defined here so the
//! server, the coordinator, and the workers agree on one wire contract.

pub mod envelope;
pub mod types;
pub mod validate;

pub use envelope::{CommandBody, Event, JobSubmitted, LookupCommand, TaskCompleted};
pub use types::{Job, JobStatus, ResultLocation, ServiceKind, StorageKind, TargetKind};
pub use validate::{validate_target, TargetError, ValidatedTarget};
