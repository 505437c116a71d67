//! The per-job saga: fan-out on submission, fan-in on completion.
//!
//! The state machine itself is pure and lives in [`instance`]; persistence
//! with optimistic concurrency is in [`store`]; the event handlers that the
//! coordinator daemon drives are in [`handlers`]; [`sweeper`] republishes
//! commands for sagas whose fan-out went missing.

pub mod handlers;
pub mod instance;
pub mod store;
pub mod sweeper;

pub use handlers::{handle_job_submitted, handle_task_completed, CommandPublisher, SagaError};
pub use instance::{CompletionOutcome, SagaInstance, SagaState};
pub use store::SagaStore;
pub use sweeper::{spawn_sweeper, sweep_once};
