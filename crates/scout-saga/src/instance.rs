//! The saga state machine, pure of any IO.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use scout_core::{ResultLocation, ServiceKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SagaState {
    Processing,
    Completed,
}

/// What applying a `TaskCompleted` did to the instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionOutcome {
    /// The kind moved from pending to completed; others remain.
    Applied,
    /// The kind was the last pending one; the saga is now terminal.
    Finalized,
    /// The kind was not pending; nothing was mutated.
    Duplicate,
}

/// Per-job coordinator state, correlated by job id.
///
/// Invariants: pending and completed are disjoint, their union is the
/// requested service set, and `Completed` implies an empty pending set with
/// `completed_at` stamped. `apply_completion` is a commutative, idempotent
/// set-removal, which is what makes redelivery and reordering safe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SagaInstance {
    pub correlation_id: Uuid,
    pub current_state: SagaState,
    pub pending_services: BTreeSet<ServiceKind>,
    pub completed_services: BTreeSet<ServiceKind>,
    pub result_locations: BTreeMap<ServiceKind, ResultLocation>,
    pub created_at: DateTime<Utc>,
    /// Last mutation, used by the sweeper to spot stalled fan-outs.
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl SagaInstance {
    pub fn new(correlation_id: Uuid, services: impl IntoIterator<Item = ServiceKind>) -> Self {
        let now = Utc::now();
        let pending: BTreeSet<ServiceKind> = services.into_iter().collect();
        // A saga with nothing pending is already terminal.
        let (state, completed_at) = if pending.is_empty() {
            (SagaState::Completed, Some(now))
        } else {
            (SagaState::Processing, None)
        };
        Self {
            correlation_id,
            current_state: state,
            pending_services: pending,
            completed_services: BTreeSet::new(),
            result_locations: BTreeMap::new(),
            created_at: now,
            updated_at: now,
            completed_at,
        }
    }

    /// State-store key for this instance.
    pub fn key(correlation_id: Uuid) -> String {
        format!("saga:{}", correlation_id)
    }

    pub fn is_completed(&self) -> bool {
        self.current_state == SagaState::Completed
    }

    /// Apply one `TaskCompleted`: move `kind` from pending to completed and
    /// record its location. A kind that is not pending leaves the instance
    /// untouched.
    pub fn apply_completion(
        &mut self,
        kind: ServiceKind,
        location: Option<ResultLocation>,
    ) -> CompletionOutcome {
        if !self.pending_services.remove(&kind) {
            return CompletionOutcome::Duplicate;
        }
        self.completed_services.insert(kind);
        if let Some(location) = location {
            self.result_locations.insert(kind, location);
        }
        let now = Utc::now();
        self.updated_at = now;
        if self.pending_services.is_empty() {
            self.current_state = SagaState::Completed;
            self.completed_at = Some(now);
            CompletionOutcome::Finalized
        } else {
            CompletionOutcome::Applied
        }
    }
}
