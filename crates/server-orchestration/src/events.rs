//! Observable orchestrator events

use crate::status::{OrchestratorStatus, ServiceHealthRecord};

/// Events emitted on the orchestrator's event stream
///
/// Every status and health mutation produces exactly one event, in the
/// order the mutation happened.
#[derive(Debug, Clone)]
pub enum OrchestratorEvent {
    /// The lifecycle status changed
    StatusChanged {
        /// Previous status
        from: OrchestratorStatus,
        /// New status
        to: OrchestratorStatus,
    },
    /// A health probe produced a record for a service
    HealthChanged {
        /// The probed service
        service: String,
        /// The new record
        record: ServiceHealthRecord,
    },
    /// A restart of a failed service is being attempted
    RecoveryAttempt {
        /// The failed service
        service: String,
        /// 1-based attempt number
        attempt: u32,
    },
    /// The retry budget for a service is spent
    RecoveryExhausted {
        /// The failed service
        service: String,
    },
    /// A supervised service reported an error
    ServiceError {
        /// The failing service
        service: String,
        /// Error description
        message: String,
    },
}
