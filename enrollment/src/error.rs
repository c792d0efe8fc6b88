//! Caller-facing errors for submission, registration and the draw.

use crate::storage::StorageError;
use crate::types::{Capacity, EventId, ParticipantId, ProcedureId, ProcedureKind, RoundState};
use thiserror::Error;

/// Result alias for enrollment operations
pub type Result<T> = std::result::Result<T, EnrollmentError>;

/// Errors returned to callers of the enrollment core
#[derive(Error, Debug)]
pub enum EnrollmentError {
    /// Malformed request, rejected before anything is persisted
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The participant already listed this event on another wish list of the round
    #[error("Event {event_id} is already on another wish list of participant {participant_id}")]
    DuplicateItem {
        /// Participant submitting
        participant_id: ParticipantId,
        /// Event listed twice
        event_id: EventId,
    },

    /// No seat left
    #[error("Event {event_id} is full (capacity {capacity})")]
    CapacityExceeded {
        /// Full event
        event_id: EventId,
        /// Its seat limit
        capacity: Capacity,
    },

    /// The round has already been drawn or closed
    #[error("Procedure {procedure_id} is {state}; the draw has already happened")]
    AlreadyDrawn {
        /// Round
        procedure_id: ProcedureId,
        /// State it was found in
        state: RoundState,
    },

    /// The rule check rejected the participant for this event
    #[error("Participant {participant_id} is not eligible for event {event_id}")]
    EligibilityDenied {
        /// Participant
        participant_id: ParticipantId,
        /// Event
        event_id: EventId,
    },

    /// Referenced entity does not exist
    #[error("{kind} {id} not found")]
    NotFound {
        /// Entity type
        kind: &'static str,
        /// Identifier as text
        id: String,
    },

    /// Operation not supported by this procedure kind
    #[error("{operation} is not available for {kind} procedures")]
    WrongProcedure {
        /// Procedure kind
        kind: ProcedureKind,
        /// Attempted operation
        operation: &'static str,
    },

    /// The participant already holds a seat in the event
    #[error("Participant {participant_id} is already registered for event {event_id}")]
    AlreadyRegistered {
        /// Participant
        participant_id: ParticipantId,
        /// Event
        event_id: EventId,
    },

    /// Storage failure other than a missing entity
    #[error("Storage error: {0}")]
    Storage(StorageError),
}

impl From<StorageError> for EnrollmentError {
    fn from(error: StorageError) -> Self {
        match error {
            StorageError::NotFound { kind, id } => Self::NotFound { kind, id },
            other => Self::Storage(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_entities_surface_as_not_found() {
        let error: EnrollmentError = StorageError::NotFound {
            kind: "event",
            id: "42".to_string(),
        }
        .into();
        assert!(matches!(error, EnrollmentError::NotFound { kind: "event", .. }));
        assert_eq!(error.to_string(), "event 42 not found");
    }

    #[test]
    fn backend_failures_stay_storage_errors() {
        let error: EnrollmentError = StorageError::Backend("disk full".to_string()).into();
        assert!(matches!(error, EnrollmentError::Storage(StorageError::Backend(_))));
    }
}
