//! Seat ledger: the only place seats are handed out or given back.
//!
//! Occupancy is derived from live grants rather than stored as a counter,
//! so a revoked grant frees its seat without any bookkeeping. Every seat
//! decision for an event runs under that event's lock; the draw and
//! single-seat registrations therefore cannot both take the last seat.

use crate::error::EnrollmentError;
use crate::locks::KeyedLocks;
use crate::storage::{Storage, StorageError};
use crate::types::{
    Capacity, EventId, Grant, GrantId, LedgerEntry, MandatorId, ParticipantId, ProcedureId,
};
use coursedraw_core::environment::Clock;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Why a seat could not be taken
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// No seat left
    #[error("Event {event_id} is full (capacity {capacity})")]
    Full {
        /// Event
        event_id: EventId,
        /// Its seat limit
        capacity: Capacity,
    },

    /// The participant already holds a grant for the event
    #[error("Participant {participant_id} already holds a seat in event {event_id}")]
    AlreadyHeld {
        /// Participant
        participant_id: ParticipantId,
        /// Event
        event_id: EventId,
    },

    /// Storage failure
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl From<LedgerError> for EnrollmentError {
    fn from(error: LedgerError) -> Self {
        match error {
            LedgerError::Full { event_id, capacity } => {
                Self::CapacityExceeded { event_id, capacity }
            },
            LedgerError::AlreadyHeld {
                participant_id,
                event_id,
            } => Self::AlreadyRegistered {
                participant_id,
                event_id,
            },
            LedgerError::Storage(error) => error.into(),
        }
    }
}

/// A request for one seat
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeatRequest {
    /// Who gets the seat
    pub participant_id: ParticipantId,
    /// Which event
    pub event_id: EventId,
    /// Procedure the grant is attributed to
    pub procedure_id: Option<ProcedureId>,
    /// Tenant
    pub mandator_id: MandatorId,
    /// Exam-only registrations skip the capacity check
    pub exam_only: bool,
}

/// Per-event occupancy guard
pub struct SeatLedger {
    storage: Arc<dyn Storage>,
    clock: Arc<dyn Clock>,
    locks: KeyedLocks<EventId>,
}

impl SeatLedger {
    /// Create a ledger over `storage`
    #[must_use]
    pub fn new(storage: Arc<dyn Storage>, clock: Arc<dyn Clock>) -> Self {
        Self {
            storage,
            clock,
            locks: KeyedLocks::new(),
        }
    }

    /// Current occupancy of an event
    ///
    /// # Errors
    ///
    /// [`StorageError::NotFound`] if the event does not exist.
    pub fn entry(&self, event_id: &EventId) -> Result<LedgerEntry, StorageError> {
        let event = self.storage.event(event_id)?;
        let occupied = self
            .storage
            .grants_for_event(event_id)?
            .iter()
            .filter(|grant| grant.occupies_seat())
            .count();
        Ok(LedgerEntry {
            event_id: *event_id,
            capacity: event.capacity,
            occupied: u32::try_from(occupied).unwrap_or(u32::MAX),
        })
    }

    /// Whether the event has at least one free seat
    ///
    /// Only a snapshot; use [`SeatLedger::try_occupy`] to actually take a seat.
    ///
    /// # Errors
    ///
    /// [`StorageError::NotFound`] if the event does not exist.
    pub fn has_space(&self, event_id: &EventId) -> Result<bool, StorageError> {
        self.entry(event_id).map(|entry| entry.has_space())
    }

    /// Check-and-insert a grant under the event's lock
    ///
    /// # Errors
    ///
    /// - [`LedgerError::AlreadyHeld`] if the participant already has a grant for the event
    /// - [`LedgerError::Full`] if no seat is left (never for exam-only requests)
    /// - [`LedgerError::Storage`] on storage failures
    pub fn try_occupy(&self, request: SeatRequest) -> Result<Grant, LedgerError> {
        self.locks.with_lock(&request.event_id, || {
            let held = self
                .storage
                .grants_for_event(&request.event_id)?
                .iter()
                .any(|grant| grant.participant_id == request.participant_id);
            if held {
                return Err(LedgerError::AlreadyHeld {
                    participant_id: request.participant_id,
                    event_id: request.event_id,
                });
            }

            if !request.exam_only {
                let entry = self.entry(&request.event_id)?;
                if !entry.has_space() {
                    crate::metrics::record_capacity_rejection();
                    return Err(LedgerError::Full {
                        event_id: request.event_id,
                        capacity: entry.capacity,
                    });
                }
            }

            let grant = self.storage.save_grant(Grant::new(
                request.participant_id,
                request.event_id,
                request.procedure_id,
                request.mandator_id,
                self.clock.now(),
                request.exam_only,
            ))?;
            debug!(
                grant_id = %grant.id,
                participant_id = %grant.participant_id,
                event_id = %grant.event_id,
                exam_only = grant.exam_only,
                "Seat occupied"
            );
            Ok(grant)
        })
    }

    /// Delete a grant under its event's lock, freeing the seat
    ///
    /// # Errors
    ///
    /// [`StorageError::NotFound`] if the grant does not exist.
    pub fn release(&self, grant_id: &GrantId) -> Result<Grant, StorageError> {
        let grant = self.storage.grant(grant_id)?;
        let event_id = grant.event_id;
        self.locks.with_lock(&event_id, || {
            self.storage.delete_grant(grant_id)?;
            debug!(grant_id = %grant_id, event_id = %event_id, "Seat released");
            Ok(grant)
        })
    }
}

impl std::fmt::Debug for SeatLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SeatLedger")
            .field("held_events", &self.locks.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code can use unwrap
mod tests {
    use super::*;
    use crate::storage::InMemoryStorage;
    use crate::types::Event;
    use coursedraw_core::environment::SystemClock;

    fn setup(capacity: u32) -> (Arc<InMemoryStorage>, SeatLedger, Event) {
        let storage = Arc::new(InMemoryStorage::new());
        let event = storage
            .save_event(Event::new("Lab", MandatorId::new(), Capacity::new(capacity)))
            .unwrap();
        let ledger = SeatLedger::new(storage.clone(), Arc::new(SystemClock));
        (storage, ledger, event)
    }

    fn request(event: &Event, exam_only: bool) -> SeatRequest {
        SeatRequest {
            participant_id: ParticipantId::new(),
            event_id: event.id,
            procedure_id: None,
            mandator_id: event.mandator_id,
            exam_only,
        }
    }

    #[test]
    fn full_event_rejects_seat_requests() {
        let (_, ledger, event) = setup(1);
        ledger.try_occupy(request(&event, false)).unwrap();

        let error = ledger.try_occupy(request(&event, false)).unwrap_err();
        assert_eq!(
            error,
            LedgerError::Full {
                event_id: event.id,
                capacity: Capacity::new(1)
            }
        );
        assert_eq!(ledger.entry(&event.id).unwrap().occupied, 1);
    }

    #[test]
    fn exam_only_bypasses_capacity_and_occupies_nothing() {
        let (_, ledger, event) = setup(1);
        ledger.try_occupy(request(&event, false)).unwrap();
        let exam = ledger.try_occupy(request(&event, true)).unwrap();

        assert!(exam.exam_only);
        assert_eq!(ledger.entry(&event.id).unwrap().occupied, 1);
    }

    #[test]
    fn a_participant_holds_at_most_one_grant_per_event() {
        let (_, ledger, event) = setup(5);
        let first = request(&event, false);
        ledger.try_occupy(first).unwrap();
        assert!(matches!(
            ledger.try_occupy(first),
            Err(LedgerError::AlreadyHeld { .. })
        ));
    }

    #[test]
    fn release_frees_the_seat() {
        let (storage, ledger, event) = setup(1);
        let grant = ledger.try_occupy(request(&event, false)).unwrap();
        assert!(!ledger.has_space(&event.id).unwrap());

        ledger.release(&grant.id).unwrap();
        assert!(ledger.has_space(&event.id).unwrap());
        assert_eq!(storage.grant_count().unwrap(), 0);
    }

    #[test]
    fn ledger_errors_map_to_caller_errors() {
        let event_id = EventId::new();
        let error: EnrollmentError = LedgerError::Full {
            event_id,
            capacity: Capacity::new(2),
        }
        .into();
        assert!(matches!(error, EnrollmentError::CapacityExceeded { .. }));
    }
}
