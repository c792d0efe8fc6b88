//! Administrative revocation and cascade cleanup.
//!
//! Grants are only ever deleted through the ledger so their seats are
//! released under the event lock. Procedure-wide operations also take the
//! round lock and therefore wait for a running draw to finish.

use crate::error::Result;
use crate::ledger::SeatLedger;
use crate::locks::KeyedLocks;
use crate::storage::Storage;
use crate::types::{EventId, Grant, GrantId, ProcedureId};
use std::sync::Arc;
use tracing::info;

/// What a procedure-wide operation removed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RevocationSummary {
    /// Grants deleted
    pub grants_revoked: usize,
    /// Grants kept but detached from the deleted procedure
    pub grants_detached: usize,
    /// Wish lists deleted
    pub wish_lists_deleted: usize,
}

/// Administrative removal of grants and procedures
pub struct Revocation {
    storage: Arc<dyn Storage>,
    ledger: Arc<SeatLedger>,
    round_locks: Arc<KeyedLocks<ProcedureId>>,
}

impl Revocation {
    /// Create the service; `round_locks` is shared with the engine
    #[must_use]
    pub fn new(
        storage: Arc<dyn Storage>,
        ledger: Arc<SeatLedger>,
        round_locks: Arc<KeyedLocks<ProcedureId>>,
    ) -> Self {
        Self {
            storage,
            ledger,
            round_locks,
        }
    }

    /// Delete one grant
    ///
    /// # Errors
    ///
    /// [`crate::EnrollmentError::NotFound`] if the grant does not exist.
    pub fn revoke_grant(&self, grant_id: &GrantId) -> Result<Grant> {
        let grant = self.ledger.release(grant_id)?;
        info!(grant_id = %grant_id, event_id = %grant.event_id, "Grant revoked");
        Ok(grant)
    }

    /// Delete every grant for an event
    ///
    /// # Errors
    ///
    /// Storage failures.
    pub fn revoke_event(&self, event_id: &EventId) -> Result<usize> {
        let grants = self.storage.grants_for_event(event_id)?;
        for grant in &grants {
            self.ledger.release(&grant.id)?;
        }
        info!(event_id = %event_id, revoked = grants.len(), "Event grants revoked");
        Ok(grants.len())
    }

    /// Delete a procedure together with every grant it created
    ///
    /// # Errors
    ///
    /// [`crate::EnrollmentError::NotFound`] if the procedure does not exist.
    pub fn revoke_procedure(&self, procedure_id: &ProcedureId) -> Result<RevocationSummary> {
        self.round_locks.with_lock(procedure_id, || {
            self.storage.procedure(procedure_id)?;
            let mut summary = RevocationSummary::default();
            for grant in self.storage.grants_for_procedure(procedure_id)? {
                self.ledger.release(&grant.id)?;
                summary.grants_revoked += 1;
            }
            summary.wish_lists_deleted = self.purge(procedure_id)?;
            info!(procedure_id = %procedure_id, ?summary, "Procedure revoked");
            Ok(summary)
        })
    }

    /// Delete a procedure but keep its grants, clearing their procedure reference
    ///
    /// # Errors
    ///
    /// [`crate::EnrollmentError::NotFound`] if the procedure does not exist.
    pub fn remove_procedure(&self, procedure_id: &ProcedureId) -> Result<RevocationSummary> {
        self.round_locks.with_lock(procedure_id, || {
            self.storage.procedure(procedure_id)?;
            let mut summary = RevocationSummary::default();
            for mut grant in self.storage.grants_for_procedure(procedure_id)? {
                grant.procedure_id = None;
                self.storage.update_grant(grant)?;
                summary.grants_detached += 1;
            }
            summary.wish_lists_deleted = self.purge(procedure_id)?;
            info!(procedure_id = %procedure_id, ?summary, "Procedure removed");
            Ok(summary)
        })
    }

    /// Delete the procedure, its wish lists and its checkpoint
    fn purge(&self, procedure_id: &ProcedureId) -> Result<usize> {
        let wish_lists = self.storage.wish_lists_for_procedure(procedure_id)?;
        for list in &wish_lists {
            self.storage.delete_wish_list(&list.id)?;
        }
        self.storage.delete_checkpoint(procedure_id)?;
        self.storage.delete_procedure(procedure_id)?;
        Ok(wish_lists.len())
    }
}

impl std::fmt::Debug for Revocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Revocation").finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code can use unwrap
mod tests {
    use super::*;
    use crate::ledger::SeatRequest;
    use crate::storage::InMemoryStorage;
    use crate::types::{Capacity, Event, MandatorId, ParticipantId, Procedure, WishItem, WishList};
    use coursedraw_core::environment::SystemClock;

    struct Setup {
        storage: Arc<InMemoryStorage>,
        ledger: Arc<SeatLedger>,
        revocation: Revocation,
        event: Event,
        procedure: Procedure,
    }

    fn setup() -> Setup {
        let storage = Arc::new(InMemoryStorage::new());
        let mandator = MandatorId::new();
        let event = storage
            .save_event(Event::new("Lab", mandator, Capacity::new(2)))
            .unwrap();
        let procedure = storage
            .save_procedure(Procedure::draw("Spring", mandator, vec![event.id], chrono::Utc::now()))
            .unwrap();
        let ledger = Arc::new(SeatLedger::new(storage.clone(), Arc::new(SystemClock)));
        let revocation =
            Revocation::new(storage.clone(), ledger.clone(), Arc::new(KeyedLocks::new()));
        Setup {
            storage,
            ledger,
            revocation,
            event,
            procedure,
        }
    }

    fn grant(s: &Setup, procedure: Option<ProcedureId>) -> Grant {
        s.ledger
            .try_occupy(SeatRequest {
                participant_id: ParticipantId::new(),
                event_id: s.event.id,
                procedure_id: procedure,
                mandator_id: s.event.mandator_id,
                exam_only: false,
            })
            .unwrap()
    }

    #[test]
    fn revoking_a_procedure_frees_its_seats() {
        let s = setup();
        grant(&s, Some(s.procedure.id));
        let unrelated = grant(&s, None);
        s.storage
            .save_wish_list(WishList::new(
                s.procedure.id,
                ParticipantId::new(),
                ParticipantId::new(),
                s.procedure.mandator_id,
                vec![WishItem::new(s.event.id, 1)],
                chrono::Utc::now(),
            ))
            .unwrap();

        let summary = s.revocation.revoke_procedure(&s.procedure.id).unwrap();
        assert_eq!(summary.grants_revoked, 1);
        assert_eq!(summary.wish_lists_deleted, 1);
        assert!(s.storage.procedure(&s.procedure.id).is_err());
        assert_eq!(s.storage.grants_for_event(&s.event.id).unwrap(), vec![unrelated]);
        assert_eq!(s.ledger.entry(&s.event.id).unwrap().remaining(), 1);
    }

    #[test]
    fn removing_a_procedure_keeps_grants_but_detaches_them() {
        let s = setup();
        let kept = grant(&s, Some(s.procedure.id));

        let summary = s.revocation.remove_procedure(&s.procedure.id).unwrap();
        assert_eq!(summary.grants_detached, 1);
        let stored = s.storage.grant(&kept.id).unwrap();
        assert_eq!(stored.procedure_id, None);
        assert_eq!(s.ledger.entry(&s.event.id).unwrap().occupied, 1);
    }

    #[test]
    fn revoking_an_event_clears_all_its_grants() {
        let s = setup();
        grant(&s, Some(s.procedure.id));
        grant(&s, None);
        assert_eq!(s.revocation.revoke_event(&s.event.id).unwrap(), 2);
        assert!(s.ledger.has_space(&s.event.id).unwrap());
    }
}
