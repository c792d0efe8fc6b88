//! Wish list submission.
//!
//! Everything is validated before anything is persisted. The check for an
//! OPEN round and the insert run under the round's lock, which the draw
//! also takes, so a list can never slip in after the round froze.

use crate::eligibility::EligibilityGate;
use crate::error::{EnrollmentError, Result};
use crate::locks::KeyedLocks;
use crate::storage::Storage;
use crate::types::{
    ParticipantId, Procedure, ProcedureId, ProcedureKind, RoundState, WishItem, WishList,
};
use coursedraw_core::environment::Clock;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, instrument};

/// A wish list as submitted by a participant or on their behalf
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WishListSubmission {
    /// Round to submit to
    pub procedure_id: ProcedureId,
    /// Who the seats are for
    pub participant_id: ParticipantId,
    /// Who is submitting
    pub initiator_id: ParticipantId,
    /// Ranked requests
    pub items: Vec<WishItem>,
}

/// Accepts wish lists for open draw rounds
pub struct WishListDesk {
    storage: Arc<dyn Storage>,
    eligibility: Arc<dyn EligibilityGate>,
    clock: Arc<dyn Clock>,
    round_locks: Arc<KeyedLocks<ProcedureId>>,
}

impl WishListDesk {
    /// Create a desk sharing `round_locks` with the allocation engine
    #[must_use]
    pub fn new(
        storage: Arc<dyn Storage>,
        eligibility: Arc<dyn EligibilityGate>,
        clock: Arc<dyn Clock>,
        round_locks: Arc<KeyedLocks<ProcedureId>>,
    ) -> Self {
        Self {
            storage,
            eligibility,
            clock,
            round_locks,
        }
    }

    /// Validate and persist a wish list
    ///
    /// # Errors
    ///
    /// - [`EnrollmentError::NotFound`] for an unknown procedure, participant, initiator or event
    /// - [`EnrollmentError::WrongProcedure`] if the procedure is not a draw
    /// - [`EnrollmentError::AlreadyDrawn`] if the round is no longer open
    /// - [`EnrollmentError::InvalidInput`] for an empty list, repeated priorities or events,
    ///   or events the procedure does not offer
    /// - [`EnrollmentError::DuplicateItem`] if an event is already on another list of the
    ///   participant
    /// - [`EnrollmentError::EligibilityDenied`] if the gate rejects any item
    #[instrument(
        skip(self, submission),
        fields(
            procedure_id = %submission.procedure_id,
            participant_id = %submission.participant_id
        )
    )]
    pub fn submit(&self, submission: WishListSubmission) -> Result<WishList> {
        let procedure_id = submission.procedure_id;
        let result = self
            .round_locks
            .with_lock(&procedure_id, || self.submit_locked(submission));
        crate::metrics::record_wish_list(result.is_ok());
        result
    }

    fn submit_locked(&self, submission: WishListSubmission) -> Result<WishList> {
        let procedure = self.storage.procedure(&submission.procedure_id)?;
        if procedure.kind != ProcedureKind::Draw {
            return Err(EnrollmentError::WrongProcedure {
                kind: procedure.kind,
                operation: "wish list submission",
            });
        }
        if procedure.state != RoundState::Open {
            return Err(EnrollmentError::AlreadyDrawn {
                procedure_id: procedure.id,
                state: procedure.state,
            });
        }

        validate_items(&procedure, &submission.items)?;
        self.reject_cross_list_duplicates(&submission)?;
        self.check_eligibility(&procedure, &submission)?;

        let wish_list = self.storage.save_wish_list(WishList::new(
            procedure.id,
            submission.participant_id,
            submission.initiator_id,
            procedure.mandator_id,
            submission.items,
            self.clock.now(),
        ))?;
        info!(wish_list_id = %wish_list.id, items = wish_list.len(), "Wish list submitted");
        Ok(wish_list)
    }

    fn reject_cross_list_duplicates(&self, submission: &WishListSubmission) -> Result<()> {
        let existing = self
            .storage
            .wish_lists_for_participant(&submission.procedure_id, &submission.participant_id)?;
        for item in &submission.items {
            if existing.iter().any(|list| list.requests(&item.event_id)) {
                return Err(EnrollmentError::DuplicateItem {
                    participant_id: submission.participant_id,
                    event_id: item.event_id,
                });
            }
        }
        Ok(())
    }

    fn check_eligibility(
        &self,
        procedure: &Procedure,
        submission: &WishListSubmission,
    ) -> Result<()> {
        let participant = self.storage.participant(&submission.participant_id)?;
        self.storage.participant(&submission.initiator_id)?;

        for item in &submission.items {
            let event = self.storage.event(&item.event_id)?;
            if !self.eligibility.is_allowed(&participant, procedure, &event) {
                return Err(EnrollmentError::EligibilityDenied {
                    participant_id: participant.id,
                    event_id: event.id,
                });
            }
        }
        Ok(())
    }
}

/// Shape checks that need nothing but the procedure
fn validate_items(procedure: &Procedure, items: &[WishItem]) -> Result<()> {
    if items.is_empty() {
        return Err(EnrollmentError::InvalidInput(
            "a wish list needs at least one item".to_string(),
        ));
    }

    let mut priorities = HashSet::with_capacity(items.len());
    let mut events = HashSet::with_capacity(items.len());
    for item in items {
        if item.priority == 0 {
            return Err(EnrollmentError::InvalidInput(
                "priorities start at 1".to_string(),
            ));
        }
        if !priorities.insert(item.priority) {
            return Err(EnrollmentError::InvalidInput(format!(
                "priority {} is used more than once",
                item.priority
            )));
        }
        if !events.insert(item.event_id) {
            return Err(EnrollmentError::InvalidInput(format!(
                "event {} is listed more than once",
                item.event_id
            )));
        }
        if !procedure.offers(&item.event_id) {
            return Err(EnrollmentError::InvalidInput(format!(
                "event {} is not offered by procedure {}",
                item.event_id, procedure.id
            )));
        }
    }
    Ok(())
}

impl std::fmt::Debug for WishListDesk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WishListDesk").finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code can use unwrap
mod tests {
    use super::*;
    use crate::eligibility::AllowAll;
    use crate::storage::InMemoryStorage;
    use crate::types::{Capacity, Event, EventId, MandatorId, Participant};
    use coursedraw_core::environment::SystemClock;

    struct Setup {
        storage: Arc<InMemoryStorage>,
        desk: WishListDesk,
        procedure: Procedure,
        events: Vec<Event>,
        alice: Participant,
    }

    fn setup(gate: Arc<dyn EligibilityGate>) -> Setup {
        let storage = Arc::new(InMemoryStorage::new());
        let mandator = MandatorId::new();
        let events: Vec<Event> = ["Algebra", "Biology", "Chemistry"]
            .into_iter()
            .map(|name| storage.save_event(Event::new(name, mandator, Capacity::new(2))).unwrap())
            .collect();
        let procedure = storage
            .save_procedure(Procedure::draw(
                "Spring",
                mandator,
                events.iter().map(|e| e.id).collect(),
                chrono::Utc::now(),
            ))
            .unwrap();
        let alice = storage
            .save_participant(Participant::new("Alice", "alice", "alice@example.edu"))
            .unwrap();
        let desk = WishListDesk::new(
            storage.clone(),
            gate,
            Arc::new(SystemClock),
            Arc::new(KeyedLocks::new()),
        );
        Setup {
            storage,
            desk,
            procedure,
            events,
            alice,
        }
    }

    fn submission(s: &Setup, items: Vec<WishItem>) -> WishListSubmission {
        WishListSubmission {
            procedure_id: s.procedure.id,
            participant_id: s.alice.id,
            initiator_id: s.alice.id,
            items,
        }
    }

    #[test]
    fn accepts_a_valid_list() {
        let s = setup(Arc::new(AllowAll));
        let list = s
            .desk
            .submit(submission(
                &s,
                vec![WishItem::new(s.events[1].id, 5), WishItem::new(s.events[0].id, 1)],
            ))
            .unwrap();
        assert_eq!(list.item_at_rank(1).unwrap().event_id, s.events[0].id);
        assert_eq!(list.mandator_id, s.procedure.mandator_id);
        assert_eq!(s.storage.wish_list_count().unwrap(), 1);
    }

    #[test]
    fn rejects_malformed_lists_without_persisting() {
        let s = setup(Arc::new(AllowAll));
        let a = s.events[0].id;
        let b = s.events[1].id;
        for items in [
            vec![],
            vec![WishItem::new(a, 1), WishItem::new(b, 1)],
            vec![WishItem::new(a, 1), WishItem::new(a, 2)],
            vec![WishItem::new(EventId::new(), 1)],
            vec![WishItem::new(a, 0)],
        ] {
            let error = s.desk.submit(submission(&s, items)).unwrap_err();
            assert!(matches!(error, EnrollmentError::InvalidInput(_)), "{error}");
        }
        assert_eq!(s.storage.wish_list_count().unwrap(), 0);
    }

    #[test]
    fn rejects_an_event_already_on_another_list() {
        let s = setup(Arc::new(AllowAll));
        let a = s.events[0].id;
        s.desk
            .submit(submission(&s, vec![WishItem::new(a, 1)]))
            .unwrap();
        let error = s
            .desk
            .submit(submission(
                &s,
                vec![WishItem::new(s.events[2].id, 1), WishItem::new(a, 2)],
            ))
            .unwrap_err();
        assert!(matches!(error, EnrollmentError::DuplicateItem { event_id, .. } if event_id == a));
    }

    #[test]
    fn closed_rounds_reject_submissions() {
        let s = setup(Arc::new(AllowAll));
        s.storage
            .transition_round(&s.procedure.id, RoundState::Open, RoundState::Drawn)
            .unwrap();
        let error = s
            .desk
            .submit(submission(&s, vec![WishItem::new(s.events[0].id, 1)]))
            .unwrap_err();
        assert!(matches!(error, EnrollmentError::AlreadyDrawn { state: RoundState::Drawn, .. }));
    }

    #[test]
    fn one_ineligible_item_rejects_the_whole_list() {
        let chemistry_banned = |_: &Participant, _: &Procedure, e: &Event| e.name != "Chemistry";
        let s = setup(Arc::new(chemistry_banned));
        let error = s
            .desk
            .submit(submission(
                &s,
                vec![WishItem::new(s.events[0].id, 1), WishItem::new(s.events[2].id, 2)],
            ))
            .unwrap_err();
        assert!(matches!(
            error,
            EnrollmentError::EligibilityDenied { event_id, .. } if event_id == s.events[2].id
        ));
        assert_eq!(s.storage.wish_list_count().unwrap(), 0);
    }

    #[test]
    fn fifo_procedures_do_not_take_wish_lists() {
        let s = setup(Arc::new(AllowAll));
        let fifo = s
            .storage
            .save_procedure(Procedure::fifo(
                "Walk-in",
                s.procedure.mandator_id,
                vec![s.events[0].id],
            ))
            .unwrap();
        let mut request = submission(&s, vec![WishItem::new(s.events[0].id, 1)]);
        request.procedure_id = fifo.id;
        assert!(matches!(
            s.desk.submit(request),
            Err(EnrollmentError::WrongProcedure { kind: ProcedureKind::Fifo, .. })
        ));
    }
}
