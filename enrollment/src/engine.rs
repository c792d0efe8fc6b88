//! Allocation engine: the multi-round priority lottery.
//!
//! # Algorithm
//!
//! For lottery round `r = 1..=max_len` (the longest wish list of the round):
//!
//! 1. The wish lists still alive form the pool.
//! 2. The pool is shuffled with a generator built from a fresh seed taken
//!    from the [`RandomSource`]. One seed per round, never per engine.
//! 3. Each list in shuffled order makes exactly one attempt at its rank-`r`
//!    item and then leaves the pool, whatever happened:
//!    - no item at that rank: the list is exhausted;
//!    - the event is full (or already held by the participant): a miss;
//!    - otherwise a grant is written through the [`SeatLedger`].
//!
//! A list therefore yields at most one grant, and a miss on a preferred
//! event is never followed by a try at a lower-ranked one.
//!
//! Grants are persisted as they are made. A [`DrawCheckpoint`] is written
//! at the start of every lottery round so [`AllocationEngine::resume`] can
//! finish an interrupted draw instead of re-running it.

use crate::error::{EnrollmentError, Result};
use crate::ledger::{LedgerError, SeatLedger, SeatRequest};
use crate::locks::KeyedLocks;
use crate::storage::Storage;
use crate::types::{
    DrawCheckpoint, Grant, Procedure, ProcedureId, ProcedureKind, RoundState, WishList, WishListId,
};
use coursedraw_core::environment::{Clock, RandomSource};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, instrument};

/// What one draw (or its resumption) produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrawReport {
    /// Round that was drawn
    pub procedure_id: ProcedureId,
    /// Grants created by this run
    pub grants: Vec<Grant>,
    /// Lists whose attempt hit a full event
    pub missed: Vec<WishListId>,
    /// Lists with no item at the rank being drawn
    pub exhausted: Vec<WishListId>,
    /// Lottery rounds actually processed
    pub rounds_run: usize,
    /// Whether this run continued an interrupted draw
    pub resumed: bool,
}

impl DrawReport {
    fn new(procedure_id: ProcedureId, resumed: bool) -> Self {
        Self {
            procedure_id,
            grants: Vec::new(),
            missed: Vec::new(),
            exhausted: Vec::new(),
            rounds_run: 0,
            resumed,
        }
    }
}

/// Outcome of one list's single attempt in a lottery round
enum Attempt {
    Granted(Grant),
    Missed,
    Exhausted,
}

/// Runs the lottery for draw procedures
pub struct AllocationEngine {
    storage: Arc<dyn Storage>,
    ledger: Arc<SeatLedger>,
    random: Arc<dyn RandomSource>,
    clock: Arc<dyn Clock>,
    round_locks: Arc<KeyedLocks<ProcedureId>>,
}

impl AllocationEngine {
    /// Create an engine
    ///
    /// `round_locks` must be the registry the wish list desk uses, so no
    /// submission can land while a round is being drawn.
    #[must_use]
    pub fn new(
        storage: Arc<dyn Storage>,
        ledger: Arc<SeatLedger>,
        random: Arc<dyn RandomSource>,
        clock: Arc<dyn Clock>,
        round_locks: Arc<KeyedLocks<ProcedureId>>,
    ) -> Self {
        Self {
            storage,
            ledger,
            random,
            clock,
            round_locks,
        }
    }

    /// Freeze an OPEN round and run every lottery round
    ///
    /// Blocks until the draw is complete.
    ///
    /// # Errors
    ///
    /// - [`EnrollmentError::NotFound`] if the procedure does not exist
    /// - [`EnrollmentError::WrongProcedure`] if it is not a draw procedure
    /// - [`EnrollmentError::AlreadyDrawn`] if it has left the OPEN state; nothing is written
    /// - [`EnrollmentError::Storage`] if persistence fails mid-draw; the round stays
    ///   DRAWN without completion and can be finished with [`AllocationEngine::resume`]
    #[instrument(skip(self), fields(procedure_id = %procedure_id))]
    pub fn draw(&self, procedure_id: &ProcedureId) -> Result<DrawReport> {
        self.round_locks.with_lock(procedure_id, || {
            let procedure = self.storage.procedure(procedure_id)?;
            ensure_draw_kind(&procedure)?;

            if !self
                .storage
                .transition_round(procedure_id, RoundState::Open, RoundState::Drawn)?
            {
                let state = self.storage.procedure(procedure_id)?.state;
                return Err(EnrollmentError::AlreadyDrawn {
                    procedure_id: *procedure_id,
                    state,
                });
            }
            info!(procedure = %procedure.name, "Round frozen, starting draw");

            let lists = self.storage.wish_lists_for_procedure(procedure_id)?;
            self.run(&procedure, lists, 1, DrawReport::new(*procedure_id, false))
        })
    }

    /// Finish a draw that was interrupted before recording completion
    ///
    /// Lists are reloaded and restricted to those alive at the last
    /// checkpoint. Lists that already produced a grant from this procedure
    /// are dropped, then the lottery continues from the checkpointed round
    /// with a fresh seed.
    ///
    /// # Errors
    ///
    /// - [`EnrollmentError::NotFound`] if the procedure does not exist
    /// - [`EnrollmentError::WrongProcedure`] if it is not a draw procedure
    /// - [`EnrollmentError::InvalidInput`] if the procedure is not an interrupted draw
    /// - [`EnrollmentError::Storage`] on persistence failures
    #[instrument(skip(self), fields(procedure_id = %procedure_id))]
    pub fn resume(&self, procedure_id: &ProcedureId) -> Result<DrawReport> {
        self.round_locks.with_lock(procedure_id, || {
            let procedure = self.storage.procedure(procedure_id)?;
            ensure_draw_kind(&procedure)?;
            if !procedure.is_interrupted_draw() {
                return Err(EnrollmentError::InvalidInput(format!(
                    "procedure {procedure_id} is {} and has no interrupted draw",
                    procedure.state
                )));
            }

            let checkpoint = self.storage.checkpoint(procedure_id)?;
            let mut lists = self.storage.wish_lists_for_procedure(procedure_id)?;
            if let Some(checkpoint) = &checkpoint {
                let alive: HashSet<WishListId> = checkpoint.alive.iter().copied().collect();
                lists.retain(|list| alive.contains(&list.id));
            }

            let granted = self.storage.grants_for_procedure(procedure_id)?;
            let before = lists.len();
            lists.retain(|list| {
                !granted.iter().any(|grant| {
                    grant.participant_id == list.participant_id && list.requests(&grant.event_id)
                })
            });

            let start = checkpoint.map_or(1, |checkpoint| checkpoint.lottery_round);
            info!(
                procedure = %procedure.name,
                lottery_round = start,
                remaining = lists.len(),
                already_granted = before - lists.len(),
                "Resuming interrupted draw"
            );
            self.run(&procedure, lists, start, DrawReport::new(*procedure_id, true))
        })
    }

    fn run(
        &self,
        procedure: &Procedure,
        lists: Vec<WishList>,
        start_round: usize,
        report: DrawReport,
    ) -> Result<DrawReport> {
        let started = Instant::now();
        match self.run_rounds(procedure, lists, start_round, report) {
            Ok(report) => {
                self.storage.delete_checkpoint(&procedure.id)?;
                let now = self.clock.now();
                self.storage
                    .update_procedure(&procedure.id, &mut |p| p.draw_completed_at = Some(now))?;
                crate::metrics::record_draw_completed(
                    report.resumed,
                    started.elapsed().as_secs_f64(),
                );
                info!(
                    procedure = %procedure.name,
                    grants = report.grants.len(),
                    missed = report.missed.len(),
                    exhausted = report.exhausted.len(),
                    rounds = report.rounds_run,
                    "Draw completed"
                );
                Ok(report)
            },
            Err(e) => {
                crate::metrics::record_draw_failed();
                error!(procedure = %procedure.name, error = %e, "Draw interrupted");
                Err(e)
            },
        }
    }

    fn run_rounds(
        &self,
        procedure: &Procedure,
        mut alive: Vec<WishList>,
        start_round: usize,
        mut report: DrawReport,
    ) -> Result<DrawReport> {
        let max_rounds = alive.iter().map(WishList::len).max().unwrap_or(0);

        // Storage order is unspecified; pin it so a seed fully determines the outcome.
        alive.sort_by(|a, b| a.submitted_at.cmp(&b.submitted_at).then(a.id.cmp(&b.id)));

        for lottery_round in start_round..=max_rounds {
            if alive.is_empty() {
                break;
            }
            self.storage.save_checkpoint(DrawCheckpoint {
                procedure_id: procedure.id,
                lottery_round,
                alive: alive.iter().map(|list| list.id).collect(),
                recorded_at: self.clock.now(),
            })?;

            let seed = self.random.next_seed();
            let mut rng = StdRng::seed_from_u64(seed);
            alive.shuffle(&mut rng);
            debug!(lottery_round, seed, pool = alive.len(), "Lottery round");

            // Every visited list leaves the pool whatever the outcome.
            for list in std::mem::take(&mut alive) {
                match self.attempt(procedure, &list, lottery_round)? {
                    Attempt::Granted(grant) => report.grants.push(grant),
                    Attempt::Missed => report.missed.push(list.id),
                    Attempt::Exhausted => report.exhausted.push(list.id),
                }
            }
            report.rounds_run += 1;
        }
        Ok(report)
    }

    fn attempt(
        &self,
        procedure: &Procedure,
        list: &WishList,
        lottery_round: usize,
    ) -> Result<Attempt> {
        let Some(item) = list.item_at_rank(lottery_round) else {
            debug!(wish_list_id = %list.id, lottery_round, "Wish list exhausted");
            return Ok(Attempt::Exhausted);
        };

        let request = SeatRequest {
            participant_id: list.participant_id,
            event_id: item.event_id,
            procedure_id: Some(procedure.id),
            mandator_id: procedure.mandator_id,
            exam_only: false,
        };
        match self.ledger.try_occupy(request) {
            Ok(grant) => {
                crate::metrics::record_grant("draw");
                debug!(
                    wish_list_id = %list.id,
                    participant_id = %list.participant_id,
                    event_id = %item.event_id,
                    lottery_round,
                    "Seat granted"
                );
                Ok(Attempt::Granted(grant))
            },
            Err(LedgerError::Full { .. } | LedgerError::AlreadyHeld { .. }) => {
                debug!(
                    wish_list_id = %list.id,
                    event_id = %item.event_id,
                    lottery_round,
                    "Missed, wish list dropped"
                );
                Ok(Attempt::Missed)
            },
            Err(LedgerError::Storage(e)) => Err(e.into()),
        }
    }
}

fn ensure_draw_kind(procedure: &Procedure) -> Result<()> {
    if procedure.kind == ProcedureKind::Draw {
        Ok(())
    } else {
        Err(EnrollmentError::WrongProcedure {
            kind: procedure.kind,
            operation: "draw",
        })
    }
}

impl std::fmt::Debug for AllocationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AllocationEngine")
            .field("ledger", &self.ledger)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code can use unwrap
mod tests {
    use super::*;
    use crate::storage::InMemoryStorage;
    use crate::types::{Capacity, Event, MandatorId, ParticipantId, WishItem};
    use coursedraw_core::environment::SystemClock;
    use coursedraw_testing::mocks::{FixedSeed, SeedSequence, test_instant};

    struct Round {
        storage: Arc<InMemoryStorage>,
        engine: AllocationEngine,
        procedure: Procedure,
    }

    fn round(capacities: &[u32], random: Arc<dyn RandomSource>) -> (Round, Vec<Event>) {
        let storage = Arc::new(InMemoryStorage::new());
        let mandator = MandatorId::new();
        let events: Vec<Event> = capacities
            .iter()
            .enumerate()
            .map(|(i, capacity)| {
                let event = Event::new(format!("Event {i}"), mandator, Capacity::new(*capacity));
                storage.save_event(event).unwrap()
            })
            .collect();
        let procedure = storage
            .save_procedure(Procedure::draw(
                "Spring",
                mandator,
                events.iter().map(|e| e.id).collect(),
                chrono::Utc::now(),
            ))
            .unwrap();
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let ledger = Arc::new(SeatLedger::new(storage.clone(), clock.clone()));
        let engine = AllocationEngine::new(
            storage.clone(),
            ledger,
            random,
            clock,
            Arc::new(KeyedLocks::new()),
        );
        (
            Round {
                storage,
                engine,
                procedure,
            },
            events,
        )
    }

    fn submit(round: &Round, items: &[(&Event, u32)]) -> WishList {
        let order = i64::try_from(round.storage.wish_list_count().unwrap()).unwrap();
        round
            .storage
            .save_wish_list(WishList::new(
                round.procedure.id,
                ParticipantId::new(),
                ParticipantId::new(),
                round.procedure.mandator_id,
                items.iter().map(|(e, p)| WishItem::new(e.id, *p)).collect(),
                test_instant() + chrono::Duration::seconds(order),
            ))
            .unwrap()
    }

    #[test]
    fn every_list_gets_its_first_choice_when_seats_suffice() {
        let (round, events) = round(&[3, 3], Arc::new(FixedSeed(1)));
        for _ in 0..3 {
            submit(&round, &[(&events[0], 1), (&events[1], 2)]);
        }

        let report = round.engine.draw(&round.procedure.id).unwrap();
        assert_eq!(report.grants.len(), 3);
        assert!(report.grants.iter().all(|g| g.event_id == events[0].id));
        assert!(report.missed.is_empty());
        assert_eq!(report.rounds_run, 1);
    }

    #[test]
    fn draw_marks_completion_and_clears_the_checkpoint() {
        let (round, events) = round(&[1], Arc::new(FixedSeed(1)));
        submit(&round, &[(&events[0], 1)]);
        round.engine.draw(&round.procedure.id).unwrap();

        let procedure = round.storage.procedure(&round.procedure.id).unwrap();
        assert_eq!(procedure.state, RoundState::Drawn);
        assert!(procedure.draw_completed_at.is_some());
        assert!(round.storage.checkpoint(&round.procedure.id).unwrap().is_none());
    }

    #[test]
    fn second_draw_is_rejected_and_writes_nothing() {
        let (round, events) = round(&[5], Arc::new(FixedSeed(1)));
        submit(&round, &[(&events[0], 1)]);
        round.engine.draw(&round.procedure.id).unwrap();

        let error = round.engine.draw(&round.procedure.id).unwrap_err();
        assert!(matches!(error, EnrollmentError::AlreadyDrawn { state: RoundState::Drawn, .. }));
        assert_eq!(round.storage.grant_count().unwrap(), 1);
    }

    #[test]
    fn one_seed_is_drawn_per_lottery_round() {
        let seeds = Arc::new(SeedSequence::starting_at(10));
        let (round, events) = round(&[1, 1], seeds.clone());
        submit(&round, &[(&events[0], 1), (&events[1], 2)]);
        submit(&round, &[(&events[0], 1)]);

        let report = round.engine.draw(&round.procedure.id).unwrap();
        assert_eq!(seeds.issued(), u64::try_from(report.rounds_run).unwrap());
    }

    #[test]
    fn same_seed_same_outcome() {
        let winner = |seed| {
            let (round, events) = round(&[1], Arc::new(FixedSeed(seed)));
            let lists: Vec<WishList> = (0..5).map(|_| submit(&round, &[(&events[0], 1)])).collect();
            let report = round.engine.draw(&round.procedure.id).unwrap();
            let granted = report.grants[0].participant_id;
            lists.iter().position(|l| l.participant_id == granted).unwrap()
        };
        assert_eq!(winner(42), winner(42));
    }

    #[test]
    fn resume_refuses_rounds_that_were_not_interrupted() {
        let (round, _) = round(&[1], Arc::new(FixedSeed(1)));
        assert!(matches!(
            round.engine.resume(&round.procedure.id),
            Err(EnrollmentError::InvalidInput(_))
        ));
    }

    #[test]
    fn fifo_procedures_cannot_be_drawn() {
        let (round, events) = round(&[1], Arc::new(FixedSeed(1)));
        let fifo = round
            .storage
            .save_procedure(Procedure::fifo("Walk-in", MandatorId::new(), vec![events[0].id]))
            .unwrap();
        assert!(matches!(
            round.engine.draw(&fifo.id),
            Err(EnrollmentError::WrongProcedure { kind: ProcedureKind::Fifo, .. })
        ));
    }
}
