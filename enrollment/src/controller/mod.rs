//! Round controller: the `OPEN → DRAWN → CLOSED` lifecycle.
//!
//! A [`Reducer`] run by the runtime `Store`. Each `Tick` loads the draw
//! procedures that are not closed and picks the next step for each from
//! its durable markers:
//!
//! | state  | markers                                   | step      |
//! |--------|-------------------------------------------|-----------|
//! | OPEN   | `draw_at <= now`                          | draw      |
//! | DRAWN  | no `draw_completed_at`                    | resume    |
//! | DRAWN  | `draw_completed_at`, no `notified_at`     | notify    |
//! | DRAWN  | `notified_at`                             | close     |
//!
//! Completion of one step immediately schedules the next, so a due round
//! goes all the way to CLOSED within the tick that found it due. A step
//! that fails leaves the markers as they were and the next tick retries
//! from there. Rounds already being worked on in this process are skipped.
//!
//! Notification is driven by `notified_at` alone, so it runs once per
//! round unless writing that marker fails, in which case the batch is
//! mailed again on the next tick.
//!
//! Reports of a closed round stay in [`ControllerState`] until the next
//! tick, which forgets them.

pub mod scheduler;

use crate::engine::{AllocationEngine, DrawReport};
use crate::error::{EnrollmentError, Result};
use crate::notification::{DispatchSummary, NotificationDispatcher};
use crate::storage::Storage;
use crate::types::{Procedure, ProcedureId, ProcedureKind, RoundState};
use coursedraw_core::effect::Effect;
use coursedraw_core::environment::Clock;
use coursedraw_core::reducer::Reducer;
use coursedraw_core::{DateTime, SmallVec, Utc, smallvec};
use coursedraw_runtime::Store;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, warn};

pub use scheduler::Scheduler;

// ============================================================================
// Steps and phases
// ============================================================================

/// Work a round needs next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundStep {
    /// Freeze the round and run the lottery
    Draw,
    /// Finish an interrupted lottery
    Resume,
    /// Mail participants and the audit log
    Notify,
    /// Purge wish lists and move to CLOSED
    Close,
}

impl RoundStep {
    /// The next step for `procedure` at `now`, if any
    #[must_use]
    pub fn next(procedure: &Procedure, now: DateTime<Utc>) -> Option<Self> {
        if procedure.kind != ProcedureKind::Draw {
            return None;
        }
        match procedure.state {
            RoundState::Open => procedure.is_due(now).then_some(Self::Draw),
            RoundState::Drawn if procedure.draw_completed_at.is_none() => Some(Self::Resume),
            RoundState::Drawn if procedure.notified_at.is_none() => Some(Self::Notify),
            RoundState::Drawn => Some(Self::Close),
            RoundState::Closed => None,
        }
    }

    const fn phase(self) -> RoundPhase {
        match self {
            Self::Draw => RoundPhase::Drawing,
            Self::Resume => RoundPhase::Resuming,
            Self::Notify => RoundPhase::Notifying,
            Self::Close => RoundPhase::Closing,
        }
    }
}

/// What this process is doing with a round
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundPhase {
    /// Lottery running
    Drawing,
    /// Interrupted lottery being finished
    Resuming,
    /// Mails going out
    Notifying,
    /// Wish lists being purged
    Closing,
    /// Done
    Closed,
}

impl RoundPhase {
    /// Whether work for the round is underway
    #[must_use]
    pub const fn is_in_flight(self) -> bool {
        !matches!(self, Self::Closed)
    }
}

// ============================================================================
// State
// ============================================================================

/// Controller state
#[derive(Debug, Clone, Default)]
pub struct ControllerState {
    /// Instant of the latest tick
    pub last_check: Option<DateTime<Utc>>,
    /// Instant of the tick before that
    pub previous_check: Option<DateTime<Utc>>,
    /// Per-round progress in this process
    pub phases: HashMap<ProcedureId, RoundPhase>,
    /// Last failure per round, cleared when the round advances
    pub errors: HashMap<ProcedureId, String>,
    /// Last draw report per round
    pub reports: HashMap<ProcedureId, DrawReport>,
    /// Last dispatch summary per round
    pub notifications: HashMap<ProcedureId, DispatchSummary>,
    /// Last failure to load procedures
    pub load_error: Option<String>,
}

impl ControllerState {
    /// Current phase of a round
    #[must_use]
    pub fn phase(&self, procedure_id: &ProcedureId) -> Option<RoundPhase> {
        self.phases.get(procedure_id).copied()
    }

    /// Whether a step for the round is underway
    #[must_use]
    pub fn is_in_flight(&self, procedure_id: &ProcedureId) -> bool {
        self.phase(procedure_id).is_some_and(RoundPhase::is_in_flight)
    }

    /// The "since last check" window covered by the latest tick
    #[must_use]
    pub fn window(&self) -> Option<(Option<DateTime<Utc>>, DateTime<Utc>)> {
        self.last_check.map(|to| (self.previous_check, to))
    }

    /// Drop everything kept for rounds that reached CLOSED
    fn forget_closed(&mut self) {
        let closed: Vec<ProcedureId> = self
            .phases
            .iter()
            .filter(|(_, phase)| **phase == RoundPhase::Closed)
            .map(|(id, _)| *id)
            .collect();
        for id in &closed {
            self.phases.remove(id);
            self.errors.remove(id);
            self.reports.remove(id);
            self.notifications.remove(id);
        }
    }
}

// ============================================================================
// Actions
// ============================================================================

/// Controller actions
#[derive(Debug, Clone)]
pub enum RoundAction {
    // Commands
    /// Periodic scheduler tick
    Tick {
        /// Current time
        now: DateTime<Utc>,
    },

    // Events
    /// Non-closed draw procedures and their next steps
    RoundsLoaded {
        /// Tick instant the steps were computed for
        now: DateTime<Utc>,
        /// Rounds that need work
        rounds: Vec<(ProcedureId, RoundStep)>,
    },
    /// Procedures could not be loaded
    LoadFailed {
        /// Error message
        error: String,
    },
    /// Lottery finished (fresh or resumed)
    DrawCompleted {
        /// Outcome
        report: DrawReport,
    },
    /// Lottery stopped on an error
    DrawFailed {
        /// Round
        procedure_id: ProcedureId,
        /// Error message
        error: String,
    },
    /// Participants were mailed
    NotificationsDispatched {
        /// Round
        procedure_id: ProcedureId,
        /// Outcome
        summary: DispatchSummary,
    },
    /// Dispatch could not run
    NotificationFailed {
        /// Round
        procedure_id: ProcedureId,
        /// Error message
        error: String,
    },
    /// Wish lists purged and round CLOSED
    RoundClosed {
        /// Round
        procedure_id: ProcedureId,
        /// Wish lists deleted
        purged: usize,
    },
    /// Purge or transition failed
    CloseFailed {
        /// Round
        procedure_id: ProcedureId,
        /// Error message
        error: String,
    },
}

// ============================================================================
// Environment
// ============================================================================

/// Controller dependencies
#[derive(Clone)]
pub struct ControllerEnvironment {
    /// Storage
    pub storage: Arc<dyn Storage>,
    /// Lottery
    pub engine: Arc<AllocationEngine>,
    /// Mail
    pub dispatcher: Arc<NotificationDispatcher>,
    /// Time source for the `closed_at` marker
    pub clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for ControllerEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControllerEnvironment")
            .field("engine", &self.engine)
            .field("dispatcher", &self.dispatcher)
            .finish_non_exhaustive()
    }
}

/// Store running the round controller
pub type ControllerStore =
    Store<ControllerState, RoundAction, ControllerEnvironment, RoundController>;

// ============================================================================
// Reducer
// ============================================================================

/// Round lifecycle reducer
#[derive(Debug, Clone, Copy, Default)]
pub struct RoundController;

impl RoundController {
    /// Create the controller
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn load(env: &ControllerEnvironment, now: DateTime<Utc>) -> Effect<RoundAction> {
        let storage = Arc::clone(&env.storage);
        Effect::future(async move {
            let loaded = blocking(move || {
                let procedures = storage.procedures()?;
                Ok(procedures
                    .iter()
                    .filter_map(|p| RoundStep::next(p, now).map(|step| (p.id, step)))
                    .collect::<Vec<_>>())
            })
            .await;
            Some(match loaded {
                Ok(rounds) => RoundAction::RoundsLoaded { now, rounds },
                Err(error) => RoundAction::LoadFailed { error },
            })
        })
    }

    fn step(
        env: &ControllerEnvironment,
        procedure_id: ProcedureId,
        step: RoundStep,
    ) -> Effect<RoundAction> {
        match step {
            RoundStep::Draw | RoundStep::Resume => {
                let engine = Arc::clone(&env.engine);
                Effect::future(async move {
                    let drawn = blocking(move || {
                        if step == RoundStep::Draw {
                            engine.draw(&procedure_id)
                        } else {
                            engine.resume(&procedure_id)
                        }
                    })
                    .await;
                    Some(match drawn {
                        Ok(report) => RoundAction::DrawCompleted { report },
                        Err(error) => RoundAction::DrawFailed {
                            procedure_id,
                            error,
                        },
                    })
                })
            },
            RoundStep::Notify => {
                let dispatcher = Arc::clone(&env.dispatcher);
                Effect::future(async move {
                    let dispatched = blocking(move || dispatcher.dispatch(&procedure_id)).await;
                    Some(match dispatched {
                        Ok(summary) => RoundAction::NotificationsDispatched {
                            procedure_id,
                            summary,
                        },
                        Err(error) => RoundAction::NotificationFailed {
                            procedure_id,
                            error,
                        },
                    })
                })
            },
            RoundStep::Close => {
                let storage = Arc::clone(&env.storage);
                let clock = Arc::clone(&env.clock);
                Effect::future(async move {
                    let closed = blocking(move || {
                        close_round(storage.as_ref(), clock.as_ref(), &procedure_id)
                    })
                    .await;
                    Some(match closed {
                        Ok(purged) => RoundAction::RoundClosed {
                            procedure_id,
                            purged,
                        },
                        Err(error) => RoundAction::CloseFailed {
                            procedure_id,
                            error,
                        },
                    })
                })
            },
        }
    }

    /// Enter `step` for a round and return its effect
    fn advance(
        state: &mut ControllerState,
        env: &ControllerEnvironment,
        procedure_id: ProcedureId,
        step: RoundStep,
    ) -> Effect<RoundAction> {
        state.phases.insert(procedure_id, step.phase());
        Self::step(env, procedure_id, step)
    }

    fn fail(state: &mut ControllerState, procedure_id: ProcedureId, error: String) {
        state.phases.remove(&procedure_id);
        state.errors.insert(procedure_id, error);
    }
}

impl Reducer for RoundController {
    type State = ControllerState;
    type Action = RoundAction;
    type Environment = ControllerEnvironment;

    fn reduce(
        &self,
        state: &mut ControllerState,
        action: RoundAction,
        env: &ControllerEnvironment,
    ) -> SmallVec<[Effect<RoundAction>; 4]> {
        match action {
            RoundAction::Tick { now } => {
                state.forget_closed();
                state.previous_check = state.last_check;
                state.last_check = Some(now);
                smallvec![Self::load(env, now)]
            },

            RoundAction::RoundsLoaded { now, rounds } => {
                state.load_error = None;
                let mut effects = Vec::with_capacity(rounds.len());
                for (procedure_id, step) in rounds {
                    if state.is_in_flight(&procedure_id) {
                        continue;
                    }
                    info!(procedure_id = %procedure_id, ?step, %now, "Advancing round");
                    effects.push(Self::advance(state, env, procedure_id, step));
                }
                if effects.is_empty() {
                    SmallVec::new()
                } else {
                    smallvec![Effect::merge(effects)]
                }
            },

            RoundAction::LoadFailed { error } => {
                error!(error = %error, "Could not load procedures");
                state.load_error = Some(error);
                SmallVec::new()
            },

            RoundAction::DrawCompleted { report } => {
                let procedure_id = report.procedure_id;
                state.errors.remove(&procedure_id);
                state.reports.insert(procedure_id, report);
                smallvec![Self::advance(state, env, procedure_id, RoundStep::Notify)]
            },

            RoundAction::NotificationsDispatched {
                procedure_id,
                summary,
            } => {
                state.errors.remove(&procedure_id);
                state.notifications.insert(procedure_id, summary);
                smallvec![Self::advance(state, env, procedure_id, RoundStep::Close)]
            },

            RoundAction::RoundClosed {
                procedure_id,
                purged,
            } => {
                info!(procedure_id = %procedure_id, purged, "Round closed");
                state.errors.remove(&procedure_id);
                state.phases.insert(procedure_id, RoundPhase::Closed);
                SmallVec::new()
            },

            RoundAction::DrawFailed {
                procedure_id,
                error,
            } => {
                error!(procedure_id = %procedure_id, error = %error, "Draw failed");
                Self::fail(state, procedure_id, error);
                SmallVec::new()
            },

            RoundAction::NotificationFailed {
                procedure_id,
                error,
            } => {
                warn!(procedure_id = %procedure_id, error = %error, "Notification dispatch failed");
                Self::fail(state, procedure_id, error);
                SmallVec::new()
            },

            RoundAction::CloseFailed {
                procedure_id,
                error,
            } => {
                warn!(procedure_id = %procedure_id, error = %error, "Closing round failed");
                Self::fail(state, procedure_id, error);
                SmallVec::new()
            },
        }
    }
}

/// Purge a notified round's wish lists and move it to CLOSED
///
/// Returns the number of wish lists deleted.
///
/// # Errors
///
/// - [`EnrollmentError::InvalidInput`] if participants have not been notified
///   or the round is not DRAWN
/// - [`EnrollmentError::Storage`] on persistence failures
pub fn close_round(
    storage: &dyn Storage,
    clock: &dyn Clock,
    procedure_id: &ProcedureId,
) -> Result<usize> {
    let procedure = storage.procedure(procedure_id)?;
    if procedure.notified_at.is_none() {
        return Err(EnrollmentError::InvalidInput(format!(
            "procedure {procedure_id} cannot close before participants are notified"
        )));
    }

    let wish_lists = storage.wish_lists_for_procedure(procedure_id)?;
    for list in &wish_lists {
        storage.delete_wish_list(&list.id)?;
    }
    storage.delete_checkpoint(procedure_id)?;

    if !storage.transition_round(procedure_id, RoundState::Drawn, RoundState::Closed)? {
        let state = storage.procedure(procedure_id)?.state;
        return Err(EnrollmentError::InvalidInput(format!(
            "procedure {procedure_id} is {state}, expected DRAWN"
        )));
    }
    let now = clock.now();
    storage.update_procedure(procedure_id, &mut |p| p.closed_at = Some(now))?;
    Ok(wish_lists.len())
}

/// Run storage-bound work off the async executor
async fn blocking<T, F>(work: F) -> std::result::Result<T, String>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(work).await {
        Ok(result) => result.map_err(|e| e.to_string()),
        Err(e) => Err(format!("worker task failed: {e}")),
    }
}
