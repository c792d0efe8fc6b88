//! Enrollment service - the facade callers talk to.
//!
//! Loads the procedure, looks up its kind's logic and routes the request:
//! 1. Registrations go to the [`Registrar`] (Fifo, Confirm)
//! 2. Wish lists go to the [`WishListDesk`] (Draw)
//! 3. Draw, notification and close steps are exposed for administrative use;
//!    the round controller calls the same components on its own schedule

use crate::controller::{
    ControllerEnvironment, ControllerState, ControllerStore, RoundController, close_round,
};
use crate::eligibility::EligibilityGate;
use crate::engine::{AllocationEngine, DrawReport};
use crate::error::Result;
use crate::ledger::SeatLedger;
use crate::locks::KeyedLocks;
use crate::mail::MailSender;
use crate::notification::{DispatchSummary, NotificationDispatcher};
use crate::procedure::{ProcedureContext, logic_for};
use crate::registration::{Registrar, RegistrationRequest};
use crate::revocation::Revocation;
use crate::storage::Storage;
use crate::template::TemplateService;
use crate::types::{Grant, ProcedureId, WishList};
use crate::wishlist::{WishListDesk, WishListSubmission};
use coursedraw_core::environment::{Clock, RandomSource};
use coursedraw_runtime::Store;
use std::sync::Arc;

/// External collaborators the enrollment core is built on
#[derive(Clone)]
pub struct Collaborators {
    /// Object store
    pub storage: Arc<dyn Storage>,
    /// Rule check for seat requests
    pub eligibility: Arc<dyn EligibilityGate>,
    /// Mail transport
    pub mailer: Arc<dyn MailSender>,
    /// Mail wording
    pub templates: Arc<dyn TemplateService>,
    /// Per-round lottery seeds
    pub random: Arc<dyn RandomSource>,
    /// Time source
    pub clock: Arc<dyn Clock>,
}

/// Mail addresses used by the core
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailAddresses {
    /// Sender of every mail
    pub from: String,
    /// Recipient of the draw audit log
    pub audit: String,
}

/// Routes requests through the procedure dispatch table
pub struct EnrollmentService {
    storage: Arc<dyn Storage>,
    clock: Arc<dyn Clock>,
    ledger: Arc<SeatLedger>,
    registrar: Registrar,
    desk: WishListDesk,
    engine: Arc<AllocationEngine>,
    dispatcher: Arc<NotificationDispatcher>,
    revocation: Revocation,
}

impl EnrollmentService {
    /// Wire every component over `collaborators`
    #[must_use]
    pub fn new(collaborators: Collaborators, addresses: &MailAddresses) -> Self {
        let Collaborators {
            storage,
            eligibility,
            mailer,
            templates,
            random,
            clock,
        } = collaborators;

        let round_locks = Arc::new(KeyedLocks::new());
        let ledger = Arc::new(SeatLedger::new(Arc::clone(&storage), Arc::clone(&clock)));
        let registrar = Registrar::new(
            Arc::clone(&storage),
            Arc::clone(&ledger),
            Arc::clone(&eligibility),
            Arc::clone(&mailer),
            Arc::clone(&templates),
            addresses.from.clone(),
        );
        let desk = WishListDesk::new(
            Arc::clone(&storage),
            eligibility,
            Arc::clone(&clock),
            Arc::clone(&round_locks),
        );
        let engine = Arc::new(AllocationEngine::new(
            Arc::clone(&storage),
            Arc::clone(&ledger),
            random,
            Arc::clone(&clock),
            Arc::clone(&round_locks),
        ));
        let dispatcher = Arc::new(NotificationDispatcher::new(
            Arc::clone(&storage),
            mailer,
            templates,
            Arc::clone(&clock),
            addresses.from.clone(),
            addresses.audit.clone(),
        ));
        let revocation = Revocation::new(Arc::clone(&storage), Arc::clone(&ledger), round_locks);

        Self {
            storage,
            clock,
            ledger,
            registrar,
            desk,
            engine,
            dispatcher,
            revocation,
        }
    }

    const fn context(&self) -> ProcedureContext<'_> {
        ProcedureContext {
            registrar: &self.registrar,
            desk: &self.desk,
        }
    }

    /// Register for a single seat through a Fifo or Confirm procedure
    ///
    /// # Errors
    ///
    /// [`crate::EnrollmentError::WrongProcedure`] for draw procedures, otherwise
    /// whatever [`Registrar::register`] reports.
    pub fn register(&self, request: RegistrationRequest) -> Result<Grant> {
        let procedure = self.storage.procedure(&request.procedure_id)?;
        logic_for(procedure.kind).register(self.context(), &procedure, &request)
    }

    /// Submit a wish list to a draw procedure
    ///
    /// # Errors
    ///
    /// [`crate::EnrollmentError::WrongProcedure`] for non-draw procedures, otherwise
    /// whatever [`WishListDesk::submit`] reports.
    pub fn submit_wish_list(&self, submission: WishListSubmission) -> Result<WishList> {
        let procedure = self.storage.procedure(&submission.procedure_id)?;
        logic_for(procedure.kind).submit_wish_list(self.context(), &procedure, submission)
    }

    /// Run the draw now, regardless of the draw instant
    ///
    /// # Errors
    ///
    /// See [`AllocationEngine::draw`].
    pub fn draw(&self, procedure_id: &ProcedureId) -> Result<DrawReport> {
        self.engine.draw(procedure_id)
    }

    /// Finish an interrupted draw
    ///
    /// # Errors
    ///
    /// See [`AllocationEngine::resume`].
    pub fn resume(&self, procedure_id: &ProcedureId) -> Result<DrawReport> {
        self.engine.resume(procedure_id)
    }

    /// Mail the participants of a drawn round
    ///
    /// # Errors
    ///
    /// See [`NotificationDispatcher::dispatch`].
    pub fn dispatch(&self, procedure_id: &ProcedureId) -> Result<DispatchSummary> {
        self.dispatcher.dispatch(procedure_id)
    }

    /// Purge a notified round's wish lists and close it
    ///
    /// # Errors
    ///
    /// See [`close_round`].
    pub fn close(&self, procedure_id: &ProcedureId) -> Result<usize> {
        close_round(self.storage.as_ref(), self.clock.as_ref(), procedure_id)
    }

    /// Seat occupancy queries
    #[must_use]
    pub fn ledger(&self) -> &SeatLedger {
        &self.ledger
    }

    /// Administrative removal
    #[must_use]
    pub const fn revocation(&self) -> &Revocation {
        &self.revocation
    }

    /// Underlying storage
    #[must_use]
    pub const fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// A round controller store sharing this service's components
    #[must_use]
    pub fn controller_store(&self) -> ControllerStore {
        Store::new(
            ControllerState::default(),
            RoundController::new(),
            ControllerEnvironment {
                storage: Arc::clone(&self.storage),
                engine: Arc::clone(&self.engine),
                dispatcher: Arc::clone(&self.dispatcher),
                clock: Arc::clone(&self.clock),
            },
        )
    }
}

impl std::fmt::Debug for EnrollmentService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnrollmentService")
            .field("ledger", &self.ledger)
            .field("registrar", &self.registrar)
            .finish_non_exhaustive()
    }
}
