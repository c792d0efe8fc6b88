//! Procedure kinds and their dispatch table.
//!
//! Each [`ProcedureKind`] has one [`ProcedureLogic`] implementation, chosen
//! by [`logic_for`]. Operations a kind does not support fall through to the
//! trait defaults, which reject with [`EnrollmentError::WrongProcedure`].

use crate::error::{EnrollmentError, Result};
use crate::registration::{Registrar, RegistrationRequest};
use crate::types::{Grant, Procedure, ProcedureKind, WishList};
use crate::wishlist::{WishListDesk, WishListSubmission};

/// Collaborators a procedure kind may route to
#[derive(Debug, Clone, Copy)]
pub struct ProcedureContext<'a> {
    /// Single-seat registrations
    pub registrar: &'a Registrar,
    /// Wish list submissions
    pub desk: &'a WishListDesk,
}

/// Behaviour of one procedure kind
pub trait ProcedureLogic: Send + Sync {
    /// The kind this logic implements
    fn kind(&self) -> ProcedureKind;

    /// Register for a single seat
    ///
    /// # Errors
    ///
    /// [`EnrollmentError::WrongProcedure`] unless the kind supports it.
    fn register(
        &self,
        _ctx: ProcedureContext<'_>,
        _procedure: &Procedure,
        _request: &RegistrationRequest,
    ) -> Result<Grant> {
        Err(EnrollmentError::WrongProcedure {
            kind: self.kind(),
            operation: "registration",
        })
    }

    /// Submit a wish list
    ///
    /// # Errors
    ///
    /// [`EnrollmentError::WrongProcedure`] unless the kind supports it.
    fn submit_wish_list(
        &self,
        _ctx: ProcedureContext<'_>,
        _procedure: &Procedure,
        _submission: WishListSubmission,
    ) -> Result<WishList> {
        Err(EnrollmentError::WrongProcedure {
            kind: self.kind(),
            operation: "wish list submission",
        })
    }
}

/// First come, first served
#[derive(Debug, Clone, Copy, Default)]
pub struct FifoLogic;

impl ProcedureLogic for FifoLogic {
    fn kind(&self) -> ProcedureKind {
        ProcedureKind::Fifo
    }

    fn register(
        &self,
        ctx: ProcedureContext<'_>,
        procedure: &Procedure,
        request: &RegistrationRequest,
    ) -> Result<Grant> {
        ctx.registrar.register(procedure, request, "fifo")
    }
}

/// Ranked wish lists resolved by lottery
#[derive(Debug, Clone, Copy, Default)]
pub struct DrawLogic;

impl ProcedureLogic for DrawLogic {
    fn kind(&self) -> ProcedureKind {
        ProcedureKind::Draw
    }

    fn submit_wish_list(
        &self,
        ctx: ProcedureContext<'_>,
        _procedure: &Procedure,
        submission: WishListSubmission,
    ) -> Result<WishList> {
        ctx.desk.submit(submission)
    }
}

/// Registration entered by someone other than the participant
#[derive(Debug, Clone, Copy, Default)]
pub struct ConfirmLogic;

impl ProcedureLogic for ConfirmLogic {
    fn kind(&self) -> ProcedureKind {
        ProcedureKind::Confirm
    }

    fn register(
        &self,
        ctx: ProcedureContext<'_>,
        procedure: &Procedure,
        request: &RegistrationRequest,
    ) -> Result<Grant> {
        if request.initiator_id == request.participant_id {
            return Err(EnrollmentError::InvalidInput(
                "confirm procedures need an initiator other than the participant".to_string(),
            ));
        }
        ctx.registrar.register(procedure, request, "confirm")
    }
}

/// The logic for a procedure kind
#[must_use]
pub fn logic_for(kind: ProcedureKind) -> &'static dyn ProcedureLogic {
    match kind {
        ProcedureKind::Fifo => &FifoLogic,
        ProcedureKind::Draw => &DrawLogic,
        ProcedureKind::Confirm => &ConfirmLogic,
    }
}
