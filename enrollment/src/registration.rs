//! Single-seat registration (first come, first served and admin-confirmed).
//!
//! Checks eligibility, takes the seat through the [`SeatLedger`] and mails a
//! confirmation. The capacity check and the insert happen under the event
//! lock inside the ledger, so two registrations racing for the last seat
//! cannot both win.

use crate::eligibility::EligibilityGate;
use crate::error::{EnrollmentError, Result};
use crate::ledger::{SeatLedger, SeatRequest};
use crate::mail::{MailMessage, MailSender};
use crate::storage::Storage;
use crate::template::{TemplateContext, TemplateKind, TemplateService};
use crate::types::{
    Event, EventId, Grant, Participant, ParticipantId, Procedure, ProcedureId, RoundState,
};
use std::sync::Arc;
use tracing::{info, warn};

/// A request for one seat through a procedure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistrationRequest {
    /// Procedure to register through
    pub procedure_id: ProcedureId,
    /// Event to register for
    pub event_id: EventId,
    /// Who gets the seat
    pub participant_id: ParticipantId,
    /// Who asked for it
    pub initiator_id: ParticipantId,
    /// Register for the exam only, without occupying a seat
    pub exam_only: bool,
}

/// Grants single seats and confirms them by mail
pub struct Registrar {
    storage: Arc<dyn Storage>,
    ledger: Arc<SeatLedger>,
    eligibility: Arc<dyn EligibilityGate>,
    mailer: Arc<dyn MailSender>,
    templates: Arc<dyn TemplateService>,
    from_address: String,
}

impl Registrar {
    /// Create a registrar
    #[must_use]
    pub fn new(
        storage: Arc<dyn Storage>,
        ledger: Arc<SeatLedger>,
        eligibility: Arc<dyn EligibilityGate>,
        mailer: Arc<dyn MailSender>,
        templates: Arc<dyn TemplateService>,
        from_address: impl Into<String>,
    ) -> Self {
        Self {
            storage,
            ledger,
            eligibility,
            mailer,
            templates,
            from_address: from_address.into(),
        }
    }

    /// Register one participant for one event of `procedure`
    ///
    /// `path` labels the grant in metrics (`fifo`, `confirm`).
    ///
    /// # Errors
    ///
    /// - [`EnrollmentError::AlreadyDrawn`] if the procedure is no longer open
    /// - [`EnrollmentError::InvalidInput`] if the procedure does not offer the event
    /// - [`EnrollmentError::NotFound`] for an unknown event, participant or initiator
    /// - [`EnrollmentError::EligibilityDenied`] if the gate rejects the participant
    /// - [`EnrollmentError::CapacityExceeded`] if no seat is left
    /// - [`EnrollmentError::AlreadyRegistered`] if the participant already holds a seat
    pub fn register(
        &self,
        procedure: &Procedure,
        request: &RegistrationRequest,
        path: &'static str,
    ) -> Result<Grant> {
        if procedure.state != RoundState::Open {
            return Err(EnrollmentError::AlreadyDrawn {
                procedure_id: procedure.id,
                state: procedure.state,
            });
        }
        if !procedure.offers(&request.event_id) {
            return Err(EnrollmentError::InvalidInput(format!(
                "event {} is not offered by procedure {}",
                request.event_id, procedure.id
            )));
        }

        let event = self.storage.event(&request.event_id)?;
        let participant = self.storage.participant(&request.participant_id)?;
        self.storage.participant(&request.initiator_id)?;

        if !self.eligibility.is_allowed(&participant, procedure, &event) {
            return Err(EnrollmentError::EligibilityDenied {
                participant_id: participant.id,
                event_id: event.id,
            });
        }

        let grant = self.ledger.try_occupy(SeatRequest {
            participant_id: participant.id,
            event_id: event.id,
            procedure_id: Some(procedure.id),
            mandator_id: procedure.mandator_id,
            exam_only: request.exam_only,
        })?;
        crate::metrics::record_grant(if request.exam_only { "exam_only" } else { path });
        info!(
            grant_id = %grant.id,
            participant_id = %participant.id,
            event = %event.name,
            procedure = %procedure.name,
            exam_only = grant.exam_only,
            "Registration confirmed"
        );

        self.confirm(procedure, &participant, &event);
        Ok(grant)
    }

    /// Mail the confirmation; failures are logged and never undo the grant
    fn confirm(&self, procedure: &Procedure, participant: &Participant, event: &Event) {
        let mut context = TemplateContext::new();
        context.insert("name".to_string(), participant.name.clone());
        context.insert("event".to_string(), event.name.clone());
        context.insert("procedure".to_string(), procedure.name.clone());

        let sent = self
            .templates
            .render(TemplateKind::FifoConfirmation, &context)
            .map_err(|e| e.to_string())
            .and_then(|rendered| {
                self.mailer
                    .send(&MailMessage {
                        to: participant.email.clone(),
                        from: self.from_address.clone(),
                        subject: rendered.subject,
                        body: rendered.body,
                    })
                    .map_err(|e| e.to_string())
            });
        crate::metrics::record_notification(sent.is_ok());
        if let Err(e) = sent {
            warn!(
                participant_id = %participant.id,
                to = %participant.email,
                error = %e,
                "Registration confirmation failed"
            );
        }
    }
}

impl std::fmt::Debug for Registrar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registrar")
            .field("from_address", &self.from_address)
            .finish_non_exhaustive()
    }
}
