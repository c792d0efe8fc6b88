//! Mock collaborators and a fixture for tests.
//!
//! - [`RecordingMailSender`]: keeps every mail, can be told to fail for an address
//! - [`DenyList`]: eligibility gate rejecting listed participant/event pairs
//! - [`FaultyStorage`]: in-memory storage that can start failing grant writes,
//!   to interrupt a draw halfway
//! - [`EnrollmentFixture`]: a fully wired in-memory service with a manual
//!   clock and a deterministic seed sequence

use crate::app::{Collaborators, EnrollmentService, MailAddresses};
use crate::eligibility::EligibilityGate;
use crate::error::Result;
use crate::mail::{MailError, MailMessage, MailSender};
use crate::storage::{InMemoryStorage, Storage, StorageError, StorageResult};
use crate::template::BuiltinTemplates;
use crate::types::{
    Capacity, DrawCheckpoint, Event, EventId, Grant, GrantId, MandatorId, Participant,
    ParticipantId, Procedure, ProcedureId, RoundState, WishItem, WishList, WishListId,
};
use crate::wishlist::WishListSubmission;
use chrono::{DateTime, Utc};
use coursedraw_testing::{ManualClock, SeedSequence, test_instant};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

// ============================================================================
// Mail
// ============================================================================

/// Mail sender that records instead of delivering
#[derive(Debug, Default)]
pub struct RecordingMailSender {
    sent: Mutex<Vec<MailMessage>>,
    failing: Mutex<HashSet<String>>,
}

impl RecordingMailSender {
    /// Create a sender that accepts everything
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every send to `address` fail
    pub fn fail_for(&self, address: impl Into<String>) {
        self.failing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(address.into());
    }

    /// Every successfully sent mail, in order
    #[must_use]
    pub fn sent(&self) -> Vec<MailMessage> {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Mails successfully sent to `address`
    #[must_use]
    pub fn sent_to(&self, address: &str) -> Vec<MailMessage> {
        self.sent()
            .into_iter()
            .filter(|message| message.to == address)
            .collect()
    }
}

impl MailSender for RecordingMailSender {
    fn send(&self, message: &MailMessage) -> std::result::Result<(), MailError> {
        if self
            .failing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&message.to)
        {
            return Err(MailError::Delivery(format!("mailbox {} unavailable", message.to)));
        }
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message.clone());
        Ok(())
    }
}

// ============================================================================
// Eligibility
// ============================================================================

/// Gate rejecting specific participant/event pairs
#[derive(Debug, Clone, Default)]
pub struct DenyList {
    denied: HashSet<(ParticipantId, EventId)>,
}

impl DenyList {
    /// Create a gate that allows everything
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject `participant` for `event`
    #[must_use]
    pub fn deny(mut self, participant: ParticipantId, event: EventId) -> Self {
        self.denied.insert((participant, event));
        self
    }
}

impl EligibilityGate for DenyList {
    fn is_allowed(&self, participant: &Participant, _procedure: &Procedure, event: &Event) -> bool {
        !self.denied.contains(&(participant.id, event.id))
    }
}

// ============================================================================
// Storage
// ============================================================================

/// In-memory storage whose grant writes can be made to fail
#[derive(Debug, Default)]
pub struct FaultyStorage {
    inner: InMemoryStorage,
    armed: AtomicBool,
    grants_left: AtomicUsize,
}

impl FaultyStorage {
    /// Create a storage that behaves normally
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept `count` more grants, then fail every grant write
    pub fn fail_grants_after(&self, count: usize) {
        self.grants_left.store(count, Ordering::SeqCst);
        self.armed.store(true, Ordering::SeqCst);
    }

    /// Stop failing
    pub fn heal(&self) {
        self.armed.store(false, Ordering::SeqCst);
    }

    /// The healthy storage underneath
    #[must_use]
    pub const fn inner(&self) -> &InMemoryStorage {
        &self.inner
    }
}

impl Storage for FaultyStorage {
    fn participant(&self, id: &ParticipantId) -> StorageResult<Participant> {
        self.inner.participant(id)
    }

    fn save_participant(&self, participant: Participant) -> StorageResult<Participant> {
        self.inner.save_participant(participant)
    }

    fn event(&self, id: &EventId) -> StorageResult<Event> {
        self.inner.event(id)
    }

    fn save_event(&self, event: Event) -> StorageResult<Event> {
        self.inner.save_event(event)
    }

    fn procedure(&self, id: &ProcedureId) -> StorageResult<Procedure> {
        self.inner.procedure(id)
    }

    fn save_procedure(&self, procedure: Procedure) -> StorageResult<Procedure> {
        self.inner.save_procedure(procedure)
    }

    fn update_procedure(
        &self,
        id: &ProcedureId,
        apply: &mut dyn FnMut(&mut Procedure),
    ) -> StorageResult<Procedure> {
        self.inner.update_procedure(id, apply)
    }

    fn procedures(&self) -> StorageResult<Vec<Procedure>> {
        self.inner.procedures()
    }

    fn transition_round(
        &self,
        id: &ProcedureId,
        from: RoundState,
        to: RoundState,
    ) -> StorageResult<bool> {
        self.inner.transition_round(id, from, to)
    }

    fn delete_procedure(&self, id: &ProcedureId) -> StorageResult<()> {
        self.inner.delete_procedure(id)
    }

    fn save_wish_list(&self, wish_list: WishList) -> StorageResult<WishList> {
        self.inner.save_wish_list(wish_list)
    }

    fn wish_lists_for_procedure(&self, id: &ProcedureId) -> StorageResult<Vec<WishList>> {
        self.inner.wish_lists_for_procedure(id)
    }

    fn wish_lists_for_participant(
        &self,
        procedure_id: &ProcedureId,
        participant_id: &ParticipantId,
    ) -> StorageResult<Vec<WishList>> {
        self.inner.wish_lists_for_participant(procedure_id, participant_id)
    }

    fn delete_wish_list(&self, id: &WishListId) -> StorageResult<()> {
        self.inner.delete_wish_list(id)
    }

    fn save_grant(&self, grant: Grant) -> StorageResult<Grant> {
        if self.armed.load(Ordering::SeqCst)
            && self
                .grants_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
                .is_err()
        {
            return Err(StorageError::Backend("simulated crash".to_string()));
        }
        self.inner.save_grant(grant)
    }

    fn grant(&self, id: &GrantId) -> StorageResult<Grant> {
        self.inner.grant(id)
    }

    fn update_grant(&self, grant: Grant) -> StorageResult<Grant> {
        self.inner.update_grant(grant)
    }

    fn grants_for_event(&self, id: &EventId) -> StorageResult<Vec<Grant>> {
        self.inner.grants_for_event(id)
    }

    fn grants_for_procedure(&self, id: &ProcedureId) -> StorageResult<Vec<Grant>> {
        self.inner.grants_for_procedure(id)
    }

    fn delete_grant(&self, id: &GrantId) -> StorageResult<()> {
        self.inner.delete_grant(id)
    }

    fn save_checkpoint(&self, checkpoint: DrawCheckpoint) -> StorageResult<()> {
        self.inner.save_checkpoint(checkpoint)
    }

    fn checkpoint(&self, procedure_id: &ProcedureId) -> StorageResult<Option<DrawCheckpoint>> {
        self.inner.checkpoint(procedure_id)
    }

    fn delete_checkpoint(&self, procedure_id: &ProcedureId) -> StorageResult<()> {
        self.inner.delete_checkpoint(procedure_id)
    }
}

// ============================================================================
// Fixture
// ============================================================================

/// Address the fixture sends audit mails to
pub const AUDIT_ADDRESS: &str = "audit@example.edu";

/// Address the fixture sends from
pub const FROM_ADDRESS: &str = "registrar@example.edu";

/// In-memory enrollment world for tests
pub struct EnrollmentFixture {
    /// Storage (can be made to fail)
    pub storage: Arc<FaultyStorage>,
    /// Captured mails
    pub mailer: Arc<RecordingMailSender>,
    /// Time, starting at [`test_instant`]
    pub clock: Arc<ManualClock>,
    /// Lottery seeds
    pub seeds: Arc<SeedSequence>,
    /// Tenant every entity belongs to
    pub mandator: MandatorId,
    /// The service under test
    pub service: EnrollmentService,
}

impl EnrollmentFixture {
    /// Fixture with seeds starting at 1 and no eligibility restrictions
    #[must_use]
    pub fn new() -> Self {
        Self::with_seed(1)
    }

    /// Fixture with seeds starting at `seed`
    #[must_use]
    pub fn with_seed(seed: u64) -> Self {
        Self::build(seed, Arc::new(DenyList::new()))
    }

    /// Fixture with a custom eligibility gate
    #[must_use]
    pub fn with_gate(gate: Arc<dyn EligibilityGate>) -> Self {
        Self::build(1, gate)
    }

    fn build(seed: u64, eligibility: Arc<dyn EligibilityGate>) -> Self {
        let storage = Arc::new(FaultyStorage::new());
        let mailer = Arc::new(RecordingMailSender::new());
        let clock = Arc::new(ManualClock::new(test_instant()));
        let seeds = Arc::new(SeedSequence::starting_at(seed));
        let service = EnrollmentService::new(
            Collaborators {
                storage: storage.clone(),
                eligibility,
                mailer: mailer.clone(),
                templates: Arc::new(BuiltinTemplates),
                random: seeds.clone(),
                clock: clock.clone(),
            },
            &MailAddresses {
                from: FROM_ADDRESS.to_string(),
                audit: AUDIT_ADDRESS.to_string(),
            },
        );
        Self {
            storage,
            mailer,
            clock,
            seeds,
            mandator: MandatorId::new(),
            service,
        }
    }

    /// Store a participant; username and address derive from `name`
    ///
    /// # Errors
    ///
    /// Storage failures.
    pub fn participant(&self, name: &str) -> StorageResult<Participant> {
        let username = name.to_lowercase();
        let email = format!("{username}@example.edu");
        self.storage
            .save_participant(Participant::new(name, username, email))
    }

    /// Store an event
    ///
    /// # Errors
    ///
    /// Storage failures.
    pub fn event(&self, name: &str, capacity: u32) -> StorageResult<Event> {
        self.storage
            .save_event(Event::new(name, self.mandator, Capacity::new(capacity)))
    }

    /// Store a draw procedure offering `events`, drawn at `draw_at`
    ///
    /// # Errors
    ///
    /// Storage failures.
    pub fn draw_procedure(
        &self,
        events: &[&Event],
        draw_at: DateTime<Utc>,
    ) -> StorageResult<Procedure> {
        self.storage.save_procedure(Procedure::draw(
            "Spring lottery",
            self.mandator,
            events.iter().map(|event| event.id).collect(),
            draw_at,
        ))
    }

    /// Store a first-come-first-served procedure offering `events`
    ///
    /// # Errors
    ///
    /// Storage failures.
    pub fn fifo_procedure(&self, events: &[&Event]) -> StorageResult<Procedure> {
        self.storage.save_procedure(Procedure::fifo(
            "Walk-in",
            self.mandator,
            events.iter().map(|event| event.id).collect(),
        ))
    }

    /// Store an administrator-confirmed procedure offering `events`
    ///
    /// # Errors
    ///
    /// Storage failures.
    pub fn confirm_procedure(&self, events: &[&Event]) -> StorageResult<Procedure> {
        self.storage.save_procedure(Procedure::confirm(
            "Office confirmation",
            self.mandator,
            events.iter().map(|event| event.id).collect(),
        ))
    }

    /// Submit a self-initiated wish list of `(event, priority)` pairs
    ///
    /// # Errors
    ///
    /// Whatever the submission path rejects.
    pub fn submit(
        &self,
        procedure: &Procedure,
        participant: &Participant,
        items: &[(&Event, u32)],
    ) -> Result<WishList> {
        self.service.submit_wish_list(WishListSubmission {
            procedure_id: procedure.id,
            participant_id: participant.id,
            initiator_id: participant.id,
            items: items
                .iter()
                .map(|(event, priority)| WishItem::new(event.id, *priority))
                .collect(),
        })
    }
}

impl Default for EnrollmentFixture {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EnrollmentFixture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnrollmentFixture")
            .field("mandator", &self.mandator)
            .field("service", &self.service)
            .finish_non_exhaustive()
    }
}
