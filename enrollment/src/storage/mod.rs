//! Storage seam for the enrollment core.
//!
//! The core treats persistence as a synchronous, strongly consistent object
//! store with CRUD plus a handful of query-by-field lookups. Anything that
//! can satisfy [`Storage`] (a relational database, a document store, the
//! in-memory tables used by tests and the demo) plugs in unchanged.
//!
//! # Consistency expectations
//!
//! - A `save_*` is visible to every subsequent read.
//! - [`Storage::transition_round`] is a compare-and-set: it changes the
//!   round state only if it still equals `from`. This is what makes the
//!   `Open → Drawn` step happen exactly once across processes.

use crate::types::{
    DrawCheckpoint, Event, EventId, Grant, GrantId, Participant, ParticipantId, Procedure,
    ProcedureId, RoundState, WishList, WishListId,
};
use thiserror::Error;

pub mod memory;

pub use memory::InMemoryStorage;

/// Errors that can occur during storage operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// No entity with that identifier
    #[error("{kind} {id} not found")]
    NotFound {
        /// Entity type
        kind: &'static str,
        /// Identifier as text
        id: String,
    },

    /// Write rejected because it conflicts with existing data
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Backend failure (connection, lock poisoning, I/O)
    #[error("Backend error: {0}")]
    Backend(String),
}

impl StorageError {
    /// Shorthand for [`StorageError::NotFound`]
    pub fn not_found(kind: &'static str, id: impl std::fmt::Display) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }
}

/// Result alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Generic object store used by every enrollment component
pub trait Storage: Send + Sync {
    // ---- participants -------------------------------------------------

    /// Load a participant
    ///
    /// # Errors
    ///
    /// [`StorageError::NotFound`] if no such participant exists.
    fn participant(&self, id: &ParticipantId) -> StorageResult<Participant>;

    /// Insert or replace a participant
    ///
    /// # Errors
    ///
    /// Backend failures.
    fn save_participant(&self, participant: Participant) -> StorageResult<Participant>;

    // ---- events -------------------------------------------------------

    /// Load an event
    ///
    /// # Errors
    ///
    /// [`StorageError::NotFound`] if no such event exists.
    fn event(&self, id: &EventId) -> StorageResult<Event>;

    /// Insert or replace an event
    ///
    /// # Errors
    ///
    /// Backend failures.
    fn save_event(&self, event: Event) -> StorageResult<Event>;

    // ---- procedures ---------------------------------------------------

    /// Load a procedure
    ///
    /// # Errors
    ///
    /// [`StorageError::NotFound`] if no such procedure exists.
    fn procedure(&self, id: &ProcedureId) -> StorageResult<Procedure>;

    /// Insert or replace a procedure
    ///
    /// # Errors
    ///
    /// Backend failures.
    fn save_procedure(&self, procedure: Procedure) -> StorageResult<Procedure>;

    /// Apply `apply` to the stored procedure and persist the merged result
    ///
    /// # Errors
    ///
    /// [`StorageError::NotFound`] if no such procedure exists.
    fn update_procedure(
        &self,
        id: &ProcedureId,
        apply: &mut dyn FnMut(&mut Procedure),
    ) -> StorageResult<Procedure>;

    /// Every stored procedure
    ///
    /// # Errors
    ///
    /// Backend failures.
    fn procedures(&self) -> StorageResult<Vec<Procedure>>;

    /// Compare-and-set the round state
    ///
    /// Returns `true` if the state was `from` and is now `to`, `false` if the
    /// state was something else (nothing is written in that case).
    ///
    /// # Errors
    ///
    /// [`StorageError::NotFound`] if no such procedure exists.
    fn transition_round(
        &self,
        id: &ProcedureId,
        from: RoundState,
        to: RoundState,
    ) -> StorageResult<bool>;

    /// Delete a procedure
    ///
    /// # Errors
    ///
    /// [`StorageError::NotFound`] if no such procedure exists.
    fn delete_procedure(&self, id: &ProcedureId) -> StorageResult<()>;

    // ---- wish lists ---------------------------------------------------

    /// Persist a newly submitted wish list
    ///
    /// # Errors
    ///
    /// [`StorageError::Conflict`] if the ID is already taken.
    fn save_wish_list(&self, wish_list: WishList) -> StorageResult<WishList>;

    /// Every wish list submitted to a procedure
    ///
    /// # Errors
    ///
    /// Backend failures.
    fn wish_lists_for_procedure(&self, id: &ProcedureId) -> StorageResult<Vec<WishList>>;

    /// Wish lists one participant submitted to a procedure
    ///
    /// # Errors
    ///
    /// Backend failures.
    fn wish_lists_for_participant(
        &self,
        procedure_id: &ProcedureId,
        participant_id: &ParticipantId,
    ) -> StorageResult<Vec<WishList>>;

    /// Delete a wish list
    ///
    /// # Errors
    ///
    /// [`StorageError::NotFound`] if no such wish list exists.
    fn delete_wish_list(&self, id: &WishListId) -> StorageResult<()>;

    // ---- grants -------------------------------------------------------

    /// Persist a new grant
    ///
    /// # Errors
    ///
    /// [`StorageError::Conflict`] if the ID is already taken.
    fn save_grant(&self, grant: Grant) -> StorageResult<Grant>;

    /// Load a grant
    ///
    /// # Errors
    ///
    /// [`StorageError::NotFound`] if no such grant exists.
    fn grant(&self, id: &GrantId) -> StorageResult<Grant>;

    /// Replace an existing grant
    ///
    /// # Errors
    ///
    /// [`StorageError::NotFound`] if no such grant exists.
    fn update_grant(&self, grant: Grant) -> StorageResult<Grant>;

    /// Live grants for an event
    ///
    /// # Errors
    ///
    /// Backend failures.
    fn grants_for_event(&self, id: &EventId) -> StorageResult<Vec<Grant>>;

    /// Live grants created by a procedure
    ///
    /// # Errors
    ///
    /// Backend failures.
    fn grants_for_procedure(&self, id: &ProcedureId) -> StorageResult<Vec<Grant>>;

    /// Delete a grant
    ///
    /// # Errors
    ///
    /// [`StorageError::NotFound`] if no such grant exists.
    fn delete_grant(&self, id: &GrantId) -> StorageResult<()>;

    // ---- draw checkpoints ---------------------------------------------

    /// Insert or replace the checkpoint of a procedure
    ///
    /// # Errors
    ///
    /// Backend failures.
    fn save_checkpoint(&self, checkpoint: DrawCheckpoint) -> StorageResult<()>;

    /// The last checkpoint written for a procedure, if any
    ///
    /// # Errors
    ///
    /// Backend failures.
    fn checkpoint(&self, procedure_id: &ProcedureId) -> StorageResult<Option<DrawCheckpoint>>;

    /// Remove the checkpoint of a procedure (no-op if absent)
    ///
    /// # Errors
    ///
    /// Backend failures.
    fn delete_checkpoint(&self, procedure_id: &ProcedureId) -> StorageResult<()>;
}
