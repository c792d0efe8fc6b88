//! In-memory [`Storage`] backed by hash maps.
//!
//! Strongly consistent by construction (one `RwLock` around all tables).
//! Used by tests and the demo binary, and suitable for a single-process
//! deployment that does not need durability.

use super::{Storage, StorageError, StorageResult};
use crate::types::{
    DrawCheckpoint, Event, EventId, Grant, GrantId, Participant, ParticipantId, Procedure,
    ProcedureId, RoundState, WishList, WishListId,
};
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Debug, Default)]
struct Tables {
    participants: HashMap<ParticipantId, Participant>,
    events: HashMap<EventId, Event>,
    procedures: HashMap<ProcedureId, Procedure>,
    wish_lists: HashMap<WishListId, WishList>,
    grants: HashMap<GrantId, Grant>,
    checkpoints: HashMap<ProcedureId, DrawCheckpoint>,
}

/// HashMap-based storage
#[derive(Clone, Debug, Default)]
pub struct InMemoryStorage {
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryStorage {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> StorageResult<RwLockReadGuard<'_, Tables>> {
        self.tables
            .read()
            .map_err(|_| StorageError::Backend("storage lock poisoned".to_string()))
    }

    fn write(&self) -> StorageResult<RwLockWriteGuard<'_, Tables>> {
        self.tables
            .write()
            .map_err(|_| StorageError::Backend("storage lock poisoned".to_string()))
    }

    /// Number of live grants (all events)
    ///
    /// # Errors
    ///
    /// Backend failures.
    pub fn grant_count(&self) -> StorageResult<usize> {
        Ok(self.read()?.grants.len())
    }

    /// Number of stored wish lists (all procedures)
    ///
    /// # Errors
    ///
    /// Backend failures.
    pub fn wish_list_count(&self) -> StorageResult<usize> {
        Ok(self.read()?.wish_lists.len())
    }
}

impl Storage for InMemoryStorage {
    fn participant(&self, id: &ParticipantId) -> StorageResult<Participant> {
        self.read()?
            .participants
            .get(id)
            .cloned()
            .ok_or_else(|| StorageError::not_found("participant", id))
    }

    fn save_participant(&self, participant: Participant) -> StorageResult<Participant> {
        self.write()?
            .participants
            .insert(participant.id, participant.clone());
        Ok(participant)
    }

    fn event(&self, id: &EventId) -> StorageResult<Event> {
        self.read()?
            .events
            .get(id)
            .cloned()
            .ok_or_else(|| StorageError::not_found("event", id))
    }

    fn save_event(&self, event: Event) -> StorageResult<Event> {
        self.write()?.events.insert(event.id, event.clone());
        Ok(event)
    }

    fn procedure(&self, id: &ProcedureId) -> StorageResult<Procedure> {
        self.read()?
            .procedures
            .get(id)
            .cloned()
            .ok_or_else(|| StorageError::not_found("procedure", id))
    }

    fn save_procedure(&self, procedure: Procedure) -> StorageResult<Procedure> {
        self.write()?
            .procedures
            .insert(procedure.id, procedure.clone());
        Ok(procedure)
    }

    fn update_procedure(
        &self,
        id: &ProcedureId,
        apply: &mut dyn FnMut(&mut Procedure),
    ) -> StorageResult<Procedure> {
        let mut tables = self.write()?;
        let procedure = tables
            .procedures
            .get_mut(id)
            .ok_or_else(|| StorageError::not_found("procedure", id))?;
        apply(procedure);
        Ok(procedure.clone())
    }

    fn procedures(&self) -> StorageResult<Vec<Procedure>> {
        Ok(self.read()?.procedures.values().cloned().collect())
    }

    fn transition_round(
        &self,
        id: &ProcedureId,
        from: RoundState,
        to: RoundState,
    ) -> StorageResult<bool> {
        let mut tables = self.write()?;
        let procedure = tables
            .procedures
            .get_mut(id)
            .ok_or_else(|| StorageError::not_found("procedure", id))?;
        if procedure.state != from {
            return Ok(false);
        }
        procedure.state = to;
        Ok(true)
    }

    fn delete_procedure(&self, id: &ProcedureId) -> StorageResult<()> {
        self.write()?
            .procedures
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| StorageError::not_found("procedure", id))
    }

    fn save_wish_list(&self, wish_list: WishList) -> StorageResult<WishList> {
        let mut tables = self.write()?;
        if tables.wish_lists.contains_key(&wish_list.id) {
            return Err(StorageError::Conflict(format!(
                "wish list {} already exists",
                wish_list.id
            )));
        }
        tables.wish_lists.insert(wish_list.id, wish_list.clone());
        Ok(wish_list)
    }

    fn wish_lists_for_procedure(&self, id: &ProcedureId) -> StorageResult<Vec<WishList>> {
        Ok(self
            .read()?
            .wish_lists
            .values()
            .filter(|list| list.procedure_id == *id)
            .cloned()
            .collect())
    }

    fn wish_lists_for_participant(
        &self,
        procedure_id: &ProcedureId,
        participant_id: &ParticipantId,
    ) -> StorageResult<Vec<WishList>> {
        Ok(self
            .read()?
            .wish_lists
            .values()
            .filter(|list| {
                list.procedure_id == *procedure_id && list.participant_id == *participant_id
            })
            .cloned()
            .collect())
    }

    fn delete_wish_list(&self, id: &WishListId) -> StorageResult<()> {
        self.write()?
            .wish_lists
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| StorageError::not_found("wish list", id))
    }

    fn save_grant(&self, grant: Grant) -> StorageResult<Grant> {
        let mut tables = self.write()?;
        if tables.grants.contains_key(&grant.id) {
            return Err(StorageError::Conflict(format!("grant {} already exists", grant.id)));
        }
        tables.grants.insert(grant.id, grant.clone());
        Ok(grant)
    }

    fn grant(&self, id: &GrantId) -> StorageResult<Grant> {
        self.read()?
            .grants
            .get(id)
            .cloned()
            .ok_or_else(|| StorageError::not_found("grant", id))
    }

    fn update_grant(&self, grant: Grant) -> StorageResult<Grant> {
        let mut tables = self.write()?;
        let slot = tables
            .grants
            .get_mut(&grant.id)
            .ok_or_else(|| StorageError::not_found("grant", grant.id))?;
        *slot = grant.clone();
        Ok(grant)
    }

    fn grants_for_event(&self, id: &EventId) -> StorageResult<Vec<Grant>> {
        Ok(self
            .read()?
            .grants
            .values()
            .filter(|grant| grant.event_id == *id)
            .cloned()
            .collect())
    }

    fn grants_for_procedure(&self, id: &ProcedureId) -> StorageResult<Vec<Grant>> {
        Ok(self
            .read()?
            .grants
            .values()
            .filter(|grant| grant.procedure_id == Some(*id))
            .cloned()
            .collect())
    }

    fn delete_grant(&self, id: &GrantId) -> StorageResult<()> {
        self.write()?
            .grants
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| StorageError::not_found("grant", id))
    }

    fn save_checkpoint(&self, checkpoint: DrawCheckpoint) -> StorageResult<()> {
        self.write()?
            .checkpoints
            .insert(checkpoint.procedure_id, checkpoint);
        Ok(())
    }

    fn checkpoint(&self, procedure_id: &ProcedureId) -> StorageResult<Option<DrawCheckpoint>> {
        Ok(self.read()?.checkpoints.get(procedure_id).cloned())
    }

    fn delete_checkpoint(&self, procedure_id: &ProcedureId) -> StorageResult<()> {
        self.write()?.checkpoints.remove(procedure_id);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code can use unwrap
mod tests {
    use super::*;
    use crate::types::{Capacity, MandatorId};
    use chrono::Utc;

    #[test]
    fn transition_round_is_compare_and_set() {
        let storage = InMemoryStorage::new();
        let procedure = storage
            .save_procedure(Procedure::draw("Spring", MandatorId::new(), vec![], Utc::now()))
            .unwrap();

        assert!(storage
            .transition_round(&procedure.id, RoundState::Open, RoundState::Drawn)
            .unwrap());
        assert!(!storage
            .transition_round(&procedure.id, RoundState::Open, RoundState::Drawn)
            .unwrap());
        assert_eq!(storage.procedure(&procedure.id).unwrap().state, RoundState::Drawn);
    }

    #[test]
    fn missing_entities_report_not_found() {
        let storage = InMemoryStorage::new();
        let error = storage.event(&EventId::new()).unwrap_err();
        assert!(matches!(error, StorageError::NotFound { kind: "event", .. }));
        assert!(storage.delete_grant(&GrantId::new()).is_err());
    }

    #[test]
    fn grants_are_queryable_by_field() {
        let storage = InMemoryStorage::new();
        let mandator = MandatorId::new();
        let event = storage
            .save_event(Event::new("Algebra", mandator, Capacity::new(3)))
            .unwrap();
        let procedure_id = ProcedureId::new();
        let participant = ParticipantId::new();
        let grant = storage
            .save_grant(Grant::new(
                participant,
                event.id,
                Some(procedure_id),
                mandator,
                Utc::now(),
                false,
            ))
            .unwrap();

        assert_eq!(storage.grants_for_event(&event.id).unwrap().len(), 1);
        assert_eq!(storage.grants_for_procedure(&procedure_id).unwrap().len(), 1);
        assert!(matches!(
            storage.save_grant(grant.clone()),
            Err(StorageError::Conflict(_))
        ));

        let mut detached = grant;
        detached.procedure_id = None;
        storage.update_grant(detached).unwrap();
        assert!(storage.grants_for_procedure(&procedure_id).unwrap().is_empty());
    }

    #[test]
    fn update_procedure_merges_in_place() {
        let storage = InMemoryStorage::new();
        let procedure = storage
            .save_procedure(Procedure::fifo("Walk-in", MandatorId::new(), vec![]))
            .unwrap();
        let now = Utc::now();
        let updated = storage
            .update_procedure(&procedure.id, &mut |p| p.notified_at = Some(now))
            .unwrap();
        assert_eq!(updated.notified_at, Some(now));
        assert_eq!(storage.procedure(&procedure.id).unwrap().notified_at, Some(now));
    }
}
