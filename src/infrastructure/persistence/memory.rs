//! In-memory entity store
//!
//! Every operation runs inside one critical section, so id allocation and
//! guarded writes are linearizable across threads.

use crate::domain::shared::error::DispatchError;
use crate::domain::shared::result::Result;
use crate::domain::store::{EntityId, EntityStore, FieldWrite, Fields, Guard, Namespace};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

#[derive(Debug, Default)]
struct Inner {
    indexes: HashMap<Namespace, BTreeSet<EntityId>>,
    records: HashMap<(Namespace, EntityId), Fields>,
    sequences: HashMap<Namespace, EntityId>,
}

impl Inner {
    fn is_indexed(&self, namespace: Namespace, id: EntityId) -> bool {
        self.indexes
            .get(&namespace)
            .map(|ids| ids.contains(&id))
            .unwrap_or(false)
    }
}

/// Entity store kept in process memory
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| DispatchError::StorageUnavailable("memory store lock poisoned".to_string()))
    }
}

impl EntityStore for MemoryStore {
    fn allocate_id(&self, namespace: Namespace) -> Result<EntityId> {
        let mut inner = self.lock()?;
        let highest = inner
            .indexes
            .get(&namespace)
            .and_then(|ids| ids.last().copied())
            .unwrap_or(0);
        let sequence = inner.sequences.entry(namespace).or_insert(0);
        *sequence = (*sequence).max(highest) + 1;
        Ok(*sequence)
    }

    fn register(&self, namespace: Namespace, id: EntityId, fields: &Fields) -> Result<()> {
        let mut inner = self.lock()?;
        inner.indexes.entry(namespace).or_default().insert(id);
        inner
            .records
            .entry((namespace, id))
            .or_default()
            .extend(fields.iter().map(|(k, v)| (k.clone(), v.clone())));
        debug!("Registered {}", namespace.record_key(id));
        Ok(())
    }

    fn get_all_fields(&self, namespace: Namespace, id: EntityId) -> Result<Fields> {
        let inner = self.lock()?;
        Ok(inner
            .records
            .get(&(namespace, id))
            .cloned()
            .unwrap_or_default())
    }

    fn set_field(
        &self,
        namespace: Namespace,
        id: EntityId,
        field: &str,
        value: &str,
    ) -> Result<()> {
        let mut inner = self.lock()?;
        inner
            .records
            .entry((namespace, id))
            .or_default()
            .insert(field.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, namespace: Namespace, id: EntityId) -> Result<bool> {
        let mut inner = self.lock()?;
        let removed = inner
            .indexes
            .get_mut(&namespace)
            .map(|ids| ids.remove(&id))
            .unwrap_or(false);
        inner.records.remove(&(namespace, id));
        Ok(removed)
    }

    fn contains(&self, namespace: Namespace, id: EntityId) -> Result<bool> {
        Ok(self.lock()?.is_indexed(namespace, id))
    }

    fn list_ids(&self, namespace: Namespace) -> Result<BTreeSet<EntityId>> {
        let inner = self.lock()?;
        Ok(inner.indexes.get(&namespace).cloned().unwrap_or_default())
    }

    fn compare_and_set(&self, guards: &[Guard], writes: &[FieldWrite]) -> Result<bool> {
        let mut inner = self.lock()?;

        let holds = guards.iter().all(|guard| {
            let (namespace, id) = guard.target();
            guard.holds(
                inner.is_indexed(namespace, id),
                inner.records.get(&(namespace, id)),
            )
        });
        if !holds {
            return Ok(false);
        }

        for write in writes {
            inner
                .records
                .entry((write.namespace, write.id))
                .or_default()
                .insert(write.field.clone(), write.value.clone());
        }
        Ok(true)
    }

    fn clear(&self, namespace: Namespace) -> Result<usize> {
        let mut inner = self.lock()?;
        let ids = inner.indexes.remove(&namespace).unwrap_or_default();
        inner.records.retain(|(ns, _), _| *ns != namespace);
        Ok(ids.len())
    }
}
