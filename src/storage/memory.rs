use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::core::resource::BillableResource;
use crate::errors::StorageError;
use crate::storage::{with_deadline, ResourceStore};
use crate::usage::{sort_newest_first, UsageEvent};

#[derive(Debug, Default)]
struct MemoryState {
    resources: HashMap<String, BillableResource>,
    events: HashMap<String, Vec<UsageEvent>>,
    next_sequence: u64,
}

impl MemoryState {
    fn push_event(&mut self, event: &UsageEvent) {
        self.next_sequence += 1;
        let mut event = event.clone();
        event.sequence = self.next_sequence;
        self.events
            .entry(event.resource_id.clone())
            .or_default()
            .push(event);
    }
}

/// Process-local store. Everything is lost on exit.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ResourceStore for MemoryStore {
    async fn load_resource(&self, id: &str) -> Result<Option<BillableResource>, StorageError> {
        Ok(self.state.read().await.resources.get(id).cloned())
    }

    async fn save_resource(&self, resource: &BillableResource) -> Result<(), StorageError> {
        self.state
            .write()
            .await
            .resources
            .insert(resource.id.clone(), resource.clone());
        Ok(())
    }

    async fn append_usage_event(&self, event: &UsageEvent) -> Result<(), StorageError> {
        self.state.write().await.push_event(event);
        Ok(())
    }

    async fn list_usage_events(&self, resource_id: &str) -> Result<Vec<UsageEvent>, StorageError> {
        let mut events = self
            .state
            .read()
            .await
            .events
            .get(resource_id)
            .cloned()
            .unwrap_or_default();
        sort_newest_first(&mut events);
        Ok(events)
    }

    async fn list_resources(&self) -> Result<Vec<BillableResource>, StorageError> {
        let mut resources: Vec<_> = self.state.read().await.resources.values().cloned().collect();
        resources.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.name.cmp(&b.name)));
        Ok(resources)
    }

    async fn delete_resource(&self, id: &str) -> Result<bool, StorageError> {
        let mut state = self.state.write().await;
        state.events.remove(id);
        Ok(state.resources.remove(id).is_some())
    }

    async fn commit_transition(
        &self,
        _previous: &BillableResource,
        updated: &BillableResource,
        event: &UsageEvent,
        deadline: Duration,
    ) -> Result<(), StorageError> {
        // Only the wait for the lock is bounded; the update itself cannot stall.
        let mut state = with_deadline("acquire_write_lock", deadline, async { Ok(self.state.write().await) }).await?;
        state.resources.insert(updated.id.clone(), updated.clone());
        state.push_event(event);
        Ok(())
    }
}
