use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

use crate::core::resource::BillableResource;
use crate::errors::StorageError;
use crate::storage::{with_deadline, ResourceStore};
use crate::usage::{sort_newest_first, UsageEvent};

#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    #[serde(default)]
    resources: BTreeMap<String, BillableResource>,
    #[serde(default)]
    events: BTreeMap<String, Vec<UsageEvent>>,
    #[serde(default)]
    next_sequence: u64,
}

/// Keeps every resource and event in a single JSON document.
///
/// Each write rewrites the whole document to a sibling temp file and renames
/// it over the original, so readers see either the old or the new state.
/// Writers are serialized by an in-process lock; the disk copy is the only
/// source of truth.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_snapshot(&self) -> Result<Snapshot, StorageError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) if contents.trim().is_empty() => Ok(Snapshot::default()),
            Ok(contents) => Ok(serde_json::from_str(&contents)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Snapshot::default()),
            Err(e) => Err(self.io_error(e)),
        }
    }

    async fn write_snapshot(&self, snapshot: &Snapshot) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| self.io_error(e))?;
        }

        let body = serde_json::to_vec_pretty(snapshot)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, body).await.map_err(|e| self.io_error(e))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| self.io_error(e))?;

        debug!(path = %self.path.display(), resources = snapshot.resources.len(), "Store written");
        Ok(())
    }

    /// Read, modify and write back while holding the writer lock.
    async fn update<T: Send>(&self, apply: impl FnOnce(&mut Snapshot) -> T + Send) -> Result<T, StorageError> {
        let _guard = self.write_lock.lock().await;
        let mut snapshot = self.read_snapshot().await?;
        let out = apply(&mut snapshot);
        self.write_snapshot(&snapshot).await?;
        Ok(out)
    }

    /// Like `update`, but gives up with a timeout only while waiting for the
    /// lock or reading. Once the write starts it is awaited to the end, so the
    /// result always matches what is on disk.
    async fn update_within<T: Send>(
        &self,
        deadline: Duration,
        apply: impl FnOnce(&mut Snapshot) -> T + Send,
    ) -> Result<T, StorageError> {
        let _guard = with_deadline("acquire_write_lock", deadline, async { Ok(self.write_lock.lock().await) }).await?;
        let mut snapshot = with_deadline("read_snapshot", deadline, self.read_snapshot()).await?;
        let out = apply(&mut snapshot);
        self.write_snapshot(&snapshot).await?;
        Ok(out)
    }

    fn io_error(&self, source: std::io::Error) -> StorageError {
        StorageError::Io {
            path: self.path.display().to_string(),
            source,
        }
    }
}

fn push_event(snapshot: &mut Snapshot, event: &UsageEvent) {
    snapshot.next_sequence += 1;
    let mut event = event.clone();
    event.sequence = snapshot.next_sequence;
    snapshot
        .events
        .entry(event.resource_id.clone())
        .or_default()
        .push(event);
}

#[async_trait]
impl ResourceStore for JsonFileStore {
    async fn load_resource(&self, id: &str) -> Result<Option<BillableResource>, StorageError> {
        Ok(self.read_snapshot().await?.resources.remove(id))
    }

    async fn save_resource(&self, resource: &BillableResource) -> Result<(), StorageError> {
        let resource = resource.clone();
        self.update(move |snapshot| {
            snapshot.resources.insert(resource.id.clone(), resource);
        })
        .await
    }

    async fn append_usage_event(&self, event: &UsageEvent) -> Result<(), StorageError> {
        self.update(|snapshot| push_event(snapshot, event)).await
    }

    async fn list_usage_events(&self, resource_id: &str) -> Result<Vec<UsageEvent>, StorageError> {
        let mut events = self
            .read_snapshot()
            .await?
            .events
            .remove(resource_id)
            .unwrap_or_default();
        sort_newest_first(&mut events);
        Ok(events)
    }

    async fn list_resources(&self) -> Result<Vec<BillableResource>, StorageError> {
        let mut resources: Vec<_> = self.read_snapshot().await?.resources.into_values().collect();
        resources.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.name.cmp(&b.name)));
        Ok(resources)
    }

    async fn delete_resource(&self, id: &str) -> Result<bool, StorageError> {
        self.update(|snapshot| {
            snapshot.events.remove(id);
            snapshot.resources.remove(id).is_some()
        })
        .await
    }

    async fn commit_transition(
        &self,
        _previous: &BillableResource,
        updated: &BillableResource,
        event: &UsageEvent,
        deadline: Duration,
    ) -> Result<(), StorageError> {
        self.update_within(deadline, |snapshot| {
            snapshot.resources.insert(updated.id.clone(), updated.clone());
            push_event(snapshot, event);
        })
        .await
    }
}
