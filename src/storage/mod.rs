use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, error, warn};

use crate::core::resource::BillableResource;
use crate::errors::StorageError;
use crate::usage::UsageEvent;

pub mod json_file;
pub mod memory;

pub use json_file::JsonFileStore;
pub use memory::MemoryStore;

/// Persistence collaborator for resources and their usage history.
///
/// Implementations own the storage format. Failures are reported as-is; the
/// lifecycle controller never retries.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    async fn load_resource(&self, id: &str) -> Result<Option<BillableResource>, StorageError>;

    /// Full replace. Creates the resource if it does not exist yet.
    async fn save_resource(&self, resource: &BillableResource) -> Result<(), StorageError>;

    /// Appends to the resource's log; the store assigns the event's sequence.
    async fn append_usage_event(&self, event: &UsageEvent) -> Result<(), StorageError>;

    /// Newest first.
    async fn list_usage_events(&self, resource_id: &str) -> Result<Vec<UsageEvent>, StorageError>;

    async fn list_resources(&self) -> Result<Vec<BillableResource>, StorageError>;

    /// Removes the resource together with its usage history.
    /// Returns false when there was nothing to delete.
    async fn delete_resource(&self, id: &str) -> Result<bool, StorageError>;

    /// Publishes a transition's new snapshot and its event as one unit.
    ///
    /// `deadline` bounds each store call made here, not the commit as a whole,
    /// so a slow store never leaves the commit cut off between its steps.
    /// The default saves `updated`, then appends `event`; if either step fails
    /// or runs past the deadline, the `previous` snapshot is written back
    /// before the error is returned. This relies on store calls having no
    /// effect once their future is dropped. Stores that can do both under one
    /// lock or transaction should override it.
    async fn commit_transition(
        &self,
        previous: &BillableResource,
        updated: &BillableResource,
        event: &UsageEvent,
        deadline: Duration,
    ) -> Result<(), StorageError> {
        let saved = with_deadline("save_resource", deadline, self.save_resource(updated)).await;
        let outcome = match saved {
            Ok(()) => with_deadline("append_usage_event", deadline, self.append_usage_event(event)).await,
            Err(e @ StorageError::Timeout { .. }) => Err(e),
            // Nothing was written.
            Err(e) => return Err(e),
        };

        if let Err(commit_err) = outcome {
            warn!(
                resource_id = %updated.id,
                error = %commit_err,
                "Commit did not complete, restoring previous snapshot"
            );
            if let Err(restore_err) = with_deadline("save_resource", deadline, self.save_resource(previous)).await {
                error!(
                    resource_id = %previous.id,
                    error = %restore_err,
                    "Failed to restore previous snapshot"
                );
            }
            return Err(commit_err);
        }

        Ok(())
    }
}

/// Runs a store call, turning an overrun into `StorageError::Timeout`.
pub async fn with_deadline<T>(
    operation: &'static str,
    deadline: Duration,
    fut: impl Future<Output = Result<T, StorageError>>,
) -> Result<T, StorageError> {
    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_) => {
            let timeout_ms = deadline.as_millis() as u64;
            debug!(operation, timeout_ms, "Store call timed out");
            Err(StorageError::Timeout { operation, timeout_ms })
        }
    }
}
