// Storage suite: failure handling at the persistence seam and the JSON backend

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal_macros::dec;
use std::path::PathBuf;
use std::sync::Arc;

use service_billing_manager::core::{BillableResource, ManualClock, ServiceKind};
use service_billing_manager::{
    BillingError, JsonFileStore, LifecycleController, MemoryStore, ResourceStore, StorageError, UsageEvent,
};

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 20, 14, 0, 0).unwrap()
}

fn vm() -> BillableResource {
    BillableResource::new("batch-worker", ServiceKind::VirtualMachine, dec!(0.40), dec!(200), t0())
}

fn scratch_file(name: &str) -> PathBuf {
    std::env::temp_dir()
        .join(format!("service-billing-{}-{}", name, uuid::Uuid::new_v4()))
        .join("services.json")
}

/// Accepts snapshots but refuses every event append.
struct FailingAppendStore {
    inner: MemoryStore,
}

#[async_trait]
impl ResourceStore for FailingAppendStore {
    async fn load_resource(&self, id: &str) -> Result<Option<BillableResource>, StorageError> {
        self.inner.load_resource(id).await
    }

    async fn save_resource(&self, resource: &BillableResource) -> Result<(), StorageError> {
        self.inner.save_resource(resource).await
    }

    async fn append_usage_event(&self, _event: &UsageEvent) -> Result<(), StorageError> {
        Err(StorageError::Unavailable {
            message: "event log offline".to_string(),
        })
    }

    async fn list_usage_events(&self, resource_id: &str) -> Result<Vec<UsageEvent>, StorageError> {
        self.inner.list_usage_events(resource_id).await
    }

    async fn list_resources(&self) -> Result<Vec<BillableResource>, StorageError> {
        self.inner.list_resources().await
    }

    async fn delete_resource(&self, id: &str) -> Result<bool, StorageError> {
        self.inner.delete_resource(id).await
    }
}

/// Reads are immediate, each kind of write stalls for its own delay.
struct SlowWriteStore {
    inner: MemoryStore,
    save_delay: std::time::Duration,
    append_delay: std::time::Duration,
}

impl SlowWriteStore {
    fn new(inner: MemoryStore, save_ms: u64, append_ms: u64) -> Self {
        Self {
            inner,
            save_delay: std::time::Duration::from_millis(save_ms),
            append_delay: std::time::Duration::from_millis(append_ms),
        }
    }
}

#[async_trait]
impl ResourceStore for SlowWriteStore {
    async fn load_resource(&self, id: &str) -> Result<Option<BillableResource>, StorageError> {
        self.inner.load_resource(id).await
    }

    async fn save_resource(&self, resource: &BillableResource) -> Result<(), StorageError> {
        tokio::time::sleep(self.save_delay).await;
        self.inner.save_resource(resource).await
    }

    async fn append_usage_event(&self, event: &UsageEvent) -> Result<(), StorageError> {
        tokio::time::sleep(self.append_delay).await;
        self.inner.append_usage_event(event).await
    }

    async fn list_usage_events(&self, resource_id: &str) -> Result<Vec<UsageEvent>, StorageError> {
        self.inner.list_usage_events(resource_id).await
    }

    async fn list_resources(&self) -> Result<Vec<BillableResource>, StorageError> {
        self.inner.list_resources().await
    }

    async fn delete_resource(&self, id: &str) -> Result<bool, StorageError> {
        self.inner.delete_resource(id).await
    }
}

#[tokio::test]
async fn test_failed_append_restores_previous_snapshot() -> Result<()> {
    let resource = vm();
    let inner = MemoryStore::new();
    inner.save_resource(&resource).await?;
    let controller = LifecycleController::with_clock(Arc::new(FailingAppendStore { inner }), ManualClock::new(t0()));

    let err = controller.start(&resource.id, t0()).await.unwrap_err();
    assert!(matches!(err, BillingError::Storage(StorageError::Unavailable { .. })));
    assert!(!err.is_user_facing());

    let stored = controller.get(&resource.id).await?;
    assert_eq!(stored, resource);
    assert!(controller.history(&resource.id).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_slow_save_times_out_and_leaves_resource_untouched() -> Result<()> {
    let resource = vm();
    let inner = MemoryStore::new();
    inner.save_resource(&resource).await?;
    let controller = LifecycleController::with_clock(Arc::new(SlowWriteStore::new(inner, 500, 0)), ManualClock::new(t0()))
        .store_timeout(std::time::Duration::from_millis(50));

    let err = controller.start(&resource.id, t0()).await.unwrap_err();
    assert!(matches!(
        err,
        BillingError::Storage(StorageError::Timeout { operation: "save_resource", .. })
    ));

    assert!(!controller.get(&resource.id).await?.is_running);
    assert!(controller.history(&resource.id).await?.is_empty());
    Ok(())
}

// Save lands at once, the event append overruns: the snapshot must be rolled back
#[tokio::test]
async fn test_slow_append_rolls_back_saved_snapshot() -> Result<()> {
    let resource = vm();
    let inner = MemoryStore::new();
    inner.save_resource(&resource).await?;
    let controller = LifecycleController::with_clock(Arc::new(SlowWriteStore::new(inner, 0, 500)), ManualClock::new(t0()))
        .store_timeout(std::time::Duration::from_millis(50));

    let err = controller.start(&resource.id, t0()).await.unwrap_err();
    assert!(matches!(
        err,
        BillingError::Storage(StorageError::Timeout { operation: "append_usage_event", .. })
    ));

    let stored = controller.get(&resource.id).await?;
    assert!(!stored.is_running);
    assert!(stored.last_start_time.is_none());
    assert_eq!(stored, resource);
    assert!(controller.history(&resource.id).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_json_store_survives_reopen() -> Result<()> {
    let path = scratch_file("reopen");
    let resource = vm().with_sub_resource("gpu", dec!(1.20)).with_metadata("region", "eu-west");

    {
        let controller = LifecycleController::with_clock(Arc::new(JsonFileStore::new(&path)), ManualClock::new(t0()));
        controller.register(resource.clone()).await?;
        controller.start(&resource.id, t0()).await?;
        controller.stop(&resource.id, t0() + Duration::minutes(90)).await?;
    }

    let reopened = JsonFileStore::new(&path);
    let stored = reopened.load_resource(&resource.id).await?.expect("resource persisted");
    assert_eq!(stored.total_running_hours, dec!(1.5));
    assert_eq!(stored.sub_resources.len(), 1);
    assert_eq!(stored.metadata, vec![("region".to_string(), "eu-west".to_string())]);

    let events = reopened.list_usage_events(&resource.id).await?;
    assert_eq!(events.len(), 2);
    assert!(events[0].sequence > events[1].sequence);

    if let Some(dir) = path.parent() {
        let _ = std::fs::remove_dir_all(dir);
    }
    Ok(())
}

#[tokio::test]
async fn test_json_store_delete_cascades() -> Result<()> {
    let path = scratch_file("cascade");
    let store = Arc::new(JsonFileStore::new(&path));
    let keep = vm();
    let drop = BillableResource::new("scratch-db", ServiceKind::Database, dec!(0.05), dec!(720), t0());

    let controller = LifecycleController::with_clock(store.clone(), ManualClock::new(t0()));
    controller.register(keep.clone()).await?;
    controller.register(drop.clone()).await?;
    controller.start(&keep.id, t0()).await?;
    controller.start(&drop.id, t0()).await?;

    controller.remove(&drop.id).await?;

    assert!(store.load_resource(&drop.id).await?.is_none());
    assert!(store.list_usage_events(&drop.id).await?.is_empty());
    assert_eq!(store.list_usage_events(&keep.id).await?.len(), 1);
    assert_eq!(store.list_resources().await?.len(), 1);

    if let Some(dir) = path.parent() {
        let _ = std::fs::remove_dir_all(dir);
    }
    Ok(())
}

#[tokio::test]
async fn test_memory_store_lists_in_creation_order() -> Result<()> {
    let store = MemoryStore::new();
    let first = vm();
    let second = BillableResource::new("cdn", ServiceKind::Cdn, dec!(0.01), dec!(720), t0() + Duration::hours(1));
    store.save_resource(&second).await?;
    store.save_resource(&first).await?;

    let names: Vec<_> = store.list_resources().await?.into_iter().map(|r| r.name).collect();
    assert_eq!(names, vec!["batch-worker", "cdn"]);
    Ok(())
}
