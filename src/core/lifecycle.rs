use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::info;

use crate::billing::{BillingCalculation, CostAccrualEngine};
use crate::core::clock::{SystemClock, TimeSource};
use crate::core::resource::{BillableResource, ServiceStatus};
use crate::core::running_time::RunningTimeCalculator;
use crate::errors::{BillingError, BillingResult, RunState, StorageError};
use crate::storage::{with_deadline, ResourceStore};
use crate::usage::UsageEvent;
use crate::with_context;

pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(5);

/// Decides whether a resource's external status allows start/stop.
pub trait ActivationGate: Send + Sync {
    fn check(&self, resource: &BillableResource) -> BillingResult<()>;
}

/// Gate driven by a list of activatable statuses.
#[derive(Debug, Clone)]
pub struct StatusGate {
    activatable: Vec<ServiceStatus>,
}

impl StatusGate {
    pub fn new(activatable: Vec<ServiceStatus>) -> Self {
        Self { activatable }
    }
}

impl Default for StatusGate {
    fn default() -> Self {
        Self::new(vec![ServiceStatus::Active])
    }
}

impl ActivationGate for StatusGate {
    fn check(&self, resource: &BillableResource) -> BillingResult<()> {
        if self.activatable.contains(&resource.status) {
            Ok(())
        } else {
            Err(BillingError::Precondition {
                resource_id: resource.id.clone(),
                status: resource.status,
            })
        }
    }
}

/// New snapshot plus the event that describes how it was reached.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub resource: BillableResource,
    pub event: UsageEvent,
}

/// Start/stop state machine over stored resources.
///
/// Calls for the same resource are serialized; calls for different resources
/// run independently. Each transition is computed on a local copy and
/// published with a single `commit_transition`. The store timeout is handed
/// to the commit instead of wrapped around it, so a slow store makes the
/// commit roll back rather than get cut off halfway.
pub struct LifecycleController<S: ResourceStore + ?Sized, C: TimeSource = SystemClock> {
    store: Arc<S>,
    clock: C,
    gate: Arc<dyn ActivationGate>,
    engine: CostAccrualEngine,
    store_timeout: Duration,
    locks: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl<S: ResourceStore + ?Sized> LifecycleController<S, SystemClock> {
    pub fn new(store: Arc<S>) -> Self {
        Self::with_clock(store, SystemClock)
    }
}

impl<S: ResourceStore + ?Sized, C: TimeSource> LifecycleController<S, C> {
    pub fn with_clock(store: Arc<S>, clock: C) -> Self {
        Self {
            store,
            clock,
            gate: Arc::new(StatusGate::default()),
            engine: CostAccrualEngine::default(),
            store_timeout: DEFAULT_STORE_TIMEOUT,
            locks: StdMutex::new(HashMap::new()),
        }
    }

    pub fn gate(mut self, gate: impl ActivationGate + 'static) -> Self {
        self.gate = Arc::new(gate);
        self
    }

    pub fn engine(mut self, engine: CostAccrualEngine) -> Self {
        self.engine = engine;
        self
    }

    pub fn store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Computes the start transition without touching the store.
    pub fn plan_start(&self, resource: &BillableResource, now: DateTime<Utc>) -> BillingResult<Transition> {
        if resource.is_running {
            return Err(BillingError::InvalidTransition {
                resource_id: resource.id.clone(),
                action: "start",
                state: RunState::Running,
            });
        }
        self.gate.check(resource)?;

        let mut next = resource.clone();
        next.is_running = true;
        next.last_start_time = Some(now);
        next.updated_at = now;

        Ok(Transition {
            event: UsageEvent::started(resource.id.clone(), now),
            resource: next,
        })
    }

    /// Computes the stop transition without touching the store.
    ///
    /// The duration folded into the total and the cost recorded on the event
    /// are both taken at `now`.
    pub fn plan_stop(&self, resource: &BillableResource, now: DateTime<Utc>) -> BillingResult<Transition> {
        if !resource.is_running || resource.last_start_time.is_none() {
            return Err(BillingError::InvalidTransition {
                resource_id: resource.id.clone(),
                action: "stop",
                state: RunState::Stopped,
            });
        }
        self.gate.check(resource)?;

        let duration = RunningTimeCalculator::elapsed_hours(resource, now)?;
        let cost = self.engine.calculate(resource, now)?.current_period_cost;

        let mut next = resource.clone();
        next.is_running = false;
        next.last_stop_time = Some(now);
        next.last_start_time = None;
        next.total_running_hours += duration;
        next.updated_at = now;

        Ok(Transition {
            event: UsageEvent::stopped(resource.id.clone(), now, duration, cost),
            resource: next,
        })
    }

    pub async fn start(&self, id: &str, now: DateTime<Utc>) -> BillingResult<BillableResource> {
        self.transition(id, Some(now), Self::plan_start).await
    }

    pub async fn stop(&self, id: &str, now: DateTime<Utc>) -> BillingResult<BillableResource> {
        self.transition(id, Some(now), Self::plan_stop).await
    }

    /// Starts at the clock's current time, read after the resource lock is held.
    pub async fn start_now(&self, id: &str) -> BillingResult<BillableResource> {
        self.transition(id, None, Self::plan_start).await
    }

    pub async fn stop_now(&self, id: &str) -> BillingResult<BillableResource> {
        self.transition(id, None, Self::plan_stop).await
    }

    /// Stores a new resource. It must be stopped and carry non-negative rates.
    pub async fn register(&self, resource: BillableResource) -> BillingResult<BillableResource> {
        if let Err(message) = resource.validate() {
            return Err(BillingError::InvalidResource {
                resource_id: resource.id.clone(),
                message,
            });
        }
        if resource.is_running || resource.total_running_hours != rust_decimal::Decimal::ZERO {
            return Err(BillingError::InvalidResource {
                resource_id: resource.id.clone(),
                message: "new resources start stopped with no recorded hours".to_string(),
            });
        }

        let lock = self.lock_for(&resource.id);
        let _guard = lock.lock().await;
        self.bounded("save_resource", self.store.save_resource(&resource)).await?;
        info!(resource_id = %resource.id, name = %resource.name, "Resource registered");
        Ok(resource)
    }

    pub async fn get(&self, id: &str) -> BillingResult<BillableResource> {
        self.load(id).await
    }

    pub async fn list(&self) -> BillingResult<Vec<BillableResource>> {
        Ok(self.bounded("list_resources", self.store.list_resources()).await?)
    }

    /// Costs of a stored resource at `now`. Reads without taking the resource lock.
    pub async fn calculate(&self, id: &str, now: DateTime<Utc>) -> BillingResult<BillingCalculation> {
        let resource = self.load(id).await?;
        self.engine.calculate(&resource, now)
    }

    pub async fn calculate_now(&self, id: &str) -> BillingResult<BillingCalculation> {
        let now = self.clock.now();
        self.calculate(id, now).await
    }

    /// Usage events of a resource, newest first.
    pub async fn history(&self, id: &str) -> BillingResult<Vec<UsageEvent>> {
        self.load(id).await?;
        Ok(self
            .bounded("list_usage_events", self.store.list_usage_events(id))
            .await?)
    }

    /// Deletes a resource and its usage history.
    pub async fn remove(&self, id: &str) -> BillingResult<()> {
        let lock = self.lock_for(id);
        let deleted = {
            let _guard = lock.lock().await;
            self.bounded("delete_resource", self.store.delete_resource(id)).await?
        };

        if !deleted {
            return Err(BillingError::NotFound {
                resource_id: id.to_string(),
            });
        }

        self.locks_map().remove(id);
        info!(resource_id = %id, "Resource removed with its usage history");
        Ok(())
    }

    async fn transition<F>(&self, id: &str, now: Option<DateTime<Utc>>, plan: F) -> BillingResult<BillableResource>
    where
        F: FnOnce(&Self, &BillableResource, DateTime<Utc>) -> BillingResult<Transition>,
    {
        let lock = self.lock_for(id);
        let guard = lock.lock().await;

        let current = match self.load(id).await {
            Ok(current) => current,
            Err(e) => {
                drop(guard);
                self.release_idle_lock(id, &lock);
                return Err(e);
            }
        };
        let now = now.unwrap_or_else(|| self.clock.now());
        let Transition { resource, event } = plan(self, &current, now)?;

        with_context!(
            self.store
                .commit_transition(&current, &resource, &event, self.store_timeout)
                .await,
            format!("{} resource", event.action),
            Some(id)
        )?;

        match event.duration {
            Some(hours) => info!(
                resource_id = %id,
                hours = %hours,
                cost = %event.cost.unwrap_or_default(),
                total_hours = %resource.total_running_hours,
                "Resource stopped"
            ),
            None => info!(resource_id = %id, at = %now, "Resource started"),
        }

        Ok(resource)
    }

    async fn load(&self, id: &str) -> BillingResult<BillableResource> {
        self.bounded("load_resource", self.store.load_resource(id))
            .await?
            .ok_or_else(|| BillingError::NotFound {
                resource_id: id.to_string(),
            })
    }

    async fn bounded<T>(
        &self,
        operation: &'static str,
        fut: impl Future<Output = Result<T, StorageError>>,
    ) -> Result<T, StorageError> {
        with_deadline(operation, self.store_timeout, fut).await
    }

    fn lock_for(&self, id: &str) -> Arc<Mutex<()>> {
        self.locks_map()
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Forgets the lock of an id nobody else is waiting on.
    fn release_idle_lock(&self, id: &str, lock: &Arc<Mutex<()>>) {
        let mut locks = self.locks_map();
        // One reference in the map, one held by the caller.
        if Arc::strong_count(lock) <= 2 && locks.get(id).is_some_and(|held| Arc::ptr_eq(held, lock)) {
            locks.remove(id);
        }
    }

    fn locks_map(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<Mutex<()>>>> {
        self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
