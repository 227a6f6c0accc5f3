pub mod billing;
pub mod cli;
pub mod config;
pub mod core;
pub mod errors;
pub mod storage;
pub mod usage;

// Re-exports
pub use billing::{BillingCalculation, CostAccrualEngine, PeriodPolicy};
pub use core::{BillableResource, LifecycleController, RunningTimeCalculator, TimeSource};
pub use errors::{BillingError, BillingResult, StorageError};
pub use storage::{JsonFileStore, MemoryStore, ResourceStore};
pub use usage::{UsageAction, UsageEvent};
