pub mod clock;
pub mod lifecycle;
pub mod resource;
pub mod running_time;

// exports for the common call sites
pub use clock::{ManualClock, SystemClock, TimeSource};
pub use lifecycle::{ActivationGate, LifecycleController, StatusGate, Transition};
pub use resource::{BillableResource, ServiceKind, ServiceStatus, SubResource};
pub use running_time::RunningTimeCalculator;
