use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::core::resource::ServiceStatus;

#[derive(Error, Debug)]
pub enum BillingError {
    #[error("Invalid transition: cannot {action} resource {resource_id} while it is {state}")]
    InvalidTransition {
        resource_id: String,
        action: &'static str,
        state: RunState,
    },

    #[error("Clock skew on resource {resource_id}: now {now} is before last start {started_at}")]
    ClockSkew {
        resource_id: String,
        started_at: DateTime<Utc>,
        now: DateTime<Utc>,
    },

    #[error("Precondition failed for resource {resource_id}: status {status} is not activatable")]
    Precondition {
        resource_id: String,
        status: ServiceStatus,
    },

    #[error("Invalid resource {resource_id}: {message}")]
    InvalidResource {
        resource_id: String,
        message: String,
    },

    #[error("Resource not found: {resource_id}")]
    NotFound {
        resource_id: String,
    },

    #[error("Storage Error: {0}")]
    Storage(#[from] StorageError),
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("I/O failure on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to (de)serialize store contents: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage operation `{operation}` timed out after {timeout_ms}ms")]
    Timeout {
        operation: &'static str,
        timeout_ms: u64,
    },

    #[error("Store is unavailable: {message}")]
    Unavailable {
        message: String,
    },
}

/// Running state of a billable resource, as seen by the lifecycle state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Stopped,
    Running,
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunState::Stopped => write!(f, "stopped"),
            RunState::Running => write!(f, "running"),
        }
    }
}

impl BillingError {
    /// True for errors the caller is expected to surface to the user and move on.
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            BillingError::InvalidTransition { .. }
                | BillingError::Precondition { .. }
                | BillingError::NotFound { .. }
                | BillingError::InvalidResource { .. }
        )
    }
}

// Error context for tracking error chain
#[derive(Debug)]
pub struct ErrorContext {
    pub timestamp: DateTime<Utc>,
    pub source_location: &'static str,
    pub operation: String,
    pub resource_id: Option<String>,
}

pub type BillingResult<T> = Result<T, BillingError>;

/// Logs a failed operation together with where and when it happened, then
/// hands the error back unchanged.
#[macro_export]
macro_rules! with_context {
    ($result:expr, $operation:expr) => {
        $crate::with_context!($result, $operation, None::<String>)
    };
    ($result:expr, $operation:expr, $resource_id:expr) => {
        $result.map_err(|e| {
            let context = $crate::errors::ErrorContext {
                timestamp: chrono::Utc::now(),
                source_location: std::file!(),
                operation: $operation.to_string(),
                resource_id: $resource_id.map(|id| id.to_string()),
            };
            tracing::error!(
                error = %e,
                context = ?context,
                "Operation failed"
            );
            e
        })
    };
}
