use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::errors::RunState;

/// A rented service whose running time and cost we track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BillableResource {
    pub id: String,
    pub name: String,
    pub kind: ServiceKind,
    pub provider: String,
    pub status: ServiceStatus,
    pub hourly_rate: Decimal,
    pub estimated_monthly_hours: Decimal,
    pub is_running: bool,
    pub last_start_time: Option<DateTime<Utc>>,
    pub last_stop_time: Option<DateTime<Utc>>,
    pub total_running_hours: Decimal,
    #[serde(default)]
    pub sub_resources: Vec<SubResource>,
    /// Free-form specifications and custom fields. Never used for accrual.
    #[serde(default)]
    pub metadata: Vec<(String, String)>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Accrues at its own rate whenever the parent resource is running.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubResource {
    pub name: String,
    pub hourly_rate: Decimal,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServiceKind {
    VirtualMachine,
    Storage,
    Database,
    Cdn,
    LoadBalancer,
    Monitoring,
    Backup,
    Other,
}

/// External lifecycle status of the rented service, independent of whether it
/// is currently running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    Active,
    Inactive,
    Expired,
    Pending,
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ServiceKind::VirtualMachine => "virtual-machine",
            ServiceKind::Storage => "storage",
            ServiceKind::Database => "database",
            ServiceKind::Cdn => "cdn",
            ServiceKind::LoadBalancer => "load-balancer",
            ServiceKind::Monitoring => "monitoring",
            ServiceKind::Backup => "backup",
            ServiceKind::Other => "other",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for ServiceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "virtual-machine" | "vm" => Ok(ServiceKind::VirtualMachine),
            "storage" => Ok(ServiceKind::Storage),
            "database" | "db" => Ok(ServiceKind::Database),
            "cdn" => Ok(ServiceKind::Cdn),
            "load-balancer" => Ok(ServiceKind::LoadBalancer),
            "monitoring" => Ok(ServiceKind::Monitoring),
            "backup" => Ok(ServiceKind::Backup),
            "other" => Ok(ServiceKind::Other),
            other => Err(format!("unknown service kind: {}", other)),
        }
    }
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceStatus::Active => write!(f, "active"),
            ServiceStatus::Inactive => write!(f, "inactive"),
            ServiceStatus::Expired => write!(f, "expired"),
            ServiceStatus::Pending => write!(f, "pending"),
        }
    }
}

impl FromStr for ServiceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "active" => Ok(ServiceStatus::Active),
            "inactive" => Ok(ServiceStatus::Inactive),
            "expired" => Ok(ServiceStatus::Expired),
            "pending" => Ok(ServiceStatus::Pending),
            other => Err(format!("unknown service status: {}", other)),
        }
    }
}

impl BillableResource {
    /// New resources start stopped with nothing accrued.
    pub fn new(
        name: impl Into<String>,
        kind: ServiceKind,
        hourly_rate: Decimal,
        estimated_monthly_hours: Decimal,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            kind,
            provider: String::new(),
            status: ServiceStatus::Active,
            hourly_rate,
            estimated_monthly_hours,
            is_running: false,
            last_start_time: None,
            last_stop_time: None,
            total_running_hours: Decimal::ZERO,
            sub_resources: Vec::new(),
            metadata: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = provider.into();
        self
    }

    pub fn with_status(mut self, status: ServiceStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_sub_resource(mut self, name: impl Into<String>, hourly_rate: Decimal) -> Self {
        self.sub_resources.push(SubResource {
            name: name.into(),
            hourly_rate,
            description: String::new(),
        });
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.push((key.into(), value.into()));
        self
    }

    pub fn run_state(&self) -> RunState {
        if self.is_running {
            RunState::Running
        } else {
            RunState::Stopped
        }
    }

    /// Combined hourly rate of the sub-resources.
    pub fn sub_resource_rate(&self) -> Decimal {
        self.sub_resources.iter().map(|sub| sub.hourly_rate).sum()
    }

    /// Rates must be non-negative for accrual to stay non-negative.
    pub fn validate(&self) -> Result<(), String> {
        if self.hourly_rate < Decimal::ZERO {
            return Err(format!("hourly rate must not be negative: {}", self.hourly_rate));
        }
        if self.estimated_monthly_hours < Decimal::ZERO {
            return Err(format!(
                "estimated monthly hours must not be negative: {}",
                self.estimated_monthly_hours
            ));
        }
        if let Some(sub) = self
            .sub_resources
            .iter()
            .find(|sub| sub.hourly_rate < Decimal::ZERO)
        {
            return Err(format!("sub-resource {} has a negative hourly rate", sub.name));
        }
        Ok(())
    }
}
