/*
* Configuration for the service billing manager.
*
* Layers, lowest priority first:
*   1. hard-coded defaults below
*   2. <CONFIG_PATH>/default.toml
*   3. <CONFIG_PATH>/local.toml (optional, machine specific)
*   4. APP_* environment variables, `__` between section and key
*      (APP_STORAGE__BACKEND=json, APP_BILLING__DAYS_BASIS=31,
*       APP_BILLING__ACTIVATABLE_STATUSES=active,pending)
*/

use config::{Config, ConfigBuilder, ConfigError, Environment, File};
use config::builder::DefaultState;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::billing::{PeriodPolicy, DEFAULT_DAYS_BASIS};
use crate::core::lifecycle::StatusGate;
use crate::core::resource::ServiceStatus;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub storage: StorageSettings,
    pub billing: BillingSettings,
    pub watch: WatchSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSettings {
    pub backend: StorageBackend,
    pub data_path: PathBuf,
    pub operation_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillingSettings {
    /// Divisor of the day-of-month when prorating the monthly estimate.
    pub days_basis: u32,
    pub activatable_statuses: Vec<ServiceStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchSettings {
    pub refresh_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    pub level: String,
}

impl Settings {
    /// Loads `explicit` when given, the `CONFIG_PATH` layers otherwise.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        match explicit {
            Some(path) => Self::new_from_file(path),
            None => Self::new(),
        }
    }

    /// Where `load` reads from, for reporting once logging is up.
    pub fn source(explicit: Option<&Path>) -> PathBuf {
        explicit.map(Path::to_path_buf).unwrap_or_else(config_dir)
    }

    pub fn new() -> Result<Self, ConfigError> {
        Self::from_dir(&config_dir())
    }

    /// Layers `default.toml` and `local.toml` from `dir` over the defaults.
    pub fn from_dir(dir: &Path) -> Result<Self, ConfigError> {
        Self::layered(dir, environment())
    }

    /// Uses a single explicit file instead of the directory layers.
    pub fn new_from_file(path: &Path) -> Result<Self, ConfigError> {
        Self::defaults()?
            .add_source(File::from(path))
            .add_source(environment())
            .build()?
            .try_deserialize()
    }

    fn layered(dir: &Path, env: Environment) -> Result<Self, ConfigError> {
        Self::defaults()?
            .add_source(File::with_name(&dir.join("default").to_string_lossy()).required(false))
            .add_source(File::with_name(&dir.join("local").to_string_lossy()).required(false))
            .add_source(env)
            .build()?
            .try_deserialize()
    }

    fn defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
        let defaults = generate_default_config();
        Config::builder()
            .set_default("storage.backend", "json")?
            .set_default(
                "storage.data_path",
                defaults.storage.data_path.to_string_lossy().to_string(),
            )?
            .set_default("storage.operation_timeout_ms", defaults.storage.operation_timeout_ms as i64)?
            .set_default("billing.days_basis", i64::from(defaults.billing.days_basis))?
            .set_default("billing.activatable_statuses", vec!["active"])?
            .set_default("watch.refresh_interval_ms", defaults.watch.refresh_interval_ms as i64)?
            .set_default("logging.level", defaults.logging.level)
    }

    pub fn period_policy(&self) -> PeriodPolicy {
        PeriodPolicy::new(self.billing.days_basis)
    }

    pub fn status_gate(&self) -> StatusGate {
        StatusGate::new(self.billing.activatable_statuses.clone())
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.storage.operation_timeout_ms)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.watch.refresh_interval_ms.max(100))
    }

    pub fn log_level(&self) -> tracing::Level {
        self.logging.level.parse().unwrap_or(tracing::Level::INFO)
    }
}

fn config_dir() -> PathBuf {
    PathBuf::from(std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config".to_string()))
}

fn environment() -> Environment {
    Environment::with_prefix("APP")
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
        .list_separator(",")
        .with_list_parse_key("billing.activatable_statuses")
}

pub fn generate_default_config() -> Settings {
    Settings {
        storage: StorageSettings {
            backend: StorageBackend::Json,
            data_path: PathBuf::from("data/services.json"),
            operation_timeout_ms: 5_000,
        },
        billing: BillingSettings {
            days_basis: DEFAULT_DAYS_BASIS,
            activatable_statuses: vec![ServiceStatus::Active],
        },
        watch: WatchSettings {
            refresh_interval_ms: 1_000,
        },
        logging: LoggingSettings {
            level: "info".to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("service-billing-config-{}-{}", name, uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn empty_dir_yields_defaults() {
        let dir = scratch_dir("empty");
        let settings = Settings::from_dir(&dir).unwrap();

        assert_eq!(settings.storage.backend, StorageBackend::Json);
        assert_eq!(settings.billing.days_basis, 30);
        assert_eq!(settings.billing.activatable_statuses, vec![ServiceStatus::Active]);
        assert_eq!(settings.store_timeout(), Duration::from_secs(5));
        assert_eq!(settings.log_level(), tracing::Level::INFO);

        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn local_overrides_default_file() {
        let dir = scratch_dir("layers");
        std::fs::write(
            dir.join("default.toml"),
            "[storage]\nbackend = \"memory\"\n\n[billing]\ndays_basis = 31\n",
        )
        .unwrap();
        std::fs::write(
            dir.join("local.toml"),
            "[billing]\nactivatable_statuses = [\"active\", \"pending\"]\n",
        )
        .unwrap();

        let settings = Settings::from_dir(&dir).unwrap();
        assert_eq!(settings.storage.backend, StorageBackend::Memory);
        assert_eq!(settings.period_policy().days_basis, 31);
        assert_eq!(
            settings.billing.activatable_statuses,
            vec![ServiceStatus::Active, ServiceStatus::Pending]
        );

        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn generated_default_round_trips_through_toml() {
        let dir = scratch_dir("generated");
        let path = dir.join("default.toml");
        std::fs::write(&path, toml::to_string_pretty(&generate_default_config()).unwrap()).unwrap();

        let settings = Settings::new_from_file(&path).unwrap();
        assert_eq!(settings.watch.refresh_interval_ms, 1_000);
        assert_eq!(settings.storage.data_path, PathBuf::from("data/services.json"));

        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn environment_accepts_comma_separated_statuses() {
        let dir = scratch_dir("env-list");
        let env: config::Map<String, String> = [
            ("APP_BILLING__ACTIVATABLE_STATUSES".to_string(), "active,pending".to_string()),
            ("APP_BILLING__DAYS_BASIS".to_string(), "31".to_string()),
        ]
        .into_iter()
        .collect();

        let settings = Settings::layered(&dir, environment().source(Some(env))).unwrap();
        assert_eq!(
            settings.billing.activatable_statuses,
            vec![ServiceStatus::Active, ServiceStatus::Pending]
        );
        assert_eq!(settings.billing.days_basis, 31);

        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn explicit_file_is_both_loaded_and_reported() {
        let dir = scratch_dir("explicit");
        let path = dir.join("custom.toml");
        std::fs::write(&path, "[logging]\nlevel = \"debug\"\n").unwrap();

        let settings = Settings::load(Some(&path)).unwrap();
        assert_eq!(settings.log_level(), tracing::Level::DEBUG);
        assert_eq!(Settings::source(Some(&path)), path);

        let _ = std::fs::remove_dir_all(dir);
    }
}
