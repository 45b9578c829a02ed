use std::sync::Arc;

use chrono::Duration;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{DocketError, Result};
use crate::maintenance::MaintenanceOp;

/// Name used when a client is created without one.
pub const DEFAULT_CLIENT_NAME: &str = "default";

/// Driver kind registered out of the box.
pub const MEMORY_DRIVER: &str = "memory";

/// Configuration for a docket client.
///
/// Every field has a default, so an empty TOML document is a valid
/// configuration for the in-memory driver.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Registry name of the client.
    pub name: String,
    /// Backend selection.
    pub driver: DriverConfig,
    /// Whether the client drives the maintenance cycle for its queues.
    pub run_maintenance: bool,
    /// Timing of the maintenance worker.
    pub maintenance: MaintenanceConfig,
    /// How long teardown waits for a worker before aborting it.
    pub shutdown_timeout_ms: u64,
    /// Settings given to every queue the client opens.
    pub queue_defaults: QueueSettings,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_CLIENT_NAME.to_string(),
            driver: DriverConfig::default(),
            run_maintenance: true,
            maintenance: MaintenanceConfig::default(),
            shutdown_timeout_ms: 30_000,
            queue_defaults: QueueSettings::default(),
        }
    }
}

impl ClientConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Parse a configuration from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)
            .map_err(|err| DocketError::InvalidConfig(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_driver(mut self, driver: DriverConfig) -> Self {
        self.driver = driver;
        self
    }

    pub fn with_maintenance(mut self, run: bool) -> Self {
        self.run_maintenance = run;
        self
    }

    pub fn with_maintenance_config(mut self, maintenance: MaintenanceConfig) -> Self {
        self.maintenance = maintenance;
        self
    }

    pub fn with_shutdown_timeout(mut self, ms: u64) -> Self {
        self.shutdown_timeout_ms = ms;
        self
    }

    pub fn with_queue_defaults(mut self, settings: QueueSettings) -> Self {
        self.queue_defaults = settings;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(DocketError::InvalidConfig("client name is empty".into()));
        }
        if self.driver.kind.is_empty() {
            return Err(DocketError::InvalidConfig("driver kind is empty".into()));
        }
        if self.maintenance.batch == 0 {
            return Err(DocketError::InvalidConfig(
                "maintenance batch must be at least 1".into(),
            ));
        }
        self.queue_defaults.validate()
    }

    pub fn shutdown_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.shutdown_timeout_ms)
    }
}

/// Backend selection: a registered driver kind plus free-form options.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    pub kind: String,
    pub options: Value,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            kind: MEMORY_DRIVER.to_string(),
            options: Value::Null,
        }
    }
}

impl DriverConfig {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            options: Value::Null,
        }
    }

    pub fn with_options(mut self, options: Value) -> Self {
        self.options = options;
        self
    }
}

/// Timing of the worker that drives maintenance tasks.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaintenanceConfig {
    /// Idle wait when no task is due, in milliseconds.
    pub sleep_ms: u64,
    /// Tasks claimed per pick.
    pub batch: usize,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            sleep_ms: 500,
            batch: 10,
        }
    }
}

/// Per-queue policy.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    /// Attempts allowed before a rejected or orphaned document is killed.
    pub tolerance: u32,
    pub make_pending_delay_ms: u64,
    pub reschedule_orphans_delay_ms: u64,
    pub kill_orphans_delay_ms: u64,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            tolerance: 5,
            make_pending_delay_ms: 3_000,
            reschedule_orphans_delay_ms: 3_000,
            kill_orphans_delay_ms: 3_000,
        }
    }
}

impl QueueSettings {
    /// Delay between two runs of a maintenance operation.
    pub fn delay_for(&self, op: MaintenanceOp) -> Duration {
        let ms = match op {
            MaintenanceOp::MakePending => self.make_pending_delay_ms,
            MaintenanceOp::RescheduleOrphans => self.reschedule_orphans_delay_ms,
            MaintenanceOp::KillOrphans => self.kill_orphans_delay_ms,
        };
        Duration::milliseconds(ms.min(i64::MAX as u64) as i64)
    }

    pub fn validate(&self) -> Result<()> {
        for op in MaintenanceOp::ALL {
            if self.delay_for(op) <= Duration::zero() {
                return Err(DocketError::InvalidConfig(format!(
                    "{} delay must be positive",
                    op.as_str()
                )));
            }
        }
        Ok(())
    }

    /// Produce the settings that result from applying `patch`.
    pub fn merged(&self, patch: &QueueSettingsPatch) -> Self {
        Self {
            tolerance: patch.tolerance.unwrap_or(self.tolerance),
            make_pending_delay_ms: patch
                .make_pending_delay_ms
                .unwrap_or(self.make_pending_delay_ms),
            reschedule_orphans_delay_ms: patch
                .reschedule_orphans_delay_ms
                .unwrap_or(self.reschedule_orphans_delay_ms),
            kill_orphans_delay_ms: patch
                .kill_orphans_delay_ms
                .unwrap_or(self.kill_orphans_delay_ms),
        }
    }
}

/// Partial update for [`QueueSettings`]; `None` keeps the current value.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSettingsPatch {
    pub tolerance: Option<u32>,
    pub make_pending_delay_ms: Option<u64>,
    pub reschedule_orphans_delay_ms: Option<u64>,
    pub kill_orphans_delay_ms: Option<u64>,
}

impl QueueSettingsPatch {
    pub fn tolerance(mut self, tolerance: u32) -> Self {
        self.tolerance = Some(tolerance);
        self
    }

    pub fn make_pending_delay_ms(mut self, ms: u64) -> Self {
        self.make_pending_delay_ms = Some(ms);
        self
    }

    pub fn reschedule_orphans_delay_ms(mut self, ms: u64) -> Self {
        self.reschedule_orphans_delay_ms = Some(ms);
        self
    }

    pub fn kill_orphans_delay_ms(mut self, ms: u64) -> Self {
        self.kill_orphans_delay_ms = Some(ms);
        self
    }
}

/// A value tagged with a monotonically increasing version.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Versioned<T> {
    pub version: u64,
    pub value: T,
}

/// Shared, atomically swappable queue settings.
#[derive(Debug)]
pub struct SettingsCell {
    current: RwLock<Arc<Versioned<QueueSettings>>>,
}

impl SettingsCell {
    pub fn new(settings: QueueSettings) -> Self {
        Self {
            current: RwLock::new(Arc::new(Versioned {
                version: 1,
                value: settings,
            })),
        }
    }

    /// Snapshot of the current settings.
    pub fn load(&self) -> Arc<Versioned<QueueSettings>> {
        Arc::clone(&self.current.read())
    }

    /// Merge `patch` into the current settings and publish a new version.
    pub fn apply(&self, patch: &QueueSettingsPatch) -> Result<Arc<Versioned<QueueSettings>>> {
        let mut guard = self.current.write();
        let value = guard.value.merged(patch);
        value.validate()?;
        let next = Arc::new(Versioned {
            version: guard.version + 1,
            value,
        });
        *guard = Arc::clone(&next);
        Ok(next)
    }
}
