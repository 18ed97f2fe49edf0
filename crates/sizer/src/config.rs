//! Sizer service configuration

use std::path::PathBuf;

use anyhow::Result;
use serde::Deserialize;
use sizer_lib::ledger::{LedgerConfig, DEFAULT_COOLDOWN_HOURS};
use sizer_lib::orchestrator::EngineSettings;
use sizer_lib::report::RunMode;

/// Service configuration, read from `SIZER_`-prefixed environment
/// variables. Engine tuning nests under `SIZER_ENGINE__`, e.g.
/// `SIZER_ENGINE__POLICY__CRITICAL_BAND=0.45`.
#[derive(Debug, Clone, Deserialize)]
pub struct SizerConfig {
    /// Deployment name tagged on every log record
    #[serde(default = "default_deployment")]
    pub deployment: String,

    /// API server port for health/metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Minutes between sizing runs
    #[serde(default = "default_run_interval")]
    pub run_interval_minutes: u64,

    /// Apply changes; the default stops after analysis
    #[serde(default)]
    pub apply: bool,

    /// Restrict runs to one owning scope
    #[serde(default)]
    pub scope: Option<String>,

    /// Fleet snapshot file (JSON); unset starts with an empty inventory
    #[serde(default)]
    pub snapshot_path: Option<String>,

    /// Tier ladder file (JSON); unset uses the built-in ladder
    #[serde(default)]
    pub catalog_path: Option<String>,

    /// Change ledger persistence file (JSON lines); unset keeps the
    /// ledger in memory only
    #[serde(default)]
    pub ledger_path: Option<String>,

    /// File to write each run's result to; unset logs only
    #[serde(default)]
    pub report_path: Option<String>,

    /// Minimum hours between two applied changes for one resource
    #[serde(default = "default_cooldown_hours")]
    pub cooldown_hours: i64,

    /// Window, band and executor tuning; the `apply` and `scope`
    /// fields above win over their nested counterparts
    #[serde(default)]
    pub engine: EngineSettings,
}

fn default_deployment() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "tier-sizer".to_string())
}

fn default_api_port() -> u16 {
    8080
}

fn default_run_interval() -> u64 {
    360
}

fn default_cooldown_hours() -> i64 {
    DEFAULT_COOLDOWN_HOURS
}

impl SizerConfig {
    /// Load configuration from the environment
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("SIZER").separator("__"))
            .build()?;

        Ok(config.try_deserialize().unwrap_or_else(|_| SizerConfig {
            deployment: default_deployment(),
            api_port: default_api_port(),
            run_interval_minutes: default_run_interval(),
            apply: false,
            scope: None,
            snapshot_path: None,
            catalog_path: None,
            ledger_path: None,
            report_path: None,
            cooldown_hours: default_cooldown_hours(),
            engine: EngineSettings::default(),
        }))
    }

    pub fn mode(&self) -> RunMode {
        if self.apply {
            RunMode::Apply
        } else {
            RunMode::DryRun
        }
    }

    /// Engine settings with the service-level mode and scope applied.
    pub fn engine_settings(&self) -> EngineSettings {
        let mut settings = self.engine.clone();
        settings.run.mode = self.mode();
        settings.run.scope = self.scope.clone();
        settings
    }

    pub fn ledger_config(&self) -> LedgerConfig {
        LedgerConfig {
            cooldown_hours: self.cooldown_hours,
            persistence_path: self.ledger_path.as_ref().map(PathBuf::from),
        }
    }
}
