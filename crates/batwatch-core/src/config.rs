//! Dashboard configuration.
//!
//! Precedence: defaults < config file (`BATWATCH_CONFIG`, default `config/batwatch`, any
//! format the `config` crate knows, optional) < `BATWATCH_*` environment variables.
//!
//! | Env | Default | Description |
//! |-----|---------|-------------|
//! | BATWATCH_BIND_ADDR | 127.0.0.1 | Gateway listen address. |
//! | BATWATCH_PORT | 8010 | Gateway port. |
//! | BATWATCH_STORAGE_PATH | ./data | Base directory for the sled store. |
//! | BATWATCH_PREDICT_API_URL | http://127.0.0.1:5000 | External prediction API. |
//! | BATWATCH_PREDICT_TIMEOUT_SECS | 60 | Per-request timeout for the prediction API. |
//! | BATWATCH_STATUS_REVERT_SECS | 5 | How long success/error badges stay visible. |
//! | BATWATCH_FLEET_EXCLUSIVE | true | Only one server/standalone may be busy at a time. |

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::dispatcher::DispatchPolicy;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardConfig {
    pub app_name: String,
    pub bind_addr: String,
    pub port: u16,
    /// Base directory; the store lives in `{storage_path}/batwatch_store`.
    pub storage_path: String,
    pub predict_api_url: String,
    pub predict_timeout_secs: u64,
    pub status_revert_secs: i64,
    pub page_size: usize,
    pub max_page_size: usize,
    /// Species kept per prediction (0 keeps all).
    pub prediction_top_k: usize,
    pub max_record_secs: u32,
    pub fleet_exclusive: bool,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            app_name: "Batwatch".to_string(),
            bind_addr: "127.0.0.1".to_string(),
            port: 8010,
            storage_path: "./data".to_string(),
            predict_api_url: "http://127.0.0.1:5000".to_string(),
            predict_timeout_secs: 60,
            status_revert_secs: crate::status::DEFAULT_REVERT_AFTER_SECS,
            page_size: 25,
            max_page_size: 100,
            prediction_top_k: 5,
            max_record_secs: 3600,
            fleet_exclusive: true,
        }
    }
}

impl DashboardConfig {
    pub fn load() -> Result<Self, config::ConfigError> {
        let config_path =
            std::env::var("BATWATCH_CONFIG").unwrap_or_else(|_| "config/batwatch".to_string());
        let d = Self::default();
        config::Config::builder()
            .set_default("app_name", d.app_name)?
            .set_default("bind_addr", d.bind_addr)?
            .set_default("port", i64::from(d.port))?
            .set_default("storage_path", d.storage_path)?
            .set_default("predict_api_url", d.predict_api_url)?
            .set_default("predict_timeout_secs", d.predict_timeout_secs as i64)?
            .set_default("status_revert_secs", d.status_revert_secs)?
            .set_default("page_size", d.page_size as i64)?
            .set_default("max_page_size", d.max_page_size as i64)?
            .set_default("prediction_top_k", d.prediction_top_k as i64)?
            .set_default("max_record_secs", i64::from(d.max_record_secs))?
            .set_default("fleet_exclusive", d.fleet_exclusive)?
            .add_source(config::File::with_name(&config_path).required(false))
            .add_source(
                config::Environment::with_prefix("BATWATCH")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    pub fn store_path(&self) -> PathBuf {
        PathBuf::from(&self.storage_path).join("batwatch_store")
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind_addr, self.port)
    }

    pub fn predict_timeout(&self) -> Duration {
        Duration::from_secs(self.predict_timeout_secs.max(1))
    }

    pub fn revert_after(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.status_revert_secs.max(0))
    }

    pub fn dispatch_policy(&self) -> DispatchPolicy {
        DispatchPolicy {
            fleet_exclusive: self.fleet_exclusive,
            max_record_secs: self.max_record_secs,
        }
    }
}
