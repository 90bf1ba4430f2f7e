//! Configuration for the transaction orchestrator

use crate::error::OrchestratorError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the transaction orchestrator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Block explorer root used for transaction and address links
    pub explorer_base_url: String,

    /// How long to wait for a signature before giving up
    pub signature_timeout_secs: u64,

    /// Dry-run every operation before asking for a signature
    pub simulate_before_signing: bool,

    /// REST job mirror, if one is deployed
    pub mirror_url: Option<String>,

    /// Per-request timeout for the job mirror
    pub mirror_timeout_secs: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            explorer_base_url: "https://sepolia.basescan.org".to_string(),
            signature_timeout_secs: 300, // 5 minutes
            simulate_before_signing: true,
            mirror_url: None,
            mirror_timeout_secs: 10,
        }
    }
}

impl OrchestratorConfig {
    /// Layer an optional config file and `ESCROW_*` environment variables over the defaults
    pub fn load(path: Option<&str>) -> Result<Self, OrchestratorError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(true));
        }
        builder
            .add_source(config::Environment::with_prefix("ESCROW").try_parsing(true))
            .build()
            .and_then(|settings| settings.try_deserialize::<Self>())
            .map_err(|e| OrchestratorError::config(e.to_string()))
    }

    pub fn signature_timeout(&self) -> Duration {
        Duration::from_secs(self.signature_timeout_secs)
    }

    pub fn mirror_timeout(&self) -> Duration {
        Duration::from_secs(self.mirror_timeout_secs)
    }
}

/// Builder for OrchestratorConfig
pub struct OrchestratorConfigBuilder {
    config: OrchestratorConfig,
}

impl OrchestratorConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: OrchestratorConfig::default(),
        }
    }

    pub fn explorer_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.explorer_base_url = url.into();
        self
    }

    pub fn signature_timeout(mut self, timeout: Duration) -> Self {
        self.config.signature_timeout_secs = timeout.as_secs();
        self
    }

    pub fn simulate_before_signing(mut self, enable: bool) -> Self {
        self.config.simulate_before_signing = enable;
        self
    }

    pub fn mirror_url(mut self, url: impl Into<String>) -> Self {
        self.config.mirror_url = Some(url.into());
        self
    }

    pub fn mirror_timeout(mut self, timeout: Duration) -> Self {
        self.config.mirror_timeout_secs = timeout.as_secs();
        self
    }

    pub fn build(self) -> OrchestratorConfig {
        self.config
    }
}

impl Default for OrchestratorConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
