//! Configuration for the orchestration core.
//!
//! Constructed manually by the embedding application; no config-file
//! parsing dependencies. The defaults mirror the production deployment:
//! five biomedical tool servers and a 60-second outbound timeout.
//!
//! # Example
//!
//! ```rust
//! use lodestar::config::OrchestratorConfig;
//!
//! let mut config = OrchestratorConfig::default();
//! config.shared_secret = Some("team-secret".to_string());
//! assert_eq!(config.tool_servers.len(), 5);
//! ```

use std::collections::HashMap;

/// Global configuration for a [`MissionController`](crate::mission::MissionController).
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Tool servers to discover at startup: server name → base URL. The
    /// server name (dashed) becomes the tool namespace (underscored).
    pub tool_servers: HashMap<String, String>,
    /// Shared secret accepted at mission launch. `None` disables the
    /// shared-secret path, leaving caller-supplied keys as the only way in.
    pub shared_secret: Option<String>,
    /// Timeout for outbound tool and domain-API calls, in seconds.
    pub request_timeout_secs: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        let tool_servers = [
            ("clinical-trials", "https://mcp.deepsense.ai/clinical_trials/mcp"),
            ("biorxiv", "https://mcp.deepsense.ai/biorxiv/mcp"),
            ("chembl", "https://mcp.deepsense.ai/chembl/mcp"),
            ("npi-registry", "https://mcp.deepsense.ai/npi_registry/mcp"),
            ("cms-coverage", "https://mcp.deepsense.ai/cms_coverage/mcp"),
        ]
        .into_iter()
        .map(|(name, url)| (name.to_string(), url.to_string()))
        .collect();

        Self {
            tool_servers,
            shared_secret: None,
            request_timeout_secs: 60,
        }
    }
}

impl OrchestratorConfig {
    /// Default configuration with the shared secret taken from the
    /// `LODESTAR_SHARED_SECRET` environment variable, if set.
    pub fn from_env() -> Self {
        Self {
            shared_secret: std::env::var("LODESTAR_SHARED_SECRET").ok(),
            ..Self::default()
        }
    }

    /// Replace the tool-server map.
    pub fn with_tool_servers(
        mut self,
        servers: impl IntoIterator<Item = (String, String)>,
    ) -> Self {
        self.tool_servers = servers.into_iter().collect();
        self
    }
}
