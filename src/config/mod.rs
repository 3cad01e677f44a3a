/// Configuration management for the WayFlow runtime
///
/// Handles server configuration, database location and runtime limits.

use serde::{Deserialize, Serialize};

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub runtime: RuntimeConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server bind address (e.g., "0.0.0.0")
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Directory holding `wayflow.db` (default: "data")
    pub data_dir: String,
}

/// Execution limits and start-up assets
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Steps a single flow may run during one `execute()` call
    pub max_flow_steps: usize,
    /// Directory of assistant files registered at start-up
    pub assistants_dir: Option<String>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_flow_steps: 1000,
            assistants_dir: None,
        }
    }
}

impl Default for Config {
    /// Default configuration with ENV_VAR support for container deployment
    fn default() -> Self {
        let runtime = RuntimeConfig::default();
        Self {
            server: ServerConfig {
                host: std::env::var("WAYFLOW_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: std::env::var("WAYFLOW_PORT")
                    .unwrap_or_else(|_| "3004".to_string())
                    .parse()
                    .unwrap_or(3004),
            },
            database: DatabaseConfig {
                data_dir: std::env::var("WAYFLOW_DATA_DIR").unwrap_or_else(|_| "data".to_string()),
            },
            runtime: RuntimeConfig {
                max_flow_steps: std::env::var("WAYFLOW_MAX_FLOW_STEPS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(runtime.max_flow_steps),
                assistants_dir: std::env::var("WAYFLOW_ASSISTANTS_DIR").ok(),
            },
        }
    }
}
