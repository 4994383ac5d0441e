//! Logging Configuration
//!
//! Loaded from environment variables, 12-factor style.

/// Default filter directive when `PERSIST_LOG` is unset
pub const DEFAULT_FILTER: &str = "info";

/// Logging configuration loaded from environment variables
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// `EnvFilter` directive (default: info)
    pub filter: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
    /// Include the event target (module path)
    pub with_target: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            filter: DEFAULT_FILTER.to_string(),
            json: false,
            with_target: true,
        }
    }
}

impl LogConfig {
    /// Load configuration from environment variables
    ///
    /// - `PERSIST_LOG`: filter directive, e.g. `persisted_vars=debug`
    /// - `PERSIST_LOG_JSON`: `true`/`1` for JSON output
    pub fn from_env() -> Self {
        LogConfig {
            filter: std::env::var("PERSIST_LOG")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_FILTER.to_string()),
            json: std::env::var("PERSIST_LOG_JSON")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
            with_target: true,
        }
    }

    /// Quiet config for tests
    pub fn test() -> Self {
        LogConfig {
            filter: "warn".to_string(),
            json: false,
            with_target: false,
        }
    }
}
