use std::time::Duration;

use serde::Deserialize;

use crate::error::StoreError;

/// Root configuration, parsed from TOML.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallstoreConfig {
    /// Transaction retry policy.
    #[serde(default)]
    pub store: StoreConfig,

    /// Concurrency limits for backend round trips.
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Backend selection.
    #[serde(default)]
    pub backend: BackendConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Compare-and-swap retries before a transaction fails with `Conflict`.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// First retry delay; doubles per attempt.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

fn default_max_retries() -> u32 {
    3
}
fn default_retry_backoff_ms() -> u64 {
    10
}
fn default_max_backoff_ms() -> u64 {
    500
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl StoreConfig {
    /// Delay before retry number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let base = self.retry_backoff_ms;
        let max = self.max_backoff_ms.max(base);
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        Duration::from_millis(base.saturating_mul(factor).min(max))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// Backend round trips allowed in flight at once.
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
    /// Operations allowed to wait for a slot; beyond that they are rejected.
    #[serde(default = "default_max_queued")]
    pub max_queued: usize,
    /// Longest wait for a slot. 0 waits without bound.
    #[serde(default = "default_admission_timeout_ms")]
    pub admission_timeout_ms: u64,
}

fn default_max_in_flight() -> usize {
    100
}
fn default_max_queued() -> usize {
    10_000
}
fn default_admission_timeout_ms() -> u64 {
    30_000
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_in_flight: default_max_in_flight(),
            max_queued: default_max_queued(),
            admission_timeout_ms: default_admission_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    /// Registered backend name: "memory" (default) or "file".
    #[serde(default = "default_backend_kind")]
    pub kind: String,
    /// Backend-specific settings, handed to its factory as JSON.
    #[serde(default)]
    pub config: Option<toml::Value>,
}

fn default_backend_kind() -> String {
    "memory".into()
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: default_backend_kind(),
            config: None,
        }
    }
}

impl BackendConfig {
    pub fn config_json(&self) -> Result<String, StoreError> {
        match &self.config {
            Some(v) => serde_json::to_string(v)
                .map_err(|e| StoreError::Config(format!("backend '{}' config: {e}", self.kind))),
            None => Ok("{}".to_string()),
        }
    }
}

impl CallstoreConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self, StoreError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| StoreError::Config(format!("{path}: {e}")))?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(toml_str: &str) -> Result<Self, StoreError> {
        let config: Self = toml::from_str(toml_str).map_err(|e| StoreError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), StoreError> {
        if self.scheduler.max_in_flight == 0 {
            return Err(StoreError::Config("scheduler.max_in_flight must be > 0".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let cfg = CallstoreConfig::parse("").unwrap();
        assert_eq!(cfg.backend.kind, "memory");
        assert_eq!(cfg.backend.config_json().unwrap(), "{}");
        assert_eq!(cfg.scheduler.max_in_flight, 100);
        assert_eq!(cfg.store.max_retries, 3);
    }

    #[test]
    fn test_backend_table_becomes_json() {
        let cfg = CallstoreConfig::parse(
            r#"
            [scheduler]
            max_in_flight = 4
            admission_timeout_ms = 0

            [backend]
            kind = "file"
            config = { data_dir = "/var/lib/callstore" }
            "#,
        )
        .unwrap();
        assert_eq!(cfg.scheduler.max_in_flight, 4);
        assert_eq!(cfg.scheduler.max_queued, 10_000);
        assert_eq!(cfg.backend.kind, "file");
        let json: serde_json::Value =
            serde_json::from_str(&cfg.backend.config_json().unwrap()).unwrap();
        assert_eq!(json["data_dir"], "/var/lib/callstore");
    }

    #[test]
    fn test_zero_in_flight_rejected() {
        let err = CallstoreConfig::parse("[scheduler]\nmax_in_flight = 0\n").unwrap_err();
        assert!(matches!(err, StoreError::Config(_)));
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let cfg = StoreConfig {
            max_retries: 5,
            retry_backoff_ms: 10,
            max_backoff_ms: 35,
        };
        assert_eq!(cfg.backoff(1), Duration::from_millis(10));
        assert_eq!(cfg.backoff(2), Duration::from_millis(20));
        assert_eq!(cfg.backoff(3), Duration::from_millis(35));
    }
}
