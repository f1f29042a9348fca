//! Runtime tunables for the lock acquisition protocol.

use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::{Error, Result};

/// Ledger configuration.
///
/// The defaults reproduce the historical protocol: a 1000 ms bounded wait
/// per lock, a 1000 ms delay before restarting the acquisition sequence,
/// and no cap on retries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Bounded wait for each lock acquisition (milliseconds).
    pub lock_timeout_ms: u64,

    /// Delay before restarting the acquisition sequence after a timeout
    /// (milliseconds).
    pub retry_delay_ms: u64,

    /// Cap on timed-out acquisition attempts. `None` retries until the
    /// locks are obtained.
    pub max_retries: Option<u32>,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: 1000,
            retry_delay_ms: 1000,
            max_retries: None,
        }
    }
}

impl LedgerConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Load from a TOML file.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: LedgerConfig = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {e}")))?;
        Ok(config)
    }

    /// Load from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(v) = env::var("LEDGER_LOCK_TIMEOUT_MS") {
            config.lock_timeout_ms = v
                .parse()
                .map_err(|e| Error::Config(format!("invalid LEDGER_LOCK_TIMEOUT_MS: {e}")))?;
        }

        if let Ok(v) = env::var("LEDGER_RETRY_DELAY_MS") {
            config.retry_delay_ms = v
                .parse()
                .map_err(|e| Error::Config(format!("invalid LEDGER_RETRY_DELAY_MS: {e}")))?;
        }

        if let Ok(v) = env::var("LEDGER_MAX_RETRIES") {
            config.max_retries = Some(
                v.parse()
                    .map_err(|e| Error::Config(format!("invalid LEDGER_MAX_RETRIES: {e}")))?,
            );
        }

        Ok(config)
    }
}
