//! Controller configuration

use std::time::Duration;

use crate::error::{Error, Result};

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_PDB_NAME_SUFFIX: &str = "pdb-controller";

/// Runtime settings for the reconciliation loop
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Time between the start of two reconciliation passes
    pub interval: Duration,
    /// Appended to a workload's name to form the name of its managed PDB
    pub pdb_name_suffix: String,
    /// How long a workload may stay non-ready before its PDB is removed.
    /// Zero disables removal.
    pub non_ready_ttl: Duration,
    /// Label selector restricting the namespaces that are reconciled
    pub namespace_selector: String,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            pdb_name_suffix: DEFAULT_PDB_NAME_SUFFIX.to_string(),
            non_ready_ttl: Duration::ZERO,
            namespace_selector: String::new(),
        }
    }
}

impl ControllerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.interval.is_zero() {
            return Err(Error::ConfigError(
                "reconciliation interval must be greater than zero".to_string(),
            ));
        }

        let suffix = &self.pdb_name_suffix;
        let valid_chars = suffix
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-');
        if suffix.is_empty() || !valid_chars || suffix.starts_with('-') || suffix.ends_with('-') {
            return Err(Error::ConfigError(format!(
                "PDB name suffix {suffix:?} must be a non-empty DNS label"
            )));
        }

        Ok(())
    }

    pub fn ttl_enabled(&self) -> bool {
        !self.non_ready_ttl.is_zero()
    }

    /// Whether a workload non-ready for `elapsed` has outlived the TTL
    pub fn ttl_expired(&self, elapsed: Duration) -> bool {
        self.ttl_enabled() && elapsed >= self.non_ready_ttl
    }

    /// Upper bound for a single cluster API call
    pub fn call_timeout(&self) -> Duration {
        self.interval / 2
    }
}
