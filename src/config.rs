//! Host configuration.
//!
//! TOML-backed, with serde defaults so a missing file or a partial file
//! both yield a working configuration. Sections:
//!
//! - `[addins]`: where per-addin working directories live
//! - `[lifecycle]`: boot and shutdown wait bounds
//! - `[lease]`: proxy keep-alive tuning

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::host::{AddinError, AddinResult};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostConfig {
    #[serde(default)]
    pub addins: AddinsConfig,

    #[serde(default)]
    pub lifecycle: LifecycleConfig,

    #[serde(default)]
    pub lease: LeaseConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddinsConfig {
    /// Root directory under which each addin gets
    /// `<namespace>/<name>` as its working directory.
    #[serde(default = "default_addins_dir")]
    pub directory: PathBuf,
}

impl Default for AddinsConfig {
    fn default() -> Self {
        Self {
            directory: default_addins_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleConfig {
    /// How long a load waits for an addin's boot handshake.
    #[serde(default = "default_boot_timeout_secs")]
    pub boot_timeout_secs: u64,

    /// How long `shutdown_all` waits per addin for the runner to finish.
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            boot_timeout_secs: default_boot_timeout_secs(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaseConfig {
    /// Time-to-live of a proxy lease between renewals.
    #[serde(default = "default_lease_ttl_secs")]
    pub ttl_secs: u64,

    /// Cadence at which runners renew their held leases. Must be shorter
    /// than the TTL.
    #[serde(default = "default_lease_renew_secs")]
    pub renew_interval_secs: u64,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_lease_ttl_secs(),
            renew_interval_secs: default_lease_renew_secs(),
        }
    }
}

fn default_addins_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("addin-host")
        .join("addins")
}

fn default_boot_timeout_secs() -> u64 {
    30
}

fn default_shutdown_timeout_secs() -> u64 {
    10
}

fn default_lease_ttl_secs() -> u64 {
    120
}

fn default_lease_renew_secs() -> u64 {
    30
}

impl HostConfig {
    /// Load from a TOML file and validate.
    pub fn load(path: &Path) -> AddinResult<Self> {
        let raw = fs::read_to_string(path)?;
        let config: HostConfig = toml::from_str(&raw)?;
        config.validate(path)?;
        Ok(config)
    }

    pub fn validate(&self, path: &Path) -> AddinResult<()> {
        if self.lifecycle.boot_timeout_secs == 0 {
            return Err(AddinError::ConfigInvalid {
                path: path.to_path_buf(),
                message: "lifecycle.boot_timeout_secs must be nonzero".to_string(),
            });
        }
        if self.lifecycle.shutdown_timeout_secs == 0 {
            return Err(AddinError::ConfigInvalid {
                path: path.to_path_buf(),
                message: "lifecycle.shutdown_timeout_secs must be nonzero".to_string(),
            });
        }
        if self.lease.renew_interval_secs >= self.lease.ttl_secs {
            return Err(AddinError::ConfigInvalid {
                path: path.to_path_buf(),
                message: format!(
                    "lease.renew_interval_secs ({}) must be shorter than lease.ttl_secs ({})",
                    self.lease.renew_interval_secs, self.lease.ttl_secs
                ),
            });
        }
        Ok(())
    }

    pub fn boot_timeout(&self) -> Duration {
        Duration::from_secs(self.lifecycle.boot_timeout_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.lifecycle.shutdown_timeout_secs)
    }

    pub fn lease_ttl(&self) -> Duration {
        Duration::from_secs(self.lease.ttl_secs)
    }

    pub fn lease_renew_interval(&self) -> Duration {
        Duration::from_secs(self.lease.renew_interval_secs)
    }

    /// Working directory for one addin.
    pub fn working_dir(&self, namespace: &str, name: &str) -> PathBuf {
        self.addins.directory.join(namespace).join(name)
    }
}
