//! Configuration loading via `ortho-config`.
//!
//! Provider credentials live under the `DO_` prefix so the access token is
//! read from `DO_ACCESS_TOKEN`. Scan tuning lives under `SIDESCAN_`. Both
//! structs also read `sidescan.toml` (or the file named by
//! `SIDESCAN_CONFIG_PATH`).

use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::exec::SshSettings;
use crate::poll::PollPolicy;
use crate::provision::ProvisionSettings;
use crate::run::RunSettings;
use crate::scan::{DEFAULT_INSTALLER_URL, DEFAULT_SCANNER_COMMAND, ScanSettings};
use crate::snapshot::LookupPolicy;

/// Default DigitalOcean API endpoint.
pub const DEFAULT_API_BASE_URL: &str = "https://api.digitalocean.com";

/// DigitalOcean credentials and endpoint.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "DO",
    discovery(
        app_name = "sidescan",
        env_var = "SIDESCAN_CONFIG_PATH",
        config_file_name = "sidescan.toml",
        dotfile_name = ".sidescan.toml",
        project_file_name = "sidescan.toml"
    )
)]
pub struct DigitalOceanConfig {
    /// Personal access token with read/write scope. Required.
    #[ortho_config(default = String::new())]
    pub access_token: String,
    /// API base URL, overridable for proxies and tests.
    #[ortho_config(default = DEFAULT_API_BASE_URL.to_owned())]
    pub api_base_url: String,
}

/// Scan run tuning.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "SIDESCAN",
    discovery(
        app_name = "sidescan",
        env_var = "SIDESCAN_CONFIG_PATH",
        config_file_name = "sidescan.toml",
        dotfile_name = ".sidescan.toml",
        project_file_name = "sidescan.toml"
    )
)]
pub struct ScanConfig {
    /// Size slug of scan instances.
    #[ortho_config(default = "s-2vcpu-4gb".to_owned())]
    pub scan_size: String,
    /// Tag applied to scan instances; the janitor sweeps by it.
    #[ortho_config(default = "snapshot-droplet".to_owned())]
    pub scan_tag: String,
    /// Seconds between action status reloads.
    #[ortho_config(default = 10)]
    pub poll_interval_secs: u64,
    /// Maximum seconds spent waiting on one provider action.
    #[ortho_config(default = 900)]
    pub action_timeout_secs: u64,
    /// Seconds to wait after provisioning before the first SSH attempt.
    #[ortho_config(default = 60)]
    pub settle_delay_secs: u64,
    /// Snapshot listing attempts after the snapshot action completes.
    #[ortho_config(default = 5)]
    pub snapshot_lookup_attempts: u32,
    /// Seconds between snapshot listing attempts.
    #[ortho_config(default = 10)]
    pub snapshot_lookup_delay_secs: u64,
    /// SSH reachability probes per scan instance.
    #[ortho_config(default = 3)]
    pub ssh_attempts: u32,
    /// Seconds between SSH reachability probes.
    #[ortho_config(default = 15)]
    pub ssh_retry_delay_secs: u64,
    /// Number of sources processed concurrently.
    #[ortho_config(default = 4)]
    pub concurrency: usize,
    /// Directory for results, run keys, and the diagnostic log.
    #[ortho_config(default = ".".to_owned())]
    pub work_dir: String,
    /// Path to the `ssh` executable.
    #[ortho_config(default = "ssh".to_owned())]
    pub ssh_bin: String,
    /// Path to the `ssh-keygen` executable.
    #[ortho_config(default = "ssh-keygen".to_owned())]
    pub ssh_keygen_bin: String,
    /// Remote user on scan instances.
    #[ortho_config(default = "root".to_owned())]
    pub ssh_user: String,
    /// URL of the scanner install script.
    #[ortho_config(default = DEFAULT_INSTALLER_URL.to_owned())]
    pub installer_url: String,
    /// Scanner invocation run on each scan instance.
    #[ortho_config(default = DEFAULT_SCANNER_COMMAND.to_owned())]
    pub scanner_command: String,
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(description: &'static str, env_var: &'static str, toml_key: &'static str) -> Self {
        Self {
            description,
            env_var,
            toml_key,
        }
    }
}

fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::MissingField(format!(
            "missing {}: set {} or add {} to sidescan.toml",
            metadata.description, metadata.env_var, metadata.toml_key
        )));
    }
    Ok(())
}

fn require_positive(value: u64, metadata: &FieldMetadata) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::Invalid(format!(
            "{} must be greater than zero: check {} or {} in sidescan.toml",
            metadata.description, metadata.env_var, metadata.toml_key
        )));
    }
    Ok(())
}

impl DigitalOceanConfig {
    /// Loads configuration without attempting to parse CLI arguments. Values
    /// still merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("sidescan")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Ensures the access token and endpoint are present.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] naming the environment variable
    /// to set.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_field(
            &self.access_token,
            &FieldMetadata::new("DigitalOcean access token", "DO_ACCESS_TOKEN", "access_token"),
        )?;
        require_field(
            &self.api_base_url,
            &FieldMetadata::new("DigitalOcean API URL", "DO_API_BASE_URL", "api_base_url"),
        )
    }
}

impl ScanConfig {
    /// Loads configuration without attempting to parse CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("sidescan")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Rejects blank tool paths and zero durations or widths.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] describing the first invalid field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            (&self.scan_size, FieldMetadata::new("scan instance size", "SIDESCAN_SCAN_SIZE", "scan_size")),
            (&self.scan_tag, FieldMetadata::new("scan instance tag", "SIDESCAN_SCAN_TAG", "scan_tag")),
            (&self.work_dir, FieldMetadata::new("work directory", "SIDESCAN_WORK_DIR", "work_dir")),
            (&self.ssh_bin, FieldMetadata::new("ssh executable", "SIDESCAN_SSH_BIN", "ssh_bin")),
            (
                &self.ssh_keygen_bin,
                FieldMetadata::new("ssh-keygen executable", "SIDESCAN_SSH_KEYGEN_BIN", "ssh_keygen_bin"),
            ),
            (&self.ssh_user, FieldMetadata::new("remote user", "SIDESCAN_SSH_USER", "ssh_user")),
            (
                &self.installer_url,
                FieldMetadata::new("scanner installer URL", "SIDESCAN_INSTALLER_URL", "installer_url"),
            ),
            (
                &self.scanner_command,
                FieldMetadata::new("scanner command", "SIDESCAN_SCANNER_COMMAND", "scanner_command"),
            ),
        ];
        for (value, metadata) in &required {
            require_field(value, metadata)?;
        }

        let positive = [
            (
                self.poll_interval_secs,
                FieldMetadata::new("poll interval", "SIDESCAN_POLL_INTERVAL_SECS", "poll_interval_secs"),
            ),
            (
                self.action_timeout_secs,
                FieldMetadata::new("action timeout", "SIDESCAN_ACTION_TIMEOUT_SECS", "action_timeout_secs"),
            ),
            (
                u64::from(self.snapshot_lookup_attempts),
                FieldMetadata::new(
                    "snapshot lookup attempts",
                    "SIDESCAN_SNAPSHOT_LOOKUP_ATTEMPTS",
                    "snapshot_lookup_attempts",
                ),
            ),
            (
                u64::from(self.ssh_attempts),
                FieldMetadata::new("ssh attempts", "SIDESCAN_SSH_ATTEMPTS", "ssh_attempts"),
            ),
            (
                u64::try_from(self.concurrency).unwrap_or(u64::MAX),
                FieldMetadata::new("concurrency", "SIDESCAN_CONCURRENCY", "concurrency"),
            ),
        ];
        for (value, metadata) in &positive {
            require_positive(*value, metadata)?;
        }
        Ok(())
    }

    /// Converts the configuration into orchestrator settings.
    #[must_use]
    pub fn run_settings(&self) -> RunSettings {
        RunSettings {
            poll: PollPolicy::new(
                Duration::from_secs(self.poll_interval_secs),
                Duration::from_secs(self.action_timeout_secs),
            ),
            lookup: LookupPolicy::new(
                self.snapshot_lookup_attempts,
                Duration::from_secs(self.snapshot_lookup_delay_secs),
            ),
            provision: ProvisionSettings {
                size: self.scan_size.clone(),
                tag: self.scan_tag.clone(),
                monitoring: true,
            },
            scan: ScanSettings {
                ssh: SshSettings {
                    ssh_bin: self.ssh_bin.clone(),
                    user: self.ssh_user.clone(),
                    ..SshSettings::default()
                },
                attempts: self.ssh_attempts,
                retry_delay: Duration::from_secs(self.ssh_retry_delay_secs),
                scanner_command: self.scanner_command.clone(),
            },
            settle_delay: Duration::from_secs(self.settle_delay_secs),
            concurrency: self.concurrency,
            keygen_bin: self.ssh_keygen_bin.clone(),
        }
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Indicates a field holds an unusable value.
    #[error("invalid configuration: {0}")]
    Invalid(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
