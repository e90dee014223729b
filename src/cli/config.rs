//! Application configuration
//!
//! Values come from three layers: built-in defaults, `KUBECTL_IMAGE_*`
//! environment variables, and command-line flags, with later layers winning.

use crate::cli::args::PullArgs;
use crate::error::{PullError, Result};
use crate::transfer::channel::ChannelOptions;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub const ENV_STORE_DIR: &str = "KUBECTL_IMAGE_STORE_DIR";
pub const ENV_TMP_DIR: &str = "KUBECTL_IMAGE_TMP_DIR";
pub const ENV_TIMEOUT: &str = "KUBECTL_IMAGE_TIMEOUT";
pub const ENV_MAX_MESSAGE_SIZE: &str = "KUBECTL_IMAGE_MAX_MESSAGE_SIZE";
pub const ENV_VERBOSE: &str = "KUBECTL_IMAGE_VERBOSE";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    pub store_dir: PathBuf,
    pub tmp_dir: PathBuf,
    /// Connect timeout in seconds
    pub timeout: u64,
    pub max_message_size: usize,
    pub insecure: bool,
    pub verbose: bool,
    pub kubeconfig: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            store_dir: default_store_dir(),
            tmp_dir: default_tmp_dir(),
            timeout: 30,
            max_message_size: 64 * 1024 * 1024, // 64MB
            insecure: false,
            verbose: false,
            kubeconfig: None,
        }
    }
}

/// `$XDG_DATA_HOME/kubectl-image/store`, or a relative fallback without a data dir
pub fn default_store_dir() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join("kubectl-image").join("store"))
        .unwrap_or_else(|| PathBuf::from(".kubectl-image").join("store"))
}

/// `~/.kubectl-image/tmp`, keeping large transfers off a small `/tmp`
pub fn default_tmp_dir() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(".kubectl-image").join("tmp"))
        .unwrap_or_else(std::env::temp_dir)
}

impl AppConfig {
    pub fn validate(&self) -> Result<()> {
        if self.timeout == 0 {
            return Err(PullError::Config(
                "timeout must be greater than 0".to_string(),
            ));
        }
        if self.max_message_size == 0 {
            return Err(PullError::Config(
                "max_message_size must be greater than 0".to_string(),
            ));
        }
        if self.store_dir.as_os_str().is_empty() || self.tmp_dir.as_os_str().is_empty() {
            return Err(PullError::Config(
                "store and temp directories cannot be empty".to_string(),
            ));
        }
        if self.store_dir == self.tmp_dir {
            return Err(PullError::Config(format!(
                "store directory and temp directory must differ ({})",
                self.store_dir.display()
            )));
        }
        Ok(())
    }

    /// Create config from environment variables and defaults
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`AppConfig::from_env`], reading variables through `lookup`
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(val) = lookup(ENV_STORE_DIR) {
            config.store_dir = PathBuf::from(val);
        }
        if let Some(val) = lookup(ENV_TMP_DIR) {
            config.tmp_dir = PathBuf::from(val);
        }
        if let Some(timeout) = lookup(ENV_TIMEOUT).and_then(|val| val.parse().ok()) {
            config.timeout = timeout;
        }
        if let Some(size) = lookup(ENV_MAX_MESSAGE_SIZE).and_then(|val| val.parse().ok()) {
            config.max_message_size = size;
        }
        if let Some(val) = lookup(ENV_VERBOSE) {
            config.verbose = val.to_lowercase() == "true" || val == "1";
        }

        config
    }

    /// Config holding only what was given on the command line
    pub fn from_pull_args(args: &PullArgs, verbose: bool) -> Self {
        let mut config = Self::default();
        if let Some(dir) = &args.store_dir {
            config.store_dir = dir.clone();
        }
        if let Some(dir) = &args.tmp_dir {
            config.tmp_dir = dir.clone();
        }
        if let Some(timeout) = args.timeout {
            config.timeout = timeout;
        }
        config.insecure = args.insecure;
        config.verbose = verbose;
        config.kubeconfig = args.kubeconfig.clone();
        config
    }

    /// Merge with another config, preferring non-default values
    pub fn merge(mut self, other: &AppConfig) -> Self {
        let default = AppConfig::default();

        if other.store_dir != default.store_dir {
            self.store_dir = other.store_dir.clone();
        }
        if other.tmp_dir != default.tmp_dir {
            self.tmp_dir = other.tmp_dir.clone();
        }
        if other.timeout != default.timeout {
            self.timeout = other.timeout;
        }
        if other.max_message_size != default.max_message_size {
            self.max_message_size = other.max_message_size;
        }
        if other.insecure != default.insecure {
            self.insecure = other.insecure;
        }
        if other.verbose != default.verbose {
            self.verbose = other.verbose;
        }
        if other.kubeconfig.is_some() {
            self.kubeconfig = other.kubeconfig.clone();
        }

        self
    }

    pub fn channel_options(&self) -> ChannelOptions {
        ChannelOptions {
            insecure: self.insecure,
            native_roots: true,
            connect_timeout: Some(Duration::from_secs(self.timeout)),
            max_message_size: Some(self.max_message_size),
        }
    }
}
