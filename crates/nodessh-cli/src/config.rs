//! Configuration loading and types

use std::path::{Path, PathBuf};
use std::time::Duration;

use nodessh_exec::config::{DialPolicy, ENV_USER, ExecSettings, ProviderKeys};
use serde::{Deserialize, Serialize};

/// Top-level configuration for the nodessh CLI
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Logging settings
    #[serde(default)]
    pub log: LogConfig,
    /// SSH settings, overridden by the environment
    #[serde(default)]
    pub ssh: SshConfig,
    /// Default node inventory file
    pub inventory: Option<PathBuf>,
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Emit JSON lines instead of text
    #[serde(default)]
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// SSH settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshConfig {
    /// Provider used when none is given on the command line
    pub provider: Option<String>,
    /// Remote user
    pub user: Option<String>,
    /// Bastion `host:port`
    pub bastion: Option<String>,
    /// Key used for every provider
    pub key_path: Option<PathBuf>,
    /// Per-provider key files
    #[serde(default)]
    pub keys: ProviderKeys,
    /// Per-attempt connection timeout in seconds
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_secs: u64,
    /// Seconds between bastion dial retries
    #[serde(default = "default_retry_interval")]
    pub retry_interval_secs: u64,
    /// Seconds to keep retrying the bastion
    #[serde(default = "default_retry_window")]
    pub retry_window_secs: u64,
    /// Upper bound for a whole execution in seconds
    pub deadline_secs: Option<u64>,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            provider: None,
            user: None,
            bastion: None,
            key_path: None,
            keys: ProviderKeys::default(),
            handshake_timeout_secs: default_handshake_timeout(),
            retry_interval_secs: default_retry_interval(),
            retry_window_secs: default_retry_window(),
            deadline_secs: None,
        }
    }
}

fn default_handshake_timeout() -> u64 {
    DialPolicy::default().handshake_timeout.as_secs()
}

fn default_retry_interval() -> u64 {
    DialPolicy::default().retry_interval.as_secs()
}

fn default_retry_window() -> u64 {
    DialPolicy::default().retry_window.as_secs()
}

impl Config {
    /// Load configuration from file
    ///
    /// # Errors
    /// Returns error if file cannot be read or parsed
    pub fn load(path: &Path) -> eyre::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the dial loop cannot work with
    ///
    /// # Errors
    /// Returns error if the handshake timeout or retry interval is zero
    pub fn validate(&self) -> eyre::Result<()> {
        eyre::ensure!(
            self.ssh.handshake_timeout_secs > 0,
            "ssh.handshake_timeout_secs must be greater than zero"
        );
        eyre::ensure!(
            self.ssh.retry_interval_secs > 0,
            "ssh.retry_interval_secs must be greater than zero"
        );
        Ok(())
    }

    /// Load from an explicit path, default paths, or use defaults
    ///
    /// # Errors
    /// Returns error if a config file exists but cannot be loaded
    pub fn load_default(explicit: Option<&Path>) -> eyre::Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        if let Ok(path) = std::env::var("NODESSH_CONFIG") {
            return Self::load(Path::new(&path));
        }

        let paths = [
            PathBuf::from("nodessh.toml"),
            PathBuf::from("/etc/nodessh/nodessh.toml"),
            dirs::config_dir()
                .map(|p| p.join("nodessh/nodessh.toml"))
                .unwrap_or_default(),
        ];

        for path in paths {
            if path.is_file() {
                return Self::load(&path);
            }
        }

        Ok(Config::default())
    }

    /// Execution settings from the process environment layered over this file
    #[must_use]
    pub fn exec_settings(&self) -> ExecSettings {
        let lookup = |name: &str| std::env::var(name).ok();
        let mut settings = self.merge(ExecSettings::from_env(), lookup);
        if settings.home_dir.is_none() {
            settings.home_dir = dirs::home_dir();
        }
        settings
    }

    /// Layer `env` (built from `lookup`) over the file values
    ///
    /// Environment values win; the file's user only beats the process user.
    pub fn merge<F>(&self, env: ExecSettings, lookup: F) -> ExecSettings
    where
        F: Fn(&str) -> Option<String>,
    {
        let ssh = &self.ssh;
        let user_override = lookup(ENV_USER).filter(|u| !u.is_empty());
        let user = user_override
            .or_else(|| ssh.user.clone())
            .unwrap_or(env.user);

        ExecSettings {
            key_path: env.key_path.or_else(|| ssh.key_path.clone()),
            provider_keys: ProviderKeys {
                gce: env.provider_keys.gce.or_else(|| ssh.keys.gce.clone()),
                aws: env.provider_keys.aws.or_else(|| ssh.keys.aws.clone()),
                local: env.provider_keys.local.or_else(|| ssh.keys.local.clone()),
                skeleton: env
                    .provider_keys
                    .skeleton
                    .or_else(|| ssh.keys.skeleton.clone()),
            },
            user,
            bastion: env.bastion.or_else(|| ssh.bastion.clone()),
            home_dir: env.home_dir,
            dial: DialPolicy {
                handshake_timeout: Duration::from_secs(ssh.handshake_timeout_secs),
                retry_interval: Duration::from_secs(ssh.retry_interval_secs),
                retry_window: Duration::from_secs(ssh.retry_window_secs),
            },
            deadline: ssh.deadline_secs.map(Duration::from_secs),
        }
    }
}
