//! Execution settings
//!
//! Everything the executors would otherwise read from the process environment
//! is captured once in [`ExecSettings`] and passed around explicitly.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Global key path, honored for every provider
pub const ENV_KEY_PATH: &str = "KUBE_SSH_KEY_PATH";
/// Key file for gce, gke and kubemark
pub const ENV_GCE_KEY: &str = "GCE_SSH_KEY";
/// Key file for aws and eks
pub const ENV_AWS_KEY: &str = "AWS_SSH_KEY";
/// Key file for local and vsphere
pub const ENV_LOCAL_KEY: &str = "LOCAL_SSH_KEY";
/// Key file for skeleton
pub const ENV_SKELETON_KEY: &str = "KUBE_SSH_KEY";
/// Remote user override
pub const ENV_USER: &str = "KUBE_SSH_USER";
/// Bastion `host:port`
pub const ENV_BASTION: &str = "KUBE_SSH_BASTION";

/// Port every node is reached on
pub const SSH_PORT: u16 = 22;

/// Shortest pause between bastion dial retries
pub const MIN_RETRY_INTERVAL: Duration = Duration::from_millis(10);
/// Longest time the bastion dial keeps retrying
pub const MAX_RETRY_WINDOW: Duration = Duration::from_secs(24 * 60 * 60);

/// Per-provider-family key file overrides
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderKeys {
    /// gce, gke, kubemark
    pub gce: Option<String>,
    /// aws, eks
    pub aws: Option<String>,
    /// local, vsphere
    pub local: Option<String>,
    /// skeleton
    pub skeleton: Option<String>,
}

/// Dial and retry policy for connections
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DialPolicy {
    /// Timeout for each dial attempt, covering TCP connect and the SSH
    /// handshake together
    pub handshake_timeout: Duration,
    /// Pause between bastion dial retries
    pub retry_interval: Duration,
    /// How long to keep retrying once the first bastion dial failed
    pub retry_window: Duration,
}

impl Default for DialPolicy {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(150),
            retry_interval: Duration::from_secs(5),
            retry_window: Duration::from_secs(20),
        }
    }
}

impl DialPolicy {
    /// Policy with the retry interval raised to [`MIN_RETRY_INTERVAL`] and the
    /// window capped at [`MAX_RETRY_WINDOW`]
    #[must_use]
    pub fn clamped(self) -> Self {
        Self {
            retry_interval: self.retry_interval.max(MIN_RETRY_INTERVAL),
            retry_window: self.retry_window.min(MAX_RETRY_WINDOW),
            ..self
        }
    }
}

/// Settings shared by every execution
#[derive(Debug, Clone, Default)]
pub struct ExecSettings {
    /// Key path used regardless of provider
    pub key_path: Option<PathBuf>,
    /// Provider family key overrides
    pub provider_keys: ProviderKeys,
    /// Remote user, already resolved from override or process user
    pub user: String,
    /// Bastion to tunnel through, `host:port`
    pub bastion: Option<String>,
    /// Home directory holding `.ssh/`
    pub home_dir: Option<PathBuf>,
    /// Dial and retry policy
    pub dial: DialPolicy,
    /// Upper bound for a whole execution
    pub deadline: Option<Duration>,
}

impl ExecSettings {
    /// Build settings from the process environment
    #[must_use]
    pub fn from_env() -> Self {
        let mut settings = Self::from_lookup(|name| std::env::var(name).ok());
        settings.home_dir = dirs::home_dir();
        settings
    }

    /// Build settings from an arbitrary variable lookup
    ///
    /// Empty values count as unset. The home directory is taken from `HOME`.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.is_empty());

        let user = get(ENV_USER).or_else(|| get("USER")).unwrap_or_default();

        Self {
            key_path: get(ENV_KEY_PATH).map(PathBuf::from),
            provider_keys: ProviderKeys {
                gce: get(ENV_GCE_KEY),
                aws: get(ENV_AWS_KEY),
                local: get(ENV_LOCAL_KEY),
                skeleton: get(ENV_SKELETON_KEY),
            },
            user,
            bastion: get(ENV_BASTION),
            home_dir: get("HOME").map(PathBuf::from),
            dial: DialPolicy::default(),
            deadline: None,
        }
    }

    /// Set the remote user
    #[must_use]
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    /// Tunnel every execution through a bastion
    #[must_use]
    pub fn with_bastion(mut self, bastion: impl Into<String>) -> Self {
        self.bastion = Some(bastion.into());
        self
    }

    /// Set the home directory used for relative key files
    #[must_use]
    pub fn with_home_dir(mut self, home: impl Into<PathBuf>) -> Self {
        self.home_dir = Some(home.into());
        self
    }

    /// Set the dial policy
    #[must_use]
    pub fn with_dial_policy(mut self, dial: DialPolicy) -> Self {
        self.dial = dial;
        self
    }

    /// Bound every execution by a deadline
    #[must_use]
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}
