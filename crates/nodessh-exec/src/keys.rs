//! SSH key resolution by provider

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use russh::keys::decode_secret_key;
use russh::keys::ssh_key::PrivateKey;
use tracing::debug;

use crate::config::ExecSettings;

/// Cloud providers with a known key layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provider {
    Gce,
    Gke,
    Kubemark,
    Aws,
    Eks,
    Local,
    Vsphere,
    Skeleton,
}

impl Provider {
    /// Every supported provider
    pub const ALL: [Provider; 8] = [
        Provider::Gce,
        Provider::Gke,
        Provider::Kubemark,
        Provider::Aws,
        Provider::Eks,
        Provider::Local,
        Provider::Vsphere,
        Provider::Skeleton,
    ];

    /// Provider name as used on the command line
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Provider::Gce => "gce",
            Provider::Gke => "gke",
            Provider::Kubemark => "kubemark",
            Provider::Aws => "aws",
            Provider::Eks => "eks",
            Provider::Local => "local",
            Provider::Vsphere => "vsphere",
            Provider::Skeleton => "skeleton",
        }
    }

    /// Key file used when no override is set
    #[must_use]
    pub fn default_key_file(self) -> &'static str {
        match self {
            Provider::Gce | Provider::Gke | Provider::Kubemark => "google_compute_engine",
            Provider::Aws | Provider::Eks => "kube_aws_rsa",
            Provider::Local | Provider::Vsphere | Provider::Skeleton => "id_rsa",
        }
    }

    /// Key file override configured for this provider's family
    fn key_override(self, settings: &ExecSettings) -> Option<&str> {
        let keys = &settings.provider_keys;
        let key = match self {
            Provider::Gce | Provider::Gke | Provider::Kubemark => &keys.gce,
            Provider::Aws | Provider::Eks => &keys.aws,
            Provider::Local | Provider::Vsphere => &keys.local,
            Provider::Skeleton => &keys.skeleton,
        };
        key.as_deref().filter(|k| !k.is_empty())
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Provider::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| KeyError::UnsupportedProvider(s.to_string()))
    }
}

/// Private key usable for public-key authentication
///
/// Cloning is cheap; all clones share the same key.
#[derive(Clone)]
pub struct Credential {
    key: Arc<PrivateKey>,
    path: PathBuf,
}

impl Credential {
    /// Load a signer from an unencrypted private key file
    ///
    /// # Errors
    /// Returns `KeyError::Load` if the file is missing, unreadable or not a private key
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, KeyError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| KeyError::Load {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let key = decode_secret_key(&contents, None).map_err(|e| KeyError::Load {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        debug!(path = %path.display(), "loaded SSH key");

        Ok(Self {
            key: Arc::new(key),
            path: path.to_path_buf(),
        })
    }

    /// Shared handle to the private key
    #[must_use]
    pub fn key(&self) -> Arc<PrivateKey> {
        Arc::clone(&self.key)
    }

    /// File the key was loaded from
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

/// Key resolution errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum KeyError {
    #[error("signer not implemented for provider {0}")]
    UnsupportedProvider(String),

    #[error("failed to load private key {path}: {reason}")]
    Load { path: String, reason: String },

    #[error("cannot resolve relative key file {0}: home directory unknown")]
    NoHomeDir(String),
}

/// Locate the key file for `provider`
///
/// `KUBE_SSH_KEY_PATH` wins over everything, then the provider family's
/// override, then its default file. Relative names live in `~/.ssh`.
///
/// # Errors
/// Returns `KeyError::UnsupportedProvider` for unknown providers when no
/// global key path is set
pub fn resolve_key_path(provider: &str, settings: &ExecSettings) -> Result<PathBuf, KeyError> {
    if let Some(path) = settings
        .key_path
        .as_ref()
        .filter(|p| !p.as_os_str().is_empty())
    {
        return Ok(path.clone());
    }

    let provider: Provider = provider.parse()?;
    let keyfile = provider
        .key_override(settings)
        .unwrap_or_else(|| provider.default_key_file());

    let keyfile = Path::new(keyfile);
    if keyfile.is_absolute() {
        return Ok(keyfile.to_path_buf());
    }

    let home = settings
        .home_dir
        .as_ref()
        .ok_or_else(|| KeyError::NoHomeDir(keyfile.display().to_string()))?;
    Ok(home.join(".ssh").join(keyfile))
}

/// Produce a signer for `provider`
///
/// # Errors
/// Returns `KeyError` if the provider is unknown or the key cannot be loaded
pub fn resolve_signer(provider: &str, settings: &ExecSettings) -> Result<Credential, KeyError> {
    let path = resolve_key_path(provider, settings)?;
    debug!(provider = %provider, path = %path.display(), "resolved SSH key path");
    Credential::from_file(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderKeys;

    const FIXTURE_KEY: &str = include_str!("../tests/fixtures/id_ed25519");

    fn settings_with_home(home: &Path) -> ExecSettings {
        ExecSettings::default().with_home_dir(home)
    }

    fn write_key(dir: &Path, name: &str) -> PathBuf {
        std::fs::create_dir_all(dir).unwrap();
        let path = dir.join(name);
        std::fs::write(&path, FIXTURE_KEY).unwrap();
        path
    }

    #[test]
    fn test_provider_round_trips_names() {
        for provider in Provider::ALL {
            assert_eq!(provider.as_str().parse::<Provider>().unwrap(), provider);
        }
    }

    #[test]
    fn test_default_key_paths() {
        let settings = settings_with_home(Path::new("/home/tester"));
        let cases = [
            ("gce", "google_compute_engine"),
            ("gke", "google_compute_engine"),
            ("kubemark", "google_compute_engine"),
            ("aws", "kube_aws_rsa"),
            ("eks", "kube_aws_rsa"),
            ("local", "id_rsa"),
            ("vsphere", "id_rsa"),
            ("skeleton", "id_rsa"),
        ];
        for (provider, file) in cases {
            assert_eq!(
                resolve_key_path(provider, &settings).unwrap(),
                PathBuf::from("/home/tester/.ssh").join(file),
                "provider {provider}"
            );
        }
    }

    #[test]
    fn test_unknown_provider() {
        let settings = settings_with_home(Path::new("/home/tester"));
        let err = resolve_key_path("openstack", &settings).unwrap_err();
        assert!(matches!(err, KeyError::UnsupportedProvider(p) if p == "openstack"));
    }

    #[test]
    fn test_global_key_path_overrides_unknown_provider() {
        let settings = ExecSettings {
            key_path: Some(PathBuf::from("/keys/global")),
            ..settings_with_home(Path::new("/home/tester"))
        };
        assert_eq!(
            resolve_key_path("openstack", &settings).unwrap(),
            PathBuf::from("/keys/global")
        );
    }

    #[test]
    fn test_family_override_relative_and_absolute() {
        let settings = ExecSettings {
            provider_keys: ProviderKeys {
                aws: Some("custom_aws".to_string()),
                local: Some("/opt/keys/local".to_string()),
                ..ProviderKeys::default()
            },
            ..settings_with_home(Path::new("/home/tester"))
        };
        assert_eq!(
            resolve_key_path("eks", &settings).unwrap(),
            PathBuf::from("/home/tester/.ssh/custom_aws")
        );
        assert_eq!(
            resolve_key_path("vsphere", &settings).unwrap(),
            PathBuf::from("/opt/keys/local")
        );
        // skeleton has its own override variable
        assert_eq!(
            resolve_key_path("skeleton", &settings).unwrap(),
            PathBuf::from("/home/tester/.ssh/id_rsa")
        );
    }

    #[test]
    fn test_relative_key_without_home() {
        let err = resolve_key_path("gce", &ExecSettings::default()).unwrap_err();
        assert!(matches!(err, KeyError::NoHomeDir(_)));
    }

    #[test]
    fn test_resolve_signer_loads_default_file() {
        let home = tempfile::tempdir().unwrap();
        let path = write_key(&home.path().join(".ssh"), "google_compute_engine");

        let credential = resolve_signer("gke", &settings_with_home(home.path())).unwrap();
        assert_eq!(credential.path(), path);
    }

    #[test]
    fn test_resolve_signer_missing_file() {
        let home = tempfile::tempdir().unwrap();
        let err = resolve_signer("aws", &settings_with_home(home.path())).unwrap_err();
        assert!(matches!(err, KeyError::Load { .. }));
    }

    #[test]
    fn test_resolve_signer_invalid_key() {
        let home = tempfile::tempdir().unwrap();
        let ssh_dir = home.path().join(".ssh");
        std::fs::create_dir_all(&ssh_dir).unwrap();
        std::fs::write(ssh_dir.join("id_rsa"), "not a key").unwrap();

        let err = resolve_signer("local", &settings_with_home(home.path())).unwrap_err();
        assert!(matches!(err, KeyError::Load { .. }));
    }

    #[test]
    fn test_credential_debug_hides_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_key(dir.path(), "id_ed25519");
        let credential = Credential::from_file(&path).unwrap();

        let rendered = format!("{credential:?}");
        assert!(rendered.contains("id_ed25519"));
        assert!(!rendered.contains("PRIVATE KEY"));
    }
}
