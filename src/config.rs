//! Cluster configuration and credential loading
//!
//! The pipeline never reads ambient configuration directly. It asks a
//! [`ConfigProvider`] for a [`ClusterConfig`], which keeps credential lookup
//! deterministic under test. [`KubeconfigProvider`] is the production
//! provider: explicit path, then `KUBECONFIG`, then `~/.kube/config`, then the
//! in-cluster service account.

use crate::error::{PullError, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

pub const KUBECONFIG_ENV: &str = "KUBECONFIG";
pub const SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";

/// Bearer token used to authenticate the pull envelope
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    token: String,
}

impl Credential {
    pub fn new(token: impl Into<String>) -> Result<Self> {
        let token = token.into().trim().to_string();
        if token.is_empty() {
            return Err(PullError::Credential(
                "empty token, you need a kubernetes token to pull".to_string(),
            ));
        }
        Ok(Self { token })
    }

    pub fn token(&self) -> &str {
        &self.token
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"<redacted>")
            .finish()
    }
}

/// What a configuration provider resolved
#[derive(Clone, Default)]
pub struct ClusterConfig {
    pub bearer_token: String,
    /// PEM bundle of the cluster certificate authority, if configured
    pub ca_pem: Option<Vec<u8>>,
    /// Where the configuration came from, for log output
    pub source: String,
}

impl fmt::Debug for ClusterConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterConfig")
            .field("bearer_token", &"<redacted>")
            .field("ca_pem", &self.ca_pem.as_ref().map(|ca| ca.len()))
            .field("source", &self.source)
            .finish()
    }
}

/// Source of ambient cluster configuration
pub trait ConfigProvider: Send + Sync {
    fn load(&self) -> Result<ClusterConfig>;
}

/// Resolve a credential, failing before any network activity if the token is empty
pub fn load_credential(provider: &dyn ConfigProvider) -> Result<(Credential, ClusterConfig)> {
    let config = provider.load()?;
    let credential = Credential::new(config.bearer_token.clone())?;
    Ok((credential, config))
}

/// Provider returning a fixed configuration
#[derive(Debug, Clone, Default)]
pub struct StaticConfigProvider {
    config: ClusterConfig,
}

impl StaticConfigProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            config: ClusterConfig {
                bearer_token: token.into(),
                ca_pem: None,
                source: "static".to_string(),
            },
        }
    }

    pub fn with_ca_pem(mut self, ca_pem: Vec<u8>) -> Self {
        self.config.ca_pem = Some(ca_pem);
        self
    }
}

impl ConfigProvider for StaticConfigProvider {
    fn load(&self) -> Result<ClusterConfig> {
        Ok(self.config.clone())
    }
}

/// Kubeconfig-backed provider with in-cluster fallback
#[derive(Debug, Clone)]
pub struct KubeconfigProvider {
    candidates: Vec<PathBuf>,
    /// Named candidates must exist; the home default may be absent
    required: bool,
    service_account_dir: PathBuf,
}

impl KubeconfigProvider {
    /// Provider that reads exactly one kubeconfig file
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self {
            candidates: vec![path.into()],
            required: true,
            service_account_dir: PathBuf::from(SERVICE_ACCOUNT_DIR),
        }
    }

    /// Provider that only consults the in-cluster service account
    pub fn in_cluster() -> Self {
        Self {
            candidates: Vec::new(),
            required: false,
            service_account_dir: PathBuf::from(SERVICE_ACCOUNT_DIR),
        }
    }

    /// Provider following the usual resolution order
    pub fn from_env(explicit: Option<PathBuf>) -> Self {
        let mut candidates = Vec::new();
        let mut required = true;
        if let Some(path) = explicit {
            candidates.push(path);
        } else if let Some(list) = std::env::var_os(KUBECONFIG_ENV) {
            candidates.extend(std::env::split_paths(&list).filter(|p| !p.as_os_str().is_empty()));
        } else if let Some(home) = dirs::home_dir() {
            candidates.push(home.join(".kube").join("config"));
            required = false;
        }

        Self {
            candidates,
            required,
            service_account_dir: PathBuf::from(SERVICE_ACCOUNT_DIR),
        }
    }

    pub fn with_service_account_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.service_account_dir = dir.into();
        self
    }

    fn load_in_cluster(&self) -> Result<ClusterConfig> {
        let token_path = self.service_account_dir.join("token");
        let token = fs::read_to_string(&token_path).map_err(|e| {
            PullError::Credential(format!(
                "no kubeconfig found and in-cluster token {} is unreadable: {}",
                token_path.display(),
                e
            ))
        })?;

        let ca_path = self.service_account_dir.join("ca.crt");
        let ca_pem = fs::read(&ca_path).ok();

        Ok(ClusterConfig {
            bearer_token: token.trim().to_string(),
            ca_pem,
            source: format!("in-cluster service account ({})", self.service_account_dir.display()),
        })
    }
}

impl ConfigProvider for KubeconfigProvider {
    fn load(&self) -> Result<ClusterConfig> {
        if let Some(path) = self.candidates.iter().find(|p| p.is_file()) {
            return Kubeconfig::read(path)?.resolve(path);
        }

        if self.required && !self.candidates.is_empty() {
            let names: Vec<String> = self
                .candidates
                .iter()
                .map(|p| p.display().to_string())
                .collect();
            return Err(PullError::Credential(format!(
                "kubeconfig {} does not exist",
                names.join(", ")
            )));
        }

        self.load_in_cluster()
    }
}

#[derive(Debug, Default, Deserialize)]
struct Kubeconfig {
    #[serde(rename = "current-context", default)]
    current_context: String,
    #[serde(default)]
    contexts: Vec<NamedContext>,
    #[serde(default)]
    clusters: Vec<NamedCluster>,
    #[serde(default)]
    users: Vec<NamedUser>,
}

#[derive(Debug, Deserialize)]
struct NamedContext {
    name: String,
    context: ContextEntry,
}

#[derive(Debug, Deserialize)]
struct ContextEntry {
    #[serde(default)]
    cluster: String,
    #[serde(default)]
    user: String,
}

#[derive(Debug, Deserialize)]
struct NamedCluster {
    name: String,
    cluster: ClusterEntry,
}

#[derive(Debug, Default, Deserialize)]
struct ClusterEntry {
    #[serde(rename = "certificate-authority-data")]
    certificate_authority_data: Option<String>,
    #[serde(rename = "certificate-authority")]
    certificate_authority: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct NamedUser {
    name: String,
    user: UserEntry,
}

#[derive(Debug, Default, Deserialize)]
struct UserEntry {
    token: Option<String>,
    #[serde(rename = "tokenFile")]
    token_file: Option<PathBuf>,
}

impl Kubeconfig {
    fn read(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| {
            PullError::Credential(format!("unable to read kubeconfig {}: {}", path.display(), e))
        })?;
        serde_yaml::from_str(&contents).map_err(|e| {
            PullError::Credential(format!("unable to parse kubeconfig {}: {}", path.display(), e))
        })
    }

    fn resolve(&self, path: &Path) -> Result<ClusterConfig> {
        let context = if self.current_context.is_empty() {
            self.contexts.first()
        } else {
            self.contexts.iter().find(|c| c.name == self.current_context)
        }
        .ok_or_else(|| {
            PullError::Credential(format!(
                "kubeconfig {} has no context '{}'",
                path.display(),
                self.current_context
            ))
        })?;

        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));

        let user = self
            .users
            .iter()
            .find(|u| u.name == context.context.user)
            .map(|u| &u.user);
        let bearer_token = match user {
            Some(UserEntry { token: Some(token), .. }) => token.clone(),
            Some(UserEntry { token_file: Some(file), .. }) => {
                let file = base_dir.join(file);
                fs::read_to_string(&file).map_err(|e| {
                    PullError::Credential(format!(
                        "unable to read token file {}: {}",
                        file.display(),
                        e
                    ))
                })?
            }
            _ => String::new(),
        };

        let cluster = self
            .clusters
            .iter()
            .find(|c| c.name == context.context.cluster)
            .map(|c| &c.cluster);
        let ca_pem = match cluster {
            Some(ClusterEntry { certificate_authority_data: Some(data), .. }) => Some(
                STANDARD.decode(data.trim()).map_err(|e| {
                    PullError::Credential(format!("invalid certificate-authority-data: {}", e))
                })?,
            ),
            Some(ClusterEntry { certificate_authority: Some(file), .. }) => {
                let file = base_dir.join(file);
                Some(fs::read(&file).map_err(|e| {
                    PullError::Credential(format!(
                        "unable to read certificate authority {}: {}",
                        file.display(),
                        e
                    ))
                })?)
            }
            _ => None,
        };

        Ok(ClusterConfig {
            bearer_token: bearer_token.trim().to_string(),
            ca_pem,
            source: format!("{} (context {})", path.display(), context.name),
        })
    }
}
