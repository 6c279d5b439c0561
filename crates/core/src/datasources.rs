use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TlsMode {
    Disabled,
    #[default]
    Prefer,
    Require,
    VerifyIdentity,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PasswordSource {
    #[default]
    EnvVar,
    Keyring,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DatasourceProfile {
    pub id: String,
    #[serde(default)]
    pub label: Option<String>,
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub user: String,
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub tls_mode: TlsMode,
    #[serde(default)]
    pub password_source: PasswordSource,
    #[serde(default)]
    pub keyring_service: Option<String>,
    #[serde(default)]
    pub keyring_account: Option<String>,
    #[serde(default)]
    pub tls_ca_cert_path: Option<String>,
    #[serde(default)]
    pub tls_client_cert_path: Option<String>,
    #[serde(default)]
    pub tls_client_key_path: Option<String>,
    #[serde(default)]
    pub tls_skip_domain_validation: bool,
    #[serde(default)]
    pub tls_accept_invalid_certs: bool,
    #[serde(default)]
    pub tls_hostname_override: Option<String>,
    /// Only permitted datasources can be targeted by a run.
    #[serde(default = "default_permitted")]
    pub permitted: bool,
}

fn default_port() -> u16 {
    3306
}

fn default_permitted() -> bool {
    true
}

impl DatasourceProfile {
    #[must_use]
    pub fn new(id: impl Into<String>, host: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: None,
            host: host.into(),
            port: default_port(),
            user: user.into(),
            database: None,
            tls_mode: TlsMode::Prefer,
            password_source: PasswordSource::EnvVar,
            keyring_service: None,
            keyring_account: None,
            tls_ca_cert_path: None,
            tls_client_cert_path: None,
            tls_client_key_path: None,
            tls_skip_domain_validation: false,
            tls_accept_invalid_certs: false,
            tls_hostname_override: None,
            permitted: true,
        }
    }

    #[must_use]
    pub fn display_name(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.id)
    }
}

#[derive(Debug, Error)]
pub enum DatasourceError {
    #[error("failed to read datasources file at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse datasources file at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to create config directory at {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize datasources: {source}")]
    Serialize {
        #[source]
        source: toml::ser::Error,
    },
    #[error("failed to write datasources file at {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct DatasourcesDocument {
    #[serde(default)]
    datasources: Vec<DatasourceProfile>,
}

impl DatasourcesDocument {
    /// Last definition of an id wins; output is sorted by id.
    fn normalize(&mut self) {
        let mut by_id = BTreeMap::new();
        for datasource in self.datasources.drain(..) {
            by_id.insert(datasource.id.clone(), datasource);
        }
        self.datasources = by_id.into_values().collect();
    }
}

#[derive(Debug, Clone)]
pub struct FileDatasourceCatalog {
    path: PathBuf,
    datasources: Vec<DatasourceProfile>,
}

impl FileDatasourceCatalog {
    pub fn load_from_path(path: impl Into<PathBuf>) -> Result<Self, DatasourceError> {
        let path = path.into();
        if !path.exists() {
            return Ok(Self {
                path,
                datasources: Vec::new(),
            });
        }

        let raw = fs::read_to_string(&path).map_err(|source| DatasourceError::Read {
            path: path.clone(),
            source,
        })?;
        if raw.trim().is_empty() {
            return Ok(Self {
                path,
                datasources: Vec::new(),
            });
        }

        let mut doc: DatasourcesDocument =
            toml::from_str(&raw).map_err(|source| DatasourceError::Parse {
                path: path.clone(),
                source,
            })?;
        doc.normalize();

        Ok(Self {
            path,
            datasources: doc.datasources,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn datasources(&self) -> &[DatasourceProfile] {
        &self.datasources
    }

    #[must_use]
    pub fn datasource(&self, id: &str) -> Option<&DatasourceProfile> {
        self.datasources.iter().find(|datasource| datasource.id == id)
    }

    pub fn upsert(&mut self, datasource: DatasourceProfile) {
        if let Some(existing) = self
            .datasources
            .iter_mut()
            .find(|existing| existing.id == datasource.id)
        {
            *existing = datasource;
        } else {
            self.datasources.push(datasource);
            self.datasources.sort_unstable_by(|a, b| a.id.cmp(&b.id));
        }
    }

    pub fn persist(&self) -> Result<(), DatasourceError> {
        if let Some(parent_dir) = self.path.parent() {
            fs::create_dir_all(parent_dir).map_err(|source| DatasourceError::CreateDir {
                path: parent_dir.to_path_buf(),
                source,
            })?;
        }

        let doc = DatasourcesDocument {
            datasources: self.datasources.clone(),
        };
        let rendered =
            toml::to_string_pretty(&doc).map_err(|source| DatasourceError::Serialize { source })?;

        fs::write(&self.path, rendered).map_err(|source| DatasourceError::Write {
            path: self.path.clone(),
            source,
        })
    }

    #[must_use]
    pub fn directory(&self) -> StaticDatasources {
        StaticDatasources::new(
            self.datasources
                .iter()
                .filter(|datasource| datasource.permitted)
                .map(|datasource| datasource.id.clone()),
        )
    }
}

/// Permission lookup consulted by the submitter before any request is sent.
pub trait DatasourceDirectory: Send + Sync {
    fn permitted(&self) -> Vec<String>;

    /// The datasource a run should target: the requested one when it is
    /// permitted, the first permitted one when nothing was requested.
    fn resolve(&self, requested: Option<&str>) -> Option<String> {
        let permitted = self.permitted();
        match requested.map(str::trim).filter(|id| !id.is_empty()) {
            Some(id) => permitted.into_iter().find(|candidate| candidate == id),
            None => permitted.into_iter().next(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StaticDatasources {
    ids: Vec<String>,
}

impl StaticDatasources {
    #[must_use]
    pub fn new(ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            ids: ids.into_iter().map(Into::into).collect(),
        }
    }
}

impl DatasourceDirectory for StaticDatasources {
    fn permitted(&self) -> Vec<String> {
        self.ids.clone()
    }
}
