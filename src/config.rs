use std::fs;
use std::path::PathBuf;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use crate::domain::DatasetFormat;
use crate::error::PortalError;

/// On-disk config shape (`anndata-portal.json`). Every field is optional;
/// the resolved defaults keep the portal usable without a config file.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub data_root: Option<String>,
    #[serde(default)]
    pub temp_root: Option<String>,
    #[serde(default)]
    pub allowed_extensions: Option<Vec<String>>,
}

/// Explicit roots passed into every component; there is no ambient global
/// state.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub data_root: Utf8PathBuf,
    /// Per-process result directories live here (`<temp_root>/<pid>/`).
    pub temp_root: Utf8PathBuf,
    /// Upload extension allow-list, lower-cased.
    pub allowed_extensions: Vec<String>,
}

impl ResolvedConfig {
    pub fn upload_root(&self) -> Utf8PathBuf {
        self.data_root.join("uploads")
    }

    pub fn records_root(&self) -> Utf8PathBuf {
        self.data_root.join("records")
    }

    pub fn results_path(&self, pid: &str) -> Utf8PathBuf {
        self.temp_root.join(pid).join("results.h5ad")
    }

    pub fn extension_allowed(&self, ext: &str) -> bool {
        self.allowed_extensions.iter().any(|allowed| allowed == ext)
    }

    pub fn with_roots(data_root: Utf8PathBuf, temp_root: Utf8PathBuf) -> Self {
        Self {
            data_root,
            temp_root,
            allowed_extensions: default_allowed_extensions(),
        }
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Resolve the config. An explicitly named file must exist; the default
    /// `anndata-portal.json` is optional and its absence yields defaults.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, PortalError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from("anndata-portal.json"),
        };

        if path.is_none() && !config_path.exists() {
            return Self::resolve_config(Config::default());
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| PortalError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| PortalError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, PortalError> {
        let data_root = match config.data_root {
            Some(root) => Utf8PathBuf::from(root),
            None => default_data_root()?,
        };
        let temp_root = match config.temp_root {
            Some(root) => Utf8PathBuf::from(root),
            None => data_root.join("tmp"),
        };
        let allowed_extensions = config
            .allowed_extensions
            .unwrap_or_else(default_allowed_extensions)
            .into_iter()
            .map(|ext| ext.to_lowercase())
            .collect();

        Ok(ResolvedConfig {
            data_root,
            temp_root,
            allowed_extensions,
        })
    }
}

fn default_data_root() -> Result<Utf8PathBuf, PortalError> {
    let cwd = std::env::current_dir().map_err(|err| PortalError::Filesystem(err.to_string()))?;
    Utf8PathBuf::from_path_buf(cwd.join(".anndata-portal"))
        .map_err(|_| PortalError::Filesystem("invalid data root path".to_string()))
}

/// Every ingestible format plus the archive extensions the normalizer
/// understands.
pub fn default_allowed_extensions() -> Vec<String> {
    let mut extensions: Vec<String> = DatasetFormat::all()
        .iter()
        .map(|format| format.as_str().to_string())
        .collect();
    for archive in ["zip", "tar", "gz", "tgz"] {
        extensions.push(archive.to_string());
    }
    extensions
}

pub fn ensure_dir(path: &Utf8Path) -> Result<(), PortalError> {
    fs::create_dir_all(path.as_std_path()).map_err(|err| PortalError::Filesystem(err.to_string()))
}
