//! Application configuration
//!
//! Loads the TOML configuration that drives every command: cluster access,
//! filesystem roots, the remote shell, logging, and the secrets map.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use homestead_common::{Error, Result};

use crate::logging::LoggingConfig;

/// Cluster access settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Namespace all managed resources live in
    pub namespace: String,
    /// Explicit kubeconfig path; the environment is used when unset
    pub kubeconfig: Option<PathBuf>,
    /// Kubeconfig context to select
    pub context: Option<String>,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            namespace: "homestead".to_string(),
            kubeconfig: None,
            context: None,
        }
    }
}

/// Filesystem roots for generated manifests and backups
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Directory manifests are rendered into (`<root>/<module>/...`)
    pub configs_root: PathBuf,
    /// Directory backups are written to (`<root>/<service>_backup_<ts>/...`)
    pub backup_root: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            configs_root: PathBuf::from("configs"),
            backup_root: PathBuf::from("backups"),
        }
    }
}

/// Remote execution settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecConfig {
    /// Shell used to run pipelines inside pods. Resolved once at startup
    /// and injected into every remote command that needs a pipeline.
    pub shell: String,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            shell: "/bin/sh".to_string(),
        }
    }
}

/// Top-level application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub cluster: ClusterConfig,
    pub paths: PathsConfig,
    pub exec: ExecConfig,
    pub logging: LoggingConfig,
    /// Externally supplied secrets; modules declare which keys they require
    pub secrets: HashMap<String, String>,
}

impl AppConfig {
    /// Load configuration from a TOML file. A missing file yields defaults
    /// so read-only commands work without any setup.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path)?;
        toml::from_str(&contents)
            .map_err(|e| Error::config(format!("invalid config file {}: {}", path.display(), e)))
    }

    /// Look up a secret by key
    pub fn secret(&self, key: &str) -> Option<&str> {
        self.secrets.get(key).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.cluster.namespace, "homestead");
        assert_eq!(config.paths.backup_root, PathBuf::from("backups"));
        assert_eq!(config.exec.shell, "/bin/sh");
        assert!(config.secrets.is_empty());
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let config = AppConfig::load(Path::new("/nonexistent/homestead.toml")).unwrap();
        assert_eq!(config.cluster.namespace, "homestead");
    }

    #[test]
    fn test_load_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("homestead.toml");
        std::fs::write(
            &path,
            r#"
[cluster]
namespace = "infra"

[secrets]
admin_postgres_user = "postgres"
admin_postgres_password = "hunter2"
"#,
        )
        .unwrap();

        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.cluster.namespace, "infra");
        assert_eq!(config.secret("admin_postgres_user"), Some("postgres"));
        assert_eq!(config.secret("missing"), None);
        // Unspecified sections keep their defaults
        assert_eq!(config.exec.shell, "/bin/sh");
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("homestead.toml");
        std::fs::write(&path, "cluster = nonsense [").unwrap();

        let err = AppConfig::load(&path).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
