//! Common types shared between the homestead engine and its CLI

use std::path::Path;

use serde::{Deserialize, Serialize};

/// Error type for homestead operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Configuration problem detected before any external call
    #[error("Configuration error: {0}")]
    Config(String),

    /// Apply precondition violated: the resource is already on the cluster
    #[error("{kind}/{name} already exists in namespace {namespace}")]
    AlreadyExists {
        kind: String,
        name: String,
        namespace: String,
    },

    /// A resource or backup that was expected to exist is absent
    #[error("Not found: {0}")]
    NotFound(String),

    /// Cluster transport failure (client construction, unexpected API error)
    #[error("Kubernetes API error: {0}")]
    Transport(String),

    /// A remote command exited nonzero
    #[error("Remote command `{command}` failed with exit code {code}")]
    Process { command: String, code: i32 },

    /// Local filesystem failure
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Manifest or metadata encoding failure
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Create a configuration error with the given message
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a not-found error with the given message
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a transport error with the given message
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Create an already-exists error for a namespaced resource
    pub fn already_exists(
        kind: impl Into<String>,
        name: impl Into<String>,
        namespace: impl Into<String>,
    ) -> Self {
        Self::AlreadyExists {
            kind: kind.into(),
            name: name.into(),
            namespace: namespace.into(),
        }
    }

    /// Create a process error for a failed remote command
    pub fn process(command: impl Into<String>, code: i32) -> Self {
        Self::Process {
            command: command.into(),
            code,
        }
    }
}

/// Result type alias using the homestead Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Metadata describing a single backup: where the data came from and how
/// to restore it. Written once per backup invocation; read, never
/// re-created, during restore.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupManifest {
    /// Timestamp in the fixed `YYYYMMDD_HHMMSS` format
    pub timestamp: String,
    /// Namespace the backup was taken from
    pub namespace: String,
    /// Service the data belongs to
    pub service: String,
    /// Pod the extraction command ran in
    pub pod: String,
    /// Archive filename inside the backup directory
    pub archive: String,
    /// Literal CLI command reproducing this restore
    pub restore_command: String,
}

impl BackupManifest {
    /// Filename of the manifest inside a backup directory
    pub const FILENAME: &'static str = "manifest.json";

    /// Write the manifest into the given backup directory
    pub fn save(&self, dir: &Path) -> Result<()> {
        let contents = serde_json::to_string_pretty(self)
            .map_err(|e| Error::serialization(e.to_string()))?;
        std::fs::write(dir.join(Self::FILENAME), contents)?;
        Ok(())
    }

    /// Read the manifest back from a backup directory
    pub fn load(dir: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(dir.join(Self::FILENAME))?;
        serde_json::from_str(&contents).map_err(|e| Error::serialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_includes_context() {
        let err = Error::already_exists("Secret", "postgres-secrets", "homestead");
        assert_eq!(
            err.to_string(),
            "Secret/postgres-secrets already exists in namespace homestead"
        );

        let err = Error::process("pg_dumpall -U postgres | gzip -c", 2);
        assert!(err.to_string().contains("pg_dumpall"));
        assert!(err.to_string().contains("exit code 2"));
    }

    #[test]
    fn test_error_constructors_categorize() {
        assert!(matches!(Error::config("missing secret"), Error::Config(_)));
        assert!(matches!(Error::not_found("gone"), Error::NotFound(_)));
        assert!(matches!(Error::transport("boom"), Error::Transport(_)));
    }

    #[test]
    fn test_manifest_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = BackupManifest {
            timestamp: "20240601_120000".to_string(),
            namespace: "homestead".to_string(),
            service: "postgres".to_string(),
            pod: "postgres-6f7d9-abcde".to_string(),
            archive: "postgres_dump_20240601_120000.sql.gz".to_string(),
            restore_command: "homestead restore postgres 20240601_120000".to_string(),
        };

        manifest.save(dir.path()).unwrap();
        let loaded = BackupManifest::load(dir.path()).unwrap();

        assert_eq!(loaded.timestamp, manifest.timestamp);
        assert_eq!(loaded.archive, manifest.archive);
        assert!(loaded.restore_command.contains(&loaded.timestamp));
    }

    #[test]
    fn test_manifest_load_missing_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = BackupManifest::load(dir.path()).unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }
}
