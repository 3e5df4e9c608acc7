//! Backup engine
//!
//! Policy-driven backups for stateful modules: resolve the target pod,
//! fire the service's consistency trigger, then stream the extraction
//! command's stdout straight into a local archive file. Each invocation
//! produces exactly one archive and one manifest under
//! `<backup root>/<service>_backup_<timestamp>/`.

pub mod restore;

use std::path::PathBuf;

use chrono::Local;
use tokio::fs::File;
use tracing::{info, warn};

use homestead_common::{BackupManifest, Result};

use crate::kubernetes::exec;
use crate::modules::Context;

/// Fixed timestamp format embedded in backup directory and archive names
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Archive flavor produced by a service's extraction command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    /// Compressed SQL dump
    SqlGz,
    /// Compressed tar of a data directory
    TarGz,
}

impl ArchiveKind {
    /// Deterministic archive filename for a service and timestamp
    pub fn archive_name(&self, service: &str, timestamp: &str) -> String {
        match self {
            Self::SqlGz => format!("{service}_dump_{timestamp}.sql.gz"),
            Self::TarGz => format!("{service}_data_{timestamp}.tar.gz"),
        }
    }
}

/// Per-service backup behavior
pub struct BackupPolicy {
    pub service: &'static str,
    /// Label selector resolving the service's pod
    pub selector: String,
    /// Remote command forcing the service to persist in-memory state
    /// before extraction. Best effort.
    pub consistency: Option<Vec<String>>,
    /// Remote pipeline writing the archive bytes to stdout
    pub pipeline: String,
    pub archive: ArchiveKind,
}

/// Directory name for one backup of a service
pub fn backup_dir_name(service: &str, timestamp: &str) -> String {
    format!("{service}_backup_{timestamp}")
}

/// Run a backup following the service's policy. Returns the manifest
/// written beside the archive.
pub async fn run(
    ctx: &Context,
    policy: &BackupPolicy,
    dest: Option<PathBuf>,
) -> Result<BackupManifest> {
    let client = ctx.client().await?;
    let pod = exec::resolve_pod(&client, &policy.selector).await?;

    if let Some(trigger) = &policy.consistency {
        match exec::exec_capture(&client, &pod, trigger).await {
            Ok(output) if output.success() => {
                info!(pod = %pod, "consistency trigger completed");
            }
            Ok(output) => {
                warn!(
                    pod = %pod,
                    code = output.exit_code,
                    "consistency trigger failed, continuing"
                );
            }
            Err(e) => {
                warn!(pod = %pod, error = %e, "consistency trigger failed, continuing");
            }
        }
    }

    let timestamp = Local::now().format(TIMESTAMP_FORMAT).to_string();
    let root = dest.unwrap_or_else(|| ctx.config.paths.backup_root.clone());
    let dir = root.join(backup_dir_name(policy.service, &timestamp));
    std::fs::create_dir_all(&dir)?;

    let archive_name = policy.archive.archive_name(policy.service, &timestamp);
    let archive_path = dir.join(&archive_name);
    let command = exec::shell_command(&ctx.config.exec.shell, &policy.pipeline);

    info!(pod = %pod, archive = %archive_path.display(), "extracting data");
    let mut file = File::create(&archive_path).await?;
    let written = exec::exec_stream_to_writer(&client, &pod, &command, &mut file).await?;
    file.sync_all().await?;
    info!(bytes = written, "archive written");

    let manifest = BackupManifest {
        timestamp: timestamp.clone(),
        namespace: client.namespace().to_string(),
        service: policy.service.to_string(),
        pod,
        archive: archive_name,
        restore_command: format!("homestead restore {} {}", policy.service, timestamp),
    };
    manifest.save(&dir)?;
    info!(dir = %dir.display(), "backup complete");

    Ok(manifest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDateTime;

    #[test]
    fn test_archive_names_are_deterministic() {
        assert_eq!(
            ArchiveKind::SqlGz.archive_name("postgres", "20240601_120000"),
            "postgres_dump_20240601_120000.sql.gz"
        );
        assert_eq!(
            ArchiveKind::TarGz.archive_name("redis", "20240601_120000"),
            "redis_data_20240601_120000.tar.gz"
        );
    }

    #[test]
    fn test_backup_dir_name_embeds_timestamp() {
        assert_eq!(
            backup_dir_name("postgres", "20240101_000000"),
            "postgres_backup_20240101_000000"
        );
    }

    #[test]
    fn test_timestamp_format_round_trips() {
        let parsed = NaiveDateTime::parse_from_str("20240601_120000", TIMESTAMP_FORMAT).unwrap();
        assert_eq!(parsed.format(TIMESTAMP_FORMAT).to_string(), "20240601_120000");
    }
}
