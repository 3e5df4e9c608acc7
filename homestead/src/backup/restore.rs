//! Restore engine
//!
//! Resolves a timestamp (or the `latest` sentinel) against the on-disk
//! backup tree, validates the archive, and drives the service's restore
//! pipeline through the pod's stdin. The primary data transfer is fatal
//! on failure; preparation and follow-up steps are best effort.

use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use tokio::fs::File;
use tracing::{info, warn};

use homestead_common::{BackupManifest, Error, Result};

use crate::kubernetes::exec;
use crate::modules::Context;
use crate::rollout;

use super::{backup_dir_name, ArchiveKind, TIMESTAMP_FORMAT};

/// Sentinel resolving to the most recent backup
pub const LATEST: &str = "latest";

/// Follow-up action after data injection, best effort
pub enum FollowUp {
    None,
    /// Restart the named deployment so the service reloads restored data
    RolloutRestart(&'static str),
}

/// Per-service restore behavior
pub struct RestorePolicy {
    pub service: &'static str,
    /// Label selector resolving the service's pod
    pub selector: String,
    /// Archive flavor the backup engine wrote for this service
    pub archive: ArchiveKind,
    /// Remote pipeline run before injection (e.g. clearing the data
    /// directory). Best effort.
    pub prepare: Option<String>,
    /// Remote pipeline consuming archive bytes on stdin
    pub inject: String,
    pub follow_up: FollowUp,
}

/// List a service's backups, newest first.
pub fn list_backups(root: &Path, service: &str) -> Result<Vec<(String, PathBuf)>> {
    let prefix = format!("{service}_backup_");
    let mut found: Vec<(NaiveDateTime, String, PathBuf)> = Vec::new();

    let entries = match std::fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        let Some(stamp) = name.strip_prefix(&prefix) else {
            continue;
        };
        // Only directories whose suffix parses as a timestamp count
        if let Ok(parsed) = NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT) {
            found.push((parsed, stamp.to_string(), entry.path()));
        }
    }

    found.sort_by(|a, b| b.0.cmp(&a.0));
    Ok(found
        .into_iter()
        .map(|(_, stamp, path)| (stamp, path))
        .collect())
}

/// Resolve `latest` or a literal timestamp to a backup directory.
pub fn resolve_timestamp(root: &Path, service: &str, target: &str) -> Result<(String, PathBuf)> {
    if target == LATEST {
        return list_backups(root, service)?.into_iter().next().ok_or_else(|| {
            Error::not_found(format!(
                "no backups found for {} under {}",
                service,
                root.display()
            ))
        });
    }

    let dir = root.join(backup_dir_name(service, target));
    if !dir.is_dir() {
        return Err(Error::not_found(format!(
            "backup directory {} does not exist",
            dir.display()
        )));
    }
    Ok((target.to_string(), dir))
}

/// Run a restore following the service's policy.
pub async fn run(ctx: &Context, policy: &RestorePolicy, target: &str) -> Result<()> {
    let root = &ctx.config.paths.backup_root;
    let (timestamp, dir) = resolve_timestamp(root, policy.service, target)?;

    let archive_path = dir.join(policy.archive.archive_name(policy.service, &timestamp));
    if !archive_path.is_file() {
        return Err(Error::not_found(format!(
            "archive {} is missing",
            archive_path.display()
        )));
    }

    // The manifest is informational here; the archive is authoritative
    match BackupManifest::load(&dir) {
        Ok(manifest) => {
            info!(pod = %manifest.pod, timestamp = %manifest.timestamp, "restoring backup");
        }
        Err(e) => {
            warn!(error = %e, "backup manifest unreadable, continuing from archive alone");
        }
    }

    let client = ctx.client().await?;
    let pod = exec::resolve_pod(&client, &policy.selector).await?;

    if let Some(prepare) = &policy.prepare {
        let command = exec::shell_command(&ctx.config.exec.shell, prepare);
        match exec::exec_capture(&client, &pod, &command).await {
            Ok(output) if output.success() => {}
            Ok(output) => {
                warn!(code = output.exit_code, "prepare step failed, continuing");
            }
            Err(e) => {
                warn!(error = %e, "prepare step failed, continuing");
            }
        }
    }

    let command = exec::shell_command(&ctx.config.exec.shell, &policy.inject);
    info!(pod = %pod, archive = %archive_path.display(), "injecting data");
    let mut file = File::open(&archive_path).await?;
    let sent = exec::exec_stream_from_reader(&client, &pod, &command, &mut file).await?;
    info!(bytes = sent, "data injected");

    match policy.follow_up {
        FollowUp::None => {}
        FollowUp::RolloutRestart(deployment) => {
            if let Err(e) = rollout::restart(&client, deployment).await {
                warn!(error = %e, deployment, "rollout restart after restore failed");
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_backup_dirs(root: &Path, service: &str, stamps: &[&str]) {
        for stamp in stamps {
            std::fs::create_dir_all(root.join(backup_dir_name(service, stamp))).unwrap();
        }
    }

    #[test]
    fn test_latest_resolves_to_maximum_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        make_backup_dirs(dir.path(), "postgres", &["20240101_000000", "20240601_120000"]);

        let (stamp, path) = resolve_timestamp(dir.path(), "postgres", LATEST).unwrap();
        assert_eq!(stamp, "20240601_120000");
        assert!(path.ends_with("postgres_backup_20240601_120000"));
    }

    #[test]
    fn test_latest_ignores_other_services_and_junk() {
        let dir = tempfile::tempdir().unwrap();
        make_backup_dirs(dir.path(), "postgres", &["20240101_000000"]);
        make_backup_dirs(dir.path(), "redis", &["20250101_000000"]);
        std::fs::create_dir_all(dir.path().join("postgres_backup_not-a-timestamp")).unwrap();
        std::fs::write(dir.path().join("postgres_backup_20260101_000000"), b"file").unwrap();

        let (stamp, _) = resolve_timestamp(dir.path(), "postgres", LATEST).unwrap();
        assert_eq!(stamp, "20240101_000000");
    }

    #[test]
    fn test_no_backups_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = resolve_timestamp(dir.path(), "postgres", LATEST).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        assert!(err.to_string().contains("no backups found"));
    }

    #[test]
    fn test_missing_backup_root_is_not_found() {
        let err =
            resolve_timestamp(Path::new("/nonexistent/backups"), "postgres", LATEST).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn test_literal_timestamp_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        make_backup_dirs(dir.path(), "postgres", &["20240101_000000"]);

        let (stamp, _) =
            resolve_timestamp(dir.path(), "postgres", "20240101_000000").unwrap();
        assert_eq!(stamp, "20240101_000000");

        let err = resolve_timestamp(dir.path(), "postgres", "20990101_000000").unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn test_list_backups_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        make_backup_dirs(
            dir.path(),
            "redis",
            &["20240301_000000", "20240101_000000", "20240201_000000"],
        );

        let stamps: Vec<String> = list_backups(dir.path(), "redis")
            .unwrap()
            .into_iter()
            .map(|(stamp, _)| stamp)
            .collect();
        assert_eq!(
            stamps,
            vec!["20240301_000000", "20240201_000000", "20240101_000000"]
        );
    }
}
