//! Command execution inside running pods
//!
//! The remote execution channel used by backup, restore, and database
//! administration: one-shot capture, streaming in both directions without
//! buffering the payload, and label-selector pod resolution.

use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Status;
use kube::api::{AttachParams, ListParams};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::warn;

use homestead_common::{Error, Result};

use super::client::K8sClient;

/// Output from a captured remote command
#[derive(Debug, Clone)]
pub struct ExecOutput {
    /// Standard output
    pub stdout: String,
    /// Standard error
    pub stderr: String,
    /// Exit code (0 for success)
    pub exit_code: i32,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Wrap a pipeline in the configured remote shell.
pub fn shell_command(shell: &str, pipeline: &str) -> Vec<String> {
    vec![shell.to_string(), "-c".to_string(), pipeline.to_string()]
}

fn attach_params(stdin: bool) -> AttachParams {
    AttachParams {
        container: None,
        tty: false,
        stdin,
        stdout: true,
        stderr: true,
        max_stdin_buf_size: Some(1024 * 1024),
        max_stdout_buf_size: Some(1024 * 1024),
        max_stderr_buf_size: Some(1024 * 1024),
    }
}

/// Decode the exit status kube reports on the exec status channel.
fn decode_exit_code(status: Option<Status>) -> Result<i32> {
    let status = status.ok_or_else(|| {
        Error::transport("exec status channel closed before reporting a status")
    })?;

    if status.status.as_deref() == Some("Success") {
        return Ok(0);
    }

    // NonZeroExitCode carries the code in the ExitCode cause
    let code = status
        .details
        .as_ref()
        .and_then(|d| d.causes.as_ref())
        .and_then(|causes| {
            causes
                .iter()
                .find(|c| c.reason.as_deref() == Some("ExitCode"))
        })
        .and_then(|c| c.message.as_ref())
        .and_then(|m| m.trim().parse().ok())
        .unwrap_or(1);

    Ok(code)
}

/// Resolve the single target pod for a service via its label selector.
///
/// Exactly one running pod is expected. Zero matches is fatal; more than
/// one is ambiguous, so the extras are logged and the first running pod
/// is used.
pub async fn resolve_pod(client: &K8sClient, selector: &str) -> Result<String> {
    let pods: kube::Api<Pod> = client.api();
    let pod_list = pods
        .list(&ListParams::default().labels(selector))
        .await
        .map_err(|e| Error::transport(e.to_string()))?;

    let mut running: Vec<String> = pod_list
        .items
        .into_iter()
        .filter(|p| {
            p.status
                .as_ref()
                .and_then(|s| s.phase.as_ref())
                .map(|phase| phase == "Running")
                .unwrap_or(false)
        })
        .filter_map(|p| p.metadata.name)
        .collect();

    if running.is_empty() {
        return Err(Error::not_found(format!(
            "no running pod matches selector '{}' in namespace {}",
            selector,
            client.namespace()
        )));
    }

    if running.len() > 1 {
        warn!(
            selector,
            extra = ?&running[1..],
            "selector matches more than one running pod; using the first"
        );
    }

    Ok(running.swap_remove(0))
}

/// Execute a command in a pod and collect its output.
pub async fn exec_capture(
    client: &K8sClient,
    pod_name: &str,
    command: &[String],
) -> Result<ExecOutput> {
    let pods: kube::Api<Pod> = client.api();

    let mut attached = pods
        .exec(pod_name, command.to_vec(), &attach_params(false))
        .await
        .map_err(|e| Error::transport(format!("exec in pod {pod_name} failed: {e}")))?;

    let mut stdout = String::new();
    if let Some(mut reader) = attached.stdout() {
        let mut buf = Vec::new();
        if reader.read_to_end(&mut buf).await.is_ok() {
            stdout = String::from_utf8_lossy(&buf).to_string();
        }
    }

    let mut stderr = String::new();
    if let Some(mut reader) = attached.stderr() {
        let mut buf = Vec::new();
        if reader.read_to_end(&mut buf).await.is_ok() {
            stderr = String::from_utf8_lossy(&buf).to_string();
        }
    }

    let status = match attached.take_status() {
        Some(fut) => fut.await,
        None => None,
    };
    let exit_code = decode_exit_code(status)?;

    Ok(ExecOutput {
        stdout,
        stderr,
        exit_code,
    })
}

/// Execute a command and stream its stdout into `dest` without buffering
/// the payload. Returns the number of bytes written.
pub async fn exec_stream_to_writer<W>(
    client: &K8sClient,
    pod_name: &str,
    command: &[String],
    dest: &mut W,
) -> Result<u64>
where
    W: AsyncWrite + Unpin,
{
    let pods: kube::Api<Pod> = client.api();

    let mut attached = pods
        .exec(pod_name, command.to_vec(), &attach_params(false))
        .await
        .map_err(|e| Error::transport(format!("exec in pod {pod_name} failed: {e}")))?;

    let mut stdout = attached
        .stdout()
        .ok_or_else(|| Error::transport("exec did not attach stdout"))?;
    let mut stderr = attached
        .stderr()
        .ok_or_else(|| Error::transport("exec did not attach stderr"))?;
    let status_fut = attached
        .take_status()
        .ok_or_else(|| Error::transport("exec did not expose a status channel"))?;

    // stderr is drained concurrently so a chatty command cannot stall the
    // data path.
    let copy = tokio::io::copy(&mut stdout, dest);
    let drain = async {
        let mut buf = Vec::new();
        let _ = stderr.read_to_end(&mut buf).await;
        String::from_utf8_lossy(&buf).into_owned()
    };

    let (copied, stderr_text, status) = tokio::join!(copy, drain, status_fut);
    let written = copied?;
    dest.flush().await?;

    let exit_code = decode_exit_code(status)?;
    if exit_code != 0 {
        if !stderr_text.trim().is_empty() {
            warn!(pod = pod_name, "remote stderr: {}", stderr_text.trim());
        }
        return Err(Error::process(command.join(" "), exit_code));
    }

    Ok(written)
}

/// Execute a command with `source` streamed into its stdin. Returns the
/// number of bytes sent.
pub async fn exec_stream_from_reader<R>(
    client: &K8sClient,
    pod_name: &str,
    command: &[String],
    source: &mut R,
) -> Result<u64>
where
    R: AsyncRead + Unpin,
{
    let pods: kube::Api<Pod> = client.api();

    let mut attached = pods
        .exec(pod_name, command.to_vec(), &attach_params(true))
        .await
        .map_err(|e| Error::transport(format!("exec in pod {pod_name} failed: {e}")))?;

    let mut stdin = attached
        .stdin()
        .ok_or_else(|| Error::transport("exec did not attach stdin"))?;
    let mut stdout = attached
        .stdout()
        .ok_or_else(|| Error::transport("exec did not attach stdout"))?;
    let mut stderr = attached
        .stderr()
        .ok_or_else(|| Error::transport("exec did not attach stderr"))?;
    let status_fut = attached
        .take_status()
        .ok_or_else(|| Error::transport("exec did not expose a status channel"))?;

    let feed = async {
        let sent = tokio::io::copy(source, &mut stdin).await?;
        // Close stdin so the remote command sees EOF
        stdin.shutdown().await?;
        Ok::<_, std::io::Error>(sent)
    };
    let drain_stdout = async {
        let mut sink = tokio::io::sink();
        let _ = tokio::io::copy(&mut stdout, &mut sink).await;
    };
    let drain_stderr = async {
        let mut buf = Vec::new();
        let _ = stderr.read_to_end(&mut buf).await;
        String::from_utf8_lossy(&buf).into_owned()
    };

    let (sent, _, stderr_text, status) = tokio::join!(feed, drain_stdout, drain_stderr, status_fut);
    let sent = sent?;

    let exit_code = decode_exit_code(status)?;
    if exit_code != 0 {
        if !stderr_text.trim().is_empty() {
            warn!(pod = pod_name, "remote stderr: {}", stderr_text.trim());
        }
        return Err(Error::process(command.join(" "), exit_code));
    }

    Ok(sent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{StatusCause, StatusDetails};

    #[test]
    fn test_shell_command_wraps_pipeline() {
        let command = shell_command("/bin/sh", "pg_dumpall -U postgres | gzip -c");
        assert_eq!(
            command,
            vec!["/bin/sh", "-c", "pg_dumpall -U postgres | gzip -c"]
        );
    }

    #[test]
    fn test_decode_success_status() {
        let status = Status {
            status: Some("Success".to_string()),
            ..Default::default()
        };
        assert_eq!(decode_exit_code(Some(status)).unwrap(), 0);
    }

    #[test]
    fn test_decode_nonzero_exit_code() {
        let status = Status {
            status: Some("Failure".to_string()),
            reason: Some("NonZeroExitCode".to_string()),
            details: Some(StatusDetails {
                causes: Some(vec![StatusCause {
                    reason: Some("ExitCode".to_string()),
                    message: Some("42".to_string()),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert_eq!(decode_exit_code(Some(status)).unwrap(), 42);
    }

    #[test]
    fn test_decode_failure_without_cause_defaults_to_one() {
        let status = Status {
            status: Some("Failure".to_string()),
            ..Default::default()
        };
        assert_eq!(decode_exit_code(Some(status)).unwrap(), 1);
    }

    #[test]
    fn test_decode_missing_status_is_transport_error() {
        let err = decode_exit_code(None).unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
    }
}
