//! Deployment rollout operations
//!
//! Restart, status, history, and undo for a module's Deployment, driven
//! natively through the apps/v1 API. `status` and `history` return report
//! text; `restart` and `undo` only succeed or fail.

use std::str::FromStr;

use k8s_openapi::api::apps::v1::{Deployment, ReplicaSet};
use kube::api::{ListParams, Patch, PatchParams};
use tracing::info;

use homestead_common::{Error, Result};

use crate::kubernetes::{gateway, K8sClient};

const REVISION_ANNOTATION: &str = "deployment.kubernetes.io/revision";

/// Supported rollout verbs. Anything else is rejected at parse time,
/// before a control command is constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RolloutOp {
    Restart,
    Status,
    History,
    Undo,
}

impl FromStr for RolloutOp {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Error> {
        match s {
            "restart" => Ok(Self::Restart),
            "status" => Ok(Self::Status),
            "history" => Ok(Self::History),
            "undo" => Ok(Self::Undo),
            other => Err(Error::config(format!(
                "unknown rollout operation '{other}' (expected restart, status, history, or undo)"
            ))),
        }
    }
}

/// Execute a rollout operation against the named deployment.
pub async fn run(client: &K8sClient, deployment: &str, op: RolloutOp) -> Result<Option<String>> {
    match op {
        RolloutOp::Restart => restart(client, deployment).await.map(|_| None),
        RolloutOp::Undo => undo(client, deployment).await.map(|_| None),
        RolloutOp::Status => status(client, deployment).await.map(Some),
        RolloutOp::History => history(client, deployment).await.map(Some),
    }
}

async fn get_deployment(client: &K8sClient, name: &str) -> Result<Deployment> {
    gateway::get_opt::<Deployment>(client, name)
        .await?
        .ok_or_else(|| {
            Error::not_found(format!(
                "Deployment/{} in namespace {}",
                name,
                client.namespace()
            ))
        })
}

/// Trigger a rolling restart by updating the pod template annotation.
pub async fn restart(client: &K8sClient, name: &str) -> Result<()> {
    let api: kube::Api<Deployment> = client.api();

    let now = chrono::Utc::now().to_rfc3339();
    let patch = serde_json::json!({
        "spec": {
            "template": {
                "metadata": {
                    "annotations": {
                        "kubectl.kubernetes.io/restartedAt": now
                    }
                }
            }
        }
    });

    api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
        .await
        .map_err(|e| Error::transport(e.to_string()))?;

    info!(deployment = name, "restart triggered");
    Ok(())
}

/// Replica sets backing a deployment, newest revision first.
async fn replica_sets_for(
    client: &K8sClient,
    deployment: &Deployment,
) -> Result<Vec<(i64, ReplicaSet)>> {
    let labels = deployment
        .spec
        .as_ref()
        .and_then(|s| s.selector.match_labels.clone())
        .unwrap_or_default();

    let selector = labels
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",");

    let api: kube::Api<ReplicaSet> = client.api();
    let rs_list = api
        .list(&ListParams::default().labels(&selector))
        .await
        .map_err(|e| Error::transport(e.to_string()))?;

    let mut with_revision: Vec<(i64, ReplicaSet)> = rs_list
        .items
        .into_iter()
        .filter_map(|rs| {
            let revision: i64 = rs
                .metadata
                .annotations
                .as_ref()?
                .get(REVISION_ANNOTATION)?
                .parse()
                .ok()?;
            Some((revision, rs))
        })
        .collect();

    with_revision.sort_by(|a, b| b.0.cmp(&a.0));
    Ok(with_revision)
}

/// Roll the deployment back to its previous revision.
pub async fn undo(client: &K8sClient, name: &str) -> Result<()> {
    let deployment = get_deployment(client, name).await?;
    let revisions = replica_sets_for(client, &deployment).await?;

    let (revision, previous) = revisions.get(1).ok_or_else(|| {
        Error::not_found(format!(
            "deployment {name} has no previous revision to roll back to"
        ))
    })?;

    let mut template = previous
        .spec
        .as_ref()
        .and_then(|s| s.template.clone())
        .ok_or_else(|| {
            Error::transport(format!("replicaset for revision {revision} has no pod template"))
        })?;

    // The hash label belongs to the replicaset, not the deployment template
    if let Some(meta) = template.metadata.as_mut() {
        if let Some(labels) = meta.labels.as_mut() {
            labels.remove("pod-template-hash");
        }
    }

    let patch = serde_json::json!({
        "spec": {
            "template": template
        }
    });

    let api: kube::Api<Deployment> = client.api();
    api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
        .await
        .map_err(|e| Error::transport(e.to_string()))?;

    info!(deployment = name, revision, "rolled back");
    Ok(())
}

/// Render the deployment's replica readiness.
pub async fn status(client: &K8sClient, name: &str) -> Result<String> {
    let deployment = get_deployment(client, name).await?;
    Ok(render_status(&deployment))
}

fn render_status(deployment: &Deployment) -> String {
    let name = deployment.metadata.name.as_deref().unwrap_or("<unnamed>");
    let desired = deployment
        .spec
        .as_ref()
        .and_then(|s| s.replicas)
        .unwrap_or(0);
    let status = deployment.status.clone().unwrap_or_default();

    format!(
        "deployment {}: desired {}, updated {}, ready {}, available {}",
        name,
        desired,
        status.updated_replicas.unwrap_or(0),
        status.ready_replicas.unwrap_or(0),
        status.available_replicas.unwrap_or(0)
    )
}

/// Render the deployment's revision history.
pub async fn history(client: &K8sClient, name: &str) -> Result<String> {
    let deployment = get_deployment(client, name).await?;
    let revisions = replica_sets_for(client, &deployment).await?;

    if revisions.is_empty() {
        return Ok(format!("deployment {name}: no recorded revisions"));
    }

    let mut lines = vec![format!("deployment {name} revisions:")];
    for (revision, rs) in &revisions {
        let image = rs
            .spec
            .as_ref()
            .and_then(|s| s.template.as_ref())
            .and_then(|t| t.spec.as_ref())
            .and_then(|p| p.containers.first())
            .and_then(|c| c.image.clone())
            .unwrap_or_else(|| "<unknown>".to_string());
        let replicas = rs.status.as_ref().map(|s| s.replicas).unwrap_or(0);
        lines.push(format!(
            "  revision {revision}: image {image}, replicas {replicas}"
        ));
    }

    Ok(lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::apps::v1::{DeploymentSpec, DeploymentStatus};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    #[test]
    fn test_known_verbs_parse() {
        assert_eq!("restart".parse::<RolloutOp>().unwrap(), RolloutOp::Restart);
        assert_eq!("status".parse::<RolloutOp>().unwrap(), RolloutOp::Status);
        assert_eq!("history".parse::<RolloutOp>().unwrap(), RolloutOp::History);
        assert_eq!("undo".parse::<RolloutOp>().unwrap(), RolloutOp::Undo);
    }

    #[test]
    fn test_unknown_verb_rejected() {
        let err = "pause".parse::<RolloutOp>().unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().contains("pause"));

        // Verbs are case sensitive, matching the CLI contract
        assert!("Restart".parse::<RolloutOp>().is_err());
    }

    #[test]
    fn test_render_status_reports_replica_counts() {
        let deployment = Deployment {
            metadata: ObjectMeta {
                name: Some("redis".to_string()),
                ..Default::default()
            },
            spec: Some(DeploymentSpec {
                replicas: Some(2),
                ..Default::default()
            }),
            status: Some(DeploymentStatus {
                updated_replicas: Some(2),
                ready_replicas: Some(1),
                available_replicas: Some(1),
                ..Default::default()
            }),
        };

        assert_eq!(
            render_status(&deployment),
            "deployment redis: desired 2, updated 2, ready 1, available 1"
        );
    }
}
