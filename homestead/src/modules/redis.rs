//! Redis module
//!
//! Stateful cache service. No secrets are required; the data lives on a
//! persistent volume and is backed up as a tar archive of the data
//! directory.

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec, DeploymentStrategy};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, PersistentVolumeClaim, PersistentVolumeClaimSpec,
    PersistentVolumeClaimVolumeSource, PodSpec, PodTemplateSpec, Probe, Service, ServicePort,
    ServiceSpec, TCPSocketAction, Volume, VolumeMount, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use homestead_common::{BackupManifest, Result};

use crate::backup::restore::{self, FollowUp, RestorePolicy};
use crate::backup::{self, ArchiveKind, BackupPolicy};
use crate::rollout::{self, RolloutOp};

use super::{Backupable, Context, Module, Resource, ResourceKind, Restorable, Rollable};

pub const NAME: &str = "redis";

const PVC_NAME: &str = "redis-data";
const SERVICE_NAME: &str = "redis";
const DEPLOYMENT_NAME: &str = "redis";

const IMAGE: &str = "redis:7-alpine";
const PORT: i32 = 6379;
const DATA_DIR: &str = "/data";
const STORAGE: &str = "1Gi";

#[derive(Debug)]
pub struct Redis;

fn labels() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("app.kubernetes.io/name".to_string(), NAME.to_string()),
        (
            "app.kubernetes.io/managed-by".to_string(),
            "homestead".to_string(),
        ),
    ])
}

fn selector() -> String {
    format!("app.kubernetes.io/name={NAME}")
}

fn build_pvc() -> PersistentVolumeClaim {
    let mut requests = BTreeMap::new();
    requests.insert("storage".to_string(), Quantity(STORAGE.to_string()));

    PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(PVC_NAME.to_string()),
            labels: Some(labels()),
            ..Default::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec!["ReadWriteOnce".to_string()]),
            resources: Some(VolumeResourceRequirements {
                requests: Some(requests),
                limits: None,
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn build_service() -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some(SERVICE_NAME.to_string()),
            labels: Some(labels()),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            selector: Some(labels()),
            ports: Some(vec![ServicePort {
                name: Some("redis".to_string()),
                port: PORT,
                target_port: Some(IntOrString::Int(PORT)),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn build_deployment() -> Deployment {
    let container = Container {
        name: NAME.to_string(),
        image: Some(IMAGE.to_string()),
        // Append-only persistence so a restart loses at most one second
        args: Some(vec![
            "redis-server".to_string(),
            "--appendonly".to_string(),
            "yes".to_string(),
        ]),
        ports: Some(vec![ContainerPort {
            name: Some("redis".to_string()),
            container_port: PORT,
            ..Default::default()
        }]),
        volume_mounts: Some(vec![VolumeMount {
            name: "data".to_string(),
            mount_path: DATA_DIR.to_string(),
            ..Default::default()
        }]),
        readiness_probe: Some(Probe {
            tcp_socket: Some(TCPSocketAction {
                port: IntOrString::Int(PORT),
                host: None,
            }),
            initial_delay_seconds: Some(3),
            period_seconds: Some(10),
            ..Default::default()
        }),
        ..Default::default()
    };

    Deployment {
        metadata: ObjectMeta {
            name: Some(DEPLOYMENT_NAME.to_string()),
            labels: Some(labels()),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(labels()),
                match_expressions: None,
            },
            strategy: Some(DeploymentStrategy {
                type_: Some("Recreate".to_string()),
                rolling_update: None,
            }),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels()),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![container],
                    volumes: Some(vec![Volume {
                        name: "data".to_string(),
                        persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                            claim_name: PVC_NAME.to_string(),
                            read_only: None,
                        }),
                        ..Default::default()
                    }]),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn backup_policy() -> BackupPolicy {
    BackupPolicy {
        service: NAME,
        selector: selector(),
        consistency: Some(vec!["redis-cli".to_string(), "BGSAVE".to_string()]),
        pipeline: format!("tar czf - -C {DATA_DIR} ."),
        archive: ArchiveKind::TarGz,
    }
}

fn restore_policy() -> RestorePolicy {
    RestorePolicy {
        service: NAME,
        selector: selector(),
        archive: ArchiveKind::TarGz,
        prepare: Some(format!("rm -rf {DATA_DIR}/*")),
        inject: format!("tar xzf - -C {DATA_DIR}"),
        follow_up: FollowUp::RolloutRestart(DEPLOYMENT_NAME),
    }
}

#[async_trait]
impl Module for Redis {
    fn name(&self) -> &'static str {
        NAME
    }

    fn resources(&self, _ctx: &Context) -> Result<Vec<Resource>> {
        Ok(vec![
            Resource::PersistentVolumeClaim(build_pvc()),
            Resource::Service(build_service()),
            Resource::Deployment(build_deployment()),
        ])
    }

    fn owned(&self) -> Vec<(ResourceKind, String)> {
        vec![
            (ResourceKind::PersistentVolumeClaim, PVC_NAME.to_string()),
            (ResourceKind::Service, SERVICE_NAME.to_string()),
            (ResourceKind::Deployment, DEPLOYMENT_NAME.to_string()),
        ]
    }
}

#[async_trait]
impl Backupable for Redis {
    async fn backup(&self, ctx: &Context, dest: Option<PathBuf>) -> Result<BackupManifest> {
        backup::run(ctx, &backup_policy(), dest).await
    }

    fn backups(&self, ctx: &Context) -> Result<Vec<(String, PathBuf)>> {
        restore::list_backups(&ctx.config.paths.backup_root, NAME)
    }
}

#[async_trait]
impl Restorable for Redis {
    async fn restore(&self, ctx: &Context, target: &str) -> Result<()> {
        restore::run(ctx, &restore_policy(), target).await
    }
}

#[async_trait]
impl Rollable for Redis {
    async fn rollout(&self, ctx: &Context, op: RolloutOp) -> Result<Option<String>> {
        let client = ctx.client().await?;
        rollout::run(&client, DEPLOYMENT_NAME, op).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    #[test]
    fn test_no_secrets_required() {
        assert!(Redis.required_secrets().is_empty());
        let ctx = Context::new(AppConfig::default());
        assert!(Redis.resources(&ctx).is_ok());
    }

    #[test]
    fn test_resources_in_dependency_order() {
        let ctx = Context::new(AppConfig::default());
        let resources = Redis.resources(&ctx).unwrap();
        let kinds: Vec<_> = resources.iter().map(|r| r.kind()).collect();
        assert_eq!(
            kinds,
            vec![
                ResourceKind::PersistentVolumeClaim,
                ResourceKind::Service,
                ResourceKind::Deployment,
            ]
        );
    }

    #[test]
    fn test_backup_policy_archives_data_dir() {
        let policy = backup_policy();
        assert_eq!(policy.pipeline, "tar czf - -C /data .");
        assert_eq!(policy.archive, ArchiveKind::TarGz);
        assert_eq!(
            policy.consistency,
            Some(vec!["redis-cli".to_string(), "BGSAVE".to_string()])
        );
    }

    #[test]
    fn test_restore_policy_clears_then_restarts() {
        let policy = restore_policy();
        assert_eq!(policy.prepare.as_deref(), Some("rm -rf /data/*"));
        assert_eq!(policy.inject, "tar xzf - -C /data");
        assert!(matches!(
            policy.follow_up,
            FollowUp::RolloutRestart("redis")
        ));
    }
}
