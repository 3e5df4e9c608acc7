//! Postgres module
//!
//! Stateful database service: secret, persistent volume claim, service,
//! and deployment, plus backup/restore, administrative database
//! operations, and rollout control.

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec, DeploymentStrategy};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, EnvVarSource, ExecAction, PersistentVolumeClaim,
    PersistentVolumeClaimSpec, PersistentVolumeClaimVolumeSource, PodSpec, PodTemplateSpec, Probe,
    Secret, SecretKeySelector, Service, ServicePort, ServiceSpec, Volume, VolumeMount,
    VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use homestead_common::{BackupManifest, Error, Result};

use crate::admin::{self, AdminConn};
use crate::backup::restore::{self, FollowUp, RestorePolicy};
use crate::backup::{self, ArchiveKind, BackupPolicy};
use crate::rollout::{self, RolloutOp};
use crate::sql;

use super::{
    AdminCapable, Backupable, Context, Module, Resource, ResourceKind, Restorable, Rollable,
};

pub const NAME: &str = "postgres";

const SECRET_NAME: &str = "postgres-secrets";
const PVC_NAME: &str = "postgres-data";
const SERVICE_NAME: &str = "postgres";
const DEPLOYMENT_NAME: &str = "postgres";

const IMAGE: &str = "postgres:16-alpine";
const PORT: i32 = 5432;
const DATA_DIR: &str = "/var/lib/postgresql/data";
const STORAGE: &str = "5Gi";

/// Secret key holding the admin role name
pub const SECRET_USER_KEY: &str = "admin_postgres_user";
/// Secret key holding the admin role password
pub const SECRET_PASSWORD_KEY: &str = "admin_postgres_password";

#[derive(Debug)]
pub struct Postgres;

fn labels() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("app.kubernetes.io/name".to_string(), NAME.to_string()),
        (
            "app.kubernetes.io/managed-by".to_string(),
            "homestead".to_string(),
        ),
    ])
}

/// Label selector matching this module's pods
pub(crate) fn selector() -> String {
    format!("app.kubernetes.io/name={NAME}")
}

fn admin_user(ctx: &Context) -> Result<String> {
    let user = ctx
        .config
        .secret(SECRET_USER_KEY)
        .ok_or_else(|| Error::config(format!("module {NAME} requires secret '{SECRET_USER_KEY}'")))?;
    // The admin role name is embedded in remote command lines
    sql::validate_ident("admin user", user)?;
    Ok(user.to_string())
}

fn secret_env(var: &str, key: &str) -> EnvVar {
    EnvVar {
        name: var.to_string(),
        value_from: Some(EnvVarSource {
            secret_key_ref: Some(SecretKeySelector {
                name: SECRET_NAME.to_string(),
                key: key.to_string(),
                optional: None,
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn build_secret(ctx: &Context) -> Result<Secret> {
    let user = ctx
        .config
        .secret(SECRET_USER_KEY)
        .ok_or_else(|| Error::config(format!("module {NAME} requires secret '{SECRET_USER_KEY}'")))?;
    let password = ctx.config.secret(SECRET_PASSWORD_KEY).ok_or_else(|| {
        Error::config(format!("module {NAME} requires secret '{SECRET_PASSWORD_KEY}'"))
    })?;

    Ok(Secret {
        metadata: ObjectMeta {
            name: Some(SECRET_NAME.to_string()),
            labels: Some(labels()),
            ..Default::default()
        },
        type_: Some("Opaque".to_string()),
        string_data: Some(BTreeMap::from([
            ("POSTGRES_USER".to_string(), user.to_string()),
            ("POSTGRES_PASSWORD".to_string(), password.to_string()),
        ])),
        ..Default::default()
    })
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
                name: Some("postgres".to_string()),
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
        ports: Some(vec![ContainerPort {
            name: Some("postgres".to_string()),
            container_port: PORT,
            ..Default::default()
        }]),
        env: Some(vec![
            secret_env("POSTGRES_USER", "POSTGRES_USER"),
            secret_env("POSTGRES_PASSWORD", "POSTGRES_PASSWORD"),
            EnvVar {
                name: "PGDATA".to_string(),
                value: Some(format!("{DATA_DIR}/pgdata")),
                ..Default::default()
            },
        ]),
        volume_mounts: Some(vec![VolumeMount {
            name: "data".to_string(),
            mount_path: DATA_DIR.to_string(),
            ..Default::default()
        }]),
        readiness_probe: Some(Probe {
            exec: Some(ExecAction {
                command: Some(vec![
                    "sh".to_string(),
                    "-c".to_string(),
                    "pg_isready -U \"$POSTGRES_USER\"".to_string(),
                ]),
            }),
            initial_delay_seconds: Some(5),
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
            // The data volume is ReadWriteOnce, so never run two pods
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

fn backup_policy(admin_user: &str) -> BackupPolicy {
    BackupPolicy {
        service: NAME,
        selector: selector(),
        consistency: Some(vec![
            "psql".to_string(),
            "-U".to_string(),
            admin_user.to_string(),
            "-c".to_string(),
            "CHECKPOINT;".to_string(),
        ]),
        pipeline: format!("pg_dumpall -U {} | gzip -c", sql::sh_quote(admin_user)),
        archive: ArchiveKind::SqlGz,
    }
}

fn restore_policy(admin_user: &str) -> RestorePolicy {
    RestorePolicy {
        service: NAME,
        selector: selector(),
        archive: ArchiveKind::SqlGz,
        prepare: None,
        inject: format!("gunzip -c | psql -U {} -d postgres", sql::sh_quote(admin_user)),
        follow_up: FollowUp::None,
    }
}

#[async_trait]
impl Module for Postgres {
    fn name(&self) -> &'static str {
        NAME
    }

    fn required_secrets(&self) -> &'static [&'static str] {
        &[SECRET_USER_KEY, SECRET_PASSWORD_KEY]
    }

    fn resources(&self, ctx: &Context) -> Result<Vec<Resource>> {
        Ok(vec![
            Resource::Secret(build_secret(ctx)?),
            Resource::PersistentVolumeClaim(build_pvc()),
            Resource::Service(build_service()),
            Resource::Deployment(build_deployment()),
        ])
    }

    fn owned(&self) -> Vec<(ResourceKind, String)> {
        vec![
            (ResourceKind::Secret, SECRET_NAME.to_string()),
            (ResourceKind::PersistentVolumeClaim, PVC_NAME.to_string()),
            (ResourceKind::Service, SERVICE_NAME.to_string()),
            (ResourceKind::Deployment, DEPLOYMENT_NAME.to_string()),
        ]
    }
}

#[async_trait]
impl Backupable for Postgres {
    async fn backup(&self, ctx: &Context, dest: Option<PathBuf>) -> Result<BackupManifest> {
        let user = admin_user(ctx)?;
        backup::run(ctx, &backup_policy(&user), dest).await
    }

    fn backups(&self, ctx: &Context) -> Result<Vec<(String, PathBuf)>> {
        restore::list_backups(&ctx.config.paths.backup_root, NAME)
    }
}

#[async_trait]
impl Restorable for Postgres {
    async fn restore(&self, ctx: &Context, target: &str) -> Result<()> {
        let user = admin_user(ctx)?;
        restore::run(ctx, &restore_policy(&user), target).await
    }
}

#[async_trait]
impl AdminCapable for Postgres {
    async fn add_db(&self, ctx: &Context, name: &str, user: &str, password: &str) -> Result<()> {
        let conn = AdminConn {
            selector: selector(),
            admin_user: admin_user(ctx)?,
        };
        admin::add_db(ctx, &conn, name, user, password).await
    }

    async fn remove_db(&self, ctx: &Context, name: &str, user: &str) -> Result<()> {
        let conn = AdminConn {
            selector: selector(),
            admin_user: admin_user(ctx)?,
        };
        admin::remove_db(ctx, &conn, name, user).await
    }
}

#[async_trait]
impl Rollable for Postgres {
    async fn rollout(&self, ctx: &Context, op: RolloutOp) -> Result<Option<String>> {
        let client = ctx.client().await?;
        rollout::run(&client, DEPLOYMENT_NAME, op).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    fn ctx_with_secrets() -> Context {
        let mut config = AppConfig::default();
        config
            .secrets
            .insert(SECRET_USER_KEY.to_string(), "postgres".to_string());
        config
            .secrets
            .insert(SECRET_PASSWORD_KEY.to_string(), "hunter2".to_string());
        Context::new(config)
    }

    #[test]
    fn test_resources_in_dependency_order() {
        let ctx = ctx_with_secrets();
        let resources = Postgres.resources(&ctx).unwrap();

        let kinds: Vec<_> = resources.iter().map(|r| r.kind()).collect();
        assert_eq!(
            kinds,
            vec![
                ResourceKind::Secret,
                ResourceKind::PersistentVolumeClaim,
                ResourceKind::Service,
                ResourceKind::Deployment,
            ]
        );
    }

    #[test]
    fn test_secret_carries_admin_credentials() {
        let ctx = ctx_with_secrets();
        let resources = Postgres.resources(&ctx).unwrap();
        let Resource::Secret(secret) = &resources[0] else {
            panic!("expected the secret first");
        };

        let data = secret.string_data.as_ref().unwrap();
        assert_eq!(data.get("POSTGRES_USER").unwrap(), "postgres");
        assert_eq!(data.get("POSTGRES_PASSWORD").unwrap(), "hunter2");
    }

    #[test]
    fn test_resources_fail_without_secrets() {
        let ctx = Context::new(AppConfig::default());
        assert!(Postgres.resources(&ctx).is_err());
    }

    #[test]
    fn test_backup_policy_commands() {
        let policy = backup_policy("postgres");
        assert_eq!(policy.pipeline, "pg_dumpall -U 'postgres' | gzip -c");
        assert_eq!(policy.archive, ArchiveKind::SqlGz);
        let trigger = policy.consistency.unwrap();
        assert_eq!(trigger[0], "psql");
        assert!(trigger.contains(&"CHECKPOINT;".to_string()));
    }

    #[test]
    fn test_restore_policy_reads_stdin() {
        let policy = restore_policy("postgres");
        assert_eq!(policy.inject, "gunzip -c | psql -U 'postgres' -d postgres");
        assert!(policy.prepare.is_none());
        assert!(matches!(policy.follow_up, FollowUp::None));
    }

    #[test]
    fn test_selector_targets_module_pods() {
        assert_eq!(selector(), "app.kubernetes.io/name=postgres");
    }

    #[test]
    fn test_admin_user_must_be_valid_identifier() {
        let mut config = AppConfig::default();
        config
            .secrets
            .insert(SECRET_USER_KEY.to_string(), "bad user".to_string());
        let ctx = Context::new(config);
        assert!(admin_user(&ctx).is_err());
    }
}
