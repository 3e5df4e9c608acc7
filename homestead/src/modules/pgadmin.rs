//! pgAdmin module
//!
//! Stateless admin tool. Carries only the base lifecycle contract; there
//! is no data to back up and nothing to administer.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, EnvVarSource, PodSpec, PodTemplateSpec, Secret,
    SecretKeySelector, Service, ServicePort, ServiceSpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use homestead_common::{Error, Result};

use super::{Context, Module, Resource, ResourceKind};

pub const NAME: &str = "pgadmin";

const SECRET_NAME: &str = "pgadmin-secrets";
const SERVICE_NAME: &str = "pgadmin";
const DEPLOYMENT_NAME: &str = "pgadmin";

const IMAGE: &str = "dpage/pgadmin4:8";
const PORT: i32 = 80;

/// Secret key holding the initial login email
pub const SECRET_EMAIL_KEY: &str = "pgadmin_email";
/// Secret key holding the initial login password
pub const SECRET_PASSWORD_KEY: &str = "pgadmin_password";

#[derive(Debug)]
pub struct PgAdmin;

fn labels() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("app.kubernetes.io/name".to_string(), NAME.to_string()),
        (
            "app.kubernetes.io/managed-by".to_string(),
            "homestead".to_string(),
        ),
    ])
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
    let email = ctx
        .config
        .secret(SECRET_EMAIL_KEY)
        .ok_or_else(|| Error::config(format!("module {NAME} requires secret '{SECRET_EMAIL_KEY}'")))?;
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
            ("PGADMIN_DEFAULT_EMAIL".to_string(), email.to_string()),
            ("PGADMIN_DEFAULT_PASSWORD".to_string(), password.to_string()),
        ])),
        ..Default::default()
    })
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
                name: Some("http".to_string()),
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
            name: Some("http".to_string()),
            container_port: PORT,
            ..Default::default()
        }]),
        env: Some(vec![
            secret_env("PGADMIN_DEFAULT_EMAIL", "PGADMIN_DEFAULT_EMAIL"),
            secret_env("PGADMIN_DEFAULT_PASSWORD", "PGADMIN_DEFAULT_PASSWORD"),
        ]),
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
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels()),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![container],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[async_trait]
impl Module for PgAdmin {
    fn name(&self) -> &'static str {
        NAME
    }

    fn required_secrets(&self) -> &'static [&'static str] {
        &[SECRET_EMAIL_KEY, SECRET_PASSWORD_KEY]
    }

    fn resources(&self, ctx: &Context) -> Result<Vec<Resource>> {
        Ok(vec![
            Resource::Secret(build_secret(ctx)?),
            Resource::Service(build_service()),
            Resource::Deployment(build_deployment()),
        ])
    }

    fn owned(&self) -> Vec<(ResourceKind, String)> {
        vec![
            (ResourceKind::Secret, SECRET_NAME.to_string()),
            (ResourceKind::Service, SERVICE_NAME.to_string()),
            (ResourceKind::Deployment, DEPLOYMENT_NAME.to_string()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    #[test]
    fn test_resources_require_login_secrets() {
        let ctx = Context::new(AppConfig::default());
        assert!(PgAdmin.resources(&ctx).is_err());

        let mut config = AppConfig::default();
        config
            .secrets
            .insert(SECRET_EMAIL_KEY.to_string(), "admin@example.com".to_string());
        config
            .secrets
            .insert(SECRET_PASSWORD_KEY.to_string(), "hunter2".to_string());
        let ctx = Context::new(config);

        let resources = PgAdmin.resources(&ctx).unwrap();
        assert_eq!(resources.len(), 3);
        assert_eq!(resources[0].name(), "pgadmin-secrets");
    }

    #[test]
    fn test_no_persistent_volume() {
        assert!(!PgAdmin
            .owned()
            .iter()
            .any(|(kind, _)| *kind == ResourceKind::PersistentVolumeClaim));
    }
}
