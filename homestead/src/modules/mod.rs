//! Module lifecycle contract and shared orchestration
//!
//! Every infrastructure component Homestead manages is a module exposing
//! the same base operations: generate, apply, clean, and status. Stateful
//! variants additionally opt into backup, restore, database
//! administration, and rollout control through separate capability traits,
//! so stateless modules never carry no-op stubs.
//!
//! Apply existence checks and creation are not atomic. Homestead assumes a
//! single operator per namespace; a lost race still fails loudly because
//! the create call surfaces the API conflict.

pub mod pgadmin;
pub mod postgres;
pub mod redis;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Secret, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use tracing::{info, warn};

use homestead_common::{BackupManifest, Error, Result};

use crate::config::AppConfig;
use crate::kubernetes::{gateway, K8sClient};
use crate::rollout::RolloutOp;

/// All module names, in registry order
pub const MODULE_NAMES: &[&str] = &[postgres::NAME, redis::NAME, pgadmin::NAME];

/// Shared state handed to every module operation
pub struct Context {
    pub config: AppConfig,
}

impl Context {
    pub fn new(config: AppConfig) -> Self {
        Self { config }
    }

    /// Connect to the cluster with the configured settings
    pub async fn client(&self) -> Result<K8sClient> {
        K8sClient::connect(&self.config.cluster).await
    }
}

/// Resource kinds a module may own
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Secret,
    PersistentVolumeClaim,
    Service,
    Deployment,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Secret => "Secret",
            Self::PersistentVolumeClaim => "PersistentVolumeClaim",
            Self::Service => "Service",
            Self::Deployment => "Deployment",
        }
    }
}

/// A typed resource owned by a module
pub enum Resource {
    Secret(Secret),
    PersistentVolumeClaim(PersistentVolumeClaim),
    Service(Service),
    Deployment(Deployment),
}

impl Resource {
    pub fn kind(&self) -> ResourceKind {
        match self {
            Self::Secret(_) => ResourceKind::Secret,
            Self::PersistentVolumeClaim(_) => ResourceKind::PersistentVolumeClaim,
            Self::Service(_) => ResourceKind::Service,
            Self::Deployment(_) => ResourceKind::Deployment,
        }
    }

    pub fn name(&self) -> String {
        let meta = match self {
            Self::Secret(r) => &r.metadata,
            Self::PersistentVolumeClaim(r) => &r.metadata,
            Self::Service(r) => &r.metadata,
            Self::Deployment(r) => &r.metadata,
        };
        meta.name.clone().unwrap_or_default()
    }

    fn to_yaml(&self) -> Result<String> {
        let rendered = match self {
            Self::Secret(r) => serde_yaml::to_string(r),
            Self::PersistentVolumeClaim(r) => serde_yaml::to_string(r),
            Self::Service(r) => serde_yaml::to_string(r),
            Self::Deployment(r) => serde_yaml::to_string(r),
        };
        rendered.map_err(|e| Error::serialization(e.to_string()))
    }
}

/// Base lifecycle contract implemented by every module
#[async_trait]
pub trait Module: Send + Sync + std::fmt::Debug {
    /// Fixed module identifier, independent of configuration content
    fn name(&self) -> &'static str;

    /// Secret keys that must be present before generate or apply run
    fn required_secrets(&self) -> &'static [&'static str] {
        &[]
    }

    /// The module's resources in declared dependency order
    fn resources(&self, ctx: &Context) -> Result<Vec<Resource>>;

    /// Kind/name pairs of the owned resources, used by clean and status
    fn owned(&self) -> Vec<(ResourceKind, String)>;

    /// Fail with a configuration error when a required secret is missing
    fn ensure_secrets(&self, ctx: &Context) -> Result<()> {
        for key in self.required_secrets() {
            if ctx.config.secret(key).is_none() {
                return Err(Error::config(format!(
                    "module {} requires secret '{}'",
                    self.name(),
                    key
                )));
            }
        }
        Ok(())
    }

    /// Render manifests locally. Performs no cluster calls.
    async fn generate(&self, ctx: &Context) -> Result<()> {
        self.ensure_secrets(ctx)?;
        let resources = self.resources(ctx)?;
        generate_manifests(self.name(), &ctx.config.paths.configs_root, &resources)
    }

    /// Create the module's resources on the cluster, in declared order,
    /// aborting if any of them already exists.
    async fn apply(&self, ctx: &Context) -> Result<()> {
        self.ensure_secrets(ctx)?;
        let resources = self.resources(ctx)?;
        let client = ctx.client().await?;
        apply_resources(&client, &resources).await
    }

    /// Delete the module's resources, skipping any that are already gone.
    async fn clean(&self, ctx: &Context) -> Result<()> {
        let client = ctx.client().await?;
        clean_resources(&client, &self.owned()).await
    }

    /// Report the state of the module's resources. Read-only.
    async fn status(&self, ctx: &Context) -> Result<Vec<String>> {
        let client = ctx.client().await?;
        status_resources(&client, &self.owned()).await
    }
}

/// Data backup capability for stateful modules
#[async_trait]
pub trait Backupable: Module {
    /// Back up the module's data, returning the written manifest
    async fn backup(&self, ctx: &Context, dest: Option<PathBuf>) -> Result<BackupManifest>;

    /// All recorded backups for this module, newest first
    fn backups(&self, ctx: &Context) -> Result<Vec<(String, PathBuf)>>;
}

/// Data restore capability for stateful modules
#[async_trait]
pub trait Restorable: Module {
    /// Restore from a backup timestamp or the `latest` sentinel
    async fn restore(&self, ctx: &Context, target: &str) -> Result<()>;
}

/// Administrative database operations
#[async_trait]
pub trait AdminCapable: Module {
    async fn add_db(&self, ctx: &Context, name: &str, user: &str, password: &str) -> Result<()>;
    async fn remove_db(&self, ctx: &Context, name: &str, user: &str) -> Result<()>;
}

/// Deployment rollout control
#[async_trait]
pub trait Rollable: Module {
    /// Run a rollout operation; `status` and `history` return report text
    async fn rollout(&self, ctx: &Context, op: RolloutOp) -> Result<Option<String>>;
}

fn unknown_module(name: &str) -> Error {
    Error::config(format!(
        "unknown module '{}' (expected one of: {})",
        name,
        MODULE_NAMES.join(", ")
    ))
}

fn unsupported(name: &str, capability: &str) -> Error {
    Error::config(format!("module '{name}' does not support {capability}"))
}

/// Look up a module by name
pub fn base(name: &str) -> Result<Box<dyn Module>> {
    match name {
        postgres::NAME => Ok(Box::new(postgres::Postgres)),
        redis::NAME => Ok(Box::new(redis::Redis)),
        pgadmin::NAME => Ok(Box::new(pgadmin::PgAdmin)),
        _ => Err(unknown_module(name)),
    }
}

/// Look up a module that supports backup
pub fn backupable(name: &str) -> Result<Box<dyn Backupable>> {
    match name {
        postgres::NAME => Ok(Box::new(postgres::Postgres)),
        redis::NAME => Ok(Box::new(redis::Redis)),
        pgadmin::NAME => Err(unsupported(name, "backup")),
        _ => Err(unknown_module(name)),
    }
}

/// Look up a module that supports restore
pub fn restorable(name: &str) -> Result<Box<dyn Restorable>> {
    match name {
        postgres::NAME => Ok(Box::new(postgres::Postgres)),
        redis::NAME => Ok(Box::new(redis::Redis)),
        pgadmin::NAME => Err(unsupported(name, "restore")),
        _ => Err(unknown_module(name)),
    }
}

/// Look up a module that supports administrative database operations
pub fn admin_capable(name: &str) -> Result<Box<dyn AdminCapable>> {
    match name {
        postgres::NAME => Ok(Box::new(postgres::Postgres)),
        redis::NAME | pgadmin::NAME => Err(unsupported(name, "database administration")),
        _ => Err(unknown_module(name)),
    }
}

/// Look up a module that supports rollout operations
pub fn rollable(name: &str) -> Result<Box<dyn Rollable>> {
    match name {
        postgres::NAME => Ok(Box::new(postgres::Postgres)),
        redis::NAME => Ok(Box::new(redis::Redis)),
        pgadmin::NAME => Err(unsupported(name, "rollout operations")),
        _ => Err(unknown_module(name)),
    }
}

// ============================================================================
// Shared orchestration
// ============================================================================

pub(crate) fn manifest_filename(index: usize, resource: &Resource) -> String {
    format!(
        "{:02}-{}-{}.yaml",
        index + 1,
        resource.kind().as_str().to_lowercase(),
        resource.name()
    )
}

/// Render every resource to a YAML manifest under the module's config dir.
fn generate_manifests(module: &str, root: &Path, resources: &[Resource]) -> Result<()> {
    let dir = root.join(module);
    std::fs::create_dir_all(&dir)?;

    for (index, resource) in resources.iter().enumerate() {
        let path = dir.join(manifest_filename(index, resource));
        std::fs::write(&path, resource.to_yaml()?)?;
        info!(path = %path.display(), "wrote manifest");
    }

    Ok(())
}

/// Apply resources in declared order. Each resource is existence-checked
/// immediately before creation; a pre-existing resource aborts the run,
/// and resources created earlier in the same run are left in place.
pub async fn apply_resources(client: &K8sClient, resources: &[Resource]) -> Result<()> {
    for resource in resources {
        let name = resource.name();
        if resource_exists(client, resource).await? {
            return Err(Error::already_exists(
                resource.kind().as_str(),
                &name,
                client.namespace(),
            ));
        }
        create_resource(client, resource).await?;
        info!(kind = resource.kind().as_str(), name = %name, "created");
    }
    Ok(())
}

async fn resource_exists(client: &K8sClient, resource: &Resource) -> Result<bool> {
    let name = resource.name();
    let found = match resource {
        Resource::Secret(_) => gateway::get_opt::<Secret>(client, &name).await?.is_some(),
        Resource::PersistentVolumeClaim(_) => gateway::get_opt::<PersistentVolumeClaim>(client, &name)
            .await?
            .is_some(),
        Resource::Service(_) => gateway::get_opt::<Service>(client, &name).await?.is_some(),
        Resource::Deployment(_) => gateway::get_opt::<Deployment>(client, &name).await?.is_some(),
    };
    Ok(found)
}

async fn create_resource(client: &K8sClient, resource: &Resource) -> Result<()> {
    match resource {
        Resource::Secret(r) => gateway::create(client, r).await,
        Resource::PersistentVolumeClaim(r) => gateway::create(client, r).await,
        Resource::Service(r) => gateway::create(client, r).await,
        Resource::Deployment(r) => gateway::create(client, r).await,
    }
}

/// Delete owned resources independently. An absent resource is a warning;
/// only transport failures abort.
pub async fn clean_resources(client: &K8sClient, owned: &[(ResourceKind, String)]) -> Result<()> {
    for (kind, name) in owned {
        let deleted = match kind {
            ResourceKind::Secret => gateway::delete_opt::<Secret>(client, name).await?,
            ResourceKind::PersistentVolumeClaim => {
                gateway::delete_opt::<PersistentVolumeClaim>(client, name).await?
            }
            ResourceKind::Service => gateway::delete_opt::<Service>(client, name).await?,
            ResourceKind::Deployment => gateway::delete_opt::<Deployment>(client, name).await?,
        };

        if deleted {
            info!(kind = kind.as_str(), name = %name, "deleted");
        } else {
            warn!(kind = kind.as_str(), name = %name, "not found, skipping");
        }
    }
    Ok(())
}

/// Read-only status report. Missing resources render as absent.
pub async fn status_resources(
    client: &K8sClient,
    owned: &[(ResourceKind, String)],
) -> Result<Vec<String>> {
    let mut lines = Vec::with_capacity(owned.len());

    for (kind, name) in owned {
        let line = match kind {
            ResourceKind::Secret => gateway::get_opt::<Secret>(client, name)
                .await?
                .map(|r| render_secret(&r))
                .unwrap_or_else(|| absent(*kind, name)),
            ResourceKind::PersistentVolumeClaim => {
                gateway::get_opt::<PersistentVolumeClaim>(client, name)
                    .await?
                    .map(|r| render_pvc(&r))
                    .unwrap_or_else(|| absent(*kind, name))
            }
            ResourceKind::Service => gateway::get_opt::<Service>(client, name)
                .await?
                .map(|r| render_service(&r))
                .unwrap_or_else(|| absent(*kind, name)),
            ResourceKind::Deployment => gateway::get_opt::<Deployment>(client, name)
                .await?
                .map(|r| render_deployment(&r))
                .unwrap_or_else(|| absent(*kind, name)),
        };
        lines.push(line);
    }

    Ok(lines)
}

fn absent(kind: ResourceKind, name: &str) -> String {
    format!("{}/{}: absent", kind.as_str(), name)
}

fn render_age(meta: &ObjectMeta) -> String {
    match &meta.creation_timestamp {
        Some(created) => {
            let elapsed = chrono::Utc::now().signed_duration_since(created.0);
            let days = elapsed.num_days();
            let hours = elapsed.num_hours();
            if days > 0 {
                format!("{}d{}h", days, hours % 24)
            } else if hours > 0 {
                format!("{}h{}m", hours, elapsed.num_minutes() % 60)
            } else {
                format!("{}m", elapsed.num_minutes().max(0))
            }
        }
        None => "unknown".to_string(),
    }
}

fn render_secret(secret: &Secret) -> String {
    let name = secret.metadata.name.as_deref().unwrap_or("<unnamed>");
    let keys = secret.data.as_ref().map(|d| d.len()).unwrap_or(0);
    format!(
        "Secret/{}: present, {} keys, age {}",
        name,
        keys,
        render_age(&secret.metadata)
    )
}

fn render_pvc(pvc: &PersistentVolumeClaim) -> String {
    let name = pvc.metadata.name.as_deref().unwrap_or("<unnamed>");
    let status = pvc.status.as_ref();
    let phase = status
        .and_then(|s| s.phase.as_deref())
        .unwrap_or("Unknown");
    let capacity = status
        .and_then(|s| s.capacity.as_ref())
        .and_then(|c| c.get("storage"))
        .map(|q| q.0.clone())
        .unwrap_or_else(|| "unknown".to_string());
    format!(
        "PersistentVolumeClaim/{}: {}, capacity {}, age {}",
        name,
        phase,
        capacity,
        render_age(&pvc.metadata)
    )
}

fn render_service(service: &Service) -> String {
    let name = service.metadata.name.as_deref().unwrap_or("<unnamed>");
    let spec = service.spec.as_ref();
    let cluster_ip = spec
        .and_then(|s| s.cluster_ip.as_deref())
        .unwrap_or("none");
    let ports = spec
        .and_then(|s| s.ports.as_ref())
        .map(|ports| {
            ports
                .iter()
                .map(|p| p.port.to_string())
                .collect::<Vec<_>>()
                .join(",")
        })
        .unwrap_or_else(|| "none".to_string());
    format!(
        "Service/{}: cluster IP {}, ports {}, age {}",
        name,
        cluster_ip,
        ports,
        render_age(&service.metadata)
    )
}

fn render_deployment(deployment: &Deployment) -> String {
    let name = deployment.metadata.name.as_deref().unwrap_or("<unnamed>");
    let desired = deployment
        .spec
        .as_ref()
        .and_then(|s| s.replicas)
        .unwrap_or(0);
    let ready = deployment
        .status
        .as_ref()
        .and_then(|s| s.ready_replicas)
        .unwrap_or(0);
    format!(
        "Deployment/{}: {}/{} ready, age {}",
        name,
        ready,
        desired,
        render_age(&deployment.metadata)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::apps::v1::DeploymentStatus;

    #[test]
    fn test_module_names_are_fixed_and_non_empty() {
        for name in MODULE_NAMES {
            let module = base(name).unwrap();
            assert_eq!(module.name(), *name);
            assert!(!module.name().is_empty());
        }
    }

    #[test]
    fn test_unknown_module_rejected() {
        let err = base("mariadb").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().contains("mariadb"));
    }

    #[test]
    fn test_stateless_module_has_no_extended_capabilities() {
        assert!(backupable("pgadmin").is_err());
        assert!(restorable("pgadmin").is_err());
        assert!(admin_capable("pgadmin").is_err());
        assert!(rollable("pgadmin").is_err());
    }

    #[test]
    fn test_capability_registry_for_stateful_modules() {
        assert!(backupable("postgres").is_ok());
        assert!(restorable("redis").is_ok());
        assert!(admin_capable("postgres").is_ok());
        assert!(admin_capable("redis").is_err());
        assert!(rollable("redis").is_ok());
    }

    #[tokio::test]
    async fn test_apply_without_required_secret_is_config_error() {
        // No secrets configured: apply must fail before any cluster call.
        let ctx = Context::new(AppConfig::default());
        let err = postgres::Postgres.apply(&ctx).await.unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().contains("admin_postgres_user"));
    }

    #[tokio::test]
    async fn test_generate_without_required_secret_is_config_error() {
        let ctx = Context::new(AppConfig::default());
        let err = postgres::Postgres.generate(&ctx).await.unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_manifest_filename_is_ordered_and_descriptive() {
        let resource = Resource::Service(Service {
            metadata: ObjectMeta {
                name: Some("postgres".to_string()),
                ..Default::default()
            },
            ..Default::default()
        });
        assert_eq!(manifest_filename(2, &resource), "03-service-postgres.yaml");
    }

    #[test]
    fn test_render_deployment_readiness() {
        let deployment = Deployment {
            metadata: ObjectMeta {
                name: Some("postgres".to_string()),
                ..Default::default()
            },
            spec: Some(k8s_openapi::api::apps::v1::DeploymentSpec {
                replicas: Some(1),
                ..Default::default()
            }),
            status: Some(DeploymentStatus {
                ready_replicas: Some(1),
                ..Default::default()
            }),
        };
        let line = render_deployment(&deployment);
        assert!(line.contains("Deployment/postgres"));
        assert!(line.contains("1/1 ready"));
    }

    #[test]
    fn test_absent_resource_renders_as_absent() {
        assert_eq!(
            absent(ResourceKind::Secret, "postgres-secrets"),
            "Secret/postgres-secrets: absent"
        );
    }
}
