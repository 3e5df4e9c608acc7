//! Kubernetes client wrapper
//!
//! Wraps the kube-rs Client with the cluster settings from the application
//! configuration.

use k8s_openapi::NamespaceResourceScope;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Api, Client, Config, Resource};

use homestead_common::{Error, Result};

use crate::config::ClusterConfig;

/// Wrapper around kube-rs Client bound to the managed namespace
#[derive(Clone)]
pub struct K8sClient {
    inner: Client,
    namespace: String,
}

impl K8sClient {
    /// Connect using the configured kubeconfig, or fall back to the
    /// environment (KUBECONFIG or in-cluster service account).
    pub async fn connect(cluster: &ClusterConfig) -> Result<Self> {
        let config = match &cluster.kubeconfig {
            Some(path) => {
                let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                    Error::config(format!(
                        "failed to read kubeconfig {}: {}",
                        path.display(),
                        e
                    ))
                })?;

                Config::from_custom_kubeconfig(
                    kubeconfig,
                    &KubeConfigOptions {
                        context: cluster.context.clone(),
                        ..Default::default()
                    },
                )
                .await
                .map_err(|e| {
                    Error::config(format!("invalid kubeconfig {}: {}", path.display(), e))
                })?
            }
            None => Config::infer()
                .await
                .map_err(|e| Error::transport(format!("failed to infer cluster config: {e}")))?,
        };

        let inner = Client::try_from(config)
            .map_err(|e| Error::transport(format!("failed to construct client: {e}")))?;

        Ok(Self {
            inner,
            namespace: cluster.namespace.clone(),
        })
    }

    /// Access the underlying kube client
    pub fn inner(&self) -> &Client {
        &self.inner
    }

    /// Namespace all operations are scoped to
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Namespace-scoped API handle for a resource kind
    pub fn api<K>(&self) -> Api<K>
    where
        K: Resource<Scope = NamespaceResourceScope>,
        K::DynamicType: Default,
    {
        Api::namespaced(self.inner.clone(), &self.namespace)
    }
}
