//! Typed cluster gateway
//!
//! Get/Create/Delete for the namespaced resource kinds Homestead manages,
//! distinguishing "not found" from every other API failure. Existence is
//! always observed per call; nothing is cached.

use k8s_openapi::NamespaceResourceScope;
use kube::api::{DeleteParams, PostParams};
use kube::{Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;

use homestead_common::{Error, Result};

use super::client::K8sClient;

fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 404)
}

/// Get a resource, mapping a 404 to `None`.
pub async fn get_opt<K>(client: &K8sClient, name: &str) -> Result<Option<K>>
where
    K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + std::fmt::Debug,
    K::DynamicType: Default,
{
    match client.api::<K>().get(name).await {
        Ok(resource) => Ok(Some(resource)),
        Err(e) if is_not_found(&e) => Ok(None),
        Err(e) => Err(Error::transport(e.to_string())),
    }
}

/// Create a resource. A conflict surfaces as an already-exists error so a
/// lost check-then-create race still fails loudly.
pub async fn create<K>(client: &K8sClient, resource: &K) -> Result<()>
where
    K: Resource<Scope = NamespaceResourceScope>
        + Clone
        + DeserializeOwned
        + Serialize
        + std::fmt::Debug,
    K::DynamicType: Default,
{
    match client
        .api::<K>()
        .create(&PostParams::default(), resource)
        .await
    {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(ae)) if ae.code == 409 => Err(Error::already_exists(
            K::kind(&K::DynamicType::default()),
            resource.name_any(),
            client.namespace(),
        )),
        Err(e) => Err(Error::transport(e.to_string())),
    }
}

/// Delete a resource; returns false when it was already gone.
pub async fn delete_opt<K>(client: &K8sClient, name: &str) -> Result<bool>
where
    K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + std::fmt::Debug,
    K::DynamicType: Default,
{
    match client
        .api::<K>()
        .delete(name, &DeleteParams::default())
        .await
    {
        Ok(_) => Ok(true),
        Err(e) if is_not_found(&e) => Ok(false),
        Err(e) => Err(Error::transport(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ErrorResponse;

    fn api_error(code: u16) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: "test".to_string(),
            reason: "test".to_string(),
            code,
        })
    }

    #[test]
    fn test_404_is_not_found() {
        assert!(is_not_found(&api_error(404)));
    }

    #[test]
    fn test_other_codes_are_not_not_found() {
        assert!(!is_not_found(&api_error(403)));
        assert!(!is_not_found(&api_error(409)));
        assert!(!is_not_found(&api_error(500)));
    }
}
