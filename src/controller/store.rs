//! Cluster object store
//!
//! Every Kubernetes read and write the reconciler performs goes through
//! [`ClusterStore`], so the reconcile loop can be driven by mocks in tests.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, Pod, Service};
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::{Client, ResourceExt};
use tracing::{debug, info};

#[cfg(test)]
use mockall::automock;

use crate::config::FIELD_MANAGER;
use crate::crd::{Spp, SppStatus};
use crate::Error;

/// Trait abstracting Kubernetes operations for Spp resources
///
/// Ensure calls are idempotent: an existing object is left as is and
/// "already exists" is not an error. Lookups map 404 to `None`.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterStore: Send + Sync {
    /// Create the pod unless one with the same name exists
    async fn ensure_pod(&self, pod: &Pod) -> Result<(), Error>;

    /// Create the service unless one with the same name exists
    async fn ensure_service(&self, service: &Service) -> Result<(), Error>;

    /// Get a pod by name
    async fn find_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>, Error>;

    /// Get a service by name
    async fn find_service(&self, namespace: &str, name: &str) -> Result<Option<Service>, Error>;

    /// Delete a pod; a missing pod is not an error
    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), Error>;

    /// All nodes of the cluster
    async fn list_nodes(&self) -> Result<Vec<Node>, Error>;

    /// All Spp resources in every namespace
    async fn list_spps(&self) -> Result<Vec<Spp>, Error>;

    /// Patch the status subresource of an Spp
    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        status: &SppStatus,
    ) -> Result<(), Error>;
}

/// Real store backed by the Kubernetes API
pub struct KubeClusterStore {
    client: Client,
}

impl KubeClusterStore {
    /// Create a new store wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

fn object_location<K: ResourceExt>(obj: &K) -> Result<(String, String), Error> {
    let name = obj
        .meta()
        .name
        .clone()
        .ok_or_else(|| Error::validation("object has no name"))?;
    let namespace = obj
        .namespace()
        .ok_or_else(|| Error::validation(format!("object {name} has no namespace")))?;
    Ok((namespace, name))
}

async fn create_if_absent<K>(api: &Api<K>, name: &str, obj: &K) -> Result<(), Error>
where
    K: kube::Resource + Clone + serde::de::DeserializeOwned + serde::Serialize + std::fmt::Debug,
{
    if api.get_opt(name).await?.is_some() {
        debug!(name, "object already exists");
        return Ok(());
    }
    match api.create(&PostParams::default(), obj).await {
        Ok(_) => {
            info!(name, "object created");
            Ok(())
        }
        Err(kube::Error::Api(ae)) if ae.code == 409 => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl ClusterStore for KubeClusterStore {
    async fn ensure_pod(&self, pod: &Pod) -> Result<(), Error> {
        let (namespace, name) = object_location(pod)?;
        let api: Api<Pod> = Api::namespaced(self.client.clone(), &namespace);
        create_if_absent(&api, &name, pod).await
    }

    async fn ensure_service(&self, service: &Service) -> Result<(), Error> {
        let (namespace, name) = object_location(service)?;
        let api: Api<Service> = Api::namespaced(self.client.clone(), &namespace);
        create_if_absent(&api, &name, service).await
    }

    async fn find_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>, Error> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        match api.get(name).await {
            Ok(pod) => Ok(Some(pod)),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn find_service(&self, namespace: &str, name: &str) -> Result<Option<Service>, Error> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        match api.get(name).await {
            Ok(svc) => Ok(Some(svc)),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), Error> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => {
                info!(pod = %name, "pod deleted");
                Ok(())
            }
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_nodes(&self) -> Result<Vec<Node>, Error> {
        let api: Api<Node> = Api::all(self.client.clone());
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn list_spps(&self) -> Result<Vec<Spp>, Error> {
        let api: Api<Spp> = Api::all(self.client.clone());
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        status: &SppStatus,
    ) -> Result<(), Error> {
        let api: Api<Spp> = Api::namespaced(self.client.clone(), namespace);

        let status_patch = serde_json::json!({
            "status": status
        });

        api.patch_status(
            name,
            &PatchParams::apply(FIELD_MANAGER),
            &Patch::Merge(&status_patch),
        )
        .await?;

        Ok(())
    }
}
