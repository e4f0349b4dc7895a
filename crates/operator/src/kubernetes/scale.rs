use std::collections::HashMap;

use async_trait::async_trait;
use k8s_openapi::api::autoscaling::v2::HorizontalPodAutoscaler;
use kube::{
    api::{Api, ApiResource, DynamicObject, Patch, PatchParams, PostParams},
    core::GroupVersionKind,
    discovery, Client,
};
use serde_json::json;
use tokio::sync::RwLock;
use tracing::debug;

use crate::scaling::{ScaleClient, TargetRef};
use crate::{Error, Result};

/// Scale subresource access through API discovery.
pub struct KubeScaleClient {
    client: Client,
    mappings: RwLock<HashMap<String, ApiResource>>,
}

impl KubeScaleClient {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            mappings: RwLock::new(HashMap::new()),
        }
    }

    fn mapping_key(target: &TargetRef) -> String {
        format!("{}/{}/{}", target.group, target.version, target.kind)
    }

    async fn resource_for(&self, target: &TargetRef) -> Result<ApiResource> {
        let key = Self::mapping_key(target);
        if let Some(resource) = self.mappings.read().await.get(&key) {
            return Ok(resource.clone());
        }

        let gvk = GroupVersionKind::gvk(&target.group, &target.version, &target.kind);
        let (resource, _capabilities) = discovery::pinned_kind(&self.client, &gvk).await?;
        debug!("Resolved {} to resource {}", key, resource.plural);

        self.mappings.write().await.insert(key, resource.clone());
        Ok(resource)
    }

    /// Drops a cached mapping so the next call rediscovers it.
    async fn forget(&self, target: &TargetRef) {
        self.mappings.write().await.remove(&Self::mapping_key(target));
    }

    async fn scale_api(&self, target: &TargetRef) -> Result<Api<DynamicObject>> {
        let resource = self.resource_for(target).await?;
        Ok(Api::namespaced_with(
            self.client.clone(),
            &target.namespace,
            &resource,
        ))
    }
}

#[async_trait]
impl ScaleClient for KubeScaleClient {
    async fn get_scale(&self, target: &TargetRef) -> Result<i32> {
        let api = self.scale_api(target).await?;
        match api.get_scale(&target.name).await {
            Ok(scale) => Ok(scale.spec.and_then(|spec| spec.replicas).unwrap_or(0)),
            Err(e) => {
                self.forget(target).await;
                Err(e.into())
            }
        }
    }

    async fn update_scale(&self, target: &TargetRef, replicas: i32) -> Result<()> {
        let api = self.scale_api(target).await?;
        let patch = json!({ "spec": { "replicas": replicas } });
        match api
            .patch_scale(&target.name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
        {
            Ok(_) => Ok(()),
            Err(e) => {
                self.forget(target).await;
                Err(e.into())
            }
        }
    }

    async fn get_autoscaler(&self, namespace: &str, name: &str) -> Result<HorizontalPodAutoscaler> {
        let api: Api<HorizontalPodAutoscaler> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get(name).await?)
    }

    async fn update_autoscaler(&self, hpa: &HorizontalPodAutoscaler) -> Result<()> {
        let name = hpa.metadata.name.as_deref().ok_or_else(|| {
            Error::Validation("HorizontalPodAutoscaler without a name".to_string())
        })?;
        let namespace = hpa.metadata.namespace.as_deref().unwrap_or("default");
        let api: Api<HorizontalPodAutoscaler> = Api::namespaced(self.client.clone(), namespace);
        api.replace(name, &PostParams::default(), hpa).await?;
        Ok(())
    }
}
