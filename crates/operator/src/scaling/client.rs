use async_trait::async_trait;
use k8s_openapi::api::autoscaling::v2::HorizontalPodAutoscaler;

use super::TargetRef;
use crate::Result;

/// Access to the scale subresource of workloads and to autoscaler objects.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ScaleClient: Send + Sync {
    /// Current `spec.replicas` of the target's scale subresource.
    async fn get_scale(&self, target: &TargetRef) -> Result<i32>;

    async fn update_scale(&self, target: &TargetRef, replicas: i32) -> Result<()>;

    async fn get_autoscaler(&self, namespace: &str, name: &str)
        -> Result<HorizontalPodAutoscaler>;

    async fn update_autoscaler(&self, hpa: &HorizontalPodAutoscaler) -> Result<()>;
}
