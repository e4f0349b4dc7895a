use async_trait::async_trait;

use crate::crd::{CronHpa, CronHpaStatus, OwnerKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Normal,
    Warning,
}

/// Notification attached to a CronHPA resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobEvent {
    pub kind: EventKind,
    pub reason: String,
    pub message: String,
}

impl JobEvent {
    pub fn warning(reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Warning,
            reason: reason.into(),
            message: message.into(),
        }
    }
}

/// Durable home of CronHPA resources.
#[async_trait]
pub trait CronHpaStore: Send + Sync {
    /// Fresh copy of the resource, `None` once it is deleted.
    async fn get(&self, key: &OwnerKey) -> crate::Result<Option<CronHpa>>;

    /// Merge-patches the status subresource. A deleted resource yields
    /// `Error::NotFound`. With `resource_version` set, a resource written
    /// since that version yields `Error::Conflict` and nothing is changed.
    async fn patch_status(
        &self,
        key: &OwnerKey,
        status: &CronHpaStatus,
        resource_version: Option<&str>,
    ) -> crate::Result<()>;

    /// Best effort; failures are logged by the implementation.
    async fn publish_event(&self, resource: &CronHpa, event: JobEvent);
}
