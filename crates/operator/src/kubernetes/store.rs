use async_trait::async_trait;
use kube::{
    api::{Api, Patch, PatchParams, ResourceExt},
    runtime::events::{Event, EventType, Recorder, Reporter},
    Client, Resource,
};
use serde_json::json;
use tracing::{debug, warn};

use super::{is_conflict, is_not_found};
use crate::crd::{CronHpa, CronHpaStatus, OwnerKey};
use crate::store::{CronHpaStore, EventKind, JobEvent};
use crate::{Error, Result};

/// CronHPA resources as stored in the Kubernetes API.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
    reporter: Reporter,
}

impl KubeStore {
    pub fn new(client: Client, reporter: impl Into<String>) -> Self {
        Self {
            client,
            reporter: Reporter {
                controller: reporter.into(),
                instance: std::env::var("POD_NAME").ok(),
            },
        }
    }

    fn api(&self, namespace: &str) -> Api<CronHpa> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl CronHpaStore for KubeStore {
    async fn get(&self, key: &OwnerKey) -> Result<Option<CronHpa>> {
        Ok(self.api(&key.namespace).get_opt(&key.name).await?)
    }

    async fn patch_status(
        &self,
        key: &OwnerKey,
        status: &CronHpaStatus,
        resource_version: Option<&str>,
    ) -> Result<()> {
        let mut patch = json!({ "status": status });
        if let Some(version) = resource_version {
            patch["metadata"] = json!({ "resourceVersion": version });
        }
        match self
            .api(&key.namespace)
            .patch_status(&key.name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
        {
            Ok(_) => {
                debug!("Patched status of {}", key);
                Ok(())
            }
            Err(e) if is_not_found(&e) => Err(Error::NotFound(key.to_string())),
            Err(e) if is_conflict(&e) => Err(Error::Conflict(key.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    async fn publish_event(&self, resource: &CronHpa, event: JobEvent) {
        let recorder = Recorder::new(
            self.client.clone(),
            self.reporter.clone(),
            resource.object_ref(&()),
        );
        let type_ = match event.kind {
            EventKind::Normal => EventType::Normal,
            EventKind::Warning => EventType::Warning,
        };

        let published = recorder
            .publish(Event {
                type_,
                reason: event.reason.clone(),
                note: Some(event.message),
                action: "Scale".to_string(),
                secondary: None,
            })
            .await;
        if let Err(e) = published {
            warn!(
                "Failed to publish {} event for {}/{}: {}",
                event.reason,
                resource.namespace().unwrap_or_default(),
                resource.name_any(),
                e
            );
        }
    }
}
