//! Fixtures shared by the unit tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono_tz::Tz;
use k8s_openapi::api::autoscaling::v2::{
    CrossVersionObjectReference, HorizontalPodAutoscaler, HorizontalPodAutoscalerSpec,
    HorizontalPodAutoscalerStatus,
};
use kube::api::ObjectMeta;
use tokio::sync::mpsc;

use crate::cron::{CronEngine, JobResult};
use crate::crd::{
    Condition, CronHpa, CronHpaSpec, CronHpaStatus, JobSpec, JobState, OwnerKey, ScaleTargetRef,
};
use crate::manager::{CronManager, ManagerSettings};
use crate::metrics::Metrics;
use crate::scaling::{ExecutionSettings, MockScaleClient, ScalingJob};
use crate::store::{CronHpaStore, JobEvent};
use crate::{Error, Result};

#[derive(Default)]
struct State {
    resources: HashMap<OwnerKey, CronHpa>,
    events: Vec<JobEvent>,
    patches: usize,
    failing_patches: usize,
    version: u64,
    /// Status written by "someone else" right after the next `get`.
    racing_write: Option<CronHpaStatus>,
}

impl State {
    fn bump(&mut self, key: &OwnerKey) {
        self.version += 1;
        let version = self.version.to_string();
        if let Some(resource) = self.resources.get_mut(key) {
            resource.metadata.resource_version = Some(version);
        }
    }
}

/// In-memory `CronHpaStore` with status-subresource semantics: writing a
/// resource never touches its stored status. Every write bumps the
/// resource version.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn insert(&self, mut resource: CronHpa) -> CronHpa {
        let key = OwnerKey::of(&resource);
        let mut state = self.state.lock().unwrap();
        resource.status = state
            .resources
            .get(&key)
            .and_then(|existing| existing.status.clone());
        state.resources.insert(key.clone(), resource);
        state.bump(&key);
        state.resources[&key].clone()
    }

    pub fn status(&self, key: &OwnerKey) -> Option<CronHpaStatus> {
        let state = self.state.lock().unwrap();
        state.resources.get(key).and_then(|r| r.status.clone())
    }

    pub fn set_status(&self, key: &OwnerKey, status: CronHpaStatus) {
        let mut state = self.state.lock().unwrap();
        if let Some(resource) = state.resources.get_mut(key) {
            resource.status = Some(status);
            state.bump(key);
        }
    }

    pub fn remove(&self, key: &OwnerKey) {
        self.state.lock().unwrap().resources.remove(key);
    }

    pub fn patch_count(&self) -> usize {
        self.state.lock().unwrap().patches
    }

    pub fn events(&self) -> Vec<JobEvent> {
        self.state.lock().unwrap().events.clone()
    }

    /// Makes the next `n` status patches fail.
    pub fn fail_next_patches(&self, n: usize) {
        self.state.lock().unwrap().failing_patches = n;
    }

    /// Writes `status` right after the next `get` has been answered, as a
    /// concurrent writer would.
    pub fn race_next_get(&self, status: CronHpaStatus) {
        self.state.lock().unwrap().racing_write = Some(status);
    }
}

#[async_trait]
impl CronHpaStore for MemoryStore {
    async fn get(&self, key: &OwnerKey) -> Result<Option<CronHpa>> {
        let mut state = self.state.lock().unwrap();
        let resource = state.resources.get(key).cloned();
        if let Some(status) = state.racing_write.take() {
            if let Some(stored) = state.resources.get_mut(key) {
                stored.status = Some(status);
                state.bump(key);
            }
        }
        Ok(resource)
    }

    async fn patch_status(
        &self,
        key: &OwnerKey,
        status: &CronHpaStatus,
        resource_version: Option<&str>,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.failing_patches > 0 {
            state.failing_patches -= 1;
            return Err(Error::Internal("injected patch failure".to_string()));
        }
        let resource = state
            .resources
            .get_mut(key)
            .ok_or_else(|| Error::NotFound(key.to_string()))?;
        if let Some(version) = resource_version {
            if resource.metadata.resource_version.as_deref() != Some(version) {
                return Err(Error::Conflict(key.to_string()));
            }
        }
        resource.status = Some(status.clone());
        state.patches += 1;
        state.bump(key);
        Ok(())
    }

    async fn publish_event(&self, _resource: &CronHpa, event: JobEvent) {
        self.state.lock().unwrap().events.push(event);
    }
}

pub fn cronhpa(namespace: &str, name: &str, jobs: Vec<JobSpec>) -> CronHpa {
    let mut resource = CronHpa::new(
        name,
        CronHpaSpec {
            exclude_dates: Vec::new(),
            scale_target_ref: ScaleTargetRef {
                api_version: "apps/v1".to_string(),
                kind: "Deployment".to_string(),
                name: "web".to_string(),
            },
            jobs,
        },
    );
    resource.metadata.namespace = Some(namespace.to_string());
    resource
}

pub fn job_spec(name: &str, schedule: &str, target_size: i32) -> JobSpec {
    JobSpec {
        name: name.to_string(),
        schedule: schedule.to_string(),
        run_once: false,
        target_size,
    }
}

pub fn condition(name: &str, job_id: &str, state: JobState) -> Condition {
    Condition {
        name: name.to_string(),
        job_id: job_id.to_string(),
        schedule: "0 0 8 * * *".to_string(),
        target_size: 1,
        run_once: false,
        state,
        last_probe_time: "2024-01-01T00:00:00+00:00".to_string(),
        message: String::new(),
    }
}

pub fn autoscaler(name: &str, min: i32, max: i32, current: i32) -> HorizontalPodAutoscaler {
    HorizontalPodAutoscaler {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some("default".to_string()),
            ..Default::default()
        },
        spec: Some(HorizontalPodAutoscalerSpec {
            min_replicas: Some(min),
            max_replicas: max,
            scale_target_ref: CrossVersionObjectReference {
                api_version: Some("apps/v1".to_string()),
                kind: "Deployment".to_string(),
                name: "web".to_string(),
            },
            ..Default::default()
        }),
        status: Some(HorizontalPodAutoscalerStatus {
            current_replicas: Some(current),
            ..Default::default()
        }),
    }
}

pub fn fast_settings() -> ExecutionSettings {
    ExecutionSettings {
        retry_interval: Duration::from_millis(10),
        retry_timeout: Duration::from_millis(50),
        timezone: Tz::UTC,
    }
}

pub fn manager(
    store: Arc<MemoryStore>,
    scaler: MockScaleClient,
) -> (Arc<CronManager>, mpsc::UnboundedReceiver<JobResult<ScalingJob>>) {
    manager_with(store, scaler, chrono::Duration::minutes(5))
}

pub fn manager_with(
    store: Arc<MemoryStore>,
    scaler: MockScaleClient,
    staleness: chrono::Duration,
) -> (Arc<CronManager>, mpsc::UnboundedReceiver<JobResult<ScalingJob>>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let engine = Arc::new(CronEngine::new(Tz::UTC, staleness, tx));
    let settings = ManagerSettings {
        execution: fast_settings(),
        ..ManagerSettings::default()
    };
    let manager = CronManager::new(
        engine,
        store,
        Arc::new(scaler),
        Arc::new(Metrics::new().unwrap()),
        settings,
    );
    (Arc::new(manager), rx)
}
