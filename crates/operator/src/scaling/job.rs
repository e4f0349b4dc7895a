use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use chrono_tz::Tz;
use k8s_openapi::api::autoscaling::v2::HorizontalPodAutoscalerSpec;
use tokio::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

use super::{ScaleClient, TargetRef};
use crate::cron::{excluded_by, Runnable, Schedule};
use crate::crd::{CronHpa, JobSpec, OwnerKey};
use crate::{Error, Result};

/// Retry and clock settings shared by every job.
#[derive(Debug, Clone, Copy)]
pub struct ExecutionSettings {
    pub retry_interval: Duration,
    pub retry_timeout: Duration,
    pub timezone: Tz,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            retry_interval: Duration::from_secs(3),
            retry_timeout: Duration::from_secs(10),
            timezone: Tz::UTC,
        }
    }
}

/// A scheduled replica change for one target.
#[derive(Clone)]
pub struct ScalingJob {
    id: String,
    name: String,
    schedule: String,
    desired_size: i32,
    run_once: bool,
    exclude_dates: Vec<String>,
    owner: OwnerKey,
    target: TargetRef,
    scaler: Arc<dyn ScaleClient>,
    settings: ExecutionSettings,
}

impl ScalingJob {
    /// Builds the job declared by `spec` inside `resource`, with a fresh id.
    pub fn from_spec(
        resource: &CronHpa,
        spec: &JobSpec,
        scaler: Arc<dyn ScaleClient>,
        settings: ExecutionSettings,
    ) -> Result<Self> {
        let owner = OwnerKey::of(resource);
        let target_ref = &resource.spec.scale_target_ref;
        let target = TargetRef::new(
            &target_ref.name,
            &owner.namespace,
            &target_ref.kind,
            &target_ref.api_version,
        )?;

        Schedule::parse(&spec.schedule)?;
        if spec.target_size < 0 {
            return Err(Error::Validation(format!(
                "targetSize of job {} must not be negative, got {}",
                spec.name, spec.target_size
            )));
        }

        Ok(Self {
            id: Uuid::new_v4().to_string(),
            name: spec.name.clone(),
            schedule: spec.schedule.clone(),
            desired_size: spec.target_size,
            run_once: spec.is_run_once(),
            exclude_dates: resource.spec.exclude_dates.clone(),
            owner,
            target,
            scaler,
            settings,
        })
    }

    pub fn set_id(&mut self, id: impl Into<String>) {
        self.id = id.into();
    }

    pub fn desired_size(&self) -> i32 {
        self.desired_size
    }

    /// Same id, schedule and target.
    pub fn equals(&self, other: &ScalingJob) -> bool {
        self.id == other.id
            && self.schedule == other.schedule
            && self.target.identity() == other.target.identity()
    }

    /// Whether replacing `self` by `other` changes anything the engine runs.
    pub fn differs_from(&self, other: &ScalingJob) -> bool {
        !self.equals(other)
            || self.desired_size != other.desired_size
            || self.run_once != other.run_once
            || self.exclude_dates != other.exclude_dates
    }

    /// Scales the target, retrying until the configured timeout. Days
    /// matching an exclusion date are skipped without any API call.
    pub async fn execute(&self) -> Result<String> {
        let now = Utc::now().with_timezone(&self.settings.timezone);
        if let Some(date) = excluded_by(&self.exclude_dates, &now) {
            info!("Job {} of {} skipped by exclude date {}", self.name, self.owner, date);
            return Ok(format!(
                "skip scaling activity,because of excludeDate ({}).",
                date
            ));
        }

        let started = Instant::now();
        let mut attempts = 0u32;
        loop {
            let outcome = if self.target.is_autoscaler() {
                self.scale_autoscaler().await
            } else {
                self.scale_plain().await
            };

            match outcome {
                Ok(message) => return Ok(message),
                Err(e) => {
                    attempts += 1;
                    if started.elapsed() >= self.settings.retry_timeout {
                        return Err(Error::Execution(format!(
                            "failed to scale {} {} in {} namespace to {} after retrying {} times, because of {}",
                            self.target.kind,
                            self.target.name,
                            self.target.namespace,
                            self.desired_size,
                            attempts,
                            e
                        )));
                    }
                    warn!(
                        "Attempt {} to scale {} failed: {}, retrying in {:?}",
                        attempts, self.target, e, self.settings.retry_interval
                    );
                    tokio::time::sleep(self.settings.retry_interval).await;
                }
            }
        }
    }

    async fn scale_plain(&self) -> Result<String> {
        let replicas = self.scaler.get_scale(&self.target).await?;
        self.scaler
            .update_scale(&self.target, self.desired_size)
            .await?;

        info!(
            "{} has been scaled successfully. job: {} replicas: {}",
            self.target, self.name, self.desired_size
        );
        Ok(format!(
            "current replicas:{}, desired replicas:{}.",
            replicas, self.desired_size
        ))
    }

    async fn scale_autoscaler(&self) -> Result<String> {
        let mut hpa = self
            .scaler
            .get_autoscaler(&self.target.namespace, &self.target.name)
            .await?;
        let hpa_name = hpa
            .metadata
            .name
            .clone()
            .unwrap_or_else(|| self.target.name.clone());
        let current = hpa
            .status
            .as_ref()
            .and_then(|status| status.current_replicas)
            .unwrap_or(0);

        let spec = hpa.spec.as_mut().ok_or_else(|| {
            Error::Validation(format!("HorizontalPodAutoscaler {} has no spec", hpa_name))
        })?;
        let workload = TargetRef::from_api_version(
            &spec.scale_target_ref.name,
            &self.target.namespace,
            &spec.scale_target_ref.kind,
            spec.scale_target_ref.api_version.as_deref().unwrap_or_default(),
        );
        let replicas = self.scaler.get_scale(&workload).await?;

        if adjust_autoscaler_bounds(spec, current, self.desired_size) {
            self.scaler.update_autoscaler(&hpa).await?;
        }

        if current >= self.desired_size {
            return Ok(format!(
                "Skip scale replicas because HPA {} current replicas:{} >= desired replicas:{}.",
                hpa_name, replicas, self.desired_size
            ));
        }

        self.scaler
            .update_scale(&workload, self.desired_size)
            .await?;
        Ok(format!(
            "current replicas:{}, desired replicas:{}.",
            replicas, self.desired_size
        ))
    }
}

/// Moves the autoscaler's bounds so `desired` is representable. Returns
/// whether anything changed.
pub fn adjust_autoscaler_bounds(
    spec: &mut HorizontalPodAutoscalerSpec,
    current: i32,
    desired: i32,
) -> bool {
    let mut changed = false;

    if desired > spec.max_replicas {
        spec.max_replicas = desired;
        changed = true;
    }

    let min = spec.min_replicas.unwrap_or(1);
    let mut new_min = min;
    if desired < min {
        new_min = desired;
    }
    if current == min && desired < current {
        new_min = desired;
    }
    if current < desired {
        new_min = desired;
    }
    if new_min != min {
        spec.min_replicas = Some(new_min);
        changed = true;
    }

    changed
}

#[async_trait]
impl Runnable for ScalingJob {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn owner(&self) -> &OwnerKey {
        &self.owner
    }

    fn schedule(&self) -> &str {
        &self.schedule
    }

    fn run_once(&self) -> bool {
        self.run_once
    }

    async fn run(&self) -> Result<String> {
        self.execute().await
    }
}

impl fmt::Debug for ScalingJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScalingJob")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("schedule", &self.schedule)
            .field("desired_size", &self.desired_size)
            .field("run_once", &self.run_once)
            .field("owner", &self.owner)
            .field("target", &self.target)
            .finish()
    }
}
