//! Keeps the in-memory job queue and the cron engine in lockstep, and runs
//! the loops that react to job results and repair drift.

mod gc;
mod reconcile;
mod recorder;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::cron::{CronEngine, JobResult, Runnable};
use crate::crd::{Condition, CronHpa, JobSpec, OwnerKey};
use crate::metrics::Metrics;
use crate::scaling::{ExecutionSettings, ScaleClient, ScalingJob};
use crate::store::CronHpaStore;
use crate::Result;

#[derive(Debug, Clone, Copy)]
pub struct ManagerSettings {
    pub execution: ExecutionSettings,
    pub gc_interval: Duration,
    pub status_patch_retries: u32,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            execution: ExecutionSettings::default(),
            gc_interval: Duration::from_secs(600),
            status_patch_retries: 3,
        }
    }
}

/// What `create_or_update` did with a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueChange {
    Created,
    Updated,
    /// The queued job is identical; nothing was touched.
    Unchanged,
}

pub struct CronManager {
    queue: Mutex<HashMap<String, ScalingJob>>,
    /// Last validation message published per resource.
    reported: Mutex<HashMap<OwnerKey, String>>,
    engine: Arc<CronEngine<ScalingJob>>,
    store: Arc<dyn CronHpaStore>,
    scaler: Arc<dyn ScaleClient>,
    metrics: Arc<Metrics>,
    settings: ManagerSettings,
}

impl CronManager {
    pub fn new(
        engine: Arc<CronEngine<ScalingJob>>,
        store: Arc<dyn CronHpaStore>,
        scaler: Arc<dyn ScaleClient>,
        metrics: Arc<Metrics>,
        settings: ManagerSettings,
    ) -> Self {
        Self {
            queue: Mutex::new(HashMap::new()),
            reported: Mutex::new(HashMap::new()),
            engine,
            store,
            scaler,
            metrics,
            settings,
        }
    }

    pub fn engine(&self) -> &Arc<CronEngine<ScalingJob>> {
        &self.engine
    }

    pub fn build_job(&self, resource: &CronHpa, spec: &JobSpec) -> Result<ScalingJob> {
        ScalingJob::from_spec(resource, spec, self.scaler.clone(), self.settings.execution)
    }

    pub async fn create_or_update(&self, job: ScalingJob) -> Result<QueueChange> {
        let mut queue = self.queue.lock().await;
        let change = match queue.get(job.id()) {
            None => {
                self.engine.add_job(job.schedule(), job.clone()).await?;
                QueueChange::Created
            }
            Some(existing) if existing.differs_from(&job) => {
                self.engine.update(job.clone()).await?;
                QueueChange::Updated
            }
            Some(_) => return Ok(QueueChange::Unchanged),
        };

        let (name, owner) = (job.name().to_string(), job.owner().clone());
        queue.insert(job.id().to_string(), job);
        info!(
            "cronHPA job {} of cronHPA {} {}, {} active jobs exist",
            name,
            owner,
            if change == QueueChange::Created { "created" } else { "updated" },
            queue.len()
        );
        Ok(change)
    }

    /// Removes a job from both the queue and the engine.
    pub async fn delete(&self, id: &str) -> bool {
        let mut queue = self.queue.lock().await;
        self.engine.remove_job(id).await;
        match queue.remove(id) {
            Some(job) => {
                info!(
                    "Remove cronHPA job {} of cronHPA {} from jobQueue, {} active jobs left",
                    job.name(),
                    job.owner(),
                    queue.len()
                );
                true
            }
            None => false,
        }
    }

    /// Removes every job of one resource and returns how many there were.
    pub async fn delete_owned_by(&self, owner: &OwnerKey) -> usize {
        let mut queue = self.queue.lock().await;
        let ids: Vec<String> = queue
            .values()
            .filter(|job| job.owner() == owner)
            .map(|job| job.id().to_string())
            .collect();

        for id in &ids {
            self.engine.remove_job(id).await;
            queue.remove(id);
        }
        if !ids.is_empty() {
            info!(
                "Removed {} jobs of cronHPA {}, {} active jobs left",
                ids.len(),
                owner,
                queue.len()
            );
        }
        ids.len()
    }

    /// Removes queued jobs of `owner` whose id is not in `keep`.
    pub async fn retain_owned(&self, owner: &OwnerKey, keep: &HashSet<&str>) -> usize {
        let mut queue = self.queue.lock().await;
        let stray: Vec<String> = queue
            .values()
            .filter(|job| job.owner() == owner && !keep.contains(job.id()))
            .map(|job| job.id().to_string())
            .collect();

        for id in &stray {
            self.engine.remove_job(id).await;
            if let Some(job) = queue.remove(id) {
                info!(
                    "Remove stray job {}({}) of cronHPA {}, {} active jobs left",
                    job.name(),
                    id,
                    owner,
                    queue.len()
                );
            }
        }
        stray.len()
    }

    /// Drops everything kept for a deleted resource.
    pub async fn forget(&self, owner: &OwnerKey) -> usize {
        self.reported.lock().await.remove(owner);
        self.delete_owned_by(owner).await
    }

    /// Id of the queued job named `name` of `owner`.
    pub(crate) async fn queued_id(&self, owner: &OwnerKey, name: &str) -> Option<String> {
        self.queue
            .lock()
            .await
            .values()
            .find(|job| job.owner() == owner && job.name() == name)
            .map(|job| job.id().to_string())
    }

    /// Records the validation outcome of `owner`. Returns true when
    /// `message` is a new complaint that has not been published yet.
    pub(crate) async fn note_validation(&self, owner: &OwnerKey, message: Option<String>) -> bool {
        let mut reported = self.reported.lock().await;
        match message {
            None => {
                reported.remove(owner);
                false
            }
            Some(message) => {
                if reported.get(owner) == Some(&message) {
                    return false;
                }
                reported.insert(owner.clone(), message);
                true
            }
        }
    }

    pub async fn job_count(&self) -> usize {
        self.queue.lock().await.len()
    }

    /// Copy of the queued jobs, taken under the lock.
    pub async fn snapshot(&self) -> Vec<ScalingJob> {
        self.queue.lock().await.values().cloned().collect()
    }

    /// Reinserts a queued job into the engine. Jobs removed from the queue
    /// in the meantime are left alone.
    async fn resubmit(&self, id: &str) -> Result<bool> {
        let queue = self.queue.lock().await;
        match queue.get(id) {
            Some(job) => {
                self.engine.add_job(job.schedule(), job.clone()).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Runs the engine, the result recorder and the GC loop until
    /// `shutdown` is cancelled, then waits for all three to stop.
    pub async fn run(
        self: Arc<Self>,
        results: mpsc::UnboundedReceiver<JobResult<ScalingJob>>,
        shutdown: CancellationToken,
    ) {
        info!("Starting cron manager");
        let tasks = [
            ("engine", tokio::spawn(self.engine.clone().run(shutdown.clone()))),
            (
                "recorder",
                tokio::spawn(self.clone().record_results(results, shutdown.clone())),
            ),
            ("gc", tokio::spawn(self.clone().gc_loop(shutdown.clone()))),
        ];

        for (name, handle) in tasks {
            if let Err(e) = handle.await {
                error!("Cron manager {} task failed: {}", name, e);
            }
        }
        info!("Cron manager stopped");
    }
}

/// Replaces the condition with the same name, or appends it.
pub(crate) fn merge_by_name(conditions: &mut Vec<Condition>, condition: Condition) {
    match conditions.iter_mut().find(|c| c.name == condition.name) {
        Some(existing) => *existing = condition,
        None => conditions.push(condition),
    }
}

/// Replaces every condition matching the job id or name with `condition`,
/// keeping the position of the first match.
pub(crate) fn merge_by_job(conditions: &mut Vec<Condition>, condition: Condition) {
    let matches = |c: &Condition| c.job_id == condition.job_id || c.name == condition.name;
    let index = conditions.iter().position(|c| matches(c));
    conditions.retain(|c| !matches(c));
    match index {
        Some(index) => conditions.insert(index, condition),
        None => conditions.push(condition),
    }
}
