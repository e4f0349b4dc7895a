use std::collections::HashMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::CronManager;
use crate::cron::{Lookup, Runnable};
use crate::crd::{CronHpa, JobState, OwnerKey};
use crate::metrics::JobCounts;
use crate::store::JobEvent;

impl CronManager {
    pub(crate) async fn gc_loop(self: Arc<Self>, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.settings.gc_interval);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    info!("GC loop started every {:?}", self.settings.gc_interval);
                    self.gc().await;
                }
            }
        }
        info!("GC loop stopped");
    }

    /// One garbage-collection pass: drops jobs of deleted resources,
    /// resubmits jobs the engine lost or stalled on, reruns out-of-date
    /// jobs once and publishes the job gauges.
    pub async fn gc(&self) -> JobCounts {
        info!("Start GC");
        let jobs = self.snapshot().await;
        let before = jobs.len();
        debug!("Current active jobs: {}, try to clean up the abandoned ones", before);

        let mut counts = JobCounts::default();
        let mut owners: HashMap<OwnerKey, Option<CronHpa>> = HashMap::new();
        let mut reruns = Vec::new();

        for job in jobs {
            let owner = job.owner().clone();
            let resource = match owners.get(&owner) {
                Some(resource) => resource.clone(),
                None => match self.store.get(&owner).await {
                    Ok(resource) => {
                        owners.insert(owner.clone(), resource.clone());
                        resource
                    }
                    Err(e) => {
                        error!("Failed to get cronHPA {} during GC: {}", owner, e);
                        continue;
                    }
                },
            };

            let Some(resource) = resource else {
                info!("remove job {} of cronHPA {}", job.name(), owner);
                self.delete(job.id()).await;
                self.reported.lock().await.remove(&owner);
                counts.expired += 1;
                continue;
            };

            match self.engine.find_job(job.id()).await {
                Lookup::Found => {
                    let state = resource
                        .status
                        .as_ref()
                        .and_then(|status| status.conditions.iter().find(|c| c.job_id == job.id()))
                        .map(|condition| condition.state);
                    match state {
                        Some(JobState::Succeed) => counts.succeeded += 1,
                        Some(JobState::Failed) => counts.failed += 1,
                        Some(JobState::Submitted) | None => counts.submitted += 1,
                    }
                    continue;
                }
                Lookup::OutOfDate(missed) => {
                    self.store
                        .publish_event(
                            &resource,
                            JobEvent::warning(
                                "OutOfDate",
                                format!("rerun out of date job: {}", job.name()),
                            ),
                        )
                        .await;
                    reruns.push((missed, job.clone()));
                }
                Lookup::NotFound => {}
            }

            warn!(
                "Failed to find job {} of cronHPA {} in cron engine and resubmit the job.",
                job.name(),
                owner
            );
            if let Err(e) = self.resubmit(job.id()).await {
                error!("Failed to resubmit job {} of cronHPA {}: {}", job.name(), owner, e);
            }
            counts.failed += 1;
            counts.submitted += 1;
        }

        let left = self.job_count().await;
        counts.total = left as i64;
        self.metrics.publish(&counts);

        if !reruns.is_empty() {
            reruns.sort_by(|a, b| a.0.cmp(&b.0));
            tokio::spawn(async move {
                for (missed, job) in reruns {
                    match job.execute().await {
                        Ok(message) => info!(
                            "Reran out of date job {} missed at {}: {}",
                            job.name(),
                            missed,
                            message
                        ),
                        Err(e) => error!("failed to rerun out of date job {}: {}", job.name(), e),
                    }
                }
            });
        }

        info!(
            "Current active jobs: {}, clean up {} jobs.",
            left,
            before.saturating_sub(left)
        );
        counts
    }
}
