use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::{merge_by_job, CronManager};
use crate::cron::{JobResult, Runnable};
use crate::crd::{Condition, JobState};
use crate::scaling::ScalingJob;
use crate::store::{EventKind, JobEvent};
use crate::Error;

impl CronManager {
    pub(crate) async fn record_results(
        self: Arc<Self>,
        mut results: mpsc::UnboundedReceiver<JobResult<ScalingJob>>,
        shutdown: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                result = results.recv() => match result {
                    Some(result) => self.record(result).await,
                    None => break,
                },
            }
        }
        info!("Result recorder stopped");
    }

    /// Writes the outcome of one run into the owner's status and publishes
    /// a matching event.
    pub async fn record(&self, result: JobResult<ScalingJob>) {
        let JobResult { job, outcome } = result;
        let owner = job.owner().clone();

        let (state, message, kind) = match &outcome {
            Ok(msg) => (
                JobState::Succeed,
                format!("cron hpa job {} executed successfully. {}", job.name(), msg),
                EventKind::Normal,
            ),
            Err(e) => (
                JobState::Failed,
                format!("cron hpa failed to execute, because of {}", e),
                EventKind::Warning,
            ),
        };
        info!("Job {} of cronHPA {} finished: {}", job.name(), owner, message);

        let condition = Condition {
            name: job.name().to_string(),
            job_id: job.id().to_string(),
            schedule: job.schedule().to_string(),
            target_size: job.desired_size(),
            run_once: job.run_once(),
            state,
            last_probe_time: Utc::now().to_rfc3339(),
            message: message.clone(),
        };

        let attempts = self.settings.status_patch_retries.max(1);
        let mut last_failure = None;
        for _ in 0..attempts {
            let resource = match self.store.get(&owner).await {
                Ok(Some(resource)) => resource,
                Ok(None) => {
                    warn!("No need to update cronHPA {}, because it is deleted before", owner);
                    return;
                }
                Err(e) => {
                    error!("Failed to fetch cronHPA {}, because of {}", owner, e);
                    continue;
                }
            };

            let mut status = resource.status.clone().unwrap_or_default();
            merge_by_job(&mut status.conditions, condition.clone());
            let version = resource.metadata.resource_version.as_deref();
            match self.store.patch_status(&owner, &status, version).await {
                Ok(()) => {
                    let event = JobEvent {
                        kind,
                        reason: state.to_string(),
                        message,
                    };
                    self.store.publish_event(&resource, event).await;
                    return;
                }
                Err(Error::NotFound(_)) => {
                    warn!("Failed to patch cronHPA {}, because instance is deleted", owner);
                    return;
                }
                Err(e) => {
                    error!("Failed to patch cronHPA {}, because of {}", owner, e);
                    last_failure = Some((resource, e));
                }
            }
        }

        error!(
            "Failed to update cronHPA job {} of cronHPA {} after {} times",
            job.name(),
            owner,
            attempts
        );
        if let Some((resource, e)) = last_failure {
            self.store
                .publish_event(
                    &resource,
                    JobEvent::warning("Failed", format!("Failed to update cronhpa status: {}", e)),
                )
                .await;
        }
    }
}
