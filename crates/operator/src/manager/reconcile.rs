use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use super::{merge_by_name, CronManager, QueueChange};
use crate::cron::Runnable;
use crate::crd::{validate, Condition, CronHpaSpec, CronHpaStatus, JobState, OwnerKey};
use crate::store::JobEvent;
use crate::{Error, Result};

impl CronManager {
    /// Brings the job queue and the status of one CronHPA in line with its
    /// spec. A missing resource triggers a GC pass instead.
    pub async fn reconcile(self: &Arc<Self>, key: &OwnerKey) -> Result<()> {
        let Some(resource) = self.store.get(key).await? else {
            info!("GC start for: cronHPA {} is not found", key);
            self.note_validation(key, None).await;
            let manager = self.clone();
            tokio::spawn(async move {
                manager.gc().await;
            });
            return Ok(());
        };
        info!("Start to handle cronHPA {}", key);

        let errors = validate(&resource.spec);
        let complaint = (!errors.is_empty()).then(|| {
            errors
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ")
        });
        if let Some(message) = &complaint {
            warn!("cronHPA {} has an invalid spec: {}", key, message);
        }
        if self.note_validation(key, complaint.clone()).await {
            if let Some(message) = complaint {
                self.store
                    .publish_event(&resource, JobEvent::warning("InvalidSpec", message))
                    .await;
            }
        }

        let spec = &resource.spec;
        let mut status = resource.status.clone().unwrap_or_default();
        let previous = std::mem::take(&mut status.conditions);
        let mut left: Vec<Condition> = Vec::new();
        // Ids of changed jobs, keyed by job name, so a rebuilt job keeps its id.
        let mut reusable: HashMap<String, String> = HashMap::new();

        let global_change = global_params_changed(&status, spec);
        if global_change {
            let removed = self.delete_owned_by(key).await;
            info!(
                "Target or exclude dates of cronHPA {} changed, {} jobs will be recreated",
                key, removed
            );
            status.scale_target_ref = Some(spec.scale_target_ref.clone());
            status.exclude_dates = spec.exclude_dates.clone();
        } else {
            for condition in &previous {
                let declared = spec.jobs.iter().find(|job| job.name == condition.name);
                match declared {
                    Some(job)
                        if condition.schedule == job.schedule
                            && condition.run_once == job.run_once
                            && condition.target_size == job.target_size =>
                    {
                        left.push(condition.clone());
                    }
                    Some(_) => {
                        if !condition.job_id.is_empty() {
                            self.delete(&condition.job_id).await;
                            reusable.insert(condition.name.clone(), condition.job_id.clone());
                        }
                    }
                    None => {
                        if !condition.job_id.is_empty() {
                            self.delete(&condition.job_id).await;
                        }
                    }
                }
            }
        }

        let mut changed = global_change || left.len() != previous.len();
        status.conditions = left.clone();

        for job_spec in &spec.jobs {
            let retained = left.iter().find(|c| c.name == job_spec.name);
            let mut condition = Condition {
                name: job_spec.name.clone(),
                job_id: String::new(),
                schedule: job_spec.schedule.clone(),
                target_size: job_spec.target_size,
                run_once: job_spec.run_once,
                state: JobState::Submitted,
                last_probe_time: Utc::now().to_rfc3339(),
                message: String::new(),
            };

            match self.build_job(&resource, job_spec) {
                Err(e) => {
                    error!("Failed to create cron hpa job {},because of {}", job_spec.name, e);
                    condition.state = JobState::Failed;
                    condition.message = format!(
                        "Failed to create cron hpa job {},because of {}",
                        job_spec.name, e
                    );
                    if retained.is_some_and(|c| {
                        c.state == JobState::Failed && c.message == condition.message
                    }) {
                        continue;
                    }
                }
                Ok(mut job) => {
                    match retained.filter(|c| !c.job_id.is_empty()) {
                        Some(kept) => {
                            job.set_id(kept.job_id.clone());
                            if job_spec.is_run_once() && kept.state.is_terminal() {
                                if self.delete(&kept.job_id).await {
                                    info!(
                                        "cron hpa {}({}) has ran once and exits",
                                        job_spec.name, kept.job_id
                                    );
                                }
                                continue;
                            }
                        }
                        None => {
                            let id = match reusable.remove(&job_spec.name) {
                                Some(id) => Some(id),
                                // Queued by a run whose status write never landed.
                                None => self.queued_id(key, &job_spec.name).await,
                            };
                            if let Some(id) = id {
                                job.set_id(id);
                            }
                        }
                    }

                    condition.job_id = job.id().to_string();
                    match self.create_or_update(job).await {
                        Ok(QueueChange::Unchanged) if retained.is_some() => continue,
                        Ok(_) => condition.state = JobState::Submitted,
                        Err(e) => {
                            error!("Failed to update cron hpa job {},because of {}", job_spec.name, e);
                            condition.state = JobState::Failed;
                            condition.message = format!(
                                "Failed to update cron hpa job {},because of {}",
                                job_spec.name, e
                            );
                        }
                    }
                }
            }

            changed = true;
            merge_by_name(&mut status.conditions, condition);
        }

        let live: HashSet<&str> = status
            .conditions
            .iter()
            .map(|c| c.job_id.as_str())
            .filter(|id| !id.is_empty())
            .collect();
        self.retain_owned(key, &live).await;

        if !changed {
            debug!("cronHPA {} is up to date", key);
            return Ok(());
        }

        let version = resource.metadata.resource_version.as_deref();
        match self.store.patch_status(key, &status, version).await {
            Ok(()) => {
                info!(
                    "Updated status of cronHPA {} with {} conditions",
                    key,
                    status.conditions.len()
                );
                Ok(())
            }
            Err(Error::NotFound(_)) => {
                warn!("cronHPA {} was deleted before its status could be updated", key);
                Ok(())
            }
            Err(e) => {
                error!("Failed to update cron hpa {} status, because of {}", key, e);
                Err(e)
            }
        }
    }
}

/// Whether the target or the exclusion dates differ from the values last
/// applied. Exclusion dates compare as sets.
fn global_params_changed(status: &CronHpaStatus, spec: &CronHpaSpec) -> bool {
    let Some(applied) = &status.scale_target_ref else {
        return true;
    };
    if applied.kind != spec.scale_target_ref.kind
        || applied.api_version != spec.scale_target_ref.api_version
        || applied.name != spec.scale_target_ref.name
    {
        return true;
    }

    let applied_dates: HashSet<&String> = status.exclude_dates.iter().collect();
    let declared_dates: HashSet<&String> = spec.exclude_dates.iter().collect();
    applied_dates != declared_dates
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{CronHpa, JobSpec};
    use crate::scaling::MockScaleClient;
    use crate::testing::{cronhpa, job_spec, manager, MemoryStore};
    use std::time::Duration;

    async fn reconciled(
        store: &Arc<MemoryStore>,
        manager: &Arc<CronManager>,
        resource: &CronHpa,
    ) -> CronHpaStatus {
        let key = OwnerKey::of(resource);
        manager.reconcile(&key).await.unwrap();
        store.status(&key).unwrap_or_default()
    }

    fn jobs() -> Vec<JobSpec> {
        vec![
            job_spec("up", "0 0 8 * * *", 5),
            job_spec("down", "0 0 20 * * *", 1),
        ]
    }

    #[tokio::test]
    async fn test_first_reconcile_submits_every_job() {
        let store = Arc::new(MemoryStore::default());
        let (manager, _rx) = manager(store.clone(), MockScaleClient::new());
        let resource = store.insert(cronhpa("default", "web", jobs()));

        let status = reconciled(&store, &manager, &resource).await;

        assert_eq!(status.conditions.len(), 2);
        assert!(status
            .conditions
            .iter()
            .all(|c| c.state == JobState::Submitted && !c.job_id.is_empty()));
        assert_eq!(status.scale_target_ref, Some(resource.spec.scale_target_ref.clone()));
        assert_eq!(manager.job_count().await, 2);
        assert_eq!(manager.engine().list_entries().await.len(), 2);
    }

    #[tokio::test]
    async fn test_reconcile_is_idempotent() {
        let store = Arc::new(MemoryStore::default());
        let (manager, _rx) = manager(store.clone(), MockScaleClient::new());
        let resource = store.insert(cronhpa("default", "web", jobs()));

        let first = reconciled(&store, &manager, &resource).await;
        let patches = store.patch_count();
        let second = reconciled(&store, &manager, &resource).await;

        assert_eq!(first, second);
        assert_eq!(store.patch_count(), patches);
        assert_eq!(manager.job_count().await, 2);
    }

    #[tokio::test]
    async fn test_target_size_change_keeps_job_id() {
        let store = Arc::new(MemoryStore::default());
        let (manager, _rx) = manager(store.clone(), MockScaleClient::new());
        let mut resource = store.insert(cronhpa("default", "web", jobs()));

        let before = reconciled(&store, &manager, &resource).await;
        let up_id = before.conditions[0].job_id.clone();

        resource.spec.jobs[0].target_size = 8;
        let resource = store.insert(resource);
        let after = reconciled(&store, &manager, &resource).await;

        let up = after.conditions.iter().find(|c| c.name == "up").unwrap();
        assert_eq!(up.job_id, up_id);
        assert_eq!(up.target_size, 8);
        assert_eq!(manager.job_count().await, 2);
    }

    #[tokio::test]
    async fn test_removed_job_is_pruned() {
        let store = Arc::new(MemoryStore::default());
        let (manager, _rx) = manager(store.clone(), MockScaleClient::new());
        let mut resource = store.insert(cronhpa("default", "web", jobs()));
        reconciled(&store, &manager, &resource).await;

        resource.spec.jobs.truncate(1);
        let resource = store.insert(resource);
        let status = reconciled(&store, &manager, &resource).await;

        assert_eq!(status.conditions.len(), 1);
        assert_eq!(status.conditions[0].name, "up");
        assert_eq!(manager.job_count().await, 1);
        assert_eq!(manager.engine().list_entries().await.len(), 1);
    }

    #[tokio::test]
    async fn test_global_change_recreates_jobs() {
        let store = Arc::new(MemoryStore::default());
        let (manager, _rx) = manager(store.clone(), MockScaleClient::new());
        let mut resource = store.insert(cronhpa("default", "web", jobs()));
        let before = reconciled(&store, &manager, &resource).await;

        resource.spec.exclude_dates = vec!["* * * 25 12 *".to_string()];
        let resource = store.insert(resource);
        let after = reconciled(&store, &manager, &resource).await;

        assert_eq!(after.exclude_dates, vec!["* * * 25 12 *".to_string()]);
        assert_eq!(after.conditions.len(), 2);
        for condition in &after.conditions {
            assert!(before.conditions.iter().all(|c| c.job_id != condition.job_id));
        }
        assert_eq!(manager.job_count().await, 2);
    }

    #[test]
    fn test_exclude_dates_compare_as_sets() {
        let mut status = CronHpaStatus::default();
        let mut spec = cronhpa("default", "web", jobs()).spec;
        spec.exclude_dates = vec!["a".to_string(), "b".to_string()];
        status.scale_target_ref = Some(spec.scale_target_ref.clone());
        status.exclude_dates = vec!["b".to_string(), "a".to_string()];
        assert!(!global_params_changed(&status, &spec));

        status.exclude_dates.pop();
        assert!(global_params_changed(&status, &spec));
    }

    #[tokio::test]
    async fn test_invalid_job_fails_alone() {
        let store = Arc::new(MemoryStore::default());
        let (manager, _rx) = manager(store.clone(), MockScaleClient::new());
        let mut jobs = jobs();
        jobs[1].schedule = "0 0 25 * * *".to_string();
        let resource = store.insert(cronhpa("default", "web", jobs));

        let status = reconciled(&store, &manager, &resource).await;

        let up = status.conditions.iter().find(|c| c.name == "up").unwrap();
        let down = status.conditions.iter().find(|c| c.name == "down").unwrap();
        assert_eq!(up.state, JobState::Submitted);
        assert_eq!(down.state, JobState::Failed);
        assert!(down.message.starts_with("Failed to create cron hpa job down"));
        assert_eq!(manager.job_count().await, 1);

        let events = store.events();
        assert!(events.iter().any(|e| e.reason == "InvalidSpec"));

        // The same failure is not written again.
        let patches = store.patch_count();
        reconciled(&store, &manager, &resource).await;
        assert_eq!(store.patch_count(), patches);
    }

    #[tokio::test]
    async fn test_terminal_run_once_job_is_not_resubmitted() {
        let store = Arc::new(MemoryStore::default());
        let (manager, _rx) = manager(store.clone(), MockScaleClient::new());
        let mut jobs = jobs();
        jobs[0].run_once = true;
        let resource = store.insert(cronhpa("default", "web", jobs));

        let mut status = reconciled(&store, &manager, &resource).await;
        let key = OwnerKey::of(&resource);
        status.conditions[0].state = JobState::Succeed;
        let id = status.conditions[0].job_id.clone();
        store.set_status(&key, status);

        let status = reconciled(&store, &manager, &resource).await;
        assert!(manager.snapshot().await.iter().all(|job| job.id() != id));
        assert_eq!(manager.job_count().await, 1);
        let up = status.conditions.iter().find(|c| c.name == "up").unwrap();
        assert_eq!(up.state, JobState::Succeed);
    }

    #[tokio::test]
    async fn test_missing_resource_triggers_gc() {
        let store = Arc::new(MemoryStore::default());
        let (manager, _rx) = manager(store.clone(), MockScaleClient::new());
        let resource = store.insert(cronhpa("default", "web", jobs()));
        reconciled(&store, &manager, &resource).await;

        let key = OwnerKey::of(&resource);
        store.remove(&key);
        manager.reconcile(&key).await.unwrap();

        for _ in 0..50 {
            if manager.job_count().await == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(manager.job_count().await, 0);
        assert!(manager.engine().list_entries().await.is_empty());
    }

    #[tokio::test]
    async fn test_lost_jobs_are_recreated_with_same_id() {
        let store = Arc::new(MemoryStore::default());
        let resource = store.insert(cronhpa("default", "web", jobs()));
        let before = {
            let (manager, _rx) = manager(store.clone(), MockScaleClient::new());
            reconciled(&store, &manager, &resource).await
        };

        // A fresh process starts with an empty queue.
        let (manager, _rx) = manager(store.clone(), MockScaleClient::new());
        let after = reconciled(&store, &manager, &resource).await;

        assert_eq!(manager.job_count().await, 2);
        for condition in &after.conditions {
            assert!(before.conditions.iter().any(|c| c.job_id == condition.job_id));
        }
    }

    #[tokio::test]
    async fn test_failed_status_write_does_not_orphan_new_job() {
        let store = Arc::new(MemoryStore::default());
        let (manager, _rx) = manager(store.clone(), MockScaleClient::new());
        let mut resource = store.insert(cronhpa("default", "web", jobs()));
        reconciled(&store, &manager, &resource).await;

        resource.spec.jobs.push(job_spec("noon", "0 0 12 * * *", 3));
        let mut resource = store.insert(resource);
        let key = OwnerKey::of(&resource);
        store.fail_next_patches(1);
        assert!(manager.reconcile(&key).await.is_err());
        assert_eq!(manager.job_count().await, 3);

        let status = reconciled(&store, &manager, &resource).await;
        assert_eq!(status.conditions.len(), 3);
        assert_eq!(manager.job_count().await, 3);
        assert_eq!(manager.engine().list_entries().await.len(), 3);

        resource.spec.jobs.retain(|job| job.name != "noon");
        let resource = store.insert(resource);
        reconciled(&store, &manager, &resource).await;
        assert_eq!(manager.job_count().await, 2);
        let names: Vec<String> = manager
            .snapshot()
            .await
            .iter()
            .map(|job| job.name().to_string())
            .collect();
        assert!(!names.contains(&"noon".to_string()));
        assert_eq!(manager.engine().list_entries().await.len(), 2);
    }

    #[tokio::test]
    async fn test_job_dropped_before_its_status_landed_is_pruned() {
        let store = Arc::new(MemoryStore::default());
        let (manager, _rx) = manager(store.clone(), MockScaleClient::new());
        let mut resource = store.insert(cronhpa("default", "web", jobs()));
        reconciled(&store, &manager, &resource).await;

        resource.spec.jobs.push(job_spec("noon", "0 0 12 * * *", 3));
        let mut resource = store.insert(resource);
        store.fail_next_patches(1);
        assert!(manager.reconcile(&OwnerKey::of(&resource)).await.is_err());
        assert_eq!(manager.job_count().await, 3);

        resource.spec.jobs.pop();
        let resource = store.insert(resource);
        let status = reconciled(&store, &manager, &resource).await;

        assert_eq!(status.conditions.len(), 2);
        assert_eq!(manager.job_count().await, 2);
        assert_eq!(manager.engine().list_entries().await.len(), 2);
    }

    #[tokio::test]
    async fn test_stale_status_write_is_rejected_and_retried() {
        let store = Arc::new(MemoryStore::default());
        let (manager, _rx) = manager(store.clone(), MockScaleClient::new());
        let mut resource = store.insert(cronhpa("default", "web", jobs()));
        let key = OwnerKey::of(&resource);
        reconciled(&store, &manager, &resource).await;

        resource.spec.jobs[1].target_size = 3;
        let resource = store.insert(resource);
        // A job result lands between the read and the write.
        let mut racing = store.status(&key).unwrap();
        racing.conditions[0].state = JobState::Succeed;
        store.race_next_get(racing);

        assert!(matches!(
            manager.reconcile(&key).await,
            Err(Error::Conflict(_))
        ));
        let status = store.status(&key).unwrap();
        let up = status.conditions.iter().find(|c| c.name == "up").unwrap();
        assert_eq!(up.state, JobState::Succeed);

        let status = reconciled(&store, &manager, &resource).await;
        let up = status.conditions.iter().find(|c| c.name == "up").unwrap();
        let down = status.conditions.iter().find(|c| c.name == "down").unwrap();
        assert_eq!(up.state, JobState::Succeed);
        assert_eq!(down.target_size, 3);
        assert_eq!(manager.job_count().await, 2);
    }

    #[tokio::test]
    async fn test_two_minute_jobs_on_one_deployment() {
        let store = Arc::new(MemoryStore::default());
        let (manager, _rx) = manager(store.clone(), MockScaleClient::new());
        let mut resource = cronhpa(
            "default",
            "nginx-cronhpa",
            vec![
                job_spec("scale-down", "30 */1 * * * *", 1),
                job_spec("scale-up", "0 */1 * * * *", 3),
            ],
        );
        resource.spec.scale_target_ref.name = "nginx".to_string();
        let resource = store.insert(resource);

        let status = reconciled(&store, &manager, &resource).await;

        assert_eq!(status.conditions.len(), 2);
        for job in &resource.spec.jobs {
            let condition = status.conditions.iter().find(|c| c.name == job.name).unwrap();
            assert_eq!(condition.state, JobState::Submitted);
            assert_eq!(condition.schedule, job.schedule);
            assert!(!condition.job_id.is_empty());
        }
        assert_ne!(status.conditions[0].job_id, status.conditions[1].job_id);
        assert_eq!(status.scale_target_ref.unwrap().name, "nginx");
        assert_eq!(manager.engine().list_entries().await.len(), 2);
    }

    #[tokio::test]
    async fn test_invalid_spec_event_is_published_once_per_message() {
        let store = Arc::new(MemoryStore::default());
        let (manager, _rx) = manager(store.clone(), MockScaleClient::new());
        let mut resource = cronhpa("default", "web", jobs());
        resource.spec.jobs[1].target_size = -1;
        let mut resource = store.insert(resource);
        fn invalid(store: &MemoryStore) -> usize {
            store
                .events()
                .iter()
                .filter(|e| e.reason == "InvalidSpec")
                .count()
        }

        reconciled(&store, &manager, &resource).await;
        reconciled(&store, &manager, &resource).await;
        assert_eq!(invalid(&store), 1);

        resource.spec.jobs[1].target_size = -2;
        resource = store.insert(resource);
        reconciled(&store, &manager, &resource).await;
        assert_eq!(invalid(&store), 2);

        // Fixing the spec resets the memory, so a relapse is reported again.
        resource.spec.jobs[1].target_size = 1;
        resource = store.insert(resource);
        reconciled(&store, &manager, &resource).await;
        resource.spec.jobs[1].target_size = -2;
        resource = store.insert(resource);
        reconciled(&store, &manager, &resource).await;
        assert_eq!(invalid(&store), 3);
    }
}
