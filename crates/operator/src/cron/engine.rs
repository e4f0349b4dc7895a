use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use tokio::sync::{mpsc, Notify, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::Schedule;
use crate::crd::OwnerKey;
use crate::Result;

/// Upper bound on a single sleep of the dispatch loop.
const MAX_IDLE: Duration = Duration::from_secs(60);

/// A unit of work the engine can schedule.
#[async_trait]
pub trait Runnable: Clone + Send + Sync + 'static {
    fn id(&self) -> &str;
    fn name(&self) -> &str;
    fn owner(&self) -> &OwnerKey;
    fn schedule(&self) -> &str;

    /// Run-once jobs fire a single time and then stay dormant until removed.
    fn run_once(&self) -> bool {
        false
    }

    async fn run(&self) -> Result<String>;
}

struct Entry<J> {
    job: J,
    expr: String,
    schedule: Schedule,
    prev: Option<DateTime<Tz>>,
    next: Option<DateTime<Tz>>,
}

/// Read-only view of an engine entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntrySnapshot {
    pub id: String,
    pub name: String,
    pub cronhpa: String,
    pub namespace: String,
    pub schedule: String,
    pub prev: Option<String>,
    pub next: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    Found,
    /// The entry exists but its fire time passed more than the staleness
    /// window ago without being dispatched.
    OutOfDate(DateTime<Tz>),
    NotFound,
}

/// Outcome of one firing, delivered on the engine's result channel.
#[derive(Debug)]
pub struct JobResult<J> {
    pub job: J,
    pub outcome: Result<String>,
}

pub struct CronEngine<J> {
    entries: RwLock<HashMap<String, Entry<J>>>,
    wake: Notify,
    results: mpsc::UnboundedSender<JobResult<J>>,
    timezone: Tz,
    staleness: chrono::Duration,
}

impl<J: Runnable> CronEngine<J> {
    pub fn new(
        timezone: Tz,
        staleness: chrono::Duration,
        results: mpsc::UnboundedSender<JobResult<J>>,
    ) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            wake: Notify::new(),
            results,
            timezone,
            staleness,
        }
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    fn now(&self) -> DateTime<Tz> {
        Utc::now().with_timezone(&self.timezone)
    }

    /// Schedules `job` under `expr`, replacing any entry with the same id.
    pub async fn add_job(&self, expr: &str, job: J) -> Result<()> {
        let schedule = Schedule::parse(expr)?;
        let next = schedule.next_after(&self.now());
        let id = job.id().to_string();

        debug!("Scheduling job {} ({}) next at {:?}", job.name(), id, next);
        self.entries.write().await.insert(
            id,
            Entry {
                job,
                expr: expr.to_string(),
                schedule,
                prev: None,
                next,
            },
        );
        self.wake.notify_one();
        Ok(())
    }

    /// Replaces the entry of `job` using the job's own schedule.
    pub async fn update(&self, job: J) -> Result<()> {
        let expr = job.schedule().to_string();
        let schedule = Schedule::parse(&expr)?;
        let next = schedule.next_after(&self.now());

        let mut entries = self.entries.write().await;
        entries.remove(job.id());
        entries.insert(
            job.id().to_string(),
            Entry {
                job,
                expr,
                schedule,
                prev: None,
                next,
            },
        );
        drop(entries);

        self.wake.notify_one();
        Ok(())
    }

    pub async fn remove_job(&self, id: &str) -> bool {
        let removed = self.entries.write().await.remove(id).is_some();
        if removed {
            self.wake.notify_one();
        }
        removed
    }

    pub async fn list_entries(&self) -> Vec<EntrySnapshot> {
        let entries = self.entries.read().await;
        let mut snapshots: Vec<EntrySnapshot> = entries
            .iter()
            .map(|(id, entry)| {
                let owner = entry.job.owner();
                EntrySnapshot {
                    id: id.clone(),
                    name: entry.job.name().to_string(),
                    cronhpa: owner.name.clone(),
                    namespace: owner.namespace.clone(),
                    schedule: entry.expr.clone(),
                    prev: entry.prev.as_ref().map(DateTime::to_rfc3339),
                    next: entry.next.as_ref().map(DateTime::to_rfc3339),
                }
            })
            .collect();
        snapshots.sort_by(|a, b| {
            (&a.namespace, &a.cronhpa, &a.name).cmp(&(&b.namespace, &b.cronhpa, &b.name))
        });
        snapshots
    }

    pub async fn find_job(&self, id: &str) -> Lookup {
        let entries = self.entries.read().await;
        match entries.get(id).and_then(|entry| entry.next) {
            Some(next) if self.now() - next > self.staleness => Lookup::OutOfDate(next),
            _ if entries.contains_key(id) => Lookup::Found,
            _ => Lookup::NotFound,
        }
    }

    /// Dispatch loop. Returns once `shutdown` is cancelled; jobs already
    /// fired keep running to completion.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        info!("Cron engine started in {} time zone", self.timezone);

        loop {
            let wait = self.dispatch_due().await;
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = self.wake.notified() => continue,
                _ = tokio::time::sleep(wait) => {}
            }
        }

        info!("Cron engine stopped");
    }

    /// Fires every due entry and returns how long to sleep until the next one.
    async fn dispatch_due(&self) -> Duration {
        let now = self.now();
        let mut due = Vec::new();
        let mut earliest: Option<DateTime<Tz>> = None;

        {
            let mut entries = self.entries.write().await;
            for entry in entries.values_mut() {
                let Some(next) = entry.next else {
                    continue;
                };
                if next <= now {
                    due.push(entry.job.clone());
                    entry.prev = Some(next);
                    entry.next = if entry.job.run_once() {
                        None
                    } else {
                        entry.schedule.next_after(&now)
                    };
                }
                if let Some(next) = entry.next {
                    earliest = Some(earliest.map_or(next, |current| current.min(next)));
                }
            }
        }

        for job in due {
            self.fire(job);
        }

        earliest
            .and_then(|next| (next - now).to_std().ok())
            .map_or(MAX_IDLE, |wait| wait.min(MAX_IDLE))
    }

    fn fire(&self, job: J) {
        let results = self.results.clone();
        tokio::spawn(async move {
            debug!("Running job {} ({}) of {}", job.name(), job.id(), job.owner());
            let outcome = job.run().await;
            let id = job.id().to_string();
            if results.send(JobResult { job, outcome }).is_err() {
                warn!("Result channel closed, dropping outcome of job {}", id);
            }
        });
    }
}
