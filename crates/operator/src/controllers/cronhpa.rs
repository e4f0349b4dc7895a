use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use kube::{
    api::{Api, ResourceExt},
    runtime::{
        controller::{Action, Controller},
        watcher::{self, Config},
        WatchStreamExt,
    },
    Client,
};
use tracing::{debug, error, info, warn};

use crate::crd::{CronHpa, OwnerKey};
use crate::manager::CronManager;
use crate::{Error, Result};

/// Watches CronHPA resources cluster-wide and hands every change to the
/// cron manager.
#[derive(Clone)]
pub struct CronHpaController {
    client: Client,
    manager: Arc<CronManager>,
}

impl CronHpaController {
    pub fn new(client: Client, manager: Arc<CronManager>) -> Self {
        CronHpaController { client, manager }
    }

    pub async fn run(self: Arc<Self>) -> Result<()> {
        info!("Starting CronHPA controller");

        let resources: Api<CronHpa> = Api::all(self.client.clone());
        let manager = self.manager.clone();

        let controller = Controller::new(resources.clone(), Config::default())
            .shutdown_on_signal()
            .run(Self::reconcile, Self::error_policy, self)
            .for_each(|res| async move {
                match res {
                    Ok((object, _action)) => debug!("Reconciled cronHPA {}", object.name),
                    Err(e) => error!("Reconciliation error: {}", e),
                }
            });

        // The controller only hands over live objects, so deletions are
        // picked up from a watch of their own.
        let deletions = watcher::watcher(resources, Config::default())
            .default_backoff()
            .for_each(|event| {
                let manager = manager.clone();
                async move {
                    match event {
                        Ok(event) => on_watch_event(&manager, event).await,
                        Err(e) => warn!("CronHPA deletion watch failed: {}", e),
                    }
                }
            });

        tokio::select! {
            _ = controller => {}
            _ = deletions => {}
        }

        info!("CronHPA controller stopped");
        Ok(())
    }

    async fn reconcile(resource: Arc<CronHpa>, ctx: Arc<Self>) -> Result<Action> {
        let key = OwnerKey::of(&resource);
        debug!("Reconciling cronHPA {}", key);

        ctx.manager.reconcile(&key).await?;

        // Fired jobs report back through the manager, not through requeues.
        Ok(Action::await_change())
    }

    fn error_policy(resource: Arc<CronHpa>, err: &Error, _ctx: Arc<Self>) -> Action {
        error!("Error processing cronHPA {}: {}", resource.name_any(), err);
        Action::requeue(Duration::from_secs(30))
    }
}

/// Drops the jobs of deleted resources. A relist may hide deletions, so
/// it triggers a GC pass.
async fn on_watch_event(manager: &Arc<CronManager>, event: watcher::Event<CronHpa>) {
    match event {
        watcher::Event::Deleted(resource) => {
            let key = OwnerKey::of(&resource);
            let removed = manager.forget(&key).await;
            info!("cronHPA {} deleted, removed {} jobs", key, removed);
        }
        watcher::Event::Restarted(_) => {
            manager.gc().await;
        }
        watcher::Event::Applied(_) => {}
    }
}
