use prometheus::{Encoder, IntGauge, Registry, TextEncoder};

use crate::{Error, Result};

/// Job counts computed by one garbage-collection pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobCounts {
    pub total: i64,
    pub submitted: i64,
    pub succeeded: i64,
    pub failed: i64,
    pub expired: i64,
}

pub struct Metrics {
    registry: Registry,
    total: IntGauge,
    submitted: IntGauge,
    succeeded: IntGauge,
    failed: IntGauge,
    expired: IntGauge,
}

impl Metrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();
        let gauge = |name: &str, help: &str| -> Result<IntGauge> {
            let gauge = IntGauge::new(name, help).map_err(metrics_error)?;
            registry
                .register(Box::new(gauge.clone()))
                .map_err(metrics_error)?;
            Ok(gauge)
        };

        let total = gauge(
            "kube_jobs_in_cron_engine_total",
            "Jobs in queue of Cron Engine",
        )?;
        let submitted = gauge(
            "kube_submitted_jobs_in_cron_engine_total",
            "Submitted jobs in queue of Cron Engine",
        )?;
        let succeeded = gauge(
            "kube_successful_jobs_in_cron_engine_total",
            "Successful jobs in queue of Cron Engine",
        )?;
        let failed = gauge(
            "kube_failed_jobs_in_cron_engine_total",
            "Failed jobs in queue of Cron Engine",
        )?;
        let expired = gauge(
            "kube_expired_jobs_in_cron_engine_total",
            "Expired jobs in queue of Cron Engine",
        )?;

        Ok(Self {
            registry,
            total,
            submitted,
            succeeded,
            failed,
            expired,
        })
    }

    pub fn publish(&self, counts: &JobCounts) {
        self.total.set(counts.total);
        self.submitted.set(counts.submitted);
        self.succeeded.set(counts.succeeded);
        self.failed.set(counts.failed);
        self.expired.set(counts.expired);
    }

    /// Text exposition of every registered metric.
    pub fn gather(&self) -> Result<String> {
        let mut buffer = vec![];
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(metrics_error)?;
        String::from_utf8(buffer).map_err(|e| Error::Internal(e.to_string()))
    }
}

fn metrics_error(err: prometheus::Error) -> Error {
    Error::Internal(format!("metrics: {}", err))
}
