use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::cron::Schedule;

#[derive(CustomResource, Debug, Serialize, Deserialize, Clone, PartialEq, JsonSchema)]
#[kube(
    group = "autoscaling.alibabacloud.com",
    version = "v1beta1",
    kind = "CronHorizontalPodAutoscaler",
    namespaced,
    shortname = "cronhpa",
    status = "CronHpaStatus",
    printcolumn = r#"{"name":"Target","type":"string","jsonPath":".spec.scaleTargetRef.name"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
pub struct CronHpaSpec {
    /// Cron expressions of days on which no job runs
    #[serde(rename = "excludeDates", default)]
    pub exclude_dates: Vec<String>,

    /// Workload whose replica count is adjusted
    #[serde(rename = "scaleTargetRef")]
    pub scale_target_ref: ScaleTargetRef,

    /// Scheduled replica changes
    #[serde(default)]
    pub jobs: Vec<JobSpec>,
}

pub type CronHpa = CronHorizontalPodAutoscaler;

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq, JsonSchema)]
pub struct ScaleTargetRef {
    /// API version of the target, e.g. apps/v1
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Kind of the target, e.g. Deployment
    pub kind: String,

    /// Name of the target in the resource's namespace
    pub name: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, JsonSchema)]
pub struct JobSpec {
    /// Unique within the resource
    pub name: String,

    /// Six-field cron expression or descriptor
    pub schedule: String,

    /// Fire a single time, then stop
    #[serde(rename = "runOnce", default)]
    pub run_once: bool,

    /// Desired replica count
    #[serde(rename = "targetSize")]
    pub target_size: i32,
}

impl JobSpec {
    /// One-shot schedules only ever fire once, regardless of the flag.
    pub fn is_run_once(&self) -> bool {
        self.run_once || Schedule::parse(&self.schedule).is_ok_and(|s| s.is_one_shot())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, JsonSchema)]
pub struct CronHpaStatus {
    /// Last applied target
    #[serde(rename = "scaleTargetRef", skip_serializing_if = "Option::is_none")]
    pub scale_target_ref: Option<ScaleTargetRef>,

    /// Last applied exclusion dates
    #[serde(rename = "excludeDates", default)]
    pub exclude_dates: Vec<String>,

    /// One entry per declared job
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, JsonSchema)]
pub struct Condition {
    pub name: String,

    #[serde(rename = "jobId")]
    pub job_id: String,

    pub schedule: String,

    #[serde(rename = "targetSize")]
    pub target_size: i32,

    #[serde(rename = "runOnce", default)]
    pub run_once: bool,

    pub state: JobState,

    /// RFC 3339 timestamp of the last state change
    #[serde(rename = "lastProbeTime")]
    pub last_probe_time: String,

    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, JsonSchema)]
pub enum JobState {
    Submitted,
    Succeed,
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Succeed | JobState::Failed)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Submitted => write!(f, "Submitted"),
            JobState::Succeed => write!(f, "Succeed"),
            JobState::Failed => write!(f, "Failed"),
        }
    }
}

/// Lookup key of a CronHPA resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OwnerKey {
    pub namespace: String,
    pub name: String,
}

impl OwnerKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    pub fn of(resource: &CronHpa) -> Self {
        Self::new(
            resource.namespace().unwrap_or_else(|| "default".to_string()),
            resource.name_any(),
        )
    }
}

impl fmt::Display for OwnerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}
