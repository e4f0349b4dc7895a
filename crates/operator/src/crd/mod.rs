pub mod cronhpa;
pub mod validation;

pub use cronhpa::{
    Condition, CronHorizontalPodAutoscaler, CronHpa, CronHpaSpec, CronHpaStatus, JobSpec,
    JobState, OwnerKey, ScaleTargetRef,
};
pub use validation::{validate, FieldError};
