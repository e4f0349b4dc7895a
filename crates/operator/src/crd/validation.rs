use std::collections::HashSet;
use std::fmt;

use super::CronHpaSpec;
use crate::cron::Schedule;

type Validator = fn(&CronHpaSpec) -> Result<(), String>;

/// Field validators, applied in order.
const VALIDATORS: &[(&str, Validator)] = &[
    ("scaleTargetRef", validate_target),
    ("jobs", validate_jobs),
    ("excludeDates", validate_exclude_dates),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.field, self.message)
    }
}

/// Runs every field validator and collects the failures.
pub fn validate(spec: &CronHpaSpec) -> Vec<FieldError> {
    VALIDATORS
        .iter()
        .filter_map(|(field, validator)| {
            validator(spec).err().map(|message| FieldError {
                field: *field,
                message,
            })
        })
        .collect()
}

fn validate_target(spec: &CronHpaSpec) -> Result<(), String> {
    let target = &spec.scale_target_ref;
    if target.kind.trim().is_empty() {
        return Err("kind must not be empty".to_string());
    }
    if target.name.trim().is_empty() {
        return Err("name must not be empty".to_string());
    }
    match target.api_version.split_once('/') {
        Some((group, version)) if !group.is_empty() && !version.is_empty() => Ok(()),
        _ => Err(format!(
            "apiVersion '{}' must have the form group/version",
            target.api_version
        )),
    }
}

fn validate_jobs(spec: &CronHpaSpec) -> Result<(), String> {
    let mut seen = HashSet::new();
    for job in &spec.jobs {
        if job.name.trim().is_empty() {
            return Err("every job needs a name".to_string());
        }
        if !seen.insert(job.name.as_str()) {
            return Err(format!("job name '{}' is used more than once", job.name));
        }
        if job.target_size < 0 {
            return Err(format!(
                "job '{}' has negative targetSize {}",
                job.name, job.target_size
            ));
        }
        Schedule::parse(&job.schedule).map_err(|e| format!("job '{}': {}", job.name, e))?;
    }
    Ok(())
}

fn validate_exclude_dates(spec: &CronHpaSpec) -> Result<(), String> {
    for date in &spec.exclude_dates {
        Schedule::parse(date).map_err(|e| e.to_string())?;
    }
    Ok(())
}
