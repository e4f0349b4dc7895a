pub mod config;
pub mod controllers;
pub mod crd;
pub mod cron;
pub mod kubernetes;
pub mod manager;
pub mod metrics;
pub mod scaling;
pub mod server;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;

use thiserror::Error;

use crate::cron::ParseError;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Kubernetes error: {0}")]
    Kubernetes(#[from] kube::Error),
    #[error("Schedule error: {0}")]
    Schedule(#[from] ParseError),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    SerdeJson(#[from] serde_json::Error),
    #[error("Internal error: {0}")]
    Internal(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Execution error: {0}")]
    Execution(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Conflict: {0}")]
    Conflict(String),
}

pub type Result<T> = std::result::Result<T, Error>;
