pub mod client;
pub mod job;
pub mod target;

pub use client::ScaleClient;
pub use job::{adjust_autoscaler_bounds, ExecutionSettings, ScalingJob};
pub use target::TargetRef;

#[cfg(test)]
pub use client::MockScaleClient;
