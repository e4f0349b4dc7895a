mod engine;
mod exclusion;
mod schedule;

pub use engine::{CronEngine, EntrySnapshot, JobResult, Lookup, Runnable};
pub use exclusion::excluded_by;
pub use schedule::{CronSpec, Field, ParseError, Schedule};
