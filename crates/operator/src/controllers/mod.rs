pub mod cronhpa;

pub use cronhpa::CronHpaController;
