pub mod domain;
pub mod infrastructure;
pub mod queue;
pub mod repositories;
pub mod services;
pub mod telemetry;
