pub mod config;
pub mod error;
pub mod gateway;
pub mod notify;
pub mod project;
pub mod schedule;
pub mod scheduler;

pub use config::{BackendKind, SchedulerConfig};
pub use error::{Result, SchedulerError};
pub use project::{ProjectPerms, ShareStatus};
pub use scheduler::{build_default_scheduler, build_scheduler, Scheduler};
