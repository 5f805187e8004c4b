//! Background jobs for livepoll-rs.
//!
//! - **Scheduler**: periodic poll status updates (start due polls, close
//!   expired ones)

pub mod scheduler;

pub use scheduler::{JobExecutor, SchedulerConfig, run_scheduler};
