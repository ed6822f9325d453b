//! The resource-and-job scheduling core of a batch system: models a fleet
//! of compute nodes, places queued jobs under a drain-and-backfill policy,
//! and maintains time-bounded resource reservations over a job's
//! lifetime. See `SPEC_FULL.md` for the full component breakdown.

pub mod bridge;
pub mod config;
pub mod domain;
pub mod error;
pub mod facade;
pub mod fleet;
pub mod logger;
pub mod refresh_loop;

pub use config::Config;
pub use error::{Error, Result};
pub use facade::Scheduler;
pub use fleet::Fleet;
