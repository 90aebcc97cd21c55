//! `nexus-scheduler` — Tokio-based job scheduler with SQLite persistence.
//!
//! # Overview
//!
//! Jobs are persisted to a SQLite `jobs` table. The [`engine::SchedulerEngine`]
//! polls the database every second and executes any job whose `next_run` has
//! arrived, updating state and computing the next scheduled time.
//!
//! # Schedule variants
//!
//! | Variant    | Behaviour                                          |
//! |------------|----------------------------------------------------|
//! | `Once`     | Single fire at an absolute UTC instant             |
//! | `Interval` | Repeat every N seconds                             |
//! | `Daily`    | Fire at HH:MM UTC every day                        |
//! | `Weekly`   | Fire at HH:MM UTC on a specific weekday            |
//! | `Cron`     | 5-field cron expression, `@hourly`/`@daily`/... shortcut, or "daily at HH:MM" |

pub mod cron;
pub mod db;
pub mod engine;
pub mod error;
pub mod flows_store;
pub mod reminders;
pub mod schedule;
pub mod time_parse;
pub mod types;

pub use engine::{SchedulerEngine, SchedulerHandle};
pub use error::{Result, SchedulerError};
pub use flows_store::{FlowStatus, ScheduledFlow, ScheduledFlowStore};
pub use reminders::{Reminder, ReminderStatus, ReminderStore};
pub use types::{Job, JobStatus, Schedule};
