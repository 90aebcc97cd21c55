//! `nexus-flows` — multi-step agent chain execution (C8, spec §4.8).
//!
//! Has no teacher counterpart; grounded directly on
//! `original_source/executive_assistant/flows/runner.py` (see `SPEC_FULL.md`
//! §2.4). A [`spec::FlowSpec`] is persisted as JSON inside a
//! `nexus_scheduler::ScheduledFlow` row; [`runner::execute_flow`] is invoked
//! either immediately (via the `run_flow` tool) or when the scheduler fires a
//! due row.

pub mod error;
pub mod runner;
pub mod spec;
pub mod tools;

pub use error::{FlowError, Result};
pub use runner::execute_flow;
pub use spec::{AgentSpec, FlowSpec, ScheduleType, FLOW_TOOL_NAMES};
