//! `nexus-hooks` — ambient before/after event bus, distinct from the
//! reasoning loop's own middleware pipeline (C5, see `nexus-agent::middleware`).
//!
//! This crate answers "what happened" (observability: LLM calls, tool
//! calls, session lifecycle) for anything subscribed to it; the middleware
//! pipeline answers "what should happen next" for the loop itself. Kept
//! separate because hooks are optional/pluggable observers with no
//! authority to change loop routing, while middleware hooks are part of
//! the loop's own control flow.

pub mod engine;
pub mod error;
pub mod types;

pub use engine::HookEngine;
pub use error::{HookError, Result};
pub use types::{
    HookAction, HookContext, HookDefinition, HookEvent, HookHandler, HookResult, HookTiming,
};
