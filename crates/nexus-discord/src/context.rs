//! Discord context interface — re-exported from the shared pipeline.
//!
//! `DiscordAppContext` is now an alias for `nexus_agent::pipeline::MessageContext`.
//! All channel adapters share the same trait, defined once in `nexus-agent` to
//! avoid circular dependencies.

pub use nexus_agent::pipeline::MessageContext as DiscordAppContext;
