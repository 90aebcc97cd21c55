//! Telegram context interface — re-exported from the shared pipeline.
//!
//! `TelegramAppContext` is an alias for `nexus_agent::pipeline::MessageContext`.
//! All channel adapters share the same trait, defined once in `nexus-agent`.

pub use nexus_agent::pipeline::MessageContext as TelegramAppContext;
