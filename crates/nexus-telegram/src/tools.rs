//! Tool re-export for the Telegram adapter.
//!
//! All tools are shared — implemented once in `nexus-agent` and re-exported here
//! following the same thin-wrapper pattern as `nexus-discord/src/tools.rs`.

pub use nexus_agent::tools::build::build_tools;
