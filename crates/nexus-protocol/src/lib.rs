//! `nexus-protocol` — wire frames for the gateway's WebSocket surface
//! (§6.1). Out-of-scope per spec.md (a specific transport's bytes), but the
//! handshake/frame *shape* is part of the external interface contract, so
//! it is kept here rather than inlined into the gateway binary.

pub mod frames;
pub mod handshake;
pub mod methods;

pub use frames::{ReqFrame, ResFrame};
pub use handshake::{AuthPayload, ClientInfo, ConnectChallenge, ConnectParams};
