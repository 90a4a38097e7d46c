//! # Protocol Layer
//!
//! Packet model, dispatch and the per-phase handlers.
//!
//! ## Components
//! - **Message**: typed packets and the payload codec seam
//! - **Dispatcher**: packet routing and outcome handling
//! - **Context**: configuration, registry and collaborators shared by handlers
//! - **Handshake / Status / Login / Play**: one module per phase
//!
//! Handlers are synchronous. They queue packets on the session and return a
//! [`HandlerOutcome`](dispatcher::HandlerOutcome); the connection loop
//! flushes and acts on the outcome.

pub mod context;
pub mod dispatcher;
pub mod handshake;
pub mod login;
pub mod message;
pub mod play;
pub mod status;


pub use context::ServerContext;
pub use dispatcher::{apply, dispatch, ConnectionState, Flow, HandlerOutcome};
pub use login::KeyExchange;
pub use message::{ClientboundPacket, PayloadCodec, ServerboundPacket, StandardCodec};
