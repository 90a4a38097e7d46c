//! # craft-protocol
//!
//! Server-side session engine for a phase-based, varint-framed game protocol
//! (revision 340).
//!
//! A connection starts in the Handshake phase and moves forward to Status or
//! Login, and from Login to Play. Every packet travels in a frame:
//!
//! ```text
//! [VarInt length][VarInt packet id][payload]
//! ```
//!
//! Once compression is on, the body gains a data-length prefix and bodies at
//! or above the threshold are zlib-compressed. Once encryption is on, every
//! byte in both directions passes through AES-128/CFB8.
//!
//! ## Layers
//! - [`core`]: varints, wire primitives, phases and the frame codec
//! - [`transport`]: non-blocking byte streams and their decorators
//! - [`service`]: the per-connection [`Session`](service::Session) and the TCP [`Server`](service::Server)
//! - [`protocol`]: typed packets, dispatch and the per-phase handlers
//! - [`players`]: the shared player registry and chat broadcast
//! - [`utils`]: compression, ciphers, logging and metrics
//!
//! ## Example
//! ```no_run
//! use craft_protocol::config::EngineConfig;
//! use craft_protocol::service::Server;
//! use craft_protocol::utils::logging::init_logging;
//!
//! # async fn run() -> craft_protocol::error::Result<()> {
//! let config = EngineConfig::from_env()?;
//! init_logging(&config.logging)?;
//! Server::bind(config).await?.run().await
//! # }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod players;
pub mod protocol;
pub mod service;
pub mod transport;
pub mod utils;

pub use config::EngineConfig;
pub use error::{ProtocolError, Result};
