//! # Service Layer
//!
//! Sessions and the server that accepts and drives them.
//!
//! ## Components
//! - **Session**: per-connection phase and stream pipeline
//! - **Server**: accept loop, connection driver and graceful shutdown

pub mod server;
pub mod session;

pub use server::{drive_session, Server};
pub use session::Session;
