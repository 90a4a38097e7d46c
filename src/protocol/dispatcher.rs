//! # Packet Dispatch
//!
//! Routes each decoded packet to its handler and turns the handler's
//! [`HandlerOutcome`] into an action on the session.
//!
//! Routing is an exhaustive `match` over [`ServerboundPacket`]; the codec has
//! already tied every variant to the phase it was decoded in, so there is no
//! runtime table to consult.
//!
//! ## Outcomes
//! - **Ok**: keep going
//! - **Err**: log and keep going
//! - **Fatal**: close; in Handshake or Login, first send the carried reason
//!   as a login disconnect
//! - **Closed**: the peer is gone; close without writing

use std::borrow::Cow;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::core::phase::Phase;
use crate::error::{ErrorKind, ProtocolError};
use crate::players::{ChatComponent, Outbound, Player};
use crate::protocol::context::ServerContext;
use crate::protocol::message::{ClientboundPacket, ServerboundPacket};
use crate::protocol::{handshake, login, play, status};
use crate::service::session::{Session, CLOSE_FLUSH_TIMEOUT};
use crate::utils::metrics::global_metrics;

const OUT_OF_MEMORY_REASON: &str = "Out of memory";

/// Result of handling one packet
#[derive(Debug)]
pub enum HandlerOutcome {
    Ok,
    Err(ProtocolError),
    /// Close the session, optionally telling a pre-play client why
    Fatal(Option<Cow<'static, str>>),
    Closed,
}

impl HandlerOutcome {
    pub fn fatal(reason: impl Into<Cow<'static, str>>) -> Self {
        HandlerOutcome::Fatal(Some(reason.into()))
    }

    pub fn fatal_silent() -> Self {
        HandlerOutcome::Fatal(None)
    }

    /// Translate an error raised while handling a packet in `phase`.
    ///
    /// Reasons are only attached in Login, the one phase whose client shows
    /// them; the out-of-memory reason is a static string.
    pub fn from_error(err: ProtocolError, phase: Phase) -> Self {
        let explain = phase == Phase::Login;
        match err.kind() {
            ErrorKind::Closed => HandlerOutcome::Closed,
            ErrorKind::WouldBlock => HandlerOutcome::Ok,
            ErrorKind::OutOfMemory => {
                HandlerOutcome::Fatal(explain.then_some(Cow::Borrowed(OUT_OF_MEMORY_REASON)))
            }
            ErrorKind::Malformed | ErrorKind::ProtocolMismatch => {
                HandlerOutcome::Fatal(explain.then(|| Cow::Owned(err.to_string())))
            }
            ErrorKind::Io => HandlerOutcome::Fatal(None),
            ErrorKind::Other => match err {
                ProtocolError::EncryptionFailure
                | ProtocolError::CompressionFailure
                | ProtocolError::InvalidPhaseTransition { .. } => {
                    HandlerOutcome::Fatal(explain.then(|| Cow::Owned(err.to_string())))
                }
                other => HandlerOutcome::Err(other),
            },
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, HandlerOutcome::Ok)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, HandlerOutcome::Fatal(_) | HandlerOutcome::Closed)
    }
}

impl<E: Into<ProtocolError>> From<std::result::Result<(), E>> for HandlerOutcome {
    fn from(result: std::result::Result<(), E>) -> Self {
        match result {
            Ok(()) => HandlerOutcome::Ok,
            Err(e) => HandlerOutcome::Err(e.into()),
        }
    }
}

/// Where a login is in its exchange
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LoginState {
    #[default]
    AwaitingStart,
    AwaitingEncryption {
        username: String,
        verify_token: [u8; 4],
    },
    Complete,
}

/// Per-connection handler state that lives beside the session
#[derive(Debug, Default)]
pub struct ConnectionState {
    pub server_address: Option<String>,
    pub login: LoginState,
    pub player: Option<Arc<Player>>,
    pub mailbox: Option<mpsc::Receiver<Outbound>>,
}

/// What the connection loop does after an outcome was applied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Close,
}

/// Route `packet` to its handler
pub fn dispatch(
    ctx: &ServerContext,
    session: &mut Session,
    state: &mut ConnectionState,
    packet: ServerboundPacket,
) -> HandlerOutcome {
    trace!(phase = ?session.phase(), ?packet, "Dispatching");
    match packet {
        ServerboundPacket::Handshake(handshake) => {
            handshake::handle_handshake(session, state, handshake)
        }
        ServerboundPacket::StatusRequest => status::handle_request(ctx, session),
        ServerboundPacket::StatusPing { payload } => status::handle_ping(session, payload),
        ServerboundPacket::LoginStart { username } => {
            login::handle_login_start(ctx, session, state, username)
        }
        ServerboundPacket::EncryptionResponse {
            shared_secret,
            verify_token,
        } => login::handle_encryption_response(ctx, session, state, &shared_secret, &verify_token),
        ServerboundPacket::ChatMessage { message } => play::handle_chat(ctx, state, message),
        ServerboundPacket::ClientSettings(settings) => play::handle_settings(state, settings),
        ServerboundPacket::KeepAlive { id } => play::handle_keepalive(state, id),
        ServerboundPacket::Unhandled { id } => {
            trace!(id, "Ignoring unhandled play packet");
            HandlerOutcome::Ok
        }
    }
}

/// Act on `outcome` for `session`
pub async fn apply(session: &mut Session, outcome: HandlerOutcome) -> Flow {
    match outcome {
        HandlerOutcome::Ok => Flow::Continue,
        HandlerOutcome::Err(err) => {
            global_metrics().protocol_error();
            match err.kind() {
                ErrorKind::Io => warn!(peer = ?session.peer_addr(), error = %err, "Handler error"),
                _ => debug!(peer = ?session.peer_addr(), error = %err, "Handler error"),
            }
            Flow::Continue
        }
        HandlerOutcome::Fatal(reason) => {
            let phase = session.phase();
            if phase == Phase::Login {
                info!(peer = ?session.peer_addr(), reason = ?reason, "Closing login session");
            } else {
                debug!(peer = ?session.peer_addr(), ?phase, reason = ?reason, "Closing session");
            }

            if let (true, Some(reason)) = (phase.is_pre_play(), reason) {
                if let Err(e) = queue_login_disconnect(session, reason) {
                    debug!(error = %e, "Could not queue disconnect");
                }
            }
            if let Err(e) = session.flush_within(CLOSE_FLUSH_TIMEOUT).await {
                trace!(error = %e, "Final flush failed");
            }
            session.close();
            Flow::Close
        }
        HandlerOutcome::Closed => {
            session.close();
            Flow::Close
        }
    }
}

fn queue_login_disconnect(
    session: &mut Session,
    reason: Cow<'static, str>,
) -> crate::error::Result<()> {
    let json = ChatComponent::text(reason.into_owned()).to_json()?;
    session.queue_packet(&ClientboundPacket::LoginDisconnect { reason: json })
}
