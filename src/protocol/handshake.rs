//! Handshake handling: the first packet of every connection.
//!
//! The handshake names the protocol revision the client speaks and the phase
//! it wants next. The session moves to that phase before anything else is
//! checked, so any reason sent afterwards is framed for the new phase.

use std::borrow::Cow;

use tracing::{debug, instrument};

use crate::config::{PROTOCOL_VERSION, VERSION_NAME};
use crate::core::phase::Phase;
use crate::error::{constants, ProtocolError};
use crate::protocol::dispatcher::{ConnectionState, HandlerOutcome};
use crate::protocol::message::Handshake;
use crate::service::session::Session;

/// Disconnect reason for a client on another protocol revision
pub fn version_mismatch_reason(client: i32) -> Cow<'static, str> {
    if client < PROTOCOL_VERSION {
        Cow::Owned(format!("Outdated client! Please use {VERSION_NAME}"))
    } else {
        Cow::Owned(format!("Outdated server! I'm still on {VERSION_NAME}"))
    }
}

#[instrument(level = "debug", skip_all, fields(version = handshake.protocol_version, intent = handshake.next_phase))]
pub fn handle_handshake(
    session: &mut Session,
    state: &mut ConnectionState,
    handshake: Handshake,
) -> HandlerOutcome {
    let Some(next) = Phase::from_handshake_intent(handshake.next_phase) else {
        return HandlerOutcome::from_error(
            ProtocolError::malformed(constants::ERR_INVALID_NEXT_PHASE),
            session.phase(),
        );
    };
    if let Err(e) = session.set_phase(next) {
        return HandlerOutcome::from_error(e, session.phase());
    }

    let address = match handshake.server_address.to_owned_checked() {
        Ok(address) => address,
        Err(e) => return HandlerOutcome::from_error(e, session.phase()),
    };
    debug!(address = %address, port = handshake.server_port, ?next, "Handshake received");
    state.server_address = Some(address);

    if handshake.protocol_version != PROTOCOL_VERSION {
        match next {
            Phase::Login => {
                return HandlerOutcome::fatal(version_mismatch_reason(handshake.protocol_version))
            }
            _ => debug!(
                client = handshake.protocol_version,
                server = PROTOCOL_VERSION,
                "Status request from a different revision"
            ),
        }
    }
    HandlerOutcome::Ok
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mismatch_reasons() {
        assert!(version_mismatch_reason(PROTOCOL_VERSION - 1).starts_with("Outdated client"));
        assert!(version_mismatch_reason(PROTOCOL_VERSION + 1).starts_with("Outdated server"));
    }
}
