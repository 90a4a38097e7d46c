//! Play-phase handlers: chat, client settings and keepalive replies.

use tokio::time::Instant;
use tracing::debug;

use crate::core::wire::WireStr;
use crate::error::{constants, ProtocolError};
use crate::players::{ChatComponent, ChatSettings, ChatType};
use crate::protocol::context::ServerContext;
use crate::protocol::dispatcher::{ConnectionState, HandlerOutcome};
use crate::protocol::message::{ClientSettings, MAX_CHAT_LEN};

const ERR_NO_PLAYER: &str = "Play packet before the player joined";
const ERR_KEEPALIVE_MISMATCH: &str = "KeepAlive reply does not match the outstanding id";

pub const UNKNOWN_COMMAND: &str = "Unknown command.";

pub fn handle_settings(state: &mut ConnectionState, settings: ClientSettings) -> HandlerOutcome {
    let Some(player) = state.player.as_ref() else {
        return HandlerOutcome::Err(ProtocolError::InvalidState(ERR_NO_PLAYER));
    };
    let locale = match settings.locale.to_owned_checked() {
        Ok(locale) => locale,
        Err(e) => return HandlerOutcome::Err(e),
    };
    player.update_settings(ChatSettings {
        locale,
        view_distance: settings.view_distance,
        mode: settings.chat_mode,
        colors: settings.chat_colors,
    });
    HandlerOutcome::Ok
}

pub fn handle_chat(ctx: &ServerContext, state: &mut ConnectionState, message: WireStr) -> HandlerOutcome {
    let Some(player) = state.player.as_ref() else {
        return HandlerOutcome::Err(ProtocolError::InvalidState(ERR_NO_PLAYER));
    };
    let text = message.as_str();
    if text.chars().count() > MAX_CHAT_LEN {
        return HandlerOutcome::Err(ProtocolError::malformed(constants::ERR_STRING_TOO_LONG));
    }

    if text.starts_with('/') {
        debug!(player = %player.username(), command = text, "Command rejected");
        let reply = ChatComponent::text(UNKNOWN_COMMAND).with_color("red");
        return ctx
            .broadcaster
            .send_to(player, &reply, ChatType::System)
            .map(|_| ())
            .into();
    }

    let line = ChatComponent::text(format!("<{}> {}", player.username(), text));
    ctx.broadcaster
        .broadcast(&line, ChatType::Chat)
        .map(|_| ())
        .into()
}

pub fn handle_keepalive(state: &mut ConnectionState, id: i64) -> HandlerOutcome {
    let Some(player) = state.player.as_ref() else {
        return HandlerOutcome::Err(ProtocolError::InvalidState(ERR_NO_PLAYER));
    };
    if player.with_keepalive(|k| k.acknowledge(id, Instant::now())) {
        HandlerOutcome::Ok
    } else {
        HandlerOutcome::Err(ProtocolError::malformed(ERR_KEEPALIVE_MISMATCH))
    }
}
