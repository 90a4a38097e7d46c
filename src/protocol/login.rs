//! # Login
//!
//! Takes a client from LoginStart to Play.
//!
//! ## Flow
//! 1. LoginStart: validate the name, check capacity and duplicates
//! 2. In online mode, EncryptionRequest / EncryptionResponse: the client
//!    returns the verify token and a 16-byte shared secret, both encrypted
//!    with the server key; the secret switches on AES/CFB8 both ways
//! 3. SetCompression (if configured), LoginSuccess, switch to Play
//! 4. Register the player, send JoinGame, announce the join
//!
//! Every rejection before step 3 is Fatal with a reason, so the client sees
//! a login disconnect screen.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::core::phase::Phase;
use crate::core::wire::WireStr;
use crate::error::{constants, ProtocolError, Result};
use crate::players::{ChatComponent, ChatType, Player};
use crate::protocol::context::ServerContext;
use crate::protocol::dispatcher::{ConnectionState, HandlerOutcome, LoginState};
use crate::protocol::message::{ClientboundPacket, JoinGame, MAX_USERNAME_LEN};
use crate::service::session::Session;
use crate::utils::crypto::SHARED_SECRET_LEN;
use crate::utils::metrics::global_metrics;

/// Server half of the key exchange used in online mode
pub trait KeyExchange: Send + Sync {
    /// DER-encoded public key sent in the encryption request
    fn public_key(&self) -> Bytes;

    /// Decrypt a blob the client encrypted with the public key
    fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>>;
}

/// 1-16 characters of ASCII letters, digits and underscore
pub fn is_valid_username(name: &str) -> bool {
    (1..=MAX_USERNAME_LEN).contains(&name.len())
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_')
}

fn reject(reason: &'static str) -> HandlerOutcome {
    global_metrics().login_failed();
    HandlerOutcome::fatal(reason)
}

fn rejection_for(err: ProtocolError, phase: Phase) -> HandlerOutcome {
    global_metrics().login_failed();
    HandlerOutcome::from_error(err, phase)
}

#[instrument(level = "debug", skip_all, fields(username = ?username))]
pub fn handle_login_start(
    ctx: &ServerContext,
    session: &mut Session,
    state: &mut ConnectionState,
    username: WireStr,
) -> HandlerOutcome {
    if state.login != LoginState::AwaitingStart {
        return reject("Unexpected login start");
    }
    let username = match username.to_owned_checked() {
        Ok(name) => name,
        Err(e) => return rejection_for(e, session.phase()),
    };
    if !is_valid_username(&username) {
        return reject("Invalid username");
    }
    if ctx.registry.is_full() {
        return reject("The server is full!");
    }
    if ctx.registry.contains_name(&username) {
        return reject(constants::ERR_DUPLICATE_PLAYER);
    }

    if let (true, Some(key_exchange)) = (ctx.config.session.online_mode, &ctx.key_exchange) {
        let verify_token: [u8; 4] = rand::random();
        let request = ClientboundPacket::EncryptionRequest {
            server_id: String::new(),
            public_key: key_exchange.public_key(),
            verify_token: Bytes::copy_from_slice(&verify_token),
        };
        if let Err(e) = session.queue_packet(&request) {
            return rejection_for(e, session.phase());
        }
        debug!(username = %username, "Encryption requested");
        state.login = LoginState::AwaitingEncryption {
            username,
            verify_token,
        };
        return HandlerOutcome::Ok;
    }

    finish_login(ctx, session, state, username)
}

#[instrument(level = "debug", skip_all)]
pub fn handle_encryption_response(
    ctx: &ServerContext,
    session: &mut Session,
    state: &mut ConnectionState,
    shared_secret: &[u8],
    verify_token: &[u8],
) -> HandlerOutcome {
    let LoginState::AwaitingEncryption {
        username,
        verify_token: expected,
    } = std::mem::take(&mut state.login)
    else {
        return reject("Unexpected encryption response");
    };
    let Some(key_exchange) = ctx.key_exchange.as_ref() else {
        return reject("Encryption is not available");
    };

    match key_exchange.decrypt(verify_token) {
        Ok(token) if token == expected => {}
        Ok(_) => return reject("Invalid verify token"),
        Err(e) => return rejection_for(e, session.phase()),
    }
    let secret = match key_exchange.decrypt(shared_secret) {
        Ok(secret) if secret.len() == SHARED_SECRET_LEN => secret,
        Ok(_) => return reject("Invalid shared secret"),
        Err(e) => return rejection_for(e, session.phase()),
    };
    if let Err(e) = session.enable_encryption(&secret) {
        return rejection_for(e, session.phase());
    }

    finish_login(ctx, session, state, username)
}

/// Switch the session to Play and register the player
pub fn finish_login(
    ctx: &ServerContext,
    session: &mut Session,
    state: &mut ConnectionState,
    username: String,
) -> HandlerOutcome {
    let (mailbox_tx, mailbox_rx) = mpsc::channel(ctx.config.server.backpressure_limit.max(1));
    let player = Arc::new(Player::new(
        ctx.registry.next_id(),
        username,
        Uuid::new_v4(),
        mailbox_tx,
    ));
    if let Err(e) = ctx.registry.join(player.clone()) {
        return match e {
            ProtocolError::InvalidState(reason) => reject(reason),
            other => rejection_for(other, session.phase()),
        };
    }
    state.player = Some(player.clone());
    state.mailbox = Some(mailbox_rx);
    state.login = LoginState::Complete;

    if let Err(e) = send_login_success(ctx, session, &player) {
        return rejection_for(e, session.phase());
    }

    global_metrics().login_succeeded();
    info!(player = %player.username(), uuid = %player.uuid(), peer = ?session.peer_addr(), "Login complete");

    let joined = ChatComponent::text(format!("{} joined the game", player.username())).with_color("yellow");
    if let Err(e) = ctx.broadcaster.broadcast(&joined, ChatType::System) {
        return HandlerOutcome::Err(e);
    }
    HandlerOutcome::Ok
}

fn send_login_success(ctx: &ServerContext, session: &mut Session, player: &Player) -> Result<()> {
    if let Some(threshold) = ctx.config.session.compression_threshold {
        session.queue_packet(&ClientboundPacket::SetCompression {
            threshold: i32::try_from(threshold).unwrap_or(i32::MAX),
        })?;
        session.enable_compression(threshold as usize)?;
    }
    session.queue_packet(&ClientboundPacket::LoginSuccess {
        uuid: player.uuid(),
        username: player.username().to_owned(),
    })?;
    session.set_phase(Phase::Play)?;

    session.queue_packet(&ClientboundPacket::JoinGame(JoinGame {
        entity_id: player.id().0 as i32,
        gamemode: 0,
        dimension: 0,
        difficulty: 2,
        max_players: u8::try_from(ctx.config.server.max_players).unwrap_or(u8::MAX),
        level_type: String::from("default"),
        reduced_debug_info: false,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_username_rules() {
        assert!(is_valid_username("Steve"));
        assert!(is_valid_username("a_b_1"));
        assert!(is_valid_username("sixteen_chars_ok"));
        assert!(!is_valid_username(""));
        assert!(!is_valid_username("seventeen_chars__"));
        assert!(!is_valid_username("space name"));
        assert!(!is_valid_username("émile"));
    }
}
