//! Server-list status exchange.

use serde::Serialize;
use tracing::debug;

use crate::config::{PROTOCOL_VERSION, VERSION_NAME};
use crate::error::Result;
use crate::protocol::context::ServerContext;
use crate::protocol::dispatcher::HandlerOutcome;
use crate::protocol::message::ClientboundPacket;
use crate::service::session::Session;

/// Players listed in the status sample
pub const STATUS_SAMPLE_SIZE: usize = 12;

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub version: StatusVersion,
    pub players: StatusPlayers,
    pub description: StatusDescription,
}

#[derive(Debug, Serialize)]
pub struct StatusVersion {
    pub name: &'static str,
    pub protocol: i32,
}

#[derive(Debug, Serialize)]
pub struct StatusPlayers {
    pub max: usize,
    pub online: usize,
    pub sample: Vec<StatusSample>,
}

#[derive(Debug, Serialize)]
pub struct StatusSample {
    pub name: String,
    pub id: String,
}

#[derive(Debug, Serialize)]
pub struct StatusDescription {
    pub text: String,
}

/// Build the status document. Count and sample come from one registry read.
pub fn build_status(ctx: &ServerContext) -> Result<String> {
    let (online, sample) = ctx.registry.with_players(|players| {
        let sample = players
            .iter()
            .take(STATUS_SAMPLE_SIZE)
            .map(|p| StatusSample {
                name: p.username().to_owned(),
                id: p.uuid().hyphenated().to_string(),
            })
            .collect();
        (players.len(), sample)
    });

    let response = StatusResponse {
        version: StatusVersion {
            name: VERSION_NAME,
            protocol: PROTOCOL_VERSION,
        },
        players: StatusPlayers {
            max: ctx.config.server.max_players,
            online,
            sample,
        },
        description: StatusDescription {
            text: ctx.config.server.motd.clone(),
        },
    };
    Ok(serde_json::to_string(&response)?)
}

pub fn handle_request(ctx: &ServerContext, session: &mut Session) -> HandlerOutcome {
    let phase = session.phase();
    let result = build_status(ctx)
        .and_then(|json| session.queue_packet(&ClientboundPacket::StatusResponse { json }));
    match result {
        Ok(()) => HandlerOutcome::Ok,
        Err(e) => HandlerOutcome::from_error(e, phase),
    }
}

/// Answer the ping, then end the connection; status clients never send more
pub fn handle_ping(session: &mut Session, payload: i64) -> HandlerOutcome {
    let phase = session.phase();
    match session.queue_packet(&ClientboundPacket::Pong { payload }) {
        Ok(()) => {
            debug!(peer = ?session.peer_addr(), "Status ping answered");
            HandlerOutcome::fatal_silent()
        }
        Err(e) => HandlerOutcome::from_error(e, phase),
    }
}
