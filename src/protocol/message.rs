//! # Packet Model
//!
//! Typed serverbound and clientbound packets, and the [`PayloadCodec`] seam
//! that converts between them and raw [`Frame`]s.
//!
//! [`StandardCodec`] implements the layouts the engine itself needs for
//! protocol revision 340. Play-phase packets the engine does not handle
//! decode to [`ServerboundPacket::Unhandled`] and are ignored; unknown ids in
//! the other phases are malformed.

use bytes::{BufMut, Bytes, BytesMut};
use uuid::Uuid;

use crate::core::codec::Frame;
use crate::core::phase::Phase;
use crate::core::wire::{PacketReader, WireStr, WireWrite};
use crate::error::{constants, ProtocolError, Result};
use crate::players::{ChatMode, ChatType};

pub const MAX_SERVER_ADDRESS_LEN: usize = 255;
pub const MAX_USERNAME_LEN: usize = 16;
pub const MAX_CHAT_LEN: usize = 256;
pub const MAX_LOCALE_LEN: usize = 16;
pub const MAX_SERVER_ID_LEN: usize = 20;
pub const MAX_LEVEL_TYPE_LEN: usize = 16;
pub const MAX_JSON_LEN: usize = 32767;
/// Upper bound on RSA-encrypted blobs in the encryption response
pub const MAX_ENCRYPTED_LEN: usize = 512;

pub mod ids {
    pub const HANDSHAKE: i32 = 0x00;

    pub const STATUS_REQUEST: i32 = 0x00;
    pub const STATUS_PING: i32 = 0x01;
    pub const STATUS_RESPONSE: i32 = 0x00;
    pub const STATUS_PONG: i32 = 0x01;

    pub const LOGIN_START: i32 = 0x00;
    pub const LOGIN_ENCRYPTION_RESPONSE: i32 = 0x01;
    pub const LOGIN_DISCONNECT: i32 = 0x00;
    pub const LOGIN_ENCRYPTION_REQUEST: i32 = 0x01;
    pub const LOGIN_SUCCESS: i32 = 0x02;
    pub const LOGIN_SET_COMPRESSION: i32 = 0x03;

    pub const PLAY_CHAT_SERVERBOUND: i32 = 0x02;
    pub const PLAY_CLIENT_SETTINGS: i32 = 0x04;
    pub const PLAY_KEEPALIVE_SERVERBOUND: i32 = 0x0B;
    pub const PLAY_CHAT_CLIENTBOUND: i32 = 0x0F;
    pub const PLAY_DISCONNECT: i32 = 0x1A;
    pub const PLAY_KEEPALIVE_CLIENTBOUND: i32 = 0x1F;
    pub const PLAY_JOIN_GAME: i32 = 0x23;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub protocol_version: i32,
    pub server_address: WireStr,
    pub server_port: u16,
    /// Raw intent; 1 = Status, 2 = Login
    pub next_phase: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    pub locale: WireStr,
    pub view_distance: i8,
    pub chat_mode: ChatMode,
    pub chat_colors: bool,
    pub skin_parts: u8,
    pub main_hand: i32,
}

/// Packets the client sends
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerboundPacket {
    Handshake(Handshake),
    StatusRequest,
    StatusPing { payload: i64 },
    LoginStart { username: WireStr },
    EncryptionResponse { shared_secret: Bytes, verify_token: Bytes },
    ChatMessage { message: WireStr },
    ClientSettings(ClientSettings),
    KeepAlive { id: i64 },
    Unhandled { id: i32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinGame {
    pub entity_id: i32,
    pub gamemode: u8,
    pub dimension: i32,
    pub difficulty: u8,
    pub max_players: u8,
    pub level_type: String,
    pub reduced_debug_info: bool,
}

/// Packets the server sends
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientboundPacket {
    StatusResponse { json: String },
    Pong { payload: i64 },
    LoginDisconnect { reason: String },
    EncryptionRequest { server_id: String, public_key: Bytes, verify_token: Bytes },
    LoginSuccess { uuid: Uuid, username: String },
    SetCompression { threshold: i32 },
    JoinGame(JoinGame),
    ChatMessage { json: String, position: ChatType },
    PlayDisconnect { reason: String },
    KeepAlive { id: i64 },
}

impl ClientboundPacket {
    pub fn id(&self) -> i32 {
        match self {
            ClientboundPacket::StatusResponse { .. } => ids::STATUS_RESPONSE,
            ClientboundPacket::Pong { .. } => ids::STATUS_PONG,
            ClientboundPacket::LoginDisconnect { .. } => ids::LOGIN_DISCONNECT,
            ClientboundPacket::EncryptionRequest { .. } => ids::LOGIN_ENCRYPTION_REQUEST,
            ClientboundPacket::LoginSuccess { .. } => ids::LOGIN_SUCCESS,
            ClientboundPacket::SetCompression { .. } => ids::LOGIN_SET_COMPRESSION,
            ClientboundPacket::JoinGame(_) => ids::PLAY_JOIN_GAME,
            ClientboundPacket::ChatMessage { .. } => ids::PLAY_CHAT_CLIENTBOUND,
            ClientboundPacket::PlayDisconnect { .. } => ids::PLAY_DISCONNECT,
            ClientboundPacket::KeepAlive { .. } => ids::PLAY_KEEPALIVE_CLIENTBOUND,
        }
    }

    /// Whether this packet may be sent while the session is in `phase`.
    /// A login disconnect is also allowed while still in Handshake, for
    /// failures raised before the phase switch.
    pub fn sendable_in(&self, phase: Phase) -> bool {
        match self {
            ClientboundPacket::StatusResponse { .. } | ClientboundPacket::Pong { .. } => {
                phase == Phase::Status
            }
            ClientboundPacket::LoginDisconnect { .. } => phase.is_pre_play(),
            ClientboundPacket::EncryptionRequest { .. }
            | ClientboundPacket::LoginSuccess { .. }
            | ClientboundPacket::SetCompression { .. } => phase == Phase::Login,
            ClientboundPacket::JoinGame(_)
            | ClientboundPacket::ChatMessage { .. }
            | ClientboundPacket::PlayDisconnect { .. }
            | ClientboundPacket::KeepAlive { .. } => phase == Phase::Play,
        }
    }
}

/// Converts between frames and typed packets for a given phase
pub trait PayloadCodec: Send + Sync {
    fn decode(&self, phase: Phase, frame: Frame) -> Result<ServerboundPacket>;
    fn encode(&self, phase: Phase, packet: &ClientboundPacket) -> Result<Frame>;
}

/// Revision 340 layouts
#[derive(Debug, Default, Clone, Copy)]
pub struct StandardCodec;

impl StandardCodec {
    fn decode_handshake(reader: &mut PacketReader) -> Result<ServerboundPacket> {
        Ok(ServerboundPacket::Handshake(Handshake {
            protocol_version: reader.read_varint()?,
            server_address: reader.read_str(MAX_SERVER_ADDRESS_LEN)?,
            server_port: reader.read_u16()?,
            next_phase: reader.read_varint()?,
        }))
    }

    fn decode_client_settings(reader: &mut PacketReader) -> Result<ServerboundPacket> {
        let locale = reader.read_str(MAX_LOCALE_LEN)?;
        let view_distance = reader.read_i8()?;
        let chat_mode = ChatMode::from_wire(reader.read_varint()?)
            .ok_or(ProtocolError::malformed(constants::ERR_INVALID_CHAT_MODE))?;
        Ok(ServerboundPacket::ClientSettings(ClientSettings {
            locale,
            view_distance,
            chat_mode,
            chat_colors: reader.read_bool()?,
            skin_parts: reader.read_u8()?,
            main_hand: reader.read_varint()?,
        }))
    }
}

impl PayloadCodec for StandardCodec {
    fn decode(&self, phase: Phase, frame: Frame) -> Result<ServerboundPacket> {
        let mut reader = PacketReader::new(frame.payload);
        let packet = match (phase, frame.id) {
            (Phase::Handshake, ids::HANDSHAKE) => Self::decode_handshake(&mut reader)?,

            (Phase::Status, ids::STATUS_REQUEST) => ServerboundPacket::StatusRequest,
            (Phase::Status, ids::STATUS_PING) => ServerboundPacket::StatusPing {
                payload: reader.read_i64()?,
            },

            (Phase::Login, ids::LOGIN_START) => ServerboundPacket::LoginStart {
                username: reader.read_str(MAX_USERNAME_LEN)?,
            },
            (Phase::Login, ids::LOGIN_ENCRYPTION_RESPONSE) => ServerboundPacket::EncryptionResponse {
                shared_secret: reader.read_byte_array(MAX_ENCRYPTED_LEN)?,
                verify_token: reader.read_byte_array(MAX_ENCRYPTED_LEN)?,
            },

            (Phase::Play, ids::PLAY_CHAT_SERVERBOUND) => ServerboundPacket::ChatMessage {
                // Over-long lines reach the chat handler, which rejects them without closing
                message: reader.read_str_bytes(MAX_CHAT_LEN * 4)?,
            },
            (Phase::Play, ids::PLAY_CLIENT_SETTINGS) => Self::decode_client_settings(&mut reader)?,
            (Phase::Play, ids::PLAY_KEEPALIVE_SERVERBOUND) => ServerboundPacket::KeepAlive {
                id: reader.read_i64()?,
            },
            (Phase::Play, id) => return Ok(ServerboundPacket::Unhandled { id }),

            _ => return Err(ProtocolError::malformed(constants::ERR_UNKNOWN_PACKET)),
        };
        reader.finish()?;
        Ok(packet)
    }

    fn encode(&self, phase: Phase, packet: &ClientboundPacket) -> Result<Frame> {
        if !packet.sendable_in(phase) {
            return Err(ProtocolError::InvalidState(constants::ERR_NOT_SENDABLE));
        }

        let mut buf = BytesMut::new();
        match packet {
            ClientboundPacket::StatusResponse { json }
            | ClientboundPacket::LoginDisconnect { reason: json }
            | ClientboundPacket::PlayDisconnect { reason: json } => {
                check_len(json, MAX_JSON_LEN)?;
                buf.put_string(json);
            }
            ClientboundPacket::Pong { payload } => buf.put_i64(*payload),
            ClientboundPacket::KeepAlive { id } => buf.put_i64(*id),
            ClientboundPacket::EncryptionRequest {
                server_id,
                public_key,
                verify_token,
            } => {
                check_len(server_id, MAX_SERVER_ID_LEN)?;
                buf.put_string(server_id);
                buf.put_byte_array(public_key);
                buf.put_byte_array(verify_token);
            }
            ClientboundPacket::LoginSuccess { uuid, username } => {
                let mut text = Uuid::encode_buffer();
                buf.put_string(uuid.hyphenated().encode_lower(&mut text));
                check_len(username, MAX_USERNAME_LEN)?;
                buf.put_string(username);
            }
            ClientboundPacket::SetCompression { threshold } => buf.put_varint(*threshold),
            ClientboundPacket::JoinGame(join) => {
                buf.put_i32(join.entity_id);
                buf.put_u8(join.gamemode);
                buf.put_i32(join.dimension);
                buf.put_u8(join.difficulty);
                buf.put_u8(join.max_players);
                check_len(&join.level_type, MAX_LEVEL_TYPE_LEN)?;
                buf.put_string(&join.level_type);
                buf.put_bool(join.reduced_debug_info);
            }
            ClientboundPacket::ChatMessage { json, position } => {
                check_len(json, MAX_JSON_LEN)?;
                buf.put_string(json);
                buf.put_i8(position.position());
            }
        }
        Ok(Frame::new(packet.id(), buf.freeze()))
    }
}

fn check_len(value: &str, max_chars: usize) -> Result<()> {
    if value.chars().count() > max_chars {
        Err(ProtocolError::malformed(constants::ERR_STRING_TOO_LONG))
    } else {
        Ok(())
    }
}
