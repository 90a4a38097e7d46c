//! Player identity, chat settings, keepalive bookkeeping and mailbox.

use std::fmt;
use std::sync::{Mutex, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use super::chat::ChatType;
use super::{mutex_lock, read_lock, write_lock};
use crate::utils::metrics::global_metrics;

/// Server-assigned player id, unique for the life of the process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PlayerId(pub u32);

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which chat categories a client wants to see
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChatMode {
    Enabled,
    CommandsOnly,
    Hidden,
}

impl ChatMode {
    pub const ALL: [ChatMode; 3] = [ChatMode::Enabled, ChatMode::CommandsOnly, ChatMode::Hidden];

    pub fn from_wire(value: i32) -> Option<Self> {
        match value {
            0 => Some(ChatMode::Enabled),
            1 => Some(ChatMode::CommandsOnly),
            2 => Some(ChatMode::Hidden),
            _ => None,
        }
    }

    pub fn to_wire(self) -> i32 {
        self as i32
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatSettings {
    pub locale: String,
    pub view_distance: i8,
    pub mode: ChatMode,
    pub colors: bool,
}

impl ChatSettings {
    pub fn new(mode: ChatMode, colors: bool) -> Self {
        Self {
            locale: String::from("en_us"),
            view_distance: 10,
            mode,
            colors,
        }
    }
}

/// Keepalive state. At most one request is outstanding at a time.
#[derive(Debug, Default, Clone)]
pub struct KeepAlive {
    pending: Option<(i64, Instant)>,
    last_sent: Option<Instant>,
    last_acknowledged: Option<Instant>,
}

impl KeepAlive {
    /// Record a request sent at `now`. A still-pending request is replaced.
    pub fn start(&mut self, id: i64, now: Instant) {
        self.pending = Some((id, now));
        self.last_sent = Some(now);
    }

    /// Match a client reply against the outstanding request
    pub fn acknowledge(&mut self, id: i64, now: Instant) -> bool {
        match self.pending {
            Some((expected, _)) if expected == id => {
                self.pending = None;
                self.last_acknowledged = Some(now);
                true
            }
            _ => false,
        }
    }

    /// Whether the outstanding request has gone unanswered for `timeout`
    pub fn is_expired(&self, now: Instant, timeout: Duration) -> bool {
        self.pending
            .map(|(_, sent)| now.saturating_duration_since(sent) >= timeout)
            .unwrap_or(false)
    }

    pub fn pending_id(&self) -> Option<i64> {
        self.pending.map(|(id, _)| id)
    }

    pub fn last_sent(&self) -> Option<Instant> {
        self.last_sent
    }

    pub fn last_acknowledged(&self) -> Option<Instant> {
        self.last_acknowledged
    }
}

/// Work queued for a player's connection task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Pre-serialised chat component
    Chat { json: String, chat_type: ChatType },
    /// Close the connection with a reason
    Disconnect { reason: String },
}

/// A logged-in player
pub struct Player {
    id: PlayerId,
    username: String,
    uuid: Uuid,
    mailbox: mpsc::Sender<Outbound>,
    settings: RwLock<Option<ChatSettings>>,
    keepalive: Mutex<KeepAlive>,
}

impl Player {
    pub fn new(id: PlayerId, username: String, uuid: Uuid, mailbox: mpsc::Sender<Outbound>) -> Self {
        Self {
            id,
            username,
            uuid,
            mailbox,
            settings: RwLock::new(None),
            keepalive: Mutex::new(KeepAlive::default()),
        }
    }

    pub fn id(&self) -> PlayerId {
        self.id
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// Settings from the most recent ClientSettings packet, if any arrived
    pub fn settings(&self) -> Option<ChatSettings> {
        read_lock(&self.settings).clone()
    }

    pub fn has_settings(&self) -> bool {
        read_lock(&self.settings).is_some()
    }

    pub fn update_settings(&self, settings: ChatSettings) {
        debug!(player = %self.username, mode = ?settings.mode, colors = settings.colors, "Chat settings updated");
        *write_lock(&self.settings) = Some(settings);
    }

    pub fn with_keepalive<R>(&self, f: impl FnOnce(&mut KeepAlive) -> R) -> R {
        f(&mut mutex_lock(&self.keepalive))
    }

    /// Queue `item` without waiting. Returns whether it was accepted.
    ///
    /// A full mailbox drops the item; a closed one means the connection is
    /// already gone.
    pub fn send(&self, item: Outbound) -> bool {
        match self.mailbox.try_send(item) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(player = %self.username, "Mailbox full, dropping message");
                global_metrics().mailbox_overflow();
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    pub fn is_connected(&self) -> bool {
        !self.mailbox.is_closed()
    }
}

impl fmt::Debug for Player {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Player")
            .field("id", &self.id)
            .field("username", &self.username)
            .field("uuid", &self.uuid)
            .finish()
    }
}
