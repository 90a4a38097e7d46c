//! # Chat
//!
//! Chat components, the visibility table and broadcast fan-out.
//!
//! ## Visibility
//! ```text
//!                 Chat   System   GameInfo
//! Enabled          x       x         x
//! CommandsOnly             x         x
//! Hidden                             x
//! ```
//!
//! A player receives a regular broadcast only if the table allows it for
//! their chat mode and they have sent client settings at least once.
//! Forced broadcasts ignore both conditions.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::player::{ChatMode, Outbound, Player};
use super::registry::PlayerRegistry;
use crate::error::Result;
use crate::utils::metrics::global_metrics;

/// Where a chat message is displayed on the client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChatType {
    Chat,
    System,
    GameInfo,
}

impl ChatType {
    pub const ALL: [ChatType; 3] = [ChatType::Chat, ChatType::System, ChatType::GameInfo];

    /// Position byte in the clientbound chat packet
    pub fn position(self) -> i8 {
        self as i8
    }
}

const VISIBILITY: [[bool; 3]; 3] = [
    // Chat, System, GameInfo
    [true, true, true],
    [false, true, true],
    [false, false, true],
];

/// Whether a client in `mode` displays messages of `chat_type`
pub fn is_visible(mode: ChatMode, chat_type: ChatType) -> bool {
    VISIBILITY[mode as usize][chat_type as usize]
}

/// Minimal JSON text component
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatComponent {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

impl ChatComponent {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            color: None,
        }
    }

    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        self.color = Some(color.into());
        self
    }

    pub fn without_color(&self) -> Self {
        Self {
            text: self.text.clone(),
            color: None,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Both renderings of a component, serialised at most once each
struct Rendered<'a> {
    component: &'a ChatComponent,
    colored: Option<String>,
    plain: Option<String>,
}

impl<'a> Rendered<'a> {
    fn new(component: &'a ChatComponent) -> Self {
        Self {
            component,
            colored: None,
            plain: None,
        }
    }

    fn for_player(&mut self, player: &Player) -> Result<String> {
        let colors = player.settings().map(|s| s.colors).unwrap_or(true);
        if colors || self.component.color.is_none() {
            if self.colored.is_none() {
                self.colored = Some(self.component.to_json()?);
            }
            Ok(self.colored.clone().unwrap_or_default())
        } else {
            if self.plain.is_none() {
                self.plain = Some(self.component.without_color().to_json()?);
            }
            Ok(self.plain.clone().unwrap_or_default())
        }
    }
}

/// Fans chat out to registered players
#[derive(Clone)]
pub struct ChatBroadcaster {
    registry: Arc<PlayerRegistry>,
}

impl ChatBroadcaster {
    pub fn new(registry: Arc<PlayerRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<PlayerRegistry> {
        &self.registry
    }

    /// Deliver to every player whose settings allow `chat_type`. Returns the
    /// number of mailboxes that accepted the message.
    pub fn broadcast(&self, component: &ChatComponent, chat_type: ChatType) -> Result<usize> {
        self.fan_out(component, chat_type, false)
    }

    /// Deliver to every registered player regardless of settings
    pub fn broadcast_forced(&self, component: &ChatComponent, chat_type: ChatType) -> Result<usize> {
        self.fan_out(component, chat_type, true)
    }

    /// Deliver to one player, honouring only their colour preference
    pub fn send_to(&self, player: &Player, component: &ChatComponent, chat_type: ChatType) -> Result<bool> {
        let json = Rendered::new(component).for_player(player)?;
        Ok(player.send(Outbound::Chat { json, chat_type }))
    }

    fn fan_out(&self, component: &ChatComponent, chat_type: ChatType, forced: bool) -> Result<usize> {
        let mut rendered = Rendered::new(component);
        let delivered = self.registry.with_players(|players| -> Result<usize> {
            let mut delivered = 0;
            for player in players {
                if !forced {
                    match player.settings() {
                        Some(settings) if is_visible(settings.mode, chat_type) => {}
                        _ => {
                            trace!(player = %player.username(), ?chat_type, "Message not visible");
                            continue;
                        }
                    }
                }
                let json = rendered.for_player(player)?;
                if player.send(Outbound::Chat { json, chat_type }) {
                    delivered += 1;
                }
            }
            Ok(delivered)
        })?;

        global_metrics().broadcast(delivered as u64);
        debug!(?chat_type, forced, delivered, text = %component.text, "Broadcast");
        Ok(delivered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::players::player::{ChatSettings, PlayerId};
    use tokio::sync::mpsc;
    use uuid::Uuid;

    #[test]
    fn test_visibility_table() {
        use ChatMode::*;
        use ChatType::*;
        let expected = [
            (Enabled, Chat, true),
            (Enabled, System, true),
            (Enabled, GameInfo, true),
            (CommandsOnly, Chat, false),
            (CommandsOnly, System, true),
            (CommandsOnly, GameInfo, true),
            (Hidden, Chat, false),
            (Hidden, System, false),
            (Hidden, GameInfo, true),
        ];
        for (mode, chat_type, visible) in expected {
            assert_eq!(is_visible(mode, chat_type), visible, "{mode:?} x {chat_type:?}");
        }
    }

    #[test]
    fn test_component_json() {
        let plain = ChatComponent::text("hi");
        assert_eq!(plain.to_json().unwrap(), r#"{"text":"hi"}"#);
        let yellow = ChatComponent::text("hi").with_color("yellow");
        assert_eq!(yellow.to_json().unwrap(), r#"{"text":"hi","color":"yellow"}"#);
    }

    #[test]
    fn test_colour_stripped_for_colourless_clients() {
        let registry = Arc::new(PlayerRegistry::new(4));
        let (tx, mut rx) = mpsc::channel(4);
        let player = Arc::new(Player::new(PlayerId(1), "mono".into(), Uuid::new_v4(), tx));
        player.update_settings(ChatSettings::new(ChatMode::Enabled, false));
        registry.join(player).unwrap();

        let broadcaster = ChatBroadcaster::new(registry);
        let component = ChatComponent::text("joined").with_color("yellow");
        assert_eq!(broadcaster.broadcast(&component, ChatType::System).unwrap(), 1);

        match rx.try_recv().unwrap() {
            Outbound::Chat { json, chat_type } => {
                assert_eq!(json, r#"{"text":"joined"}"#);
                assert_eq!(chat_type, ChatType::System);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_settings_required_unless_forced() {
        let registry = Arc::new(PlayerRegistry::new(4));
        let (tx, mut rx) = mpsc::channel(4);
        registry
            .join(Arc::new(Player::new(PlayerId(1), "new".into(), Uuid::new_v4(), tx)))
            .unwrap();
        let broadcaster = ChatBroadcaster::new(registry);
        let component = ChatComponent::text("hello");

        assert_eq!(broadcaster.broadcast(&component, ChatType::GameInfo).unwrap(), 0);
        assert!(rx.try_recv().is_err());

        assert_eq!(broadcaster.broadcast_forced(&component, ChatType::Chat).unwrap(), 1);
        assert!(rx.try_recv().is_ok());
    }
}
