//! Server lifecycle and chat events.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One chat line received by a server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub sender: String,
    pub text: String,
    pub timestamp: u64,
}

/// Events broadcast by the [`ServerManager`](crate::ServerManager) and its servers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ServerEvent {
    Created { server: String },
    Deleted { server: String },
    Started { server: String, address: String },
    Stopped { server: String },
    PlayerJoined { server: String, player: String },
    PlayerLeft { server: String, player: String },
    Chat { server: String, message: ChatMessage },
}

impl ServerEvent {
    /// Name of the server the event belongs to.
    pub fn server(&self) -> &str {
        match self {
            Self::Created { server }
            | Self::Deleted { server }
            | Self::Started { server, .. }
            | Self::Stopped { server }
            | Self::PlayerJoined { server, .. }
            | Self::PlayerLeft { server, .. }
            | Self::Chat { server, .. } => server,
        }
    }
}

impl fmt::Display for ServerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created { server } => write!(f, "[{server}] created"),
            Self::Deleted { server } => write!(f, "[{server}] deleted"),
            Self::Started { server, address } => write!(f, "[{server}] listening on {address}"),
            Self::Stopped { server } => write!(f, "[{server}] stopped"),
            Self::PlayerJoined { server, player } => write!(f, "[{server}] {player} joined"),
            Self::PlayerLeft { server, player } => write!(f, "[{server}] {player} left"),
            Self::Chat { server, message } => {
                write!(f, "[{server}] <{}> {}", message.sender, message.text)
            }
        }
    }
}
