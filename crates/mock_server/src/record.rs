//! Persistent server configuration records.

use crate::error::ServerError;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Longest accepted server name.
pub const MAX_NAME_LEN: usize = 32;

fn default_max_players() -> usize {
    20
}

fn default_history_limit() -> usize {
    100
}

/// Configuration of one mock server, stored as JSON on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerRecord {
    /// Unique server name; also its registry instance id.
    pub name: String,
    /// TCP port on 127.0.0.1. Zero picks a free port at start.
    pub port: u16,
    /// Message of the day sent to joining players.
    pub motd: String,
    /// Player limit enforced by `join`.
    #[serde(default = "default_max_players")]
    pub max_players: usize,
    /// Number of chat messages kept in memory.
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    /// Unix timestamp (seconds) of creation.
    #[serde(default)]
    pub created_at: u64,
}

impl ServerRecord {
    pub fn new(name: impl Into<String>, port: u16, motd: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            port,
            motd: motd.into(),
            max_players: default_max_players(),
            history_limit: default_history_limit(),
            created_at: current_timestamp(),
        }
    }

    pub fn with_max_players(mut self, max_players: usize) -> Self {
        self.max_players = max_players;
        self
    }

    pub fn with_history_limit(mut self, history_limit: usize) -> Self {
        self.history_limit = history_limit;
        self
    }

    /// Checks the name and limits.
    pub fn validate(&self) -> Result<(), ServerError> {
        validate_name(&self.name)?;
        if self.max_players == 0 {
            return Err(ServerError::InvalidRecord("max_players must be at least 1".to_string()));
        }
        if self.history_limit == 0 {
            return Err(ServerError::InvalidRecord("history_limit must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// Server names double as file names, so they are kept to a safe alphabet.
pub fn validate_name(name: &str) -> Result<(), ServerError> {
    let valid = !name.is_empty()
        && name.len() <= MAX_NAME_LEN
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(ServerError::InvalidName(name.to_string()))
    }
}

/// Current Unix timestamp in seconds.
pub fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
