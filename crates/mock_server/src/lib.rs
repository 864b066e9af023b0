//! # Mock Server
//!
//! Lightweight local game servers used as interception targets.
//!
//! A [`MockServer`] listens on a loopback TCP port and speaks a line
//! protocol: the first line is the player name, the rest are chat. Its
//! lifecycle and chat operations live in a [`hook_system::MethodTable`], so
//! extensions can observe or rewrite them at runtime.
//!
//! [`ServerManager`] owns the servers, persists their records through a
//! [`ServerStore`] and keeps them registered in a
//! [`hook_system::InstanceRegistry`] under the `MockServer` class.

pub mod error;
pub mod events;
pub mod manager;
mod network;
pub mod record;
pub mod server;
pub mod store;

pub use error::ServerError;
pub use events::{ChatMessage, ServerEvent};
pub use manager::ServerManager;
pub use record::{validate_name, ServerRecord, MAX_NAME_LEN};
pub use server::{MockServer, ServerStatus, SERVER_KIND};
pub use store::ServerStore;
