//! A mock game server whose lifecycle and chat methods are interceptable.

use crate::events::{ChatMessage, ServerEvent};
use crate::network;
use crate::record::{current_timestamp, ServerRecord};
use hook_system::{impl_injectable, string_arg, MethodError, MethodResult, MethodTable, Reply};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Registry class name of [`MockServer`].
pub const SERVER_KIND: &str = "MockServer";

const RELAY_CAPACITY: usize = 256;

enum RunState {
    Stopped,
    Running {
        address: SocketAddr,
        shutdown: broadcast::Sender<()>,
        accept_task: JoinHandle<()>,
    },
}

/// Snapshot returned by the `status` method.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerStatus {
    pub name: String,
    pub port: u16,
    pub motd: String,
    pub running: bool,
    pub address: Option<String>,
    pub players: Vec<String>,
    pub max_players: usize,
    pub messages: usize,
}

/// One mock server.
///
/// Every operation other code should be able to observe or alter goes
/// through the method table: `start`, `stop`, `join`, `leave`, `chat` and
/// `status`. Network clients use the same entry points.
pub struct MockServer {
    record: ServerRecord,
    state: Mutex<RunState>,
    players: Mutex<Vec<String>>,
    history: Mutex<VecDeque<ChatMessage>>,
    relay: broadcast::Sender<String>,
    events: broadcast::Sender<ServerEvent>,
    self_ref: Weak<MockServer>,
    methods: MethodTable,
}

impl_injectable!(MockServer, SERVER_KIND, methods);

impl MockServer {
    pub fn new(record: ServerRecord, events: broadcast::Sender<ServerEvent>) -> Arc<Self> {
        let (relay, _) = broadcast::channel(RELAY_CAPACITY);
        let methods = MethodTable::new()
            .with_method::<MockServer, _>("start", |server, _| server.begin_start())
            .with_method::<MockServer, _>("stop", |server, _| server.stop_now())
            .with_method::<MockServer, _>("join", |server, args| {
                let player = string_arg("join", &args, 0)?;
                server.add_player(player)
            })
            .with_method::<MockServer, _>("leave", |server, args| {
                let player = string_arg("leave", &args, 0)?;
                server.remove_player(player);
                Ok(Reply::unit())
            })
            .with_method::<MockServer, _>("chat", |server, args| {
                let sender = string_arg("chat", &args, 0)?;
                let text = string_arg("chat", &args, 1)?;
                server.post_chat(sender, text)
            })
            .with_method::<MockServer, _>("status", |server, _| {
                let status = serde_json::to_value(server.snapshot())
                    .map_err(|e| MethodError::failed(e.to_string()))?;
                Ok(Reply::Ready(status))
            });

        Arc::new_cyclic(|self_ref| Self {
            record,
            state: Mutex::new(RunState::Stopped),
            players: Mutex::new(Vec::new()),
            history: Mutex::new(VecDeque::new()),
            relay,
            events,
            self_ref: self_ref.clone(),
            methods,
        })
    }

    pub fn name(&self) -> &str {
        &self.record.name
    }

    pub fn record(&self) -> &ServerRecord {
        &self.record
    }

    pub fn is_running(&self) -> bool {
        matches!(*self.state.lock(), RunState::Running { .. })
    }

    /// Bound listener address while running.
    pub fn address(&self) -> Option<SocketAddr> {
        match *self.state.lock() {
            RunState::Running { address, .. } => Some(address),
            _ => None,
        }
    }

    pub fn players(&self) -> Vec<String> {
        self.players.lock().clone()
    }

    /// Chat history, oldest first.
    pub fn history(&self) -> Vec<ChatMessage> {
        self.history.lock().iter().cloned().collect()
    }

    /// Current status, read directly rather than through the method table.
    pub fn snapshot(&self) -> ServerStatus {
        ServerStatus {
            name: self.record.name.clone(),
            port: self.record.port,
            motd: self.record.motd.clone(),
            running: self.is_running(),
            address: self.address().map(|a| a.to_string()),
            players: self.players(),
            max_players: self.record.max_players,
            messages: self.history.lock().len(),
        }
    }

    pub(crate) fn subscribe_relay(&self) -> broadcast::Receiver<String> {
        self.relay.subscribe()
    }

    fn emit(&self, event: ServerEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Nothing changes until the reply is awaited; a dropped reply leaves the
    /// server untouched.
    fn begin_start(&self) -> MethodResult {
        let weak = self.self_ref.clone();
        Ok(Reply::pending(async move {
            let server = weak
                .upgrade()
                .ok_or_else(|| MethodError::failed("server was dropped before starting"))?;
            let address = server.launch()?;

            info!("🚀 Mock server {} listening on {}", server.name(), address);
            server.emit(ServerEvent::Started {
                server: server.name().to_string(),
                address: address.to_string(),
            });
            Ok(json!({ "address": address.to_string() }))
        }))
    }

    /// Binds and spawns the accept loop under one state guard.
    fn launch(&self) -> Result<SocketAddr, MethodError> {
        let mut state = self.state.lock();
        if let RunState::Running { address, .. } = &*state {
            return Err(MethodError::failed(format!(
                "{} is already running on {}",
                self.name(),
                address
            )));
        }

        let port = self.record.port;
        let bind_error =
            |e: std::io::Error| MethodError::failed(format!("{} could not bind port {}: {}", self.name(), port, e));
        let listener = network::bind(port).map_err(bind_error)?;
        let address = listener.local_addr().map_err(bind_error)?;

        let (shutdown, _) = broadcast::channel(1);
        let accept_task = tokio::spawn(network::accept_loop(
            self.self_ref.clone(),
            listener,
            shutdown.clone(),
        ));
        *state = RunState::Running {
            address,
            shutdown,
            accept_task,
        };
        Ok(address)
    }

    fn stop_now(&self) -> MethodResult {
        let (shutdown, accept_task) = {
            let mut state = self.state.lock();
            match std::mem::replace(&mut *state, RunState::Stopped) {
                RunState::Running {
                    shutdown,
                    accept_task,
                    ..
                } => (shutdown, accept_task),
                RunState::Stopped => return Ok(Reply::ready(json!({ "stopped": false }))),
            }
        };

        let _ = shutdown.send(());
        accept_task.abort();
        self.players.lock().clear();
        info!("🛑 Mock server {} stopped", self.name());
        self.emit(ServerEvent::Stopped {
            server: self.name().to_string(),
        });
        Ok(Reply::ready(json!({ "stopped": true })))
    }

    fn add_player(&self, player: &str) -> MethodResult {
        let player = player.trim();
        if player.is_empty() {
            return Err(MethodError::invalid_arguments("join", "player name is empty"));
        }
        {
            let mut players = self.players.lock();
            if players.iter().any(|p| p == player) {
                return Err(MethodError::failed(format!("{player} is already online")));
            }
            if players.len() >= self.record.max_players {
                return Err(MethodError::failed(format!(
                    "{} is full ({} players)",
                    self.name(),
                    self.record.max_players
                )));
            }
            players.push(player.to_string());
        }

        debug!("{} joined {}", player, self.name());
        self.emit(ServerEvent::PlayerJoined {
            server: self.name().to_string(),
            player: player.to_string(),
        });
        Ok(Reply::ready(format!("Welcome to {}! {}", self.name(), self.record.motd)))
    }

    fn remove_player(&self, player: &str) {
        let removed = {
            let mut players = self.players.lock();
            let before = players.len();
            players.retain(|p| p != player);
            players.len() != before
        };
        if removed {
            debug!("{} left {}", player, self.name());
            self.emit(ServerEvent::PlayerLeft {
                server: self.name().to_string(),
                player: player.to_string(),
            });
        }
    }

    fn post_chat(&self, sender: &str, text: &str) -> MethodResult {
        if text.trim().is_empty() {
            return Err(MethodError::invalid_arguments("chat", "message is empty"));
        }
        let message = ChatMessage {
            sender: sender.to_string(),
            text: text.to_string(),
            timestamp: current_timestamp(),
        };
        {
            let mut history = self.history.lock();
            history.push_back(message.clone());
            while history.len() > self.record.history_limit {
                history.pop_front();
            }
        }

        let _ = self.relay.send(format!("<{}> {}", sender, text));
        self.emit(ServerEvent::Chat {
            server: self.name().to_string(),
            message: message.clone(),
        });
        let value = serde_json::to_value(&message).map_err(|e| MethodError::failed(e.to_string()))?;
        Ok(Reply::Ready(value))
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        if let RunState::Running {
            shutdown,
            accept_task,
            ..
        } = std::mem::replace(self.state.get_mut(), RunState::Stopped)
        {
            let _ = shutdown.send(());
            accept_task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hook_system::{Callback, HookError, InjectableExt, InjectionEngine, DEFAULT_PRIORITY};
    use serde_json::Value;

    fn server(max_players: usize, history_limit: usize) -> (Arc<MockServer>, broadcast::Receiver<ServerEvent>) {
        let (events, rx) = broadcast::channel(64);
        let record = ServerRecord::new("test", 0, "Have fun")
            .with_max_players(max_players)
            .with_history_limit(history_limit);
        (MockServer::new(record, events), rx)
    }

    #[test]
    fn test_join_and_leave() {
        let (server, mut rx) = server(2, 10);
        let reply = server.invoke("join", vec![json!("ann")]).unwrap();
        assert_eq!(reply.as_ready(), Some(&json!("Welcome to test! Have fun")));
        assert!(server.invoke("join", vec![json!("ann")]).is_err());
        server.invoke("join", vec![json!("bob")]).unwrap();
        let full = server.invoke("join", vec![json!("cid")]).unwrap_err();
        assert!(full.to_string().contains("full"));

        server.invoke("leave", vec![json!("ann")]).unwrap();
        server.invoke("leave", vec![json!("ghost")]).unwrap();
        assert_eq!(server.players(), vec!["bob"]);

        assert!(matches!(rx.try_recv().unwrap(), ServerEvent::PlayerJoined { .. }));
        assert!(matches!(rx.try_recv().unwrap(), ServerEvent::PlayerJoined { .. }));
        assert!(matches!(rx.try_recv().unwrap(), ServerEvent::PlayerLeft { .. }));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_chat_history_is_bounded() {
        let (server, _rx) = server(5, 2);
        for text in ["one", "two", "three"] {
            server.invoke("chat", vec![json!("ann"), json!(text)]).unwrap();
        }
        let texts: Vec<String> = server.history().into_iter().map(|m| m.text).collect();
        assert_eq!(texts, vec!["two", "three"]);
        assert!(server.invoke("chat", vec![json!("ann"), json!("  ")]).is_err());
    }

    #[test]
    fn test_status_method_matches_snapshot() {
        let (server, _rx) = server(5, 5);
        server.invoke("join", vec![json!("ann")]).unwrap();
        let reply = server.invoke("status", vec![]).unwrap();
        let status: ServerStatus = serde_json::from_value(reply.as_ready().cloned().unwrap()).unwrap();
        assert_eq!(status, server.snapshot());
        assert!(!status.running);
        assert_eq!(status.players, vec!["ann"]);
    }

    #[test]
    fn test_stop_when_not_running() {
        let (server, _rx) = server(5, 5);
        let reply = server.invoke("stop", vec![]).unwrap();
        assert_eq!(reply.as_ready(), Some(&json!({ "stopped": false })));
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let (server, mut rx) = server(5, 5);
        let reply = server.invoke("start", vec![]).unwrap();
        assert!(reply.is_pending());
        assert!(!server.is_running());
        let second = server.invoke("start", vec![]).unwrap();

        let value = reply.resolve().await.unwrap();
        let address = value["address"].as_str().unwrap().to_string();
        assert_eq!(server.address().map(|a| a.to_string()), Some(address.clone()));
        assert!(matches!(rx.recv().await.unwrap(), ServerEvent::Started { .. }));
        let again = second.resolve().await.unwrap_err();
        assert!(again.to_string().contains("already running"));

        let reply = server.invoke("stop", vec![]).unwrap();
        assert_eq!(reply.as_ready().and_then(|v| v.get("stopped")), Some(&Value::Bool(true)));
        assert!(!server.is_running());
        assert!(matches!(rx.recv().await.unwrap(), ServerEvent::Stopped { .. }));
    }

    #[tokio::test]
    async fn test_failing_start_hook_falls_back_to_original() {
        let (server, _rx) = server(5, 5);
        let engine = InjectionEngine::new();
        let hook = Callback::around(|ctx| {
            ctx.proceed()?;
            Err(HookError::callback("hook broke after proceeding"))
        });
        engine.inject(&*server, "start", hook.clone(), DEFAULT_PRIORITY).unwrap();

        let value = server.invoke("start", vec![]).unwrap().resolve().await.unwrap();
        assert!(value["address"].is_string());
        assert!(server.is_running());

        assert!(engine.remove_injection(&*server, "start", &hook));
        let reply = server.invoke("stop", vec![]).unwrap();
        assert_eq!(reply.as_ready(), Some(&json!({ "stopped": true })));
    }

    #[tokio::test]
    async fn test_discarded_start_reply_leaves_server_usable() {
        let (server, _rx) = server(5, 5);
        let engine = InjectionEngine::new();
        let hook = Callback::around(|ctx| {
            ctx.proceed()?;
            Ok(Reply::ready("start suppressed"))
        });
        engine.inject(&*server, "start", hook.clone(), DEFAULT_PRIORITY).unwrap();

        let reply = server.invoke("start", vec![]).unwrap();
        assert_eq!(reply.as_ready(), Some(&json!("start suppressed")));
        assert!(!server.is_running());

        assert!(engine.remove_injection(&*server, "start", &hook));
        server.invoke("start", vec![]).unwrap().resolve().await.unwrap();
        assert!(server.is_running());
        let reply = server.invoke("stop", vec![]).unwrap();
        assert_eq!(reply.as_ready(), Some(&json!({ "stopped": true })));
    }

    #[tokio::test]
    async fn test_stop_while_start_pending() {
        let (server, _rx) = server(5, 5);
        let pending = server.invoke("start", vec![]).unwrap();
        let reply = server.invoke("stop", vec![]).unwrap();
        assert_eq!(reply.as_ready(), Some(&json!({ "stopped": false })));

        pending.resolve().await.unwrap();
        assert!(server.is_running());
        let reply = server.invoke("stop", vec![]).unwrap();
        assert_eq!(reply.as_ready(), Some(&json!({ "stopped": true })));
        assert!(!server.is_running());
    }
}
