//! Ownership of every mock server: persistence, registry membership and
//! lifecycle calls.

use crate::error::ServerError;
use crate::events::{ChatMessage, ServerEvent};
use crate::record::ServerRecord;
use crate::server::{MockServer, ServerStatus, SERVER_KIND};
use crate::store::ServerStore;
use dashmap::DashMap;
use hook_system::{InjectableExt, InstanceRegistry};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};

const EVENT_CAPACITY: usize = 1024;

/// Creates, loads, starts and stops mock servers.
///
/// Each live server is registered as `("MockServer", name)` in the instance
/// registry, so interception code can find it by name.
pub struct ServerManager {
    store: ServerStore,
    registry: Arc<InstanceRegistry>,
    servers: DashMap<String, Arc<MockServer>>,
    events: broadcast::Sender<ServerEvent>,
}

impl ServerManager {
    pub fn new(store: ServerStore, registry: Arc<InstanceRegistry>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            store,
            registry,
            servers: DashMap::new(),
            events,
        }
    }

    pub fn store(&self) -> &ServerStore {
        &self.store
    }

    pub fn registry(&self) -> &Arc<InstanceRegistry> {
        &self.registry
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.events.subscribe()
    }

    /// Loads every stored record that is not loaded yet. Returns how many
    /// servers were added.
    pub async fn load_all(&self) -> Result<usize, ServerError> {
        let mut loaded = 0;
        for record in self.store.load_all().await? {
            if self.servers.contains_key(&record.name) {
                continue;
            }
            if let Err(e) = self.check_port(&record) {
                warn!("Not loading server {}: {}", record.name, e);
                continue;
            }
            self.insert(record);
            loaded += 1;
        }
        info!("📂 Loaded {} mock server(s) from {}", loaded, self.store.dir().display());
        Ok(loaded)
    }

    /// Persists and registers a new server.
    pub async fn create(&self, record: ServerRecord) -> Result<Arc<MockServer>, ServerError> {
        record.validate()?;
        if self.servers.contains_key(&record.name) || self.store.exists(&record.name).await? {
            return Err(ServerError::AlreadyExists(record.name));
        }
        self.check_port(&record)?;

        self.store.save(&record).await?;
        let name = record.name.clone();
        let server = self.insert(record);
        info!("✨ Created mock server {}", name);
        let _ = self.events.send(ServerEvent::Created { server: name });
        Ok(server)
    }

    /// Stops, unregisters and forgets a server, removing its record.
    ///
    /// Interceptions on the server are not cleared here. Engines forget them
    /// once the last handle to the server is gone.
    pub async fn delete(&self, name: &str) -> Result<(), ServerError> {
        let server = self.require(name)?;
        if server.is_running() {
            self.stop(name).await?;
        }
        self.servers.remove(name);
        self.registry.unregister(SERVER_KIND, name);
        self.store.remove(name).await?;
        info!("🗑️ Deleted mock server {}", name);
        let _ = self.events.send(ServerEvent::Deleted {
            server: name.to_string(),
        });
        Ok(())
    }

    /// Calls `start` and waits for the listener. Returns the bound address.
    pub async fn start(&self, name: &str) -> Result<String, ServerError> {
        let value = self.call(name, "start", Vec::new()).await?;
        Ok(value
            .get("address")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| value.to_string()))
    }

    /// Calls `stop`. Returns whether the server was running.
    pub async fn stop(&self, name: &str) -> Result<bool, ServerError> {
        let value = self.call(name, "stop", Vec::new()).await?;
        Ok(value.get("stopped").and_then(Value::as_bool).unwrap_or(false))
    }

    /// Posts a chat line as `sender`.
    pub async fn chat(&self, name: &str, sender: &str, text: &str) -> Result<ChatMessage, ServerError> {
        let value = self.call(name, "chat", vec![json!(sender), json!(text)]).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Status through the interceptable `status` method.
    pub async fn status(&self, name: &str) -> Result<ServerStatus, ServerError> {
        let value = self.call(name, "status", Vec::new()).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Direct snapshots of every server, sorted by name.
    pub fn list(&self) -> Vec<ServerStatus> {
        let mut statuses: Vec<ServerStatus> =
            self.servers.iter().map(|entry| entry.value().snapshot()).collect();
        statuses.sort_by(|a, b| a.name.cmp(&b.name));
        statuses
    }

    pub fn get(&self, name: &str) -> Option<Arc<MockServer>> {
        self.servers.get(name).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    /// Stops every running server. Returns how many were stopped.
    pub async fn shutdown_all(&self) -> usize {
        let running: Vec<String> = self
            .servers
            .iter()
            .filter(|entry| entry.value().is_running())
            .map(|entry| entry.key().clone())
            .collect();

        let mut stopped = 0;
        for name in running {
            match self.stop(&name).await {
                Ok(true) => stopped += 1,
                Ok(false) => {}
                Err(e) => warn!("Failed to stop {}: {}", name, e),
            }
        }
        stopped
    }

    fn require(&self, name: &str) -> Result<Arc<MockServer>, ServerError> {
        self.get(name)
            .ok_or_else(|| ServerError::NotFound(name.to_string()))
    }

    async fn call(&self, name: &str, method: &str, args: hook_system::Args) -> Result<Value, ServerError> {
        let server = self.require(name)?;
        let reply = server.invoke(method, args)?;
        Ok(reply.resolve().await?)
    }

    fn check_port(&self, record: &ServerRecord) -> Result<(), ServerError> {
        if record.port == 0 {
            return Ok(());
        }
        let owner = self
            .servers
            .iter()
            .find(|entry| entry.key() != &record.name && entry.value().record().port == record.port)
            .map(|entry| entry.key().clone());
        match owner {
            Some(owner) => Err(ServerError::PortInUse {
                port: record.port,
                owner,
            }),
            None => Ok(()),
        }
    }

    fn insert(&self, record: ServerRecord) -> Arc<MockServer> {
        let name = record.name.clone();
        let server = MockServer::new(record, self.events.clone());
        self.registry.register(&server, &name);
        self.servers.insert(name, server.clone());
        server
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn manager(dir: &TempDir) -> ServerManager {
        ServerManager::new(ServerStore::new(dir.path()), Arc::new(InstanceRegistry::new()))
    }

    #[tokio::test]
    async fn test_create_registers_and_persists() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);
        let mut events = manager.subscribe();

        manager.create(ServerRecord::new("hub", 0, "hi")).await.unwrap();
        assert!(manager.registry().get_instance(SERVER_KIND, "hub").is_some());
        assert!(manager.store().exists("hub").await.unwrap());
        assert_eq!(events.recv().await.unwrap(), ServerEvent::Created { server: "hub".to_string() });

        let again = manager.create(ServerRecord::new("hub", 0, "hi")).await;
        assert!(matches!(again, Err(ServerError::AlreadyExists(_))));
    }

    #[tokio::test]
    async fn test_duplicate_ports_rejected() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);
        manager.create(ServerRecord::new("a", 30001, "a")).await.unwrap();
        let clash = manager.create(ServerRecord::new("b", 30001, "b")).await;
        assert!(matches!(clash, Err(ServerError::PortInUse { port: 30001, .. })));
        manager.create(ServerRecord::new("c", 0, "c")).await.unwrap();
        manager.create(ServerRecord::new("d", 0, "d")).await.unwrap();
        assert_eq!(manager.len(), 3);
    }

    #[tokio::test]
    async fn test_deleted_server_drops_out_of_injection_listing() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);
        let engine = hook_system::InjectionEngine::new();
        {
            let server = manager.create(ServerRecord::new("hooked", 0, "hi")).await.unwrap();
            let hook = hook_system::Callback::before(|_| Ok(()));
            engine.inject(&*server, "chat", hook, 1).unwrap();
        }
        assert_eq!(engine.list_injections().len(), 1);

        manager.delete("hooked").await.unwrap();
        assert!(engine.list_injections().is_empty());
        assert_eq!(engine.wrapped_count(), 0);
    }

    #[tokio::test]
    async fn test_delete_unregisters_and_removes_record() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);
        manager.create(ServerRecord::new("gone", 0, "bye")).await.unwrap();
        manager.delete("gone").await.unwrap();

        assert!(manager.get("gone").is_none());
        assert!(manager.registry().get_instance(SERVER_KIND, "gone").is_none());
        assert!(!manager.store().exists("gone").await.unwrap());
        assert!(matches!(manager.delete("gone").await, Err(ServerError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_load_all_restores_saved_servers() {
        let dir = TempDir::new().unwrap();
        {
            let manager = manager(&dir);
            manager.create(ServerRecord::new("one", 0, "1")).await.unwrap();
            manager.create(ServerRecord::new("two", 0, "2")).await.unwrap();
        }
        let manager = manager(&dir);
        assert_eq!(manager.load_all().await.unwrap(), 2);
        assert_eq!(manager.load_all().await.unwrap(), 0);
        let names: Vec<String> = manager.list().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["one", "two"]);
    }

    #[tokio::test]
    async fn test_lifecycle_through_manager() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);
        manager.create(ServerRecord::new("live", 0, "motd")).await.unwrap();

        let address = manager.start("live").await.unwrap();
        assert!(address.starts_with("127.0.0.1:"));
        assert!(manager.start("live").await.is_err());

        let message = manager.chat("live", "console", "hello").await.unwrap();
        assert_eq!(message.text, "hello");
        let status = manager.status("live").await.unwrap();
        assert!(status.running);
        assert_eq!(status.messages, 1);

        assert_eq!(manager.shutdown_all().await, 1);
        assert!(!manager.stop("live").await.unwrap());
        assert!(matches!(manager.status("nope").await, Err(ServerError::NotFound(_))));
    }
}
