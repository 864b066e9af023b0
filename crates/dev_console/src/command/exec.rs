//! Command execution against the server manager and interception engine.

use super::{Command, HooksCommand, ParseError, USAGE};
use crate::config::ServerDefaults;
use crate::extensions::{ExtensionError, ExtensionLoader};
use crate::ui::{render_box, render_table};
use hook_system::{Injectable, InjectionEngine, InjectionPoint, InstanceRegistry, TargetId};
use mock_server::{ServerError, ServerManager, ServerRecord, ServerStatus};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

/// Sender name used for chat posted from the console.
pub const CONSOLE_SENDER: &str = "console";

#[derive(Debug, Error)]
pub enum ConsoleError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Server(#[from] ServerError),
    #[error(transparent)]
    Extension(#[from] ExtensionError),
    #[error("no instance `{id}` of class `{class}` is registered")]
    UnknownInstance { class: String, id: String },
}

/// What a command produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Output {
    Empty,
    Message(String),
    Block { title: String, lines: Vec<String> },
    Table { headers: Vec<&'static str>, rows: Vec<Vec<String>> },
    /// The console should stop.
    Exit,
}

impl Output {
    /// Text for stdout; empty for [`Output::Empty`] and [`Output::Exit`].
    pub fn render(&self) -> String {
        match self {
            Self::Empty | Self::Exit => String::new(),
            Self::Message(message) => message.clone(),
            Self::Block { title, lines } => render_box(title, lines),
            Self::Table { headers, rows } => render_table(headers, rows),
        }
    }
}

/// Executes parsed commands.
pub struct Console {
    manager: Arc<ServerManager>,
    engine: Arc<InjectionEngine>,
    extensions: Mutex<ExtensionLoader>,
    defaults: ServerDefaults,
}

impl Console {
    pub fn new(
        manager: Arc<ServerManager>,
        engine: Arc<InjectionEngine>,
        extensions: ExtensionLoader,
        defaults: ServerDefaults,
    ) -> Self {
        Self {
            manager,
            engine,
            extensions: Mutex::new(extensions),
            defaults,
        }
    }

    pub fn manager(&self) -> &Arc<ServerManager> {
        &self.manager
    }

    pub fn engine(&self) -> &Arc<InjectionEngine> {
        &self.engine
    }

    fn registry(&self) -> &InstanceRegistry {
        self.manager.registry()
    }

    /// Applies extensions to the currently registered instances.
    pub async fn load_extensions(&self) -> crate::extensions::LoadReport {
        let mut loader = self.extensions.lock().await;
        loader.load_all(self.registry(), &self.engine).await
    }

    /// Parses and runs one line.
    pub async fn execute_line(&self, line: &str) -> Result<Output, ConsoleError> {
        match Command::parse(line)? {
            Some(command) => self.execute(command).await,
            None => Ok(Output::Empty),
        }
    }

    pub async fn execute(&self, command: Command) -> Result<Output, ConsoleError> {
        debug!("Executing {:?}", command);
        match command {
            Command::Help => Ok(Output::Table {
                headers: vec!["Command", "Description"],
                rows: USAGE
                    .iter()
                    .map(|(syntax, about)| vec![syntax.to_string(), about.to_string()])
                    .collect(),
            }),
            Command::Exit => Ok(Output::Exit),
            Command::Create { name, port, motd } => {
                let port = port.unwrap_or(self.defaults.default_port);
                let record = ServerRecord::new(
                    name,
                    port,
                    motd.unwrap_or_else(|| self.defaults.default_motd.clone()),
                )
                .with_max_players(self.defaults.max_players)
                .with_history_limit(self.defaults.history_limit);
                let server = self.manager.create(record).await?;
                Ok(Output::Message(format!(
                    "Created server {} on port {}",
                    server.name(),
                    port
                )))
            }
            Command::Start { name } => {
                let address = self.manager.start(&name).await?;
                Ok(Output::Message(format!("Started {name} on {address}")))
            }
            Command::Stop { name } => {
                let message = if self.manager.stop(&name).await? {
                    format!("Stopped {name}")
                } else {
                    format!("{name} was not running")
                };
                Ok(Output::Message(message))
            }
            Command::Delete { name } => {
                self.manager.delete(&name).await?;
                Ok(Output::Message(format!("Deleted {name}")))
            }
            Command::List => Ok(self.list()),
            Command::Status { name } => {
                let status = self.manager.status(&name).await?;
                Ok(status_block(&status))
            }
            Command::Chat { name, message } => {
                let posted = self.manager.chat(&name, CONSOLE_SENDER, &message).await?;
                Ok(Output::Message(format!("[{name}] <{}> {}", posted.sender, posted.text)))
            }
            Command::Hooks(hooks) => self.hooks(hooks).await,
        }
    }

    fn list(&self) -> Output {
        let servers = self.manager.list();
        if servers.is_empty() {
            return Output::Message("No servers. Create one with `create <name>`.".to_string());
        }
        Output::Table {
            headers: vec!["Name", "Port", "State", "Players", "Address"],
            rows: servers
                .into_iter()
                .map(|s| {
                    vec![
                        s.name,
                        s.port.to_string(),
                        if s.running { "running" } else { "stopped" }.to_string(),
                        format!("{}/{}", s.players.len(), s.max_players),
                        s.address.unwrap_or_else(|| "-".to_string()),
                    ]
                })
                .collect(),
        }
    }

    async fn hooks(&self, command: HooksCommand) -> Result<Output, ConsoleError> {
        match command {
            HooksCommand::Classes => {
                let classes = self.registry().get_all_classes();
                if classes.is_empty() {
                    return Ok(Output::Message("No interceptable instances registered.".to_string()));
                }
                Ok(Output::Table {
                    headers: vec!["Class", "Instances"],
                    rows: classes
                        .into_iter()
                        .map(|class| {
                            let ids = self.registry().get_instance_ids(&class).join(", ");
                            vec![class, ids]
                        })
                        .collect(),
                })
            }
            HooksCommand::List { class, id, method } => {
                let points = self.select_points(class.as_deref(), id.as_deref(), method.as_deref())?;
                if points.is_empty() {
                    return Ok(Output::Message("No active injections.".to_string()));
                }
                let names = self.instance_names();
                Ok(Output::Table {
                    headers: vec!["Class", "Instance", "Method", "Kind", "Priority"],
                    rows: points
                        .iter()
                        .map(|p| {
                            vec![
                                p.class_name().to_string(),
                                names
                                    .get(&p.target())
                                    .cloned()
                                    .unwrap_or_else(|| p.target().to_string()),
                                p.method().to_string(),
                                p.kind().to_string(),
                                p.priority().to_string(),
                            ]
                        })
                        .collect(),
                })
            }
            HooksCommand::Clear { target, method } => {
                let removed = match target {
                    None => self.engine.clear_all(),
                    Some((class, id)) => {
                        let instance = self.instance(&class, &id)?;
                        self.engine
                            .clear_injections(Some(instance.as_ref()), method.as_deref())
                    }
                };
                Ok(Output::Message(format!("Removed {removed} injection(s)")))
            }
            HooksCommand::Reload => {
                let mut loader = self.extensions.lock().await;
                let report = loader.reload(self.registry(), &self.engine).await;
                let mut message = report.to_string();
                for (source, reason) in &report.failed {
                    message.push_str(&format!("\n  {source}: {reason}"));
                }
                Ok(Output::Message(message))
            }
        }
    }

    fn instance(&self, class: &str, id: &str) -> Result<Arc<dyn Injectable>, ConsoleError> {
        self.registry()
            .get_instance(class, id)
            .ok_or_else(|| ConsoleError::UnknownInstance {
                class: class.to_string(),
                id: id.to_string(),
            })
    }

    fn select_points(
        &self,
        class: Option<&str>,
        id: Option<&str>,
        method: Option<&str>,
    ) -> Result<Vec<InjectionPoint>, ConsoleError> {
        let Some(class) = class else {
            return Ok(self.engine.list_injections());
        };
        let Some(id) = id else {
            return Ok(self
                .engine
                .list_injections()
                .into_iter()
                .filter(|p| p.class_name() == class)
                .collect());
        };

        let instance = self.instance(class, id)?;
        match method {
            Some(method) => Ok(self.engine.get_injections(instance.as_ref(), method)),
            None => {
                let target = instance.identity();
                Ok(self
                    .engine
                    .list_injections()
                    .into_iter()
                    .filter(|p| p.target() == target)
                    .collect())
            }
        }
    }

    /// Registry ids of every live instance, keyed by identity.
    fn instance_names(&self) -> HashMap<TargetId, String> {
        let mut names = HashMap::new();
        for class in self.registry().get_all_classes() {
            for id in self.registry().get_instance_ids(&class) {
                if let Some(instance) = self.registry().get_instance(&class, &id) {
                    names.insert(instance.identity(), id);
                }
            }
        }
        names
    }
}

fn status_block(status: &ServerStatus) -> Output {
    let players = if status.players.is_empty() {
        "-".to_string()
    } else {
        status.players.join(", ")
    };
    Output::Block {
        title: format!("Server {}", status.name),
        lines: vec![
            format!("State:    {}", if status.running { "running" } else { "stopped" }),
            format!("Port:     {}", status.port),
            format!("Address:  {}", status.address.as_deref().unwrap_or("-")),
            format!("MOTD:     {}", status.motd),
            format!("Players:  {}/{} ({})", status.players.len(), status.max_players, players),
            format!("Messages: {}", status.messages),
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hook_system::{Callback, DEFAULT_PRIORITY};
    use mock_server::{ServerStore, SERVER_KIND};
    use serde_json::{json, Value};
    use tempfile::TempDir;

    fn console(dir: &TempDir) -> Console {
        let manager = Arc::new(ServerManager::new(
            ServerStore::new(dir.path().join("servers")),
            Arc::new(InstanceRegistry::new()),
        ));
        Console::new(
            manager,
            Arc::new(InjectionEngine::new()),
            ExtensionLoader::new(dir.path().join("extensions")),
            ServerDefaults {
                default_port: 0,
                ..ServerDefaults::default()
            },
        )
    }

    fn message(output: Output) -> String {
        match output {
            Output::Message(message) => message,
            other => panic!("expected a message, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_create_list_delete() {
        let dir = TempDir::new().unwrap();
        let console = console(&dir);

        let created = message(console.execute_line("create hub 0 Hello hub").await.unwrap());
        assert_eq!(created, "Created server hub on port 0");
        assert!(console.execute_line("create hub").await.is_err());

        match console.execute_line("list").await.unwrap() {
            Output::Table { rows, .. } => {
                assert_eq!(rows.len(), 1);
                assert_eq!(rows[0][0], "hub");
                assert_eq!(rows[0][2], "stopped");
            }
            other => panic!("unexpected {other:?}"),
        }

        assert_eq!(message(console.execute_line("delete hub").await.unwrap()), "Deleted hub");
        assert!(matches!(
            console.execute_line("status hub").await,
            Err(ConsoleError::Server(ServerError::NotFound(_)))
        ));
    }

    #[tokio::test]
    async fn test_default_motd_and_status() {
        let dir = TempDir::new().unwrap();
        let console = console(&dir);
        console.execute_line("create arena").await.unwrap();
        console.execute_line("chat arena hello all").await.unwrap();

        match console.execute_line("status arena").await.unwrap() {
            Output::Block { title, lines } => {
                assert_eq!(title, "Server arena");
                assert!(lines.contains(&"MOTD:     A Mock Server".to_string()));
                assert!(lines.contains(&"Messages: 1".to_string()));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_start_stop() {
        let dir = TempDir::new().unwrap();
        let console = console(&dir);
        console.execute_line("create live").await.unwrap();

        let started = message(console.execute_line("start live").await.unwrap());
        assert!(started.starts_with("Started live on 127.0.0.1:"));
        assert_eq!(message(console.execute_line("stop live").await.unwrap()), "Stopped live");
        assert_eq!(
            message(console.execute_line("stop live").await.unwrap()),
            "live was not running"
        );
    }

    #[tokio::test]
    async fn test_hooks_list_and_clear() {
        let dir = TempDir::new().unwrap();
        let console = console(&dir);
        console.execute_line("create a").await.unwrap();
        console.execute_line("create b").await.unwrap();

        let a = console.manager().registry().get_instance(SERVER_KIND, "a").unwrap();
        let b = console.manager().registry().get_instance(SERVER_KIND, "b").unwrap();
        let shout = Callback::around(|ctx| {
            let mut args = ctx.args.clone();
            if let Some(Value::String(text)) = args.get_mut(1) {
                *text = text.to_uppercase();
            }
            Ok(ctx.proceed_with(args)?)
        });
        console.engine().inject(a.as_ref(), "chat", shout.clone(), DEFAULT_PRIORITY).unwrap();
        console.engine().inject(a.as_ref(), "join", shout.clone(), 1).unwrap();
        console.engine().inject(b.as_ref(), "chat", shout, 5).unwrap();

        let chat = message(console.execute_line("chat a hi").await.unwrap());
        assert_eq!(chat, "[a] <console> HI");

        match console.execute_line("hooks list MockServer a").await.unwrap() {
            Output::Table { rows, .. } => {
                assert_eq!(rows.len(), 2);
                assert!(rows.iter().all(|r| r[1] == "a"));
            }
            other => panic!("unexpected {other:?}"),
        }
        match console.execute_line("hooks list MockServer b chat").await.unwrap() {
            Output::Table { rows, .. } => assert_eq!(rows[0][4], "5"),
            other => panic!("unexpected {other:?}"),
        }

        let cleared = message(console.execute_line("hooks clear MockServer a chat").await.unwrap());
        assert_eq!(cleared, "Removed 1 injection(s)");
        assert_eq!(
            message(console.execute_line("chat a hi").await.unwrap()),
            "[a] <console> hi"
        );
        assert!(matches!(
            console.execute_line("hooks clear MockServer zzz").await,
            Err(ConsoleError::UnknownInstance { .. })
        ));

        assert_eq!(
            message(console.execute_line("hooks clear").await.unwrap()),
            "Removed 2 injection(s)"
        );
        let reply = a.invoke("status", vec![]).unwrap();
        assert_eq!(reply.as_ready().and_then(|v| v.get("name")), Some(&json!("a")));
    }

    #[tokio::test]
    async fn test_hooks_classes_and_help() {
        let dir = TempDir::new().unwrap();
        let console = console(&dir);
        assert!(matches!(
            console.execute_line("hooks classes").await.unwrap(),
            Output::Message(_)
        ));
        console.execute_line("create one").await.unwrap();
        match console.execute_line("hooks classes").await.unwrap() {
            Output::Table { rows, .. } => assert_eq!(rows, vec![vec!["MockServer".to_string(), "one".to_string()]]),
            other => panic!("unexpected {other:?}"),
        }
        match console.execute_line("help").await.unwrap() {
            Output::Table { rows, .. } => assert_eq!(rows.len(), USAGE.len()),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(console.execute_line("exit").await.unwrap(), Output::Exit);
        assert_eq!(console.execute_line("").await.unwrap(), Output::Empty);
    }

    #[tokio::test]
    async fn test_reload_applies_extensions_to_instances() {
        let dir = TempDir::new().unwrap();
        let console = console(&dir);
        console.execute_line("create hub").await.unwrap();

        let extensions = dir.path().join("extensions");
        tokio::fs::create_dir_all(&extensions).await.unwrap();
        tokio::fs::write(
            extensions.join("tag.hook.toml"),
            r#"
name = "tag"

[[hook]]
class = "MockServer"
method = "chat"
action = { type = "prefix_arg", index = 1, text = "[mod] " }
"#,
        )
        .await
        .unwrap();

        let reloaded = message(console.execute_line("hooks reload").await.unwrap());
        assert!(reloaded.starts_with("1 extension(s) loaded, 1 injection(s) applied"));
        assert_eq!(
            message(console.execute_line("chat hub hi").await.unwrap()),
            "[hub] <console> [mod] hi"
        );

        console.execute_line("hooks reload").await.unwrap();
        let hub = console.manager().registry().get_instance(SERVER_KIND, "hub").unwrap();
        assert_eq!(console.engine().get_injections(hub.as_ref(), "chat").len(), 1);
    }
}
