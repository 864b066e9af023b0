//! Application wiring: configuration, logging, servers, extensions and the
//! console loop.

use crate::cli::CliArgs;
use crate::command::exec::{Console, Output, CONSOLE_SENDER};
use crate::config::AppConfig;
use crate::extensions::ExtensionLoader;
use crate::logging::setup_logging;
use crate::signals;
use crate::ui::render_box;
use anyhow::Context;
use hook_system::{InjectionEngine, InstanceRegistry};
use mock_server::{ServerEvent, ServerManager, ServerStore};
use std::io::Write;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

pub struct Application {
    config: AppConfig,
    exec: Vec<String>,
    console: Console,
}

impl Application {
    /// Loads configuration, applies CLI overrides, initializes logging and
    /// builds the console over the process-wide registry and engine.
    pub async fn new(args: CliArgs) -> anyhow::Result<Self> {
        let mut config = AppConfig::load_from_file(&args.config_path)
            .await
            .with_context(|| format!("loading {}", args.config_path.display()))?;
        config.apply_cli(&args);
        config.validate()?;

        setup_logging(&config.logging)?;

        Self::with_runtime(config, args.exec, hook_system::registry(), hook_system::engine()).await
    }

    /// Builds the application over an explicit registry and engine.
    pub async fn with_runtime(
        config: AppConfig,
        exec: Vec<String>,
        registry: Arc<InstanceRegistry>,
        engine: Arc<InjectionEngine>,
    ) -> anyhow::Result<Self> {
        let manager = Arc::new(ServerManager::new(ServerStore::new(config.servers_dir()), registry));
        manager
            .load_all()
            .await
            .with_context(|| format!("loading servers from {}", config.servers_dir().display()))?;

        let console = Console::new(
            manager,
            engine,
            ExtensionLoader::new(config.extensions_dir()),
            config.servers.clone(),
        );
        if config.extensions.auto_load {
            console.load_extensions().await;
        }

        Ok(Self {
            config,
            exec,
            console,
        })
    }

    pub fn console(&self) -> &Console {
        &self.console
    }

    /// Runs the `--exec` commands, or the interactive prompt when there are
    /// none. Every server is stopped before returning.
    pub async fn run(self) -> anyhow::Result<()> {
        let result = if self.exec.is_empty() {
            self.run_interactive().await
        } else {
            let mut stdout = std::io::stdout();
            self.run_commands(&self.exec, &mut stdout).await
        };

        let stopped = self.console.manager().shutdown_all().await;
        if stopped > 0 {
            info!("🛑 Stopped {} running server(s)", stopped);
        }
        info!("👋 Dev console closed");
        result
    }

    /// Executes `commands` in order, writing their output to `out`.
    ///
    /// Stops at `exit` or at the first failing command, which is returned as
    /// the error.
    pub async fn run_commands<W: Write>(&self, commands: &[String], out: &mut W) -> anyhow::Result<()> {
        for line in commands {
            match self.console.execute_line(line).await {
                Ok(Output::Exit) => break,
                Ok(output) => {
                    let text = output.render();
                    if !text.is_empty() {
                        writeln!(out, "{text}")?;
                    }
                }
                Err(e) => return Err(anyhow::anyhow!("`{}` failed: {}", line, e)),
            }
        }
        out.flush()?;
        Ok(())
    }

    async fn run_interactive(&self) -> anyhow::Result<()> {
        if self.config.console.show_banner {
            println!("{}", self.banner());
        }

        let mut events = self.console.manager().subscribe();
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let shutdown = signals::wait_for_shutdown();
        tokio::pin!(shutdown);

        self.prompt()?;
        loop {
            tokio::select! {
                result = &mut shutdown => {
                    result?;
                    println!();
                    break;
                }
                line = lines.next_line() => {
                    let Some(line) = line? else {
                        println!();
                        break;
                    };
                    match self.console.execute_line(&line).await {
                        Ok(Output::Exit) => break,
                        Ok(output) => {
                            let text = output.render();
                            if !text.is_empty() {
                                println!("{text}");
                            }
                        }
                        Err(e) => eprintln!("❌ {e}"),
                    }
                    self.prompt()?;
                }
                event = events.recv() => match event {
                    Ok(event) => {
                        if is_remote(&event) {
                            println!("\r{event}");
                            self.prompt()?;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => warn!("Missed {} server event(s)", skipped),
                    Err(RecvError::Closed) => break,
                },
            }
        }
        Ok(())
    }

    fn prompt(&self) -> std::io::Result<()> {
        let mut stdout = std::io::stdout();
        write!(stdout, "{}", self.config.console.prompt)?;
        stdout.flush()
    }

    fn banner(&self) -> String {
        render_box(
            &format!("MOCK SERVER DEV CONSOLE v{}", env!("CARGO_PKG_VERSION")),
            &[
                format!("Servers:    {}", self.config.servers_dir().display()),
                format!("Extensions: {}", self.config.extensions_dir().display()),
                format!("Loaded:     {} server(s)", self.console.manager().len()),
                String::new(),
                "Type `help` for commands, `exit` to leave.".to_string(),
            ],
        )
    }
}

/// Events caused by network clients rather than by console commands.
fn is_remote(event: &ServerEvent) -> bool {
    match event {
        ServerEvent::PlayerJoined { .. } | ServerEvent::PlayerLeft { .. } => true,
        ServerEvent::Chat { message, .. } => message.sender != CONSOLE_SENDER,
        _ => false,
    }
}
