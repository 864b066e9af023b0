//! # Dev Console
//!
//! Interactive front end for local mock servers and the hook system.
//!
//! The console manages [`mock_server`] instances, applies declarative
//! `*.hook.toml` extensions to them through the [`hook_system`] engine, and
//! exposes the registry and active interceptions as `hooks` commands.
//!
//! ## Layout
//!
//! * [`cli`] and [`config`] - command-line options over a TOML config file
//! * [`logging`] - tracing subscriber writing to stderr
//! * [`command`] - line grammar and the [`Console`] dispatcher
//! * [`extensions`] - manifest parsing and the [`ExtensionLoader`]
//! * [`ui`] - box and table rendering
//! * [`app`] - the [`Application`] that wires everything together

pub mod app;
pub mod cli;
pub mod command;
pub mod config;
pub mod extensions;
pub mod logging;
pub mod signals;
pub mod ui;

pub use app::Application;
pub use cli::CliArgs;
pub use command::exec::{Console, ConsoleError, Output};
pub use command::{Command, HooksCommand, ParseError};
pub use config::{AppConfig, ConfigError};
pub use extensions::{ExtensionError, ExtensionLoader, ExtensionManifest, LoadReport};
