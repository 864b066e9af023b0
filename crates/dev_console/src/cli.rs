//! Command-line interface handling for the dev console.
//!
//! Options parsed here override the matching settings of the configuration
//! file.

use clap::{Arg, ArgAction, ArgMatches, Command};
use std::ffi::OsString;
use std::path::PathBuf;

/// Default configuration file path.
pub const DEFAULT_CONFIG_PATH: &str = "console.toml";

/// Command line arguments parsed from user input.
#[derive(Debug, Clone, Default)]
pub struct CliArgs {
    /// Path to the configuration file
    pub config_path: PathBuf,
    /// Optional override for the data directory
    pub data_dir: Option<PathBuf>,
    /// Optional override for the extension directory
    pub extensions_dir: Option<PathBuf>,
    /// Optional override for log level
    pub log_level: Option<String>,
    /// Whether to force JSON log output
    pub json_logs: bool,
    /// Console commands to run instead of the interactive prompt
    pub exec: Vec<String>,
}

fn command() -> Command {
    Command::new("dev_console")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Manage local mock servers and intercept their methods at runtime")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value(DEFAULT_CONFIG_PATH),
        )
        .arg(
            Arg::new("data-dir")
                .short('d')
                .long("data-dir")
                .value_name("DIR")
                .help("Directory holding server records"),
        )
        .arg(
            Arg::new("extensions")
                .short('e')
                .long("extensions")
                .value_name("DIR")
                .help("Directory holding *.hook.toml extensions"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("Log level (trace, debug, info, warn, error)"),
        )
        .arg(
            Arg::new("json-logs")
                .long("json-logs")
                .help("Output logs in JSON format")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("exec")
                .short('x')
                .long("exec")
                .value_name("COMMAND")
                .help("Run a console command and exit; repeat to run several in order")
                .action(ArgAction::Append),
        )
}

impl CliArgs {
    /// Parses the process arguments, exiting with usage on error.
    pub fn parse() -> Self {
        Self::from_matches(&command().get_matches())
    }

    /// Parses an explicit argument list.
    pub fn try_parse_from<I, T>(args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        Ok(Self::from_matches(&command().try_get_matches_from(args)?))
    }

    fn from_matches(matches: &ArgMatches) -> Self {
        Self {
            config_path: matches
                .get_one::<String>("config")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH)),
            data_dir: matches.get_one::<String>("data-dir").map(PathBuf::from),
            extensions_dir: matches.get_one::<String>("extensions").map(PathBuf::from),
            log_level: matches.get_one::<String>("log-level").cloned(),
            json_logs: matches.get_flag("json-logs"),
            exec: matches
                .get_many::<String>("exec")
                .map(|values| values.cloned().collect())
                .unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = CliArgs::try_parse_from(["dev_console"]).unwrap();
        assert_eq!(args.config_path, PathBuf::from("console.toml"));
        assert!(args.data_dir.is_none());
        assert!(!args.json_logs);
        assert!(args.exec.is_empty());
    }

    #[test]
    fn test_overrides_and_repeated_exec() {
        let args = CliArgs::try_parse_from([
            "dev_console",
            "-c",
            "custom.toml",
            "--data-dir",
            "/tmp/data",
            "-l",
            "debug",
            "--json-logs",
            "-x",
            "create hub",
            "--exec",
            "list",
        ])
        .unwrap();
        assert_eq!(args.config_path, PathBuf::from("custom.toml"));
        assert_eq!(args.data_dir, Some(PathBuf::from("/tmp/data")));
        assert_eq!(args.log_level.as_deref(), Some("debug"));
        assert!(args.json_logs);
        assert_eq!(args.exec, vec!["create hub", "list"]);
    }

    #[test]
    fn test_unknown_flag_is_an_error() {
        assert!(CliArgs::try_parse_from(["dev_console", "--bogus"]).is_err());
    }
}
