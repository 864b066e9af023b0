//! Console command grammar.
//!
//! A line is split into words by [`tokenize`] and then matched against the
//! command table. Parsing never touches the servers; [`exec::Console`] does.

pub mod exec;

use thiserror::Error;

/// Errors raised while parsing a console line.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("unterminated {0} quote")]
    UnterminatedQuote(char),
    #[error("trailing backslash")]
    DanglingEscape,
    #[error("unknown command `{0}`; type `help` for the list")]
    UnknownCommand(String),
    #[error("`{command}` needs a {argument}")]
    MissingArgument {
        command: &'static str,
        argument: &'static str,
    },
    #[error("`{command}` does not take `{argument}`")]
    UnexpectedArgument { command: &'static str, argument: String },
    #[error("invalid port `{0}`")]
    InvalidPort(String),
}

/// Splits a line into words.
///
/// Words are separated by whitespace. Single quotes keep their content
/// literally; double quotes allow backslash escapes; a backslash outside
/// quotes escapes the next character. `""` yields an empty word.
pub fn tokenize(line: &str) -> Result<Vec<String>, ParseError> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match c {
            c if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            '\\' => {
                current.push(chars.next().ok_or(ParseError::DanglingEscape)?);
                in_word = true;
            }
            '\'' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(c) => current.push(c),
                        None => return Err(ParseError::UnterminatedQuote('\'')),
                    }
                }
            }
            '"' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => current.push(chars.next().ok_or(ParseError::UnterminatedQuote('"'))?),
                        Some(c) => current.push(c),
                        None => return Err(ParseError::UnterminatedQuote('"')),
                    }
                }
            }
            c => {
                current.push(c);
                in_word = true;
            }
        }
    }
    if in_word {
        words.push(current);
    }
    Ok(words)
}

/// `hooks` sub-commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HooksCommand {
    /// Registered interceptable classes and their instance ids.
    Classes,
    /// Active interceptions, optionally narrowed.
    List {
        class: Option<String>,
        id: Option<String>,
        method: Option<String>,
    },
    /// Remove interceptions: everything, one instance, or one instance method.
    Clear {
        target: Option<(String, String)>,
        method: Option<String>,
    },
    /// Unload and re-apply every extension.
    Reload,
}

/// A parsed console command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    Exit,
    Create {
        name: String,
        port: Option<u16>,
        motd: Option<String>,
    },
    Start { name: String },
    Stop { name: String },
    Delete { name: String },
    List,
    Status { name: String },
    Chat { name: String, message: String },
    Hooks(HooksCommand),
}

/// Syntax and summary of every command, in help order.
pub const USAGE: &[(&str, &str)] = &[
    ("help", "Show this list"),
    ("exit | quit", "Stop all servers and leave"),
    ("create <name> [port] [motd...]", "Create and save a server"),
    ("start <name>", "Start listening on the server's port"),
    ("stop <name>", "Stop a running server"),
    ("delete <name>", "Stop and remove a server"),
    ("list", "List all servers"),
    ("status <name>", "Show one server's status"),
    ("chat <name> <message...>", "Post a chat message as the console"),
    ("hooks classes", "List interceptable classes and instances"),
    ("hooks list [class [id [method]]]", "List active interceptions"),
    ("hooks clear [class id [method]]", "Remove interceptions"),
    ("hooks reload", "Re-apply extensions to current instances"),
];

struct Words {
    command: &'static str,
    words: std::vec::IntoIter<String>,
}

impl Words {
    fn required(&mut self, argument: &'static str) -> Result<String, ParseError> {
        self.words.next().ok_or(ParseError::MissingArgument {
            command: self.command,
            argument,
        })
    }

    fn optional(&mut self) -> Option<String> {
        self.words.next()
    }

    fn rest(&mut self) -> Option<String> {
        let rest: Vec<String> = self.words.by_ref().collect();
        if rest.is_empty() {
            None
        } else {
            Some(rest.join(" "))
        }
    }

    fn finish<T>(mut self, value: T) -> Result<T, ParseError> {
        match self.words.next() {
            Some(extra) => Err(ParseError::UnexpectedArgument {
                command: self.command,
                argument: extra,
            }),
            None => Ok(value),
        }
    }
}

impl Command {
    /// Parses one line. Blank lines and `#` comments parse to `None`.
    pub fn parse(line: &str) -> Result<Option<Self>, ParseError> {
        if line.trim_start().starts_with('#') {
            return Ok(None);
        }
        let mut words = tokenize(line)?.into_iter();
        let Some(head) = words.next() else {
            return Ok(None);
        };

        let command: &'static str = match head.to_lowercase().as_str() {
            "help" | "?" => "help",
            "exit" | "quit" => "exit",
            "create" => "create",
            "start" => "start",
            "stop" => "stop",
            "delete" => "delete",
            "list" | "ls" => "list",
            "status" => "status",
            "chat" | "say" => "chat",
            "hooks" => "hooks",
            _ => return Err(ParseError::UnknownCommand(head)),
        };
        let mut args = Words { command, words };

        let parsed = match command {
            "help" => args.finish(Command::Help)?,
            "exit" => args.finish(Command::Exit)?,
            "create" => {
                let name = args.required("name")?;
                // A word starting with a digit is the port; anything else starts the motd.
                let (port, first_motd_word) = match args.optional() {
                    Some(word) if word.starts_with(|c: char| c.is_ascii_digit()) => {
                        let port = word.parse::<u16>().map_err(|_| ParseError::InvalidPort(word))?;
                        (Some(port), None)
                    }
                    other => (None, other),
                };
                let motd = match (first_motd_word, args.rest()) {
                    (Some(first), Some(rest)) => Some(format!("{first} {rest}")),
                    (first, rest) => first.or(rest),
                };
                Command::Create { name, port, motd }
            }
            "start" => {
                let name = args.required("name")?;
                args.finish(Command::Start { name })?
            }
            "stop" => {
                let name = args.required("name")?;
                args.finish(Command::Stop { name })?
            }
            "delete" => {
                let name = args.required("name")?;
                args.finish(Command::Delete { name })?
            }
            "list" => args.finish(Command::List)?,
            "status" => {
                let name = args.required("name")?;
                args.finish(Command::Status { name })?
            }
            "chat" => {
                let name = args.required("name")?;
                let message = args.rest().ok_or(ParseError::MissingArgument {
                    command: "chat",
                    argument: "message",
                })?;
                Command::Chat { name, message }
            }
            _ => Command::Hooks(Self::parse_hooks(args)?),
        };
        Ok(Some(parsed))
    }

    fn parse_hooks(mut args: Words) -> Result<HooksCommand, ParseError> {
        let sub = args.required("sub-command (classes, list, clear, reload)")?;
        match sub.to_lowercase().as_str() {
            "classes" => args.finish(HooksCommand::Classes),
            "reload" => args.finish(HooksCommand::Reload),
            "list" => {
                let class = args.optional();
                let id = args.optional();
                let method = args.optional();
                args.finish(HooksCommand::List { class, id, method })
            }
            "clear" => {
                let Some(class) = args.optional() else {
                    return Ok(HooksCommand::Clear {
                        target: None,
                        method: None,
                    });
                };
                let id = args.required("instance id")?;
                let method = args.optional();
                args.finish(HooksCommand::Clear {
                    target: Some((class, id)),
                    method,
                })
            }
            _ => Err(ParseError::UnknownCommand(format!("hooks {sub}"))),
        }
    }
}
