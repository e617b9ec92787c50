//! Command-line interface for status-relay.
//!
//! Uses lexopt for minimal binary size overhead.

use std::ffi::OsString;
use std::path::PathBuf;

/// What the binary was asked to do.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Subcommand {
    /// Run the supervisor and health endpoint.
    #[default]
    Run,
    /// Pair a new identity.
    Add,
    /// Delete an identity's credentials and ledger.
    Remove,
    /// Print known identities.
    List,
}

impl Subcommand {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "run" => Some(Self::Run),
            "add" => Some(Self::Add),
            "remove" => Some(Self::Remove),
            "list" => Some(Self::List),
            _ => None,
        }
    }
}

/// Command-line arguments.
#[derive(Debug, Clone, Default)]
pub struct Args {
    pub command: Subcommand,
    /// Identity name for `add` / `remove`.
    pub name: Option<String>,
    /// Phone number for `add`.
    pub phone: Option<String>,
    /// Skip the confirmation prompt of `remove`.
    pub yes: bool,
    /// Path to configuration file.
    pub config: Option<PathBuf>,
    /// Root holding `sessions/` and `history/` (overrides config).
    pub data_dir: Option<PathBuf>,
    /// Log level (error, warn, info, debug, trace).
    pub log_level: Option<String>,
    /// Show version and exit.
    pub version: bool,
    /// Show help and exit.
    pub help: bool,
}

/// Parse command-line arguments.
pub fn parse_args() -> Result<Args, ArgsError> {
    parse_args_from(std::env::args_os())
}

/// Parse arguments from an iterator (for testing).
pub fn parse_args_from<I>(args: I) -> Result<Args, ArgsError>
where
    I: IntoIterator<Item = OsString>,
{
    use lexopt::prelude::*;

    let mut result = Args::default();
    let mut seen_command = false;
    let mut parser = lexopt::Parser::from_iter(args);

    while let Some(arg) = parser.next()? {
        match arg {
            Short('h') | Long("help") => {
                result.help = true;
            }
            Short('V') | Long("version") => {
                result.version = true;
            }
            Short('c') | Long("config") => {
                result.config = Some(parser.value()?.parse()?);
            }
            Short('d') | Long("data-dir") => {
                result.data_dir = Some(parser.value()?.parse()?);
            }
            Short('l') | Long("log-level") => {
                result.log_level = Some(parser.value()?.parse()?);
            }
            Short('n') | Long("name") => {
                result.name = Some(parser.value()?.parse()?);
            }
            Short('p') | Long("phone") => {
                result.phone = Some(parser.value()?.parse()?);
            }
            Short('y') | Long("yes") => {
                result.yes = true;
            }
            Value(val) => {
                let val = val.to_string_lossy().into_owned();
                if !seen_command {
                    result.command = Subcommand::from_name(&val)
                        .ok_or_else(|| ArgsError::UnknownCommand(val.clone()))?;
                    seen_command = true;
                } else if result.command == Subcommand::Remove && result.name.is_none() {
                    result.name = Some(val);
                } else {
                    return Err(ArgsError::UnexpectedArgument(val));
                }
            }
            _ => return Err(arg.unexpected().into()),
        }
    }

    Ok(result)
}

/// Print help message.
pub fn print_help() {
    let version = env!("CARGO_PKG_VERSION");
    println!(
        r#"status-relay {version}
Multi-session supervisor for linked messaging accounts

USAGE:
    status-relay [OPTIONS] [COMMAND]

COMMANDS:
    run                     Supervise every paired session [default]
    add                     Pair a new session
    remove [NAME]           Unlink a session and delete its files
    list                    List paired sessions

OPTIONS:
    -c, --config <FILE>     Path to configuration file (JSON)
    -d, --data-dir <DIR>    Keep sessions/ and history/ under DIR
    -l, --log-level <LVL>   Log level (error, warn, info, debug, trace)
    -n, --name <NAME>       Session name for add/remove
    -p, --phone <NUMBER>    Phone number for add, with country code
    -y, --yes               Do not ask for confirmation on remove
    -h, --help              Print help
    -V, --version           Print version

ENVIRONMENT VARIABLES:
    STATUS_RELAY_SESSIONS_DIR   Credentials directory (overrides config)
    STATUS_RELAY_HISTORY_DIR    Ledger directory (overrides config)
    STATUS_RELAY_POLL_INTERVAL  Discovery interval in seconds
    STATUS_RELAY_PREFIX         Command prefix character
    STATUS_RELAY_HEALTH_PORT    Health endpoint port
    STATUS_RELAY_LOG_LEVEL      Log level (overrides config)
    RUST_LOG                    Alternative log level setting

EXAMPLES:
    # Pair a phone interactively
    status-relay add

    # Pair without prompts
    status-relay add --name alice --phone +2348012345678

    # Run every paired session
    status-relay -d /var/lib/status-relay run

    # Remove a session without confirmation
    status-relay remove alice --yes
"#
    );
}

/// Print version.
pub fn print_version() {
    println!("status-relay {}", env!("CARGO_PKG_VERSION"));
}

/// Argument parsing errors.
#[derive(Debug)]
pub enum ArgsError {
    /// Lexopt parsing error.
    Lexopt(lexopt::Error),
    /// Subcommand that does not exist.
    UnknownCommand(String),
    /// Unexpected positional argument.
    UnexpectedArgument(String),
}

impl std::fmt::Display for ArgsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Lexopt(e) => write!(f, "{}", e),
            Self::UnknownCommand(cmd) => {
                write!(f, "unknown command: '{}' (try --help)", cmd)
            }
            Self::UnexpectedArgument(arg) => {
                write!(f, "unexpected argument: '{}'", arg)
            }
        }
    }
}

impl std::error::Error for ArgsError {}

impl From<lexopt::Error> for ArgsError {
    fn from(e: lexopt::Error) -> Self {
        Self::Lexopt(e)
    }
}
