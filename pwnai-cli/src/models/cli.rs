// pwnai-cli/src/models/cli.rs
use clap::{ArgAction, Parser};

/// PwnAI: an AI assistant for authorized penetration testing.
/// Starts an interactive session by default, or runs a single turn non-interactively.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase message verbosity.
    ///
    /// Specify multiple times for more verbose output:
    ///  -v:  INFO level
    ///  -vv: DEBUG level
    ///  -vvv: TRACE level (most verbose)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Backend to use instead of the configured `default_backend`.
    #[arg(short, long)]
    pub backend: Option<String>,

    /// Run a single turn non-interactively.
    #[arg(short, long)]
    pub turn: Option<String>,
}
