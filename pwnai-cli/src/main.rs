// pwnai-cli/src/main.rs
mod approval;
mod chat;

mod models {
    pub mod cli;
}

use anyhow::{Context, Result, anyhow};
use colored::*;
use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use rustyline::error::ReadlineError;
use rustyline::{Config, DefaultEditor};

use pwnai_core::api::ChatClient;
use pwnai_core::api::claude::ClaudeClient;
use pwnai_core::config::CONFIG_FILENAME;
use pwnai_core::msf::MsfClient;
use pwnai_core::terminal::local::LocalTerminalStore;
use pwnai_core::tools::fs::ReadDirTool;
use pwnai_core::tools::pentest::register_pentest_tools;
use pwnai_core::tools::term::{RunCommandTiming, TerminalAccess, register_terminal_tools};
use pwnai_core::{
    Backend, BackendKind, BackendRegistry, ChatBackend, ClaudeBackend, MsfConfig, PwnaiBackend,
    PwnaiConfig, ToolInvoker, ToolRegistry,
};

use crate::approval::CliApprover;
use crate::chat::ChatSession;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Level};
use tracing_subscriber::{
    fmt::{self, time::LocalTime},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

const LOG_FILE_NAME: &str = "pwnai.log";
const WORKSPACE_CONTAINER: &str = "workspace";
const TURN_FAILED: &str = "Turn failed";

fn find_project_root() -> Result<PathBuf> {
    let current_dir = env::current_dir().context("Failed to get current directory")?;
    let mut current = current_dir.as_path();
    loop {
        let config_path = current.join(CONFIG_FILENAME);
        if config_path.is_file() {
            return Ok(current.to_path_buf());
        }
        match current.parent() {
            Some(parent) => current = parent,
            None => {
                return Err(anyhow!(
                    "Could not find '{}' in current directory or any parent directory.",
                    CONFIG_FILENAME
                ));
            }
        }
    }
}

fn load_cli_config() -> Result<(PwnaiConfig, PathBuf)> {
    let project_root = find_project_root()?;
    let config_path = project_root.join(CONFIG_FILENAME);
    info!("Found configuration file at: {:?}", config_path);
    let content = fs::read_to_string(&config_path)
        .with_context(|| format!("Failed to read project config file: {:?}", config_path))?;
    let config = PwnaiConfig::from_toml_str(&content)
        .context("Failed to parse or validate configuration content")?;
    Ok((config, project_root))
}

/// One factory per configured backend whose API key is available.
fn build_backend_registry(config: &PwnaiConfig) -> Result<BackendRegistry> {
    let mut registry = BackendRegistry::new();
    for (name, backend) in &config.backends {
        let api_key = match env::var(&backend.api_key_env_var) {
            Ok(key) if !key.trim().is_empty() => key,
            _ => {
                warn!(backend = %name, env_var = %backend.api_key_env_var, "API key not set, backend unavailable");
                continue;
            }
        };
        let client: Arc<dyn ChatClient> = Arc::new(
            ClaudeClient::new(backend.claude_settings(api_key))
                .with_context(|| format!("Failed to create client for backend '{}'", name))?,
        );
        match backend.kind {
            BackendKind::Pwnai => {
                registry.register(name.clone(), move || {
                    Backend::Pwnai(PwnaiBackend::new(client.clone()))
                });
            }
            BackendKind::Claude => {
                let prompt = config.system_prompt.clone();
                registry.register(name.clone(), move || {
                    Backend::Claude(ClaudeBackend::new(client.clone(), prompt.clone()))
                });
            }
        }
        debug!(backend = %name, kind = ?backend.kind, "Registered backend");
    }
    registry.set_default(config.default_backend.clone());
    Ok(registry)
}

async fn connect_msf(msf: &MsfConfig) -> Result<Arc<MsfClient>> {
    let username = env::var(&msf.username_env_var)
        .with_context(|| format!("{} is not set", msf.username_env_var))?;
    let password = env::var(&msf.password_env_var)
        .with_context(|| format!("{} is not set", msf.password_env_var))?;
    let client = MsfClient::new(&msf.host, msf.port)?;
    client.authenticate(&username, &password).await?;
    Ok(Arc::new(client))
}

/// Registers the tool families and returns the workspace terminal's short id.
async fn build_tool_registry(
    config: &PwnaiConfig,
    project_root: &Path,
    store: Arc<LocalTerminalStore>,
) -> Result<(ToolRegistry, String)> {
    let mut registry = ToolRegistry::new();
    registry.register(ReadDirTool)?;

    let terminal_id = store.open(WORKSPACE_CONTAINER)?;
    let short_id: String = terminal_id.chars().take(8).collect();
    info!(terminal_id = %terminal_id, cwd = %project_root.display(), "Opened workspace terminal");
    register_terminal_tools(
        &mut registry,
        TerminalAccess::new(store, WORKSPACE_CONTAINER),
        RunCommandTiming::default(),
    )?;

    if let Some(msf) = &config.msf {
        match connect_msf(msf).await {
            Ok(client) => {
                register_pentest_tools(&mut registry, client)?;
                info!(host = %msf.host, port = msf.port, "Metasploit RPC connected, pentest tools enabled");
            }
            Err(e) => {
                warn!(error = %format!("{:#}", e), "Metasploit RPC unavailable, pentest tools disabled");
                eprintln!(
                    "{} Metasploit RPC unavailable ({:#}). Pentest tools are disabled.",
                    "Warning:".yellow(),
                    e
                );
            }
        }
    }

    Ok((registry, short_id))
}

/// Runs one turn and reports the outcome; Ctrl-C cancels it.
async fn run_turn_interruptible(session: &mut ChatSession, prompt: &str) -> bool {
    let cancel = CancellationToken::new();
    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        })
    };
    let result = session.run_turn(prompt, &cancel).await;
    watcher.abort();

    match result {
        Ok(summary) => {
            info!(chat_id = %session.chat_id(), iterations = summary.iterations, tools = summary.tool_results.len(), "Turn completed");
            true
        }
        Err(e) => {
            error!(chat_id = %session.chat_id(), "Turn failed: {:#}", e);
            eprintln!("\n{}: {:#}", TURN_FAILED.red(), e);
            false
        }
    }
}

fn print_welcome_message(session: &ChatSession) {
    println!(
        "\n{} ({} / {})",
        "PwnAI".cyan().bold(),
        session.backend().api_type(),
        session.backend().model()
    );
    println!(
        "{}",
        "Type 'new' for a fresh conversation, 'exit' or Ctrl-D to quit.".dimmed()
    );
}

async fn run_interactive(mut session: ChatSession) -> Result<()> {
    print_welcome_message(&session);

    let rl_config = Config::builder()
        .history_ignore_space(true)
        .completion_type(rustyline::CompletionType::List)
        .edit_mode(rustyline::EditMode::Emacs)
        .auto_add_history(true)
        .build();
    let mut rl = DefaultEditor::with_config(rl_config)?;

    let history_dir = dirs::cache_dir()
        .map(|d| d.join("pwnai"))
        .ok_or_else(|| anyhow!("Could not determine cache directory for history file"))?;
    fs::create_dir_all(&history_dir).context("Failed to create history directory")?;
    let history_file_path = history_dir.join("cli_history.txt");
    if rl.load_history(&history_file_path).is_err() {
        debug!(path = %history_file_path.display(), "No previous CLI history found or error loading.");
    }

    let prompt = format!("{} ", ">".green().bold());
    loop {
        match rl.readline(&prompt) {
            Ok(line) => {
                let input = line.trim();
                let lowered = input.to_lowercase();
                if input.is_empty() {
                    continue;
                }
                if lowered == "exit" || lowered == "quit" {
                    info!("Exit command entered, leaving interactive mode.");
                    break;
                }
                if lowered == "new" {
                    session.reset();
                    println!("\n{}", "Starting a new conversation...".cyan());
                    continue;
                }
                run_turn_interruptible(&mut session, input).await;
            }
            Err(ReadlineError::Interrupted) => {
                println!("{}", "^C".yellow());
                continue;
            }
            Err(ReadlineError::Eof) => {
                info!("EOF detected, exiting interactive mode.");
                break;
            }
            Err(err) => {
                error!("Readline error: {:?}", err);
                eprintln!("Error reading input: {}", err.to_string().red());
                break;
            }
        }
    }

    if let Err(e) = rl.save_history(&history_file_path) {
        warn!(path = %history_file_path.display(), error = %e, "Failed to save CLI history.");
    }
    println!("\n{}\n", "Exiting.".cyan());
    Ok(())
}

async fn run(cli: models::cli::Cli) -> Result<()> {
    let (config, project_root) = load_cli_config()?;

    let backends = build_backend_registry(&config)?;
    let backend = match &cli.backend {
        Some(name) => backends.resolve(name)?,
        None => backends.resolve_default()?,
    };
    info!(backend = backend.api_type(), model = backend.model(), "Backend selected");

    let store = Arc::new(LocalTerminalStore::new("sh", Some(project_root.clone())));
    let (registry, terminal_id) = build_tool_registry(&config, &project_root, store).await?;
    info!(tools = ?registry.names(), "Tools registered");

    let invoker = ToolInvoker::new(Arc::new(registry), Arc::new(CliApprover));
    let session = ChatSession::new(backend, invoker).with_preamble(format!(
        "[workspace] The operator's terminal has widget_id \"{}\". Working directory: {}",
        terminal_id,
        project_root.display()
    ));

    match cli.turn {
        Some(prompt) => {
            let mut session = session;
            if run_turn_interruptible(&mut session, &prompt).await {
                Ok(())
            } else {
                Err(anyhow!(TURN_FAILED))
            }
        }
        None => run_interactive(session).await,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    colored::control::set_override(true);

    dotenvy::dotenv().ok();
    let cli = models::cli::Cli::parse();

    let default_level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::default().add_directive(default_level.into()));

    let log_dir = dirs::cache_dir()
        .or_else(dirs::runtime_dir)
        .unwrap_or_else(env::temp_dir)
        .join("pwnai");
    if let Err(e) = fs::create_dir_all(&log_dir) {
        eprintln!("{} Failed to create log directory {}: {}", "Error:".red(), log_dir.display(), e);
        return ExitCode::FAILURE;
    }
    let log_path = log_dir.join(LOG_FILE_NAME);

    let file_appender = tracing_appender::rolling::never(&log_dir, LOG_FILE_NAME);
    let (non_blocking_writer, _guard) = tracing_appender::non_blocking(file_appender);

    let local_timer = LocalTime::new(time::macros::format_description!(
        "[year]-[month]-[day] [hour]:[minute]:[second].[subsecond digits:3]"
    ));
    let file_layer = fmt::layer()
        .with_writer(non_blocking_writer)
        .with_ansi(false)
        .with_target(true)
        .with_line_number(true)
        .with_timer(local_timer.clone());
    let stderr_layer = fmt::layer()
        .with_writer(io::stderr)
        .with_timer(local_timer)
        .with_target(false)
        .with_level(true);

    if let Err(e) = tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
    {
        eprintln!("{} Failed to initialize logging: {}", "Error:".red(), e);
        return ExitCode::FAILURE;
    }
    colored::control::unset_override();

    info!(
        "Logging initialized. Level determined by RUST_LOG or -v flags (default: {}). Logging to stderr and {}",
        default_level,
        log_path.display()
    );

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if e.to_string() != TURN_FAILED {
                error!("Operation failed: {:#}", e);
                eprintln!("{} {:#}", "Error:".red(), e);
            }
            ExitCode::FAILURE
        }
    }
}
