//! ptyhub: run and inspect PTY-backed terminal sessions from the command
//! line.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ptyhub::config::DEFAULT_CONFIG_PATH;
use ptyhub::{
    ChannelSink, ConfigOverrides, CreateRequest, EngineConfig, EtcShells, JsonFileStore,
    NullSink, OutputSink, SessionRegistry,
};
use ptyhub_core::{PtyHubError, SettingsDocument, TerminalFlags};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{error, info, warn};

/// ptyhub terminal session engine
#[derive(Parser, Debug)]
#[command(name = "ptyhub", version, about = "PTY-backed terminal sessions")]
struct Cli {
    /// Config file path
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: String,

    /// Settings document path (overrides the config file)
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a command in a new session, streaming its output to stdout
    Run {
        /// Session id (random when omitted)
        #[arg(long)]
        id: Option<String>,

        /// Terminal rows
        #[arg(long)]
        rows: Option<u16>,

        /// Terminal columns
        #[arg(long)]
        cols: Option<u16>,

        /// Export DISPLAY=:0 to the session
        #[arg(long)]
        display: bool,

        /// Do not treat the command as the session's shell
        #[arg(long)]
        no_shell: bool,

        /// Program and arguments to run (default shell when omitted)
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        cmdline: Vec<String>,
    },

    /// List the shells available on this host
    Shells,

    /// Inspect or update the persisted settings
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },
}

#[derive(Subcommand, Debug)]
enum SettingsAction {
    /// Print the settings document
    Show,
    /// Set the shell used when no command is given
    SetDefaultShell { shell: String },
    /// Merge a JSON object into the settings
    Merge { json: String },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries terminal output.
    use tracing_subscriber::EnvFilter;
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let code = match execute(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = %format!("{e:#}"), "command failed");
            1
        }
    };
    std::process::exit(code);
}

async fn execute(cli: Cli) -> Result<i32> {
    let (rows, cols) = match &cli.command {
        Command::Run { rows, cols, .. } => (*rows, *cols),
        _ => (None, None),
    };
    let overrides = ConfigOverrides {
        rows,
        cols,
        settings_path: cli.settings.clone(),
    };
    let config = EngineConfig::load(Some(&PathBuf::from(&cli.config)), &overrides)
        .context("failed to load config")?;

    match cli.command {
        Command::Run {
            id,
            display,
            no_shell,
            cmdline,
            ..
        } => run(config, id, display, no_shell, cmdline).await,
        Command::Shells => {
            let registry = build_registry(&config, Arc::new(NullSink));
            for shell in registry.shells() {
                println!("{shell}");
            }
            Ok(0)
        }
        Command::Settings { action } => settings(&config, action),
    }
}

fn build_registry(config: &EngineConfig, sink: Arc<dyn OutputSink>) -> SessionRegistry {
    SessionRegistry::new(
        config.session.clone(),
        Arc::new(JsonFileStore::new(&config.settings_path)),
        Arc::new(EtcShells::new(&config.shells_file)),
        sink,
    )
}

async fn run(
    config: EngineConfig,
    id: Option<String>,
    display: bool,
    no_shell: bool,
    cmdline: Vec<String>,
) -> Result<i32> {
    let (sink, mut output) = ChannelSink::channel();
    let registry = Arc::new(build_registry(&config, Arc::new(sink)));

    let mut flags = TerminalFlags::from_document(&registry.settings());
    flags.use_display |= display;

    let mut request = CreateRequest::new().is_shell(!no_shell).flags(flags);
    if let Some(id) = id {
        request = request.id(id);
    }
    if !cmdline.is_empty() {
        request = request.argv(cmdline);
    }

    let id = registry.create(request).await.context("failed to create session")?;
    if !registry.subscribe(&id).await {
        registry.remove(&id).await;
        anyhow::bail!("failed to start session {id}");
    }
    if let Some(summary) = registry.get(&id).await {
        info!(session_id = %id, label = %summary.label, pid = ?summary.pid, "session running");
    }

    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(event) = output.recv().await {
            if stdout.write_all(&event.data).await.is_err() || stdout.flush().await.is_err() {
                break;
            }
        }
    });

    let input_registry = registry.clone();
    let input_id = id.clone();
    let reader = tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(mut line)) => {
                    line.push('\n');
                    if !input_registry.enqueue_input(&input_id, line.as_bytes()).await {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "stdin read failed");
                    break;
                }
            }
        }
    });

    let summary = tokio::select! {
        summary = registry.wait(&id) => summary,
        _ = tokio::signal::ctrl_c() => {
            info!(session_id = %id, "interrupted");
            registry.get(&id).await
        }
    };
    reader.abort();
    // The input task holds a registry handle, and the registry holds the sink.
    if let Err(e) = reader.await {
        if !e.is_cancelled() {
            warn!(error = %e, "input reader failed");
        }
    }
    registry.remove(&id).await;
    drop(registry);
    if let Err(e) = writer.await {
        warn!(error = %e, "output writer failed");
    }

    let Some(summary) = summary else {
        return Err(PtyHubError::SessionNotFound(id).into());
    };
    info!(
        session_id = %summary.id,
        exit_code = ?summary.exit_code,
        title = ?summary.title,
        "session finished"
    );
    Ok(summary.exit_code.unwrap_or(1))
}

fn settings(config: &EngineConfig, action: SettingsAction) -> Result<i32> {
    let registry = build_registry(config, Arc::new(NullSink));
    match action {
        SettingsAction::Show => {
            let doc = registry.settings();
            println!("{}", serde_json::to_string_pretty(&doc)?);
            info!(default_shell = %registry.default_shell(), "resolved default shell");
        }
        SettingsAction::SetDefaultShell { shell } => {
            if !registry.set_default_shell(&shell) {
                anyhow::bail!("failed to save settings to {}", config.settings_path.display());
            }
        }
        SettingsAction::Merge { json } => {
            let partial: SettingsDocument =
                serde_json::from_str(&json).context("settings must be a JSON object")?;
            if !registry.merge_settings(partial) {
                anyhow::bail!("failed to save settings to {}", config.settings_path.display());
            }
        }
    }
    Ok(0)
}
