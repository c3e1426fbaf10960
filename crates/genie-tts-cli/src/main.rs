use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::BoxMakeWriter;

use genie_tts_core::config::{JsonFileConfigStore, LoggingConfig, TtsConfig};
use genie_tts_core::types::{MessageOrigin, Reply, Segment};
use genie_tts_plugins::{GenieTtsPlugin, PluginManager};

#[derive(Parser)]
#[command(
    name = "genie-tts",
    about = "Turn chat bot replies into Genie TTS voice messages",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path (default: ~/.genie_tts/config.json)
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a console host: stdin lines are LLM replies or /gentts commands
    Run {
        /// Sender id of console messages
        #[arg(long, default_value = "console")]
        sender: String,

        /// Group id; omit for a direct conversation
        #[arg(long)]
        group: Option<String>,

        /// Treat the sender as an admin
        #[arg(long)]
        admin: bool,
    },

    /// Synthesize one text and print the WAV path
    Say { text: String },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show,
    /// Check the configuration for problems
    Validate,
}

fn log_filter(verbose: bool, logging: &LoggingConfig) -> EnvFilter {
    let with_filters = |level: &str| {
        let mut directives = vec![level.to_string()];
        directives.extend(logging.filters.iter().cloned());
        EnvFilter::new(directives.join(","))
    };
    if verbose {
        return with_filters("debug");
    }
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| with_filters(logging.level.as_deref().unwrap_or("info")))
}

fn init_logging(verbose: bool, logging: &LoggingConfig) {
    let writer = if logging.output == "stdout" {
        BoxMakeWriter::new(std::io::stdout)
    } else {
        BoxMakeWriter::new(std::io::stderr)
    };
    let builder = tracing_subscriber::fmt()
        .with_env_filter(log_filter(verbose, logging))
        .with_writer(writer);
    if logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn print_reply(reply: &Reply) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string(reply)?);
    Ok(())
}

/// Console host loop. Returns on EOF or Ctrl-C.
async fn run_console(manager: &PluginManager, origin: MessageOrigin) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                return Ok(());
            }
        };
        let Some(line) = line else {
            return Ok(());
        };
        let line = line.trim();
        if line.is_empty() || !manager.message_received(&origin, line).await {
            continue;
        }

        let replies = if line.starts_with('/') {
            match manager.commands().dispatch(&origin, line).await {
                Some(replies) => replies,
                None => vec![Reply::command_text(format!("Unknown command: {line}"))],
            }
        } else {
            vec![Reply::llm(vec![Segment::text(line)])]
        };

        for reply in replies {
            if let Some(out) = manager.prepare_outgoing(&origin, reply).await {
                print_reply(&out)?;
                manager.message_sent(&origin, &out).await;
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .map(PathBuf::from)
        .unwrap_or_else(TtsConfig::default_path);
    let config = TtsConfig::load(&config_path)?;

    init_logging(cli.verbose, &config.logging.clone().unwrap_or_default());
    tracing::debug!(path = %config_path.display(), "Config loaded");

    match cli.command {
        Commands::Run {
            sender,
            group,
            admin,
        } => {
            let store = Arc::new(JsonFileConfigStore::new(config_path));
            let mut manager = PluginManager::new();
            let plugin = GenieTtsPlugin::from_config(config, store);
            manager.add_plugin(Box::new(plugin))?;
            manager.initialize().await?;
            manager.start().await?;

            let origin = MessageOrigin {
                group_id: group,
                sender_id: sender,
                is_admin: admin,
            };
            tracing::info!(session = %origin.session_key(), "Console host ready");
            let result = run_console(&manager, origin).await;
            manager.terminate().await;
            result?;
        }
        Commands::Say { text } => {
            let store = Arc::new(JsonFileConfigStore::new(config_path));
            let plugin = GenieTtsPlugin::from_config(config, store);
            let state = plugin.state();
            state.artifacts().ensure().await?;
            if !state.lifecycle.ensure_loaded().await {
                anyhow::bail!(
                    "voice model could not be loaded from {}",
                    state.config().base_url()
                );
            }
            state.lifecycle.touch();
            let artifact = state.synthesizer.synthesize(&text).await?;
            tracing::info!(
                attempts = artifact.attempts,
                bytes = artifact.bytes,
                "Synthesis complete"
            );
            println!("{}", artifact.path.display());
        }
        Commands::Config { action } => match action {
            ConfigAction::Show => {
                let json = serde_json::to_string_pretty(&config)?;
                println!("{json}");
            }
            ConfigAction::Validate => {
                let (warnings, errors) = config.validate();
                for warning in &warnings {
                    println!("warning: {warning}");
                }
                for error in &errors {
                    println!("error: {error}");
                }
                if !errors.is_empty() {
                    anyhow::bail!(
                        "{} configuration error(s) in {}",
                        errors.len(),
                        config_path.display()
                    );
                }
                println!("Config OK: {}", config_path.display());
            }
        },
    }

    Ok(())
}
