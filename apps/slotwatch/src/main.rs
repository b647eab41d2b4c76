#![warn(clippy::all)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use logger::LogOptions;
use tokio::io::BufReader;
use tracing::{info, warn};

use slotwatch::config::Config;
use slotwatch::console::{self, ConsoleExit};
use slotwatch::monitoring::{HttpProber, Registry};
use slotwatch::notify::{LogSender, MessageSender, Notifier, TelegramSender};
use slotwatch::status::StatusReport;
use slotwatch::{Orchestrator, RecipientId, StateStore};

#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Config file (default: $XDG_CONFIG_HOME/slotwatch/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the monitor, reading operator commands from stdin
    Run,
    /// Print polling and per-target state
    Status,
    /// Turn polling on; takes effect on the next `run`
    Enable,
    /// Turn polling off
    Disable,
    /// Mark every target as not yet booked and turn polling off
    Reset,
    /// Add a notification recipient
    Subscribe { recipient: String },
    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = Config::from_config(cli.config.as_deref())?.with_env_overrides()?;
    logger::init_with(LogOptions { file: config.logging.file.clone(), ..LogOptions::default() })?;
    config.validate()?;

    match cli.command {
        Commands::Config => println!("{config}"),
        Commands::Run => {
            let (registry, store) = open(&config).await?;
            run(&config, registry, store).await?;
        }
        Commands::Status => {
            let (registry, store) = open(&config).await?;
            print!("{}", StatusReport::collect(&registry, &store).await);
        }
        Commands::Enable => {
            let (_, store) = open(&config).await?;
            store.set_polling_enabled(true).await?;
            println!("Polling enabled.");
        }
        Commands::Disable => {
            let (_, store) = open(&config).await?;
            store.set_polling_enabled(false).await?;
            println!("Polling disabled.");
        }
        Commands::Reset => {
            let (_, store) = open(&config).await?;
            store.reset_all_targets().await?;
            store.set_polling_enabled(false).await?;
            println!("Target state reset.");
        }
        Commands::Subscribe { recipient } => {
            let (_, store) = open(&config).await?;
            if store.add_recipient(RecipientId::new(recipient.as_str())).await? {
                println!("Subscribed {recipient}.");
            } else {
                println!("{recipient} is already subscribed.");
            }
        }
    }

    Ok(())
}

async fn open(config: &Config) -> Result<(Arc<Registry>, Arc<StateStore>)> {
    let registry = Arc::new(config.build_registry()?);
    let store = StateStore::load(&config.state.path, registry.ids())
        .await
        .context("failed to load monitoring state")?;

    Ok((registry, Arc::new(store)))
}

async fn run(config: &Config, registry: Arc<Registry>, store: Arc<StateStore>) -> Result<()> {
    if registry.is_empty() {
        warn!("No targets configured, add [[targets]] entries to the config file");
    }

    let prober = Arc::new(HttpProber::new(config.timeout())?);
    let sender: Arc<dyn MessageSender> = match &config.telegram.token {
        Some(token) => {
            Arc::new(TelegramSender::new(&config.telegram.api_base, token, config.timeout())?)
        }
        None => {
            warn!("No Telegram token configured, notifications are written to the log");
            Arc::new(LogSender)
        }
    };

    info!(
        targets = registry.len(),
        interval = ?config.check_interval(),
        state = %store.path().display(),
        "slotwatch started"
    );

    let orchestrator = Orchestrator::new(
        registry,
        store,
        prober,
        Arc::new(Notifier::new(sender)),
        config.check_interval(),
    );
    orchestrator.resume().await;

    println!("{}", console::HELP);
    let stdin = BufReader::new(tokio::io::stdin());

    tokio::select! {
        exit = console::run(&orchestrator, stdin, tokio::io::stdout()) => {
            if exit? == ConsoleExit::EndOfInput {
                info!("stdin closed, waiting for Ctrl-C");
                tokio::signal::ctrl_c().await?;
            }
        }
        signal = tokio::signal::ctrl_c() => signal?,
    }

    info!("Shutting down");
    Ok(())
}
