use std::{path::PathBuf, sync::Arc, time::Duration};

use {
    anyhow::Context,
    chatmap_config::{ChatmapConfig, SessionsConfig},
    chatmap_gateway::{AppState, start_gateway},
    chatmap_logstore::SledLogStore,
    chatmap_sessions::{CredentialStore, FileCredentialStore},
    chatmap_whatsapp::{
        LoopbackConnector, MediaRetriever, MessageCipher, MessagePipeline, SessionManager,
        SessionSettings, reconcile,
    },
    clap::{Parser, Subcommand},
    tracing::{info, warn},
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "chatmap", about = "chatmap: WhatsApp connector for ChatMap")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Config file; discovered in the working directory and
    /// `~/.config/chatmap` when omitted.
    #[arg(long, global = true, env = "CHATMAP_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Restore persisted sessions and start the HTTP gateway.
    Serve {
        #[arg(long, env = "CHATMAP_BIND")]
        bind: Option<String>,
        #[arg(long, env = "CHATMAP_PORT")]
        port: Option<u16>,
    },
    /// Credential record management.
    Sessions {
        #[command(subcommand)]
        action: SessionAction,
    },
    /// Configuration management.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum SessionAction {
    /// List persisted credential records and whether they are paired.
    List,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration with secrets redacted.
    Show,
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    if cli.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<ChatmapConfig> {
    match path {
        Some(path) => chatmap_config::load_config(path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        None => Ok(chatmap_config::discover_and_load()),
    }
}

fn session_settings(config: &SessionsConfig) -> SessionSettings {
    SessionSettings {
        qr_timeout: Duration::from_millis(config.qr_timeout_ms),
        qr_poll_interval: Duration::from_millis(config.qr_poll_interval_ms),
        pairing_attempts: config.pairing_attempts,
        pairing_backoff: Duration::from_millis(config.pairing_backoff_ms),
    }
}

async fn serve(config: ChatmapConfig) -> anyhow::Result<()> {
    let cipher = MessageCipher::from_secret(
        config.encryption.key.as_ref(),
        config.encryption.allow_insecure_default_key,
    )
    .context("invalid encryption configuration")?;

    let log = Arc::new(
        SledLogStore::open(&config.log_store.path).with_context(|| {
            format!("failed to open log store at {}", config.log_store.path.display())
        })?,
    );
    let store = Arc::new(FileCredentialStore::new(config.sessions.dir.clone()));

    warn!("no network protocol backend configured, sessions run on the in-process loopback");
    let connector = Arc::new(LoopbackConnector::new());

    let prefix = config.log_store.stream_prefix.clone();
    let pipeline = Arc::new(MessagePipeline::new(
        Arc::new(cipher),
        log.clone(),
        prefix.clone(),
    ));
    let sessions =
        SessionManager::new(store, connector, pipeline, session_settings(&config.sessions));

    match reconcile(&sessions).await {
        Ok(report) => info!(
            purged = report.purged.len(),
            rearmed = report.rearmed.len(),
            failed = report.failed.len(),
            "startup reconciliation finished"
        ),
        Err(e) => warn!(error = %e, "cannot enumerate credential records, skipping reconciliation"),
    }

    let media = MediaRetriever::new(log, Arc::clone(sessions.registry()), prefix);
    start_gateway(&config.server, AppState::new(sessions, media)).await
}

async fn list_sessions(config: &ChatmapConfig) -> anyhow::Result<()> {
    let store = FileCredentialStore::new(config.sessions.dir.clone());
    let ids = store.list().await?;
    if ids.is_empty() {
        println!("no credential records in {}", store.dir().display());
        return Ok(());
    }
    for id in ids {
        let state = match store.has_identity(&id).await {
            Ok(true) => "paired".to_string(),
            Ok(false) => "unpaired".to_string(),
            Err(e) => format!("unreadable ({e})"),
        };
        println!("{id}\t{state}");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    info!(version = env!("CARGO_PKG_VERSION"), "chatmap starting");

    let mut config = load_config(cli.config.as_ref())?;

    match cli.command {
        Commands::Serve { bind, port } => {
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            serve(config).await
        },
        Commands::Sessions {
            action: SessionAction::List,
        } => list_sessions(&config).await,
        Commands::Config {
            action: ConfigAction::Show,
        } => {
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        },
    }
}
