use std::{path::PathBuf, sync::Arc};

use {
    clap::Parser,
    relay_gateway::BrokerState,
    relay_store::{SqliteHistory, SqlitePermissions, SqliteSequences},
    tracing::info,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "relay", about = "relay — real-time notification broker")]
struct Cli {
    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, default_value_t = false)]
    json_logs: bool,

    /// Address to bind to (overrides config value).
    #[arg(long)]
    bind: Option<String>,

    /// Port to listen on (overrides config value).
    #[arg(long)]
    port: Option<u16>,

    /// Custom config directory (overrides default ~/.config/relay/).
    #[arg(long, env = "RELAY_CONFIG_DIR")]
    config_dir: Option<PathBuf>,

    /// Custom data directory (overrides default data dir).
    #[arg(long, env = "RELAY_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// SQLite connection string (overrides config value).
    #[arg(long, env = "RELAY_DATABASE_URL")]
    database_url: Option<String>,
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);
    if cli.json_logs {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}

/// Resolve the SQLite connection string: explicit config/flag first, then
/// `<data-dir>/relay.db`.
fn resolve_database_url(
    configured: Option<&str>,
    data_dir: Option<&PathBuf>,
) -> anyhow::Result<String> {
    if let Some(url) = configured {
        return Ok(url.to_string());
    }
    let dir = match data_dir {
        Some(dir) => dir.clone(),
        None => directories::ProjectDirs::from("", "", "relay")
            .map(|dirs| dirs.data_dir().to_path_buf())
            .ok_or_else(|| anyhow::anyhow!("could not determine a data directory"))?,
    };
    std::fs::create_dir_all(&dir)?;
    Ok(format!("sqlite:{}?mode=rwc", dir.join("relay.db").display()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_telemetry(&cli);

    info!(version = env!("CARGO_PKG_VERSION"), "relay starting");

    let mut config = relay_config::discover_and_load(cli.config_dir.as_deref());
    if let Some(bind) = cli.bind {
        config.server.bind = bind;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(url) = cli.database_url {
        config.store.database_url = Some(url);
    }

    let database_url =
        resolve_database_url(config.store.database_url.as_deref(), cli.data_dir.as_ref())?;
    let pool = relay_store::open(&database_url).await?;

    let verifier = relay_auth::verifier_from_config(&config.auth)
        .map_err(|e| anyhow::anyhow!("auth configuration: {e}"))?;

    let history = Arc::new(SqliteHistory::new(pool.clone(), &config.history));
    let state = BrokerState::new(
        config,
        Arc::new(SqlitePermissions::new(pool.clone())),
        Arc::new(SqliteSequences::new(pool)),
        history,
        verifier,
    );

    relay_gateway::server::run(state).await?;
    Ok(())
}
