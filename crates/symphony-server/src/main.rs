use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use symphony_core::instrument::LoopSpec;
use symphony_core::tools::ToolRegistry;
use symphony_core::tools::claude::ClaudeTool;
use symphony_core::tools::tavily::TavilyTool;
use symphony_db::config::DbConfig;
use symphony_db::mem::MemStore;
use symphony_db::pg::PgStore;
use symphony_db::pool;
use symphony_db::store::Store;

use symphony_server::config::ServerConfig;
use symphony_server::routes::build_router;
use symphony_server::state::AppState;

#[derive(Parser)]
#[command(name = "symphony", about = "Orchestration server for bounded cognitive loops")]
struct Cli {
    /// Database URL (overrides SUPABASE_URL / DATABASE_URL env vars)
    #[arg(long, global = true)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP server (the default)
    Serve {
        /// Bind address (overrides HOST)
        #[arg(long)]
        host: Option<String>,
        /// Bind port (overrides PORT)
        #[arg(long)]
        port: Option<u16>,
    },
    /// Create the database and run migrations
    DbInit,
}

fn resolve_db_config(cli_url: Option<&str>) -> Option<DbConfig> {
    match cli_url {
        Some(url) => Some(DbConfig::new(url)),
        None => DbConfig::from_env(),
    }
}

async fn cmd_db_init(cli_url: Option<&str>) -> Result<()> {
    let db_config = resolve_db_config(cli_url).context(
        "no database configured; set SUPABASE_URL or DATABASE_URL, or pass --database-url",
    )?;

    println!("Initializing database...");
    pool::ensure_database_exists(&db_config).await?;
    let db_pool = pool::create_pool(&db_config).await?;
    pool::run_migrations(&db_pool, pool::default_migrations_path()).await?;
    db_pool.close().await;
    println!("Database ready.");
    Ok(())
}

/// Register tool clients in a fixed order so capability resolution is
/// deterministic across restarts.
fn build_tool_registry(config: &ServerConfig) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    if let Some(key) = &config.claude_api_key {
        match ClaudeTool::new(key) {
            Ok(tool) => registry.register(Arc::new(tool)),
            Err(e) => warn!(error = %format!("{e:#}"), "claude tool unavailable"),
        }
    }
    if let Some(key) = &config.tavily_api_key {
        match TavilyTool::new(key) {
            Ok(tool) => registry.register(Arc::new(tool)),
            Err(e) => warn!(error = %format!("{e:#}"), "tavily tool unavailable"),
        }
    }
    registry
}

async fn cmd_serve(
    cli_url: Option<&str>,
    host_override: Option<String>,
    port_override: Option<u16>,
) -> Result<()> {
    let mut config = ServerConfig::from_env();
    if let Some(host) = host_override {
        config.host = host;
    }
    if let Some(port) = port_override {
        config.port = port;
    }

    // Storage backend: PostgreSQL when configured, in-memory otherwise.
    let store: Arc<dyn Store> = match resolve_db_config(cli_url) {
        Some(db_config) => {
            pool::ensure_database_exists(&db_config).await?;
            let db_pool = pool::create_pool(&db_config).await?;
            pool::run_migrations(&db_pool, pool::default_migrations_path()).await?;
            info!("using PostgreSQL storage backend");
            Arc::new(PgStore::new(db_pool))
        }
        None => {
            warn!("no database configured; state is in-memory and lost on restart");
            Arc::new(MemStore::new())
        }
    };

    // In-flight tasks do not survive a restart; mark them failed before
    // accepting traffic.
    let orphaned = store
        .fail_orphaned_tasks("server restarted while task was in flight")
        .await?;
    if orphaned > 0 {
        warn!(orphaned, "marked orphaned running tasks as failed");
    }

    let registry = build_tool_registry(&config);
    if registry.is_empty() {
        warn!("no tool credentials configured (CLAUDE_API_KEY, TAVILY_API_KEY)");
    }

    let loop_specs: Vec<LoopSpec> = Vec::new();
    let state = AppState::build(store, registry, &loop_specs, &config)
        .await
        .context(
            "failed to build the component container; instruments need their required \
             capabilities (CLAUDE_API_KEY for reasoning/vision/synthesis, TAVILY_API_KEY \
             for web_search)",
        )?;

    // Background plane: scheduler ticks and the health sweep.
    let background = CancellationToken::new();
    if config.autonomic_enabled {
        tokio::spawn(
            Arc::clone(&state.scheduler).run(background.child_token()),
        );

        let sweep_state = Arc::clone(&state);
        let sweep_cancel = background.child_token();
        let health_interval = config.health_interval;
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(health_interval) => {
                        let reclaimed = sweep_state.bus.gc();
                        let offline = sweep_state.rooms.sweep_offline();
                        info!(reclaimed, offline, "health sweep");
                    }
                    _ = sweep_cancel.cancelled() => return,
                }
            }
        });
        info!("autonomic background plane enabled");
    }

    let app = build_router(state);
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .with_context(|| format!("invalid bind address {}:{}", config.host, config.port))?;
    info!("symphony listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    background.cancel();
    info!("symphony shut down");
    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to install Ctrl+C handler");
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::DbInit) => cmd_db_init(cli.database_url.as_deref()).await?,
        Some(Commands::Serve { host, port }) => {
            cmd_serve(cli.database_url.as_deref(), host, port).await?;
        }
        None => cmd_serve(cli.database_url.as_deref(), None, None).await?,
    }

    Ok(())
}
