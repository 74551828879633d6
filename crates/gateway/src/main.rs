use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use clap::{Parser, Subcommand};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing_subscriber::EnvFilter;

use bp_domain::config::Config;
use bp_gateway::api;
use bp_gateway::state::AppState;
use bp_mcp_client::McpRegistry;
use bp_team::TraceBus;

#[derive(Parser)]
#[command(name = "blueprintd", about = "Multi-agent cloud-architecture design service")]
struct Cli {
    /// Path to the TOML config file.
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the gateway server (the default).
    Serve,
    /// Print the version and exit.
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        None | Some(Command::Serve) => {
            init_tracing();
            let config = load_config(&cli.config)?;
            run_server(Arc::new(config)).await
        }
        Some(Command::Version) => {
            println!("blueprintd {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,bp_gateway=debug")),
        )
        .init();
}

/// Load the config file when present; a missing file yields defaults so
/// a bare checkout serves with the dev configuration.
fn load_config(path: &PathBuf) -> anyhow::Result<Config> {
    let mut config = if path.exists() {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?
    } else {
        tracing::info!(path = %path.display(), "no config file, using defaults");
        Config::default()
    };
    config.apply_env_overrides();
    Ok(config)
}

async fn run_server(config: Arc<Config>) -> anyhow::Result<()> {
    tracing::info!("blueprintd starting");

    // ── Chat backend ─────────────────────────────────────────────────
    let backend = bp_backends::backend_from_config(&config.backend)
        .context("initializing chat backend")?;

    // ── Trace bus + journal ──────────────────────────────────────────
    let bus = TraceBus::new(config.trace.journal_dir.clone());
    match &config.trace.journal_dir {
        Some(dir) => tracing::info!(dir = %dir.display(), "trace journaling enabled"),
        None => tracing::info!("trace journaling disabled"),
    }

    // ── MCP registry (lazy; sessions open on first enabled use) ──────
    let mcp = Arc::new(McpRegistry::new(config.mcp.clone()));

    let state = AppState {
        config: config.clone(),
        backend,
        bus,
        mcp: mcp.clone(),
    };

    // ── Router ───────────────────────────────────────────────────────
    let max_concurrent = 256;
    let app = api::router()
        .layer(build_cors_layer(&config.server.cors))
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_concurrent))
        .with_state(state);

    // ── Bind ─────────────────────────────────────────────────────────
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;
    tracing::info!(addr = %addr, "blueprintd listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("axum server error")?;

    // Close MCP sessions exactly once on the way out.
    mcp.shutdown().await;
    tracing::info!("blueprintd stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for shutdown signal");
    }
}

/// One configured origin entry. `scheme://host:*` admits that host on
/// any port, which is what the canvas dev server needs (its port moves
/// between restarts); everything else is an exact match.
enum OriginRule {
    Exact(String),
    AnyPort { base: String },
}

impl OriginRule {
    fn parse(entry: &str) -> Self {
        match entry.strip_suffix(":*") {
            Some(base) => OriginRule::AnyPort {
                base: base.to_owned(),
            },
            None => OriginRule::Exact(entry.to_owned()),
        }
    }

    fn admits(&self, candidate: &str) -> bool {
        match self {
            OriginRule::Exact(origin) => candidate == origin,
            OriginRule::AnyPort { base } => {
                // Split at the port colon; the port must be pure digits
                // or the rule does not apply.
                let Some((host, port)) = candidate.rsplit_once(':') else {
                    return false;
                };
                host == base && !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit())
            }
        }
    }
}

/// Build a [`CorsLayer`] from `[server.cors]`. A literal `"*"` entry
/// switches to fully permissive CORS (dev only).
fn build_cors_layer(cors: &bp_domain::config::CorsConfig) -> CorsLayer {
    use axum::http::header;

    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    if cors.allowed_origins.iter().any(|o| o == "*") {
        tracing::warn!("CORS configured with wildcard \"*\" — all origins allowed");
        return layer.allow_origin(tower_http::cors::Any);
    }

    let rules: Vec<OriginRule> = cors
        .allowed_origins
        .iter()
        .map(|entry| OriginRule::parse(entry))
        .collect();

    layer.allow_origin(AllowOrigin::predicate(move |origin: &HeaderValue, _| {
        match origin.to_str() {
            Ok(candidate) => rules.iter().any(|rule| rule.admits(candidate)),
            Err(_) => false,
        }
    }))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
