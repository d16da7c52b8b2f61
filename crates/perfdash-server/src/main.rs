use anyhow::{Context, Result};
use chrono::Utc;
use perfdash_issues::HttpIssueTracker;
use perfdash_query::AlertQueryEngine;
use perfdash_storage::engine::SqliteStorageEngine;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tokio::signal;
use tracing_subscriber::EnvFilter;

use perfdash_server::app;
use perfdash_server::auth::{self, OperatorPolicy};
use perfdash_server::config::{SeedFile, ServerConfig};
use perfdash_server::state::AppState;

/// Lifetime of tokens minted by `issue-token` when none is given.
const DEFAULT_TOKEN_TTL_SECS: u64 = 86400;

#[allow(clippy::print_stderr)]
fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  perfdash-server [config.toml]                                  Start the server");
    eprintln!("  perfdash-server init-seed <config.toml> <seed.json>            Load alerts and report templates");
    eprintln!("  perfdash-server issue-token <config.toml> <email> [ttl_secs]   Mint a verified caller token");
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("perfdash=info".parse()?))
        .init();

    let args: Vec<String> = std::env::args().collect();

    match args.get(1).map(|s| s.as_str()) {
        Some("init-seed") => {
            let config_path = args.get(2).ok_or_else(|| {
                print_usage();
                anyhow::anyhow!("init-seed requires <config.toml> and <seed.json> arguments")
            })?;
            let seed_path = args.get(3).ok_or_else(|| {
                print_usage();
                anyhow::anyhow!("init-seed requires <seed.json> argument")
            })?;
            run_init_seed(config_path, seed_path)
        }
        Some("issue-token") => {
            let config_path = args.get(2).ok_or_else(|| {
                print_usage();
                anyhow::anyhow!("issue-token requires <config.toml> and <email> arguments")
            })?;
            let email = args.get(3).ok_or_else(|| {
                print_usage();
                anyhow::anyhow!("issue-token requires <email> argument")
            })?;
            let ttl = match args.get(4) {
                Some(v) => v
                    .parse()
                    .with_context(|| format!("Invalid ttl_secs '{v}'"))?,
                None => DEFAULT_TOKEN_TTL_SECS,
            };
            run_issue_token(config_path, email, ttl)
        }
        Some("--help" | "-h") => {
            print_usage();
            Ok(())
        }
        _ => {
            let config_path = args
                .get(1)
                .map(|s| s.as_str())
                .unwrap_or("config/server.toml");
            run_server(config_path).await
        }
    }
}

fn open_store(config: &ServerConfig) -> Result<Arc<SqliteStorageEngine>> {
    let store = SqliteStorageEngine::new(Path::new(&config.database.path))
        .with_context(|| format!("Failed to open alert store '{}'", config.database.path))?;
    Ok(Arc::new(store))
}

/// Load alert records and report templates from a JSON seed file.
fn run_init_seed(config_path: &str, seed_path: &str) -> Result<()> {
    let config = ServerConfig::load(config_path)?;
    let store = open_store(&config)?;

    let seed_content = std::fs::read_to_string(seed_path)
        .with_context(|| format!("Failed to read seed file '{seed_path}'"))?;
    let seed: SeedFile = serde_json::from_str(&seed_content)
        .with_context(|| format!("Failed to parse seed file '{seed_path}'"))?;

    let inserted = store.insert_alerts(&seed.alerts)?;
    for template in &seed.report_templates {
        store.upsert_report_template(&template.id, &template.name, &template.tests)?;
    }

    tracing::info!(
        alerts = inserted,
        report_templates = seed.report_templates.len(),
        "Seed loaded"
    );
    Ok(())
}

#[allow(clippy::print_stdout)]
fn run_issue_token(config_path: &str, email: &str, ttl_secs: u64) -> Result<()> {
    let config = ServerConfig::load(config_path)?;
    let secret = config
        .auth
        .jwt_secret
        .as_deref()
        .context("issue-token requires [auth].jwt_secret to be set")?;
    let token = auth::create_token(secret, email, email, true, ttl_secs)?;
    println!("{token}");
    Ok(())
}

async fn run_server(config_path: &str) -> Result<()> {
    let config = ServerConfig::load(config_path)?;
    tracing::info!(config = %config_path, "Loaded configuration");

    let store = open_store(&config)?;
    let engine = AlertQueryEngine::new(store.clone(), store)
        .with_legacy_empty_on_inconsistency(config.query.legacy_empty_on_inconsistency);
    if config.query.legacy_empty_on_inconsistency {
        tracing::warn!("Legacy mode: inconsistent alert records will produce empty pages");
    }

    let issue_tracker = Arc::new(HttpIssueTracker::new(config.issue_tracker.clone())?);

    // JWT secret: use configured value or generate random
    let jwt_secret = match &config.auth.jwt_secret {
        Some(secret) => Arc::new(secret.clone()),
        None => {
            tracing::warn!("No jwt_secret configured. A random secret was generated and will change on restart. Set [auth].jwt_secret in config for production use.");
            Arc::new(auth::generate_secret())
        }
    };

    let state = AppState {
        engine,
        issue_tracker,
        authorizer: Arc::new(OperatorPolicy::from_config(&config.auth)),
        limits: config.query.limit_policy(),
        jwt_secret,
        start_time: Utc::now(),
    };

    let http_addr: SocketAddr = format!("0.0.0.0:{}", config.http_port).parse()?;
    let http_app = app::build_http_app(state);
    let http_listener = tokio::net::TcpListener::bind(http_addr).await?;
    tracing::info!(addr = %http_addr, "HTTP server listening");

    if let Err(e) = axum::serve(http_listener, http_app)
        .with_graceful_shutdown(async {
            signal::ctrl_c().await.ok();
            tracing::info!("Shutting down gracefully");
        })
        .await
    {
        tracing::error!(error = %e, "HTTP server error");
    }

    Ok(())
}
