use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use wishlist_sync::auth::JwtService;
use wishlist_sync::config;
use wishlist_sync::db;
use wishlist_sync::http::{create_router, AppState};
use wishlist_sync::outbox;
use wishlist_sync::steam::SteamClient;
use wishlist_sync::store::SqliteStore;
use wishlist_sync::sync::SyncOrchestrator;
use wishlist_sync::watchdog;

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let pool = db::init_pool(&cfg.database_url()).await?;
    db::run_migrations(&pool).await?;
    let store = SqliteStore::new(pool.clone());

    // Spawn outbox worker (single task, one sync at a time)
    let steam = SteamClient::from_config(&cfg.steam)?;
    let orchestrator = SyncOrchestrator::with_store(store.clone(), Arc::new(steam))
        .with_detail_delay(cfg.app.detail_fetch_delay());
    let worker_pool = pool.clone();
    let poll_sleep = Duration::from_millis(cfg.app.poll_interval_ms);
    let max_backoff = cfg.app.max_backoff_seconds as i64;
    tokio::spawn(async move {
        loop {
            match outbox::process_next_task(&worker_pool, &orchestrator, max_backoff).await {
                Ok(processed) => {
                    if !processed {
                        tokio::time::sleep(poll_sleep).await;
                    }
                }
                Err(err) => {
                    error!(?err, "outbox worker error");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    });

    let watchdog_store = store.clone();
    let stale_after = Duration::from_secs(cfg.app.stale_job_seconds);
    let sweep_every = Duration::from_secs(cfg.app.watchdog_interval_seconds);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sweep_every);
        loop {
            ticker.tick().await;
            if let Err(err) = watchdog::sweep_stale_jobs(&watchdog_store, stale_after).await {
                error!(?err, "watchdog sweep failed");
            }
        }
    });

    let state = AppState::new(store, JwtService::from_config(&cfg.auth));
    let listener = tokio::net::TcpListener::bind(&cfg.server.bind)
        .await
        .with_context(|| format!("failed to bind {}", cfg.server.bind))?;
    info!(bind = %cfg.server.bind, "starting wishlist sync server");
    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
        })
        .await?;

    Ok(())
}
