use anyhow::{bail, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use wishlist_sync::config;
use wishlist_sync::db;
use wishlist_sync::steam::SteamClient;
use wishlist_sync::store::{JobStore, SqliteStore, UserStore};
use wishlist_sync::sync::{SyncOrchestrator, SyncOutcome};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Run one wishlist synchronization for a user in the foreground and exit"
)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Local user id to synchronize
    #[arg(long)]
    user_id: i64,

    /// Re-fetch details for items already in the catalog
    #[arg(long)]
    force: bool,
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
    let store = SqliteStore::new(pool);

    if UserStore::get(&store, args.user_id).await?.is_none() {
        bail!("user {} not found", args.user_id);
    }
    let job = JobStore::create(&store, args.user_id).await?;
    info!(job_id = job.id, user_id = args.user_id, force = args.force, "running sync");

    let steam = SteamClient::from_config(&cfg.steam)?;
    let orchestrator = SyncOrchestrator::with_store(store.clone(), Arc::new(steam))
        .with_detail_delay(cfg.app.detail_fetch_delay());
    let outcome = orchestrator.run(job.id, args.force).await;

    if let Some(job) = JobStore::get(&store, job.id).await? {
        println!(
            "job {} {}: {}",
            job.id,
            job.status_code,
            job.details.unwrap_or_default()
        );
    }
    match outcome? {
        SyncOutcome::Completed(summary) => println!("{summary}"),
        SyncOutcome::AlreadyFinished(status) => println!("job already {status}"),
    }
    Ok(())
}
