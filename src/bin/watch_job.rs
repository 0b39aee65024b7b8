use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::info;

use wishlist_sync::config;
use wishlist_sync::poll::{HttpJobSource, JobWatcher, PollHandle};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Follow a sync job until it finishes, then print the refreshed wishlist"
)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    #[arg(long)]
    job_id: i64,

    /// Bearer token (see `add_user`)
    #[arg(long, env = "WISHLIST_TOKEN")]
    token: String,
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

    let source = HttpJobSource::new(&cfg.poll.base_url, args.token)?;
    let mut watcher = JobWatcher::from_config(Arc::new(source), &cfg.poll);
    let handle = PollHandle::new();

    let ctrl_c_handle = handle.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            ctrl_c_handle.cancel();
        }
    });

    info!(job_id = args.job_id, "watching job");
    let mut last_details: Option<String> = None;
    let result = watcher
        .watch(args.job_id, &handle, |job| {
            if job.details != last_details {
                println!("[{}] {}", job.status_code, job.details.as_deref().unwrap_or(""));
                last_details = job.details.clone();
            }
        })
        .await?;

    println!(
        "job {} finished: {}",
        result.job.id, result.job.status_code
    );
    for item in &result.wishlist {
        println!(
            "{}\t{}\t{}",
            item.item_id,
            item.title.as_deref().unwrap_or("?"),
            item.price.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}
