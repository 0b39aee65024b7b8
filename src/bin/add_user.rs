use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::info;

use wishlist_sync::auth::JwtService;
use wishlist_sync::config;
use wishlist_sync::db;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Register (or refresh) a user by Steam id and print a bearer token for them"
)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// 64-bit Steam id
    #[arg(long)]
    steam_id: String,

    #[arg(long)]
    username: Option<String>,

    #[arg(long)]
    avatar_url: Option<String>,

    #[arg(long)]
    profile_url: Option<String>,
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

    let user = db::upsert_user_by_steam_id(
        &pool,
        args.steam_id.trim(),
        args.username.as_deref(),
        args.avatar_url.as_deref(),
        args.profile_url.as_deref(),
    )
    .await?;
    info!(user_id = user.id, steam_id = %args.steam_id, "user registered");

    let token = JwtService::from_config(&cfg.auth).issue(&user)?;
    println!("user_id: {}", user.id);
    println!("token: {token}");
    Ok(())
}
