use super::model::{OutboxTask, StatusUpdate};
use crate::model::{
    CatalogItem, Job, JobStatus, User, WishlistEntry, WishlistItemView, JOB_TYPE_SYNC,
};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Transaction};
use sqlx::{Sqlite, SqlitePool};
use tracing::{instrument, warn};

pub type Pool = SqlitePool;

/// Details recorded on a freshly created job.
pub const NEW_JOB_DETAILS: &str = "waiting for synchronization to start";

const JOB_COLUMNS: &str = "j.id, j.user_id, j.type, s.code AS status_code, j.created_at, j.updated_at, j.details";

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let pool = SqlitePool::connect(&normalized).await?;
    // Enable WAL and stricter durability.
    sqlx::query("PRAGMA journal_mode=WAL;")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous=FULL;")
        .execute(&pool)
        .await?;
    Ok(pool)
}

/// For file-backed SQLite URLs, expand a leading `~/` and make sure the parent
/// directory exists. In-memory and non-sqlite URLs pass through unchanged.
fn prepare_sqlite_url(url: &str) -> String {
    let Some(rest) = url.strip_prefix("sqlite:") else {
        return url.to_string();
    };
    if rest.starts_with(":memory") {
        return url.to_string();
    }

    let path_with_query = rest.strip_prefix("//").unwrap_or(rest);
    let (path_part, query_part) = match path_with_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_with_query, None),
    };
    if path_part.is_empty() {
        return url.to_string();
    }

    let expanded_path = match (path_part.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(rest), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), rest),
        _ => path_part.to_string(),
    };

    if let Some(parent) = std::path::Path::new(&expanded_path).parent() {
        if !parent.as_os_str().is_empty() {
            if let Err(err) = std::fs::create_dir_all(parent) {
                warn!(path = %parent.display(), error = %err, "failed to create database directory");
            }
        }
    }

    match query_part {
        Some(q) => format!("sqlite://{}?{}", expanded_path, q),
        None => format!("sqlite://{}", expanded_path),
    }
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

fn user_from_row(row: &SqliteRow) -> Result<User> {
    Ok(User {
        id: row.try_get("id")?,
        steam_id: row.try_get("steam_id")?,
        username: row.try_get("username")?,
        avatar_url: row.try_get("avatar_url")?,
        profile_url: row.try_get("profile_url")?,
        created_at: row.try_get("created_at")?,
    })
}

fn job_from_row(row: &SqliteRow) -> Result<Job> {
    let code: String = row.try_get("status_code")?;
    let status_code = code.parse::<JobStatus>().map_err(|e| anyhow!(e))?;
    Ok(Job {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        job_type: row.try_get("type")?,
        status_code,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        details: row.try_get("details")?,
    })
}

#[instrument(skip_all)]
pub async fn get_user(pool: &Pool, user_id: i64) -> Result<Option<User>> {
    let row = sqlx::query(
        "SELECT id, steam_id, username, avatar_url, profile_url, created_at FROM users WHERE id = ?",
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(user_from_row).transpose()
}

/// Insert a user for `steam_id`, or refresh the profile fields of the existing one.
#[instrument(skip_all)]
pub async fn upsert_user_by_steam_id(
    pool: &Pool,
    steam_id: &str,
    username: Option<&str>,
    avatar_url: Option<&str>,
    profile_url: Option<&str>,
) -> Result<User> {
    let row = sqlx::query(
        "INSERT INTO users (steam_id, username, avatar_url, profile_url, created_at) VALUES (?, ?, ?, ?, ?) \
         ON CONFLICT(steam_id) DO UPDATE SET \
            username = COALESCE(excluded.username, users.username), \
            avatar_url = COALESCE(excluded.avatar_url, users.avatar_url), \
            profile_url = COALESCE(excluded.profile_url, users.profile_url) \
         RETURNING id, steam_id, username, avatar_url, profile_url, created_at",
    )
    .bind(steam_id)
    .bind(username)
    .bind(avatar_url)
    .bind(profile_url)
    .bind(Utc::now())
    .fetch_one(pool)
    .await?;
    user_from_row(&row)
}

async fn insert_job_tx(tx: &mut Transaction<'_, Sqlite>, user_id: i64) -> Result<i64> {
    let now = Utc::now();
    let rec = sqlx::query(
        "INSERT INTO jobs (user_id, type, status_id, created_at, updated_at, details) \
         VALUES (?, ?, (SELECT id FROM job_statuses WHERE code = ?), ?, ?, ?) RETURNING id",
    )
    .bind(user_id)
    .bind(JOB_TYPE_SYNC)
    .bind(JobStatus::New.as_str())
    .bind(now)
    .bind(now)
    .bind(NEW_JOB_DETAILS)
    .fetch_one(&mut **tx)
    .await?;
    Ok(rec.get("id"))
}

async fn fetch_job_tx(tx: &mut Transaction<'_, Sqlite>, job_id: i64) -> Result<Job> {
    let row = sqlx::query(&format!(
        "SELECT {JOB_COLUMNS} FROM jobs j JOIN job_statuses s ON s.id = j.status_id WHERE j.id = ?"
    ))
    .bind(job_id)
    .fetch_one(&mut **tx)
    .await?;
    job_from_row(&row)
}

#[instrument(skip_all)]
pub async fn create_job(pool: &Pool, user_id: i64) -> Result<Job> {
    let mut tx = pool.begin().await?;
    let job_id = insert_job_tx(&mut tx, user_id).await?;
    let job = fetch_job_tx(&mut tx, job_id).await?;
    tx.commit().await?;
    Ok(job)
}

/// Create a NEW job and its dispatch task in one transaction, so every job
/// that exists has a task that will eventually run it.
#[instrument(skip_all)]
pub async fn create_job_with_dispatch(pool: &Pool, user_id: i64, force: bool) -> Result<Job> {
    let mut tx = pool.begin().await?;
    let job_id = insert_job_tx(&mut tx, user_id).await?;
    enqueue_outbox_tx(&mut tx, user_id, job_id, force, Utc::now()).await?;
    let job = fetch_job_tx(&mut tx, job_id).await?;
    tx.commit().await?;
    Ok(job)
}

#[instrument(skip_all)]
pub async fn get_job(pool: &Pool, job_id: i64) -> Result<Option<Job>> {
    let row = sqlx::query(&format!(
        "SELECT {JOB_COLUMNS} FROM jobs j JOIN job_statuses s ON s.id = j.status_id WHERE j.id = ?"
    ))
    .bind(job_id)
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(job_from_row).transpose()
}

/// Move a job forward. `details` replaces the stored text when provided.
/// Backwards moves and moves out of a terminal state are rejected, not applied.
///
/// The guard lives in the UPDATE's WHERE clause so the write never has to
/// upgrade a read lock held by a concurrent writer.
#[instrument(skip_all)]
pub async fn update_job_status(
    pool: &Pool,
    job_id: i64,
    status: JobStatus,
    details: Option<&str>,
) -> Result<StatusUpdate> {
    let allowed_from = status
        .predecessors()
        .iter()
        .map(|s| s.id().to_string())
        .collect::<Vec<_>>()
        .join(", ");
    if !allowed_from.is_empty() {
        let res = sqlx::query(&format!(
            "UPDATE jobs SET status_id = ?, updated_at = ?, details = COALESCE(?, details) \
             WHERE id = ? AND status_id IN ({allowed_from})"
        ))
        .bind(status.id())
        .bind(Utc::now())
        .bind(details)
        .bind(job_id)
        .execute(pool)
        .await?;
        if res.rows_affected() > 0 {
            return Ok(StatusUpdate::Updated);
        }
    }

    let status_id: Option<i64> = sqlx::query_scalar("SELECT status_id FROM jobs WHERE id = ?")
        .bind(job_id)
        .fetch_optional(pool)
        .await?;
    let Some(status_id) = status_id else {
        return Ok(StatusUpdate::NotFound);
    };
    let current = JobStatus::from_id(status_id)
        .ok_or_else(|| anyhow!("job {job_id} has unknown status id {status_id}"))?;
    Ok(StatusUpdate::Rejected { current })
}

/// Jobs still NEW or RUN whose last update is older than `cutoff`. NEW jobs
/// that still have a dispatch task are only queued, not stalled.
#[instrument(skip_all)]
pub async fn list_stale_jobs(pool: &Pool, cutoff: DateTime<Utc>) -> Result<Vec<Job>> {
    let rows = sqlx::query(&format!(
        "SELECT {JOB_COLUMNS} FROM jobs j JOIN job_statuses s ON s.id = j.status_id \
         WHERE s.code = 'RUN' \
            OR (s.code = 'NEW' AND NOT EXISTS (SELECT 1 FROM outbox o WHERE o.job_id = j.id)) \
         ORDER BY j.id"
    ))
    .fetch_all(pool)
    .await?;
    let mut stale = Vec::new();
    for row in &rows {
        let job = job_from_row(row)?;
        if job.updated_at < cutoff {
            stale.push(job);
        }
    }
    Ok(stale)
}

#[instrument(skip_all)]
pub async fn game_exists(pool: &Pool, app_id: &str) -> Result<bool> {
    let found: Option<i64> = sqlx::query_scalar("SELECT 1 FROM games WHERE app_id = ?")
        .bind(app_id)
        .fetch_optional(pool)
        .await?;
    Ok(found.is_some())
}

#[instrument(skip_all)]
pub async fn get_game(pool: &Pool, app_id: &str) -> Result<Option<CatalogItem>> {
    let row = sqlx::query(
        "SELECT app_id, title, image_url, price, release_date, last_fetched_at FROM games WHERE app_id = ?",
    )
    .bind(app_id)
    .fetch_optional(pool)
    .await?;
    let Some(row) = row else {
        return Ok(None);
    };
    Ok(Some(CatalogItem {
        item_id: row.try_get("app_id")?,
        title: row.try_get("title")?,
        image_url: row.try_get("image_url")?,
        price: row.try_get("price")?,
        release_date: row.try_get("release_date")?,
        last_fetched_at: row.try_get("last_fetched_at")?,
    }))
}

#[instrument(skip_all)]
pub async fn upsert_game(pool: &Pool, item: &CatalogItem) -> Result<()> {
    sqlx::query(
        "INSERT INTO games (app_id, title, image_url, price, release_date, last_fetched_at) \
         VALUES (?, ?, ?, ?, ?, ?) \
         ON CONFLICT(app_id) DO UPDATE SET \
            title = excluded.title, image_url = excluded.image_url, price = excluded.price, \
            release_date = excluded.release_date, last_fetched_at = excluded.last_fetched_at",
    )
    .bind(&item.item_id)
    .bind(&item.title)
    .bind(&item.image_url)
    .bind(&item.price)
    .bind(item.release_date)
    .bind(item.last_fetched_at)
    .execute(pool)
    .await
    .with_context(|| format!("failed to upsert game {}", item.item_id))?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn list_wishlist(pool: &Pool, user_id: i64) -> Result<Vec<WishlistItemView>> {
    let rows = sqlx::query(
        "SELECT w.user_id, w.app_id, w.note, w.added_at, \
                g.title, g.image_url, g.price, g.release_date, g.last_fetched_at \
         FROM wishlist_items w \
         LEFT JOIN games g ON g.app_id = w.app_id \
         WHERE w.user_id = ? \
         ORDER BY w.added_at DESC, w.app_id",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| -> Result<WishlistItemView> {
            Ok(WishlistItemView {
                user_id: row.try_get("user_id")?,
                item_id: row.try_get("app_id")?,
                note: row.try_get("note")?,
                added_at: row.try_get("added_at")?,
                title: row.try_get("title")?,
                image_url: row.try_get("image_url")?,
                price: row.try_get("price")?,
                release_date: row.try_get("release_date")?,
                last_fetched_at: row.try_get("last_fetched_at")?,
            })
        })
        .collect()
}

async fn upsert_wishlist_item_on<'e, E>(executor: E, entry: &WishlistEntry) -> Result<()>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        "INSERT INTO wishlist_items (user_id, app_id, note, added_at) VALUES (?, ?, ?, ?) \
         ON CONFLICT(user_id, app_id) DO UPDATE SET note = excluded.note, added_at = excluded.added_at",
    )
    .bind(entry.user_id)
    .bind(&entry.item_id)
    .bind(&entry.note)
    .bind(entry.added_at)
    .execute(executor)
    .await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn upsert_wishlist_item(pool: &Pool, entry: &WishlistEntry) -> Result<()> {
    upsert_wishlist_item_on(pool, entry).await
}

#[instrument(skip_all)]
pub async fn clear_wishlist(pool: &Pool, user_id: i64) -> Result<u64> {
    let res = sqlx::query("DELETE FROM wishlist_items WHERE user_id = ?")
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(res.rows_affected())
}

/// Swap a user's wishlist for `entries` inside one transaction.
#[instrument(skip_all)]
pub async fn replace_wishlist(pool: &Pool, user_id: i64, entries: &[WishlistEntry]) -> Result<()> {
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM wishlist_items WHERE user_id = ?")
        .bind(user_id)
        .execute(&mut *tx)
        .await?;
    for entry in entries {
        if entry.user_id != user_id {
            return Err(anyhow!(
                "wishlist entry for user {} staged under user {}",
                entry.user_id,
                user_id
            ));
        }
        upsert_wishlist_item_on(&mut *tx, entry).await?;
    }
    tx.commit().await?;
    Ok(())
}

async fn enqueue_outbox_tx(
    tx: &mut Transaction<'_, Sqlite>,
    user_id: i64,
    job_id: i64,
    force: bool,
    due_at: DateTime<Utc>,
) -> Result<i64> {
    let rec = sqlx::query(
        "INSERT INTO outbox (user_id, job_id, force, attempt, due_at) VALUES (?, ?, ?, 0, ?) RETURNING id",
    )
    .bind(user_id)
    .bind(job_id)
    .bind(force)
    .bind(due_at)
    .fetch_one(&mut **tx)
    .await?;
    Ok(rec.get("id"))
}

#[instrument(skip_all)]
pub async fn next_due_outbox(pool: &Pool) -> Result<Option<OutboxTask>> {
    let row = sqlx::query(
        "SELECT id, user_id, job_id, force, attempt FROM outbox \
         WHERE datetime(due_at) <= CURRENT_TIMESTAMP ORDER BY datetime(due_at) ASC, id ASC LIMIT 1",
    )
    .fetch_optional(pool)
    .await?;
    let Some(row) = row else {
        return Ok(None);
    };
    Ok(Some(OutboxTask {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        job_id: row.try_get("job_id")?,
        force: row.try_get("force")?,
        attempt: row.try_get("attempt")?,
    }))
}

#[instrument(skip_all)]
pub async fn delete_outbox(pool: &Pool, id: i64) -> Result<()> {
    sqlx::query("DELETE FROM outbox WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Exponential backoff: 5s * 2^attempt, capped at `max_cap_secs` (no cap when <= 0).
#[instrument(skip_all)]
pub async fn backoff_outbox_with_cap(
    pool: &Pool,
    id: i64,
    attempt: i32,
    max_cap_secs: i64,
) -> Result<i64> {
    let secs = 5_i64 * (1_i64 << attempt.clamp(0, 10));
    let secs = if max_cap_secs <= 0 {
        secs
    } else {
        secs.min(max_cap_secs)
    };
    sqlx::query(
        "UPDATE outbox SET attempt = ?, due_at = datetime('now', ? || ' seconds') WHERE id = ?",
    )
    .bind(attempt + 1)
    .bind(secs)
    .bind(id)
    .execute(pool)
    .await?;
    Ok(secs)
}

#[instrument(skip_all)]
pub async fn count_remaining_outbox_tasks(pool: &Pool) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM outbox")
        .fetch_one(pool)
        .await?;
    Ok(count)
}
