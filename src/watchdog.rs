//! Moves jobs that stopped making progress to ERROR so pollers see an end state.

use anyhow::Result;
use chrono::Utc;
use std::time::Duration;
use tracing::{info, instrument, warn};

use crate::model::JobStatus;
use crate::store::{JobStore, StoreError};

/// Fail every RUN job, and every NEW job no longer queued for dispatch, not
/// updated within `stale_after`. Returns how many jobs were moved.
#[instrument(skip_all)]
pub async fn sweep_stale_jobs(jobs: &dyn JobStore, stale_after: Duration) -> Result<usize> {
    let window = chrono::Duration::from_std(stale_after)?;
    let cutoff = Utc::now() - window;
    let details = format!("job stalled: no progress for {}s", stale_after.as_secs());

    let mut failed = 0;
    for job in jobs.list_stale(cutoff).await? {
        match jobs
            .update_status(job.id, JobStatus::Error, Some(&details))
            .await
        {
            Ok(()) => {
                info!(job_id = job.id, user_id = job.user_id, status = %job.status_code, "stalled job marked as failed");
                failed += 1;
            }
            // Finished between the listing and the update.
            Err(StoreError::InvalidTransition { .. }) | Err(StoreError::JobNotFound(_)) => {}
            Err(err) => warn!(job_id = job.id, error = %err, "could not fail stalled job"),
        }
    }
    Ok(failed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::store::SqliteStore;

    async fn store() -> SqliteStore {
        let pool = db::init_pool("sqlite::memory:").await.unwrap();
        db::run_migrations(&pool).await.unwrap();
        SqliteStore::new(pool)
    }

    #[tokio::test]
    async fn only_stalled_unfinished_jobs_fail() {
        let store = store().await;
        let user = db::upsert_user_by_steam_id(store.pool(), "7656", None, None, None)
            .await
            .unwrap();
        let stalled = JobStore::create(&store, user.id).await.unwrap();
        let queued = JobStore::create_queued(&store, user.id, false).await.unwrap();
        let done = JobStore::create(&store, user.id).await.unwrap();
        JobStore::update_status(&store, done.id, JobStatus::Run, None)
            .await
            .unwrap();
        JobStore::update_status(&store, done.id, JobStatus::Complete, Some("ok"))
            .await
            .unwrap();
        sqlx::query("UPDATE jobs SET updated_at = datetime('now', '-2 hours')")
            .execute(store.pool())
            .await
            .unwrap();
        let fresh = JobStore::create(&store, user.id).await.unwrap();

        let failed = sweep_stale_jobs(&store, Duration::from_secs(900)).await.unwrap();
        assert_eq!(failed, 1);

        let stalled = JobStore::get(&store, stalled.id).await.unwrap().unwrap();
        assert_eq!(stalled.status_code, JobStatus::Error);
        assert_eq!(
            stalled.details.as_deref(),
            Some("job stalled: no progress for 900s")
        );
        let done = JobStore::get(&store, done.id).await.unwrap().unwrap();
        assert_eq!(done.status_code, JobStatus::Complete);
        let fresh = JobStore::get(&store, fresh.id).await.unwrap().unwrap();
        assert_eq!(fresh.status_code, JobStatus::New);
        // Waiting behind the worker is not a stall.
        let queued = JobStore::get(&store, queued.id).await.unwrap().unwrap();
        assert_eq!(queued.status_code, JobStatus::New);
    }
}
