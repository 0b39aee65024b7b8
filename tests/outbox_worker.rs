mod common;

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use std::sync::Arc;
use std::time::Duration;

use common::{add_user, setup_store, RecordingRemote};
use wishlist_sync::db;
use wishlist_sync::model::{Job, JobStatus};
use wishlist_sync::outbox::process_next_task;
use wishlist_sync::store::{JobStore, SqliteStore, StoreError, StoreResult};
use wishlist_sync::sync::SyncOrchestrator;

fn orchestrator(store: &SqliteStore, remote: &RecordingRemote) -> SyncOrchestrator {
    SyncOrchestrator::with_store(store.clone(), Arc::new(remote.clone()))
        .with_detail_delay(Duration::ZERO)
}

#[tokio::test]
async fn queued_job_runs_and_task_is_removed() {
    let store = setup_store().await;
    let user = add_user(&store, "7656").await;
    let job = store.create_queued(user.id, false).await.unwrap();
    assert_eq!(job.status_code, JobStatus::New);
    assert_eq!(db::count_remaining_outbox_tasks(store.pool()).await.unwrap(), 1);

    let remote = RecordingRemote::with_items(&["10", "20"]);
    let sync = orchestrator(&store, &remote);
    assert!(process_next_task(store.pool(), &sync, 60).await.unwrap());

    let job = JobStore::get(&store, job.id).await.unwrap().unwrap();
    assert_eq!(job.status_code, JobStatus::Complete);
    assert_eq!(db::count_remaining_outbox_tasks(store.pool()).await.unwrap(), 0);
    assert!(!process_next_task(store.pool(), &sync, 60).await.unwrap());
}

#[tokio::test]
async fn force_flag_travels_with_the_task() {
    let store = setup_store().await;
    let user = add_user(&store, "7656").await;
    let remote = RecordingRemote::with_items(&["10"]);
    let sync = orchestrator(&store, &remote);

    let first = store.create_queued(user.id, false).await.unwrap();
    process_next_task(store.pool(), &sync, 60).await.unwrap();
    let forced = store.create_queued(user.id, true).await.unwrap();
    process_next_task(store.pool(), &sync, 60).await.unwrap();

    assert_ne!(first.id, forced.id);
    assert_eq!(remote.detail_calls().await, vec!["10", "10"]);
}

#[tokio::test]
async fn failed_run_is_not_retried() {
    let store = setup_store().await;
    let user = add_user(&store, "7656").await;
    let job = store.create_queued(user.id, false).await.unwrap();
    let remote = RecordingRemote::unavailable();

    assert!(process_next_task(store.pool(), &orchestrator(&store, &remote), 60)
        .await
        .unwrap());
    let job = JobStore::get(&store, job.id).await.unwrap().unwrap();
    assert_eq!(job.status_code, JobStatus::Error);
    assert_eq!(db::count_remaining_outbox_tasks(store.pool()).await.unwrap(), 0);
}

#[tokio::test]
async fn redelivered_task_for_finished_job_is_dropped() {
    let store = setup_store().await;
    let user = add_user(&store, "7656").await;
    let job = store.create_queued(user.id, false).await.unwrap();
    store
        .update_status(job.id, JobStatus::Run, None)
        .await
        .unwrap();
    store
        .update_status(job.id, JobStatus::Complete, Some("done elsewhere"))
        .await
        .unwrap();
    let remote = RecordingRemote::with_items(&["1"]);

    assert!(process_next_task(store.pool(), &orchestrator(&store, &remote), 60)
        .await
        .unwrap());
    assert!(remote.wishlist_calls().await.is_empty());
    let job = JobStore::get(&store, job.id).await.unwrap().unwrap();
    assert_eq!(job.details.as_deref(), Some("done elsewhere"));
    assert_eq!(db::count_remaining_outbox_tasks(store.pool()).await.unwrap(), 0);
}

/// Job store whose final transitions never land, leaving jobs in RUN.
#[derive(Clone)]
struct StuckJobs(SqliteStore);

#[async_trait]
impl JobStore for StuckJobs {
    async fn create(&self, user_id: i64) -> StoreResult<Job> {
        JobStore::create(&self.0, user_id).await
    }

    async fn create_queued(&self, user_id: i64, force: bool) -> StoreResult<Job> {
        self.0.create_queued(user_id, force).await
    }

    async fn get(&self, job_id: i64) -> StoreResult<Option<Job>> {
        JobStore::get(&self.0, job_id).await
    }

    async fn update_status(
        &self,
        job_id: i64,
        status: JobStatus,
        details: Option<&str>,
    ) -> StoreResult<()> {
        if status.is_terminal() {
            return Err(StoreError::Storage(anyhow!("database is locked")));
        }
        self.0.update_status(job_id, status, details).await
    }

    async fn list_stale(&self, cutoff: DateTime<Utc>) -> StoreResult<Vec<Job>> {
        self.0.list_stale(cutoff).await
    }
}

#[tokio::test]
async fn unfinished_job_is_backed_off() {
    let store = setup_store().await;
    let user = add_user(&store, "7656").await;
    let job = store.create_queued(user.id, false).await.unwrap();
    let remote = RecordingRemote::with_items(&["1"]);
    let shared = Arc::new(store.clone());
    let sync = SyncOrchestrator::new(
        Arc::new(StuckJobs(store.clone())),
        shared.clone(),
        shared.clone(),
        shared,
        Arc::new(remote.clone()),
    )
    .with_detail_delay(Duration::ZERO);

    assert!(process_next_task(store.pool(), &sync, 60).await.unwrap());

    let job = JobStore::get(&store, job.id).await.unwrap().unwrap();
    assert_eq!(job.status_code, JobStatus::Run);
    let row = sqlx::query("SELECT attempt FROM outbox WHERE job_id = ?")
        .bind(job.id)
        .fetch_one(store.pool())
        .await
        .unwrap();
    assert_eq!(row.get::<i64, _>("attempt"), 1);
    // Not due again until the backoff passes.
    assert!(!process_next_task(store.pool(), &sync, 60).await.unwrap());
}
