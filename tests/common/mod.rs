#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use wishlist_sync::db;
use wishlist_sync::model::{ItemDetail, Job, JobStatus, RemoteWishlistItem, User};
use wishlist_sync::steam::{RemoteCatalog, RemoteError};
use wishlist_sync::store::{JobStore, SqliteStore, StoreResult};

pub async fn setup_store() -> SqliteStore {
    let pool = sqlx::SqlitePool::connect("sqlite::memory:").await.unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    SqliteStore::new(pool)
}

pub async fn add_user(store: &SqliteStore, steam_id: &str) -> User {
    db::upsert_user_by_steam_id(store.pool(), steam_id, Some("player"), None, None)
        .await
        .unwrap()
}

pub fn detail(title: &str) -> ItemDetail {
    ItemDetail {
        title: title.to_string(),
        image_url: Some(format!("https://cdn.example/{title}.jpg")),
        price_formatted: Some("$9.99".into()),
        release_date: Some("9 May, 2009".into()),
    }
}

pub fn remote_items(ids: &[&str]) -> Vec<RemoteWishlistItem> {
    ids.iter()
        .enumerate()
        .map(|(i, id)| RemoteWishlistItem {
            item_id: id.to_string(),
            added_at: 1_700_000_000 + i as i64,
        })
        .collect()
}

/// Remote catalog fake that serves a fixed wishlist and per-item details and
/// records every detail request.
#[derive(Clone, Default)]
pub struct RecordingRemote {
    wishlist: Arc<Mutex<Option<Vec<RemoteWishlistItem>>>>,
    details: Arc<Mutex<HashMap<String, ItemDetail>>>,
    wishlist_calls: Arc<Mutex<Vec<String>>>,
    detail_calls: Arc<Mutex<Vec<String>>>,
}

impl RecordingRemote {
    /// Every listed item has details available.
    pub fn with_items(ids: &[&str]) -> Self {
        let remote = Self::default();
        remote.set_wishlist(Some(remote_items(ids)));
        *remote.details.try_lock().unwrap() = ids
            .iter()
            .map(|id| (id.to_string(), detail(&format!("Game {id}"))))
            .collect();
        remote
    }

    /// The wishlist endpoint fails.
    pub fn unavailable() -> Self {
        Self::default()
    }

    pub fn set_wishlist(&self, items: Option<Vec<RemoteWishlistItem>>) {
        *self.wishlist.try_lock().unwrap() = items;
    }

    pub async fn remove_detail(&self, item_id: &str) {
        self.details.lock().await.remove(item_id);
    }

    pub async fn insert_detail(&self, item_id: &str, detail: ItemDetail) {
        self.details.lock().await.insert(item_id.to_string(), detail);
    }

    pub async fn detail_calls(&self) -> Vec<String> {
        self.detail_calls.lock().await.clone()
    }

    pub async fn wishlist_calls(&self) -> Vec<String> {
        self.wishlist_calls.lock().await.clone()
    }
}

#[async_trait]
impl RemoteCatalog for RecordingRemote {
    async fn fetch_wishlist(&self, steam_id: &str) -> Result<Vec<RemoteWishlistItem>, RemoteError> {
        self.wishlist_calls.lock().await.push(steam_id.to_string());
        self.wishlist
            .lock()
            .await
            .clone()
            .ok_or_else(|| RemoteError::Unavailable("503 Service Unavailable".into()))
    }

    async fn fetch_item_detail(&self, item_id: &str) -> Result<Option<ItemDetail>, RemoteError> {
        self.detail_calls.lock().await.push(item_id.to_string());
        Ok(self.details.lock().await.get(item_id).cloned())
    }
}

/// Job store wrapper that records every accepted status update.
#[derive(Clone)]
pub struct RecordingJobs {
    inner: SqliteStore,
    updates: Arc<Mutex<Vec<(JobStatus, Option<String>)>>>,
}

impl RecordingJobs {
    pub fn new(inner: SqliteStore) -> Self {
        Self {
            inner,
            updates: Arc::default(),
        }
    }

    pub async fn updates(&self) -> Vec<(JobStatus, Option<String>)> {
        self.updates.lock().await.clone()
    }

    pub async fn statuses(&self) -> Vec<JobStatus> {
        self.updates().await.into_iter().map(|(s, _)| s).collect()
    }
}

#[async_trait]
impl JobStore for RecordingJobs {
    async fn create(&self, user_id: i64) -> StoreResult<Job> {
        JobStore::create(&self.inner, user_id).await
    }

    async fn create_queued(&self, user_id: i64, force: bool) -> StoreResult<Job> {
        self.inner.create_queued(user_id, force).await
    }

    async fn get(&self, job_id: i64) -> StoreResult<Option<Job>> {
        JobStore::get(&self.inner, job_id).await
    }

    async fn update_status(
        &self,
        job_id: i64,
        status: JobStatus,
        details: Option<&str>,
    ) -> StoreResult<()> {
        self.inner.update_status(job_id, status, details).await?;
        self.updates
            .lock()
            .await
            .push((status, details.map(str::to_string)));
        Ok(())
    }

    async fn list_stale(&self, cutoff: DateTime<Utc>) -> StoreResult<Vec<Job>> {
        self.inner.list_stale(cutoff).await
    }
}
