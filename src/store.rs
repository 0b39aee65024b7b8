//! Storage capabilities used by the sync pipeline and the HTTP API.
//!
//! Each entity gets a narrow trait so the orchestrator can be driven against
//! substitutes in tests. `SqliteStore` implements all of them over one pool.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::db::{self, Pool, StatusUpdate};
use crate::model::{CatalogItem, Job, JobStatus, User, WishlistEntry, WishlistItemView};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("job {0} not found")]
    JobNotFound(i64),
    #[error("job {job_id} cannot move from {from} to {to}")]
    InvalidTransition {
        job_id: i64,
        from: JobStatus,
        to: JobStatus,
    },
    #[error("storage failure: {0:#}")]
    Storage(#[from] anyhow::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a NEW job for `user_id`.
    async fn create(&self, user_id: i64) -> StoreResult<Job>;

    /// Insert a NEW job and durably queue it for a sync run.
    async fn create_queued(&self, user_id: i64, force: bool) -> StoreResult<Job>;

    async fn get(&self, job_id: i64) -> StoreResult<Option<Job>>;

    async fn update_status(
        &self,
        job_id: i64,
        status: JobStatus,
        details: Option<&str>,
    ) -> StoreResult<()>;

    /// Non-terminal jobs not touched since `cutoff`.
    async fn list_stale(&self, cutoff: DateTime<Utc>) -> StoreResult<Vec<Job>>;
}

#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn exists(&self, item_id: &str) -> StoreResult<bool>;

    async fn get(&self, item_id: &str) -> StoreResult<Option<CatalogItem>>;

    async fn upsert(&self, item: &CatalogItem) -> StoreResult<()>;
}

#[async_trait]
pub trait WishlistStore: Send + Sync {
    async fn list_for_user(&self, user_id: i64) -> StoreResult<Vec<WishlistItemView>>;

    async fn upsert(&self, entry: &WishlistEntry) -> StoreResult<()>;

    async fn clear_for_user(&self, user_id: i64) -> StoreResult<()>;

    /// Replace the user's whole wishlist with `entries`.
    ///
    /// The default clears and then upserts one entry at a time, so a failure
    /// part-way leaves a partial wishlist behind. Stores that can do better
    /// should swap the set in one transaction.
    async fn replace_for_user(&self, user_id: i64, entries: &[WishlistEntry]) -> StoreResult<()> {
        self.clear_for_user(user_id).await?;
        for entry in entries {
            self.upsert(entry).await?;
        }
        Ok(())
    }
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn get(&self, user_id: i64) -> StoreResult<Option<User>>;

    async fn upsert_by_steam_id(
        &self,
        steam_id: &str,
        username: Option<&str>,
    ) -> StoreResult<User>;
}

/// SQLite-backed implementation of every storage capability.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: Pool,
}

impl SqliteStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }
}

#[async_trait]
impl JobStore for SqliteStore {
    async fn create(&self, user_id: i64) -> StoreResult<Job> {
        Ok(db::create_job(&self.pool, user_id).await?)
    }

    async fn create_queued(&self, user_id: i64, force: bool) -> StoreResult<Job> {
        Ok(db::create_job_with_dispatch(&self.pool, user_id, force).await?)
    }

    async fn get(&self, job_id: i64) -> StoreResult<Option<Job>> {
        Ok(db::get_job(&self.pool, job_id).await?)
    }

    async fn update_status(
        &self,
        job_id: i64,
        status: JobStatus,
        details: Option<&str>,
    ) -> StoreResult<()> {
        match db::update_job_status(&self.pool, job_id, status, details).await? {
            StatusUpdate::Updated => Ok(()),
            StatusUpdate::NotFound => Err(StoreError::JobNotFound(job_id)),
            StatusUpdate::Rejected { current } => Err(StoreError::InvalidTransition {
                job_id,
                from: current,
                to: status,
            }),
        }
    }

    async fn list_stale(&self, cutoff: DateTime<Utc>) -> StoreResult<Vec<Job>> {
        Ok(db::list_stale_jobs(&self.pool, cutoff).await?)
    }
}

#[async_trait]
impl CatalogStore for SqliteStore {
    async fn exists(&self, item_id: &str) -> StoreResult<bool> {
        Ok(db::game_exists(&self.pool, item_id).await?)
    }

    async fn get(&self, item_id: &str) -> StoreResult<Option<CatalogItem>> {
        Ok(db::get_game(&self.pool, item_id).await?)
    }

    async fn upsert(&self, item: &CatalogItem) -> StoreResult<()> {
        Ok(db::upsert_game(&self.pool, item).await?)
    }
}

#[async_trait]
impl WishlistStore for SqliteStore {
    async fn list_for_user(&self, user_id: i64) -> StoreResult<Vec<WishlistItemView>> {
        Ok(db::list_wishlist(&self.pool, user_id).await?)
    }

    async fn upsert(&self, entry: &WishlistEntry) -> StoreResult<()> {
        Ok(db::upsert_wishlist_item(&self.pool, entry).await?)
    }

    async fn clear_for_user(&self, user_id: i64) -> StoreResult<()> {
        db::clear_wishlist(&self.pool, user_id).await?;
        Ok(())
    }

    async fn replace_for_user(&self, user_id: i64, entries: &[WishlistEntry]) -> StoreResult<()> {
        Ok(db::replace_wishlist(&self.pool, user_id, entries).await?)
    }
}

#[async_trait]
impl UserStore for SqliteStore {
    async fn get(&self, user_id: i64) -> StoreResult<Option<User>> {
        Ok(db::get_user(&self.pool, user_id).await?)
    }

    async fn upsert_by_steam_id(
        &self,
        steam_id: &str,
        username: Option<&str>,
    ) -> StoreResult<User> {
        Ok(db::upsert_user_by_steam_id(&self.pool, steam_id, username, None, None).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use tokio::sync::Mutex;

    /// Wishlist kept in memory; relies on the trait's default replace.
    #[derive(Default)]
    struct MemoryWishlist {
        entries: Mutex<Vec<WishlistEntry>>,
        fail_on: Option<String>,
    }

    #[async_trait]
    impl WishlistStore for MemoryWishlist {
        async fn list_for_user(&self, user_id: i64) -> StoreResult<Vec<WishlistItemView>> {
            let entries = self.entries.lock().await;
            Ok(entries
                .iter()
                .filter(|e| e.user_id == user_id)
                .map(|e| WishlistItemView {
                    user_id: e.user_id,
                    item_id: e.item_id.clone(),
                    note: e.note.clone(),
                    added_at: e.added_at,
                    title: None,
                    image_url: None,
                    price: None,
                    release_date: None,
                    last_fetched_at: None,
                })
                .collect())
        }

        async fn upsert(&self, entry: &WishlistEntry) -> StoreResult<()> {
            if self.fail_on.as_deref() == Some(entry.item_id.as_str()) {
                return Err(StoreError::Storage(anyhow!("disk full")));
            }
            let mut entries = self.entries.lock().await;
            entries.retain(|e| !(e.user_id == entry.user_id && e.item_id == entry.item_id));
            entries.push(entry.clone());
            Ok(())
        }

        async fn clear_for_user(&self, user_id: i64) -> StoreResult<()> {
            self.entries.lock().await.retain(|e| e.user_id != user_id);
            Ok(())
        }
    }

    fn entry(user_id: i64, item_id: &str) -> WishlistEntry {
        WishlistEntry {
            user_id,
            item_id: item_id.into(),
            note: None,
            added_at: None,
        }
    }

    async fn ids(store: &MemoryWishlist, user_id: i64) -> Vec<String> {
        store
            .list_for_user(user_id)
            .await
            .unwrap()
            .into_iter()
            .map(|v| v.item_id)
            .collect()
    }

    #[tokio::test]
    async fn default_replace_swaps_the_whole_set() {
        let store = MemoryWishlist::default();
        store.upsert(&entry(1, "99")).await.unwrap();
        store.upsert(&entry(2, "5")).await.unwrap();

        store
            .replace_for_user(1, &[entry(1, "10"), entry(1, "20")])
            .await
            .unwrap();

        assert_eq!(ids(&store, 1).await, vec!["10", "20"]);
        assert_eq!(ids(&store, 2).await, vec!["5"]);

        store.replace_for_user(1, &[]).await.unwrap();
        assert!(ids(&store, 1).await.is_empty());
    }

    #[tokio::test]
    async fn default_replace_leaves_partial_set_on_failure() {
        let store = MemoryWishlist {
            fail_on: Some("20".into()),
            ..Default::default()
        };
        store.upsert(&entry(1, "99")).await.unwrap();

        let err = store
            .replace_for_user(1, &[entry(1, "10"), entry(1, "20"), entry(1, "30")])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Storage(_)));

        // Old entries are already gone and only the items before the failure landed.
        assert_eq!(ids(&store, 1).await, vec!["10"]);
    }
}
