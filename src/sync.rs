//! Wishlist synchronization for one job.
//!
//! A run walks the job through RUN to COMPLETE or ERROR, refreshes the
//! catalog for every wishlist item it has to, and swaps the user's wishlist
//! for the remote one in a single store call at the end.

use chrono::{DateTime, TimeZone, Utc};
use futures::stream::{self, TryStreamExt};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::model::{
    parse_release_date, CatalogItem, ItemDetail, JobStatus, RemoteWishlistItem, WishlistEntry,
};
use crate::steam::{RemoteCatalog, RemoteError};
use crate::store::{CatalogStore, JobStore, SqliteStore, StoreError, UserStore, WishlistStore};

pub const DETAILS_STARTING: &str = "starting synchronization";
pub const DETAILS_NO_IDENTITY: &str = "user or remote identity not found";
pub const DETAILS_REMOTE_UNAVAILABLE: &str = "failed to fetch wishlist from remote catalog";

/// Price stored when the store has no price overview (free or unreleased).
pub const PRICE_UNKNOWN: &str = "N/A";

const PROGRESS_EVERY: usize = 10;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("job {0} not found")]
    JobNotFound(i64),
    #[error("user or remote identity not found")]
    IdentityNotFound,
    #[error("failed to fetch wishlist from remote catalog: {0}")]
    RemoteUnavailable(#[source] RemoteError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl SyncError {
    /// Text recorded on the job when a run ends with this error.
    pub fn job_details(&self) -> String {
        match self {
            SyncError::IdentityNotFound => DETAILS_NO_IDENTITY.to_string(),
            SyncError::RemoteUnavailable(_) => DETAILS_REMOTE_UNAVAILABLE.to_string(),
            other => format!("sync failed: {other}"),
        }
    }
}

/// Final counters of a run. Every remote item lands in exactly one bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncSummary {
    pub processed: usize,
    pub skipped: usize,
    pub errors: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ItemOutcome {
    Processed,
    Skipped,
    Failed,
}

impl SyncSummary {
    fn record(self, outcome: ItemOutcome) -> Self {
        match outcome {
            ItemOutcome::Processed => Self {
                processed: self.processed + 1,
                ..self
            },
            ItemOutcome::Skipped => Self {
                skipped: self.skipped + 1,
                ..self
            },
            ItemOutcome::Failed => Self {
                errors: self.errors + 1,
                ..self
            },
        }
    }

    pub fn total(&self) -> usize {
        self.processed + self.skipped + self.errors
    }
}

impl fmt::Display for SyncSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Processed: {}, Skipped: {}, Errors: {}",
            self.processed, self.skipped, self.errors
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    Completed(SyncSummary),
    /// The job had already finished; nothing was touched.
    AlreadyFinished(JobStatus),
}

#[derive(Clone)]
pub struct SyncOrchestrator {
    jobs: Arc<dyn JobStore>,
    users: Arc<dyn UserStore>,
    catalog: Arc<dyn CatalogStore>,
    wishlist: Arc<dyn WishlistStore>,
    remote: Arc<dyn RemoteCatalog>,
    detail_delay: Duration,
}

impl fmt::Debug for SyncOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncOrchestrator")
            .field("detail_delay", &self.detail_delay)
            .finish_non_exhaustive()
    }
}

impl SyncOrchestrator {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        users: Arc<dyn UserStore>,
        catalog: Arc<dyn CatalogStore>,
        wishlist: Arc<dyn WishlistStore>,
        remote: Arc<dyn RemoteCatalog>,
    ) -> Self {
        Self {
            jobs,
            users,
            catalog,
            wishlist,
            remote,
            detail_delay: Duration::from_millis(100),
        }
    }

    /// All four stores backed by one SQLite store.
    pub fn with_store(store: SqliteStore, remote: Arc<dyn RemoteCatalog>) -> Self {
        let store = Arc::new(store);
        Self::new(store.clone(), store.clone(), store.clone(), store, remote)
    }

    /// Pause after each detail fetch, successful or not.
    pub fn with_detail_delay(mut self, delay: Duration) -> Self {
        self.detail_delay = delay;
        self
    }

    /// Run the synchronization recorded by `job_id`.
    ///
    /// A missing job is reported without touching any store. A job that has
    /// already finished is left as is. Any failure after the job entered RUN
    /// is recorded on it as ERROR before being returned.
    #[instrument(skip(self))]
    pub async fn run(&self, job_id: i64, force: bool) -> Result<SyncOutcome, SyncError> {
        let job = self
            .jobs
            .get(job_id)
            .await?
            .ok_or(SyncError::JobNotFound(job_id))?;
        if job.status_code.is_terminal() {
            info!(job_id, status = %job.status_code, "job already finished; skipping");
            return Ok(SyncOutcome::AlreadyFinished(job.status_code));
        }

        self.jobs
            .update_status(job_id, JobStatus::Run, Some(DETAILS_STARTING))
            .await?;

        match self.sync_user(job_id, job.user_id, force).await {
            Ok(summary) => {
                info!(job_id, user_id = job.user_id, %summary, "sync completed");
                Ok(SyncOutcome::Completed(summary))
            }
            Err(err) => {
                warn!(job_id, user_id = job.user_id, error = %err, "sync failed");
                let details = err.job_details();
                if let Err(mark_err) = self
                    .jobs
                    .update_status(job_id, JobStatus::Error, Some(&details))
                    .await
                {
                    warn!(job_id, error = %mark_err, "could not record job failure");
                }
                Err(err)
            }
        }
    }

    async fn sync_user(&self, job_id: i64, user_id: i64, force: bool) -> Result<SyncSummary, SyncError> {
        let steam_id = self
            .users
            .get(user_id)
            .await?
            .and_then(|user| user.steam_id)
            .filter(|id| !id.trim().is_empty())
            .ok_or(SyncError::IdentityNotFound)?;

        let items = self
            .remote
            .fetch_wishlist(&steam_id)
            .await
            .map_err(SyncError::RemoteUnavailable)?;
        let total = items.len();
        self.jobs
            .update_status(
                job_id,
                JobStatus::Run,
                Some(&format!("found {total} items in wishlist")),
            )
            .await?;

        let (summary, staged) = stream::iter(items.iter().map(Ok::<_, SyncError>))
            .try_fold(
                (SyncSummary::default(), Vec::with_capacity(total)),
                move |(summary, mut staged), item| async move {
                    let outcome = self.sync_item(item, force).await?;
                    staged.push(wishlist_entry(user_id, item));
                    let summary = summary.record(outcome);
                    let done = summary.total();
                    if done % PROGRESS_EVERY == 0 {
                        self.jobs
                            .update_status(
                                job_id,
                                JobStatus::Run,
                                Some(&format!("progress: {done}/{total} items processed")),
                            )
                            .await?;
                    }
                    Ok::<_, SyncError>((summary, staged))
                },
            )
            .await?;

        self.wishlist.replace_for_user(user_id, &staged).await?;
        self.jobs
            .update_status(
                job_id,
                JobStatus::Complete,
                Some(&format!("sync completed. {summary}")),
            )
            .await?;
        Ok(summary)
    }

    async fn sync_item(&self, item: &RemoteWishlistItem, force: bool) -> Result<ItemOutcome, SyncError> {
        let item_id = item.item_id.as_str();
        if !force && self.catalog.exists(item_id).await? {
            debug!(item_id, "catalog entry present; skipping detail fetch");
            return Ok(ItemOutcome::Skipped);
        }

        let fetched = self.remote.fetch_item_detail(item_id).await;
        if !self.detail_delay.is_zero() {
            tokio::time::sleep(self.detail_delay).await;
        }
        match fetched {
            Ok(Some(detail)) => {
                self.catalog.upsert(&catalog_item(item_id, detail)).await?;
                Ok(ItemOutcome::Processed)
            }
            Ok(None) => {
                warn!(item_id, "item details not available");
                Ok(ItemOutcome::Failed)
            }
            Err(err) => {
                warn!(item_id, error = %err, "item details fetch failed");
                Ok(ItemOutcome::Failed)
            }
        }
    }
}

fn catalog_item(item_id: &str, detail: ItemDetail) -> CatalogItem {
    CatalogItem {
        item_id: item_id.to_string(),
        title: Some(detail.title),
        image_url: detail.image_url,
        price: Some(
            detail
                .price_formatted
                .unwrap_or_else(|| PRICE_UNKNOWN.to_string()),
        ),
        release_date: detail.release_date.as_deref().and_then(parse_release_date),
        last_fetched_at: Utc::now(),
    }
}

fn wishlist_entry(user_id: i64, item: &RemoteWishlistItem) -> WishlistEntry {
    WishlistEntry {
        user_id,
        item_id: item.item_id.clone(),
        note: None,
        added_at: added_at(item.added_at),
    }
}

fn added_at(ts: i64) -> Option<DateTime<Utc>> {
    if ts <= 0 {
        return None;
    }
    Utc.timestamp_opt(ts, 0).single()
}
