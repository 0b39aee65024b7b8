//! Client-side watcher that follows a sync job until it finishes.
//!
//! The watcher ticks on a fixed interval, forwards every observed job state to
//! a progress callback and, once the job is COMPLETE or ERROR, reads the
//! refreshed wishlist. It gives up after a fixed ceiling regardless of what
//! the job is doing.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Url};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{interval_at, timeout_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config;
use crate::model::{Job, WishlistItemView};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Idle,
    Polling,
    Done,
    TimedOut,
    Failed,
    Cancelled,
}

#[derive(Debug, Error)]
pub enum PollError {
    #[error("job {job_id} did not finish within {waited:?}; please check job status manually")]
    Timeout { job_id: i64, waited: Duration },
    #[error("polling cancelled")]
    Cancelled,
    #[error("job finished but the wishlist could not be refreshed: {0}")]
    WishlistRefresh(String),
}

/// Where the watcher reads job state and the wishlist from.
#[async_trait]
pub trait JobSource: Send + Sync {
    async fn fetch_job(&self, job_id: i64) -> Result<Job>;

    async fn fetch_wishlist(&self) -> Result<Vec<WishlistItemView>>;
}

/// Reads through the service's HTTP API with a bearer token.
#[derive(Clone)]
pub struct HttpJobSource {
    http: Client,
    base_url: Url,
    token: String,
}

impl fmt::Debug for HttpJobSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpJobSource")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl HttpJobSource {
    pub fn new(base_url: &str, token: impl Into<String>) -> Result<Self> {
        let base_url = Url::parse(base_url).context("invalid poll base URL")?;
        let http = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url,
            token: token.into(),
        })
    }

    pub fn build_job_request(&self, job_id: i64) -> Result<reqwest::Request> {
        let url = self.base_url.join(&format!("api/jobs/{job_id}"))?;
        self.http
            .get(url)
            .bearer_auth(&self.token)
            .build()
            .context("failed to build job request")
    }

    pub fn build_wishlist_request(&self) -> Result<reqwest::Request> {
        let url = self.base_url.join("api/wishlist")?;
        self.http
            .get(url)
            .bearer_auth(&self.token)
            .build()
            .context("failed to build wishlist request")
    }

    async fn execute_json<T: serde::de::DeserializeOwned>(&self, request: reqwest::Request) -> Result<T> {
        let res = self.http.execute(request).await.context("request failed")?;
        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            anyhow::bail!("server returned {}: {}", status, body);
        }
        res.json::<T>().await.context("invalid response body")
    }
}

#[async_trait]
impl JobSource for HttpJobSource {
    async fn fetch_job(&self, job_id: i64) -> Result<Job> {
        let request = self.build_job_request(job_id)?;
        self.execute_json(request).await
    }

    async fn fetch_wishlist(&self) -> Result<Vec<WishlistItemView>> {
        let request = self.build_wishlist_request()?;
        self.execute_json(request).await
    }
}

/// Shared cancellation flag; the watcher checks it on every tick.
#[derive(Debug, Clone, Default)]
pub struct PollHandle {
    cancelled: Arc<AtomicBool>,
}

impl PollHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct PollResult {
    pub job: Job,
    pub wishlist: Vec<WishlistItemView>,
}

pub struct JobWatcher {
    source: Arc<dyn JobSource>,
    interval: Duration,
    timeout: Duration,
    state: PollState,
}

impl fmt::Debug for JobWatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobWatcher")
            .field("interval", &self.interval)
            .field("timeout", &self.timeout)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl JobWatcher {
    pub fn new(source: Arc<dyn JobSource>, interval: Duration, timeout: Duration) -> Self {
        Self {
            source,
            interval,
            timeout,
            state: PollState::Idle,
        }
    }

    pub fn from_config(source: Arc<dyn JobSource>, cfg: &config::Poll) -> Self {
        Self::new(source, cfg.interval(), cfg.timeout())
    }

    pub fn state(&self) -> PollState {
        self.state
    }

    /// Follow `job_id` until it finishes, the ceiling passes or `handle` is
    /// cancelled. Failed job reads are logged and retried on the next tick.
    pub async fn watch<F>(
        &mut self,
        job_id: i64,
        handle: &PollHandle,
        mut on_progress: F,
    ) -> Result<PollResult, PollError>
    where
        F: FnMut(&Job) + Send,
    {
        self.state = PollState::Polling;
        let started = Instant::now();
        let deadline = started + self.timeout;
        let mut ticker = interval_at(started + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let ticked = timeout_at(deadline, ticker.tick()).await;
            if ticked.is_err() || Instant::now() >= deadline {
                return Err(self.timed_out(job_id));
            }
            if handle.is_cancelled() {
                info!(job_id, "polling cancelled");
                self.state = PollState::Cancelled;
                return Err(PollError::Cancelled);
            }

            let fetched = timeout_at(deadline, self.source.fetch_job(job_id)).await;
            let job = match fetched {
                Err(_) => return Err(self.timed_out(job_id)),
                Ok(Err(err)) => {
                    warn!(job_id, error = %format!("{err:#}"), "job status fetch failed; will retry");
                    continue;
                }
                Ok(Ok(job)) => job,
            };
            debug!(job_id, status = %job.status_code, details = ?job.details, "job status");
            on_progress(&job);

            if job.status_code.is_terminal() {
                self.state = PollState::Done;
                return match self.source.fetch_wishlist().await {
                    Ok(wishlist) => Ok(PollResult { job, wishlist }),
                    Err(err) => {
                        warn!(job_id, error = %format!("{err:#}"), "wishlist refresh failed");
                        self.state = PollState::Failed;
                        Err(PollError::WishlistRefresh(format!("{err:#}")))
                    }
                };
            }
        }
    }

    fn timed_out(&mut self, job_id: i64) -> PollError {
        warn!(job_id, timeout = ?self.timeout, "job polling timed out");
        self.state = PollState::TimedOut;
        PollError::Timeout {
            job_id,
            waited: self.timeout,
        }
    }
}
