use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Job type recorded for every wishlist synchronization.
pub const JOB_TYPE_SYNC: &str = "SYNC_STEAM";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    New,
    Run,
    Complete,
    Error,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::New => "NEW",
            JobStatus::Run => "RUN",
            JobStatus::Complete => "COMPLETE",
            JobStatus::Error => "ERROR",
        }
    }

    /// Numeric id used by the `job_statuses` lookup table.
    pub fn id(&self) -> i64 {
        match self {
            JobStatus::New => 1,
            JobStatus::Run => 2,
            JobStatus::Complete => 3,
            JobStatus::Error => 4,
        }
    }

    pub fn from_id(id: i64) -> Option<Self> {
        match id {
            1 => Some(JobStatus::New),
            2 => Some(JobStatus::Run),
            3 => Some(JobStatus::Complete),
            4 => Some(JobStatus::Error),
            _ => None,
        }
    }

    pub const ALL: [JobStatus; 4] = [
        JobStatus::New,
        JobStatus::Run,
        JobStatus::Complete,
        JobStatus::Error,
    ];

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Complete | JobStatus::Error)
    }

    /// Forward-only lifecycle: NEW -> RUN -> {COMPLETE | ERROR}.
    /// RUN -> RUN carries progress updates; NEW -> ERROR covers jobs that never started.
    pub fn can_advance_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (New, Run) | (New, Error) | (Run, Run) | (Run, Complete) | (Run, Error)
        )
    }

    /// States a job may be in for a move to `self` to be accepted.
    pub fn predecessors(&self) -> Vec<JobStatus> {
        Self::ALL
            .into_iter()
            .filter(|from| from.can_advance_to(*self))
            .collect()
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NEW" => Ok(JobStatus::New),
            "RUN" => Ok(JobStatus::Run),
            "COMPLETE" => Ok(JobStatus::Complete),
            "ERROR" => Ok(JobStatus::Error),
            _ => Err(format!("invalid job status: {}", s)),
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: i64,
    pub user_id: i64,
    #[serde(rename = "type")]
    pub job_type: String,
    pub status_code: JobStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub details: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: i64,
    pub steam_id: Option<String>,
    pub username: Option<String>,
    pub avatar_url: Option<String>,
    pub profile_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CatalogItem {
    pub item_id: String,
    pub title: Option<String>,
    pub image_url: Option<String>,
    pub price: Option<String>,
    pub release_date: Option<NaiveDate>,
    pub last_fetched_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WishlistEntry {
    pub user_id: i64,
    pub item_id: String,
    pub note: Option<String>,
    pub added_at: Option<DateTime<Utc>>,
}

/// Wishlist entry joined with whatever catalog metadata is cached for it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WishlistItemView {
    pub user_id: i64,
    pub item_id: String,
    pub note: Option<String>,
    pub added_at: Option<DateTime<Utc>>,
    pub title: Option<String>,
    pub image_url: Option<String>,
    pub price: Option<String>,
    pub release_date: Option<NaiveDate>,
    pub last_fetched_at: Option<DateTime<Utc>>,
}

/// One item of a user's remote wishlist, in the order the remote returned it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteWishlistItem {
    pub item_id: String,
    pub added_at: i64,
}

/// Catalog detail returned by the remote store for a single item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemDetail {
    pub title: String,
    pub image_url: Option<String>,
    pub price_formatted: Option<String>,
    pub release_date: Option<String>,
}

/// Parse the remote store's display date ("9 May, 2009", "May 9, 2009", ...).
/// Placeholders such as "Coming soon" yield `None`.
pub fn parse_release_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    for fmt in ["%d %b, %Y", "%b %d, %Y", "%d %B, %Y", "%B %d, %Y", "%Y-%m-%d"] {
        if let Ok(date) = NaiveDate::parse_from_str(raw, fmt) {
            return Some(date);
        }
    }
    // Month-only dates resolve to the first of the month.
    for fmt in ["%d %b %Y", "%d %B %Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(&format!("1 {}", raw), fmt) {
            return Some(date);
        }
    }
    None
}
