//! Repository view models.
//!
//! Keep these structs focused on the data returned by queries. Business logic
//! should live in higher layers.

use crate::model::JobStatus;

/// Dispatch task pulled by the outbox worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboxTask {
    pub id: i64,
    pub user_id: i64,
    pub job_id: i64,
    pub force: bool,
    pub attempt: i32,
}

/// Outcome of a guarded job status update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusUpdate {
    Updated,
    NotFound,
    Rejected { current: JobStatus },
}
