use crate::db::{self, Pool};
use crate::sync::{SyncError, SyncOrchestrator, SyncOutcome};
use anyhow::Result;
use tracing::{info, instrument, warn};

/// Run the oldest due dispatch task, if any. Returns whether a task was found.
///
/// The task is removed once its job is finished (or gone); a run that leaves
/// the job unfinished is retried later with backoff.
#[instrument(skip_all)]
pub async fn process_next_task(
    pool: &Pool,
    orchestrator: &SyncOrchestrator,
    max_backoff_secs: i64,
) -> Result<bool> {
    let Some(task) = db::next_due_outbox(pool).await? else {
        return Ok(false);
    };
    let (id, job_id, attempt) = (task.id, task.job_id, task.attempt);

    match orchestrator.run(job_id, task.force).await {
        Ok(SyncOutcome::Completed(summary)) => {
            info!(id, job_id, user_id = task.user_id, %summary, "sync task finished");
        }
        Ok(SyncOutcome::AlreadyFinished(status)) => {
            info!(id, job_id, %status, "sync task redelivered for finished job");
        }
        Err(SyncError::JobNotFound(_)) => {
            warn!(id, job_id, "sync task refers to a missing job; dropping");
            db::delete_outbox(pool, id).await?;
            return Ok(true);
        }
        Err(err) => {
            warn!(id, job_id, attempt, error = %err, "sync task failed");
        }
    }

    let finished = db::get_job(pool, job_id)
        .await?
        .map_or(true, |job| job.status_code.is_terminal());
    if finished {
        db::delete_outbox(pool, id).await?;
    } else {
        let secs = db::backoff_outbox_with_cap(pool, id, attempt, max_backoff_secs).await?;
        warn!(id, job_id, attempt, secs, "job still unfinished; backoff");
    }
    Ok(true)
}
