// Running one queued job to a publishable outcome
use arbiter_common::redis;
use arbiter_common::types::{EvaluationJob, EvaluationSummary, JobOutcome, JobState};
use arbiter_engine::error::EngineError;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(500);

pub fn outcome_from(job: &EvaluationJob, result: Result<EvaluationSummary, EngineError>) -> JobOutcome {
    let (state, summary, error) = match result {
        Ok(summary) => (JobState::Completed, Some(summary), None),
        Err(e) => (JobState::Failed, None, Some(e.to_string())),
    };

    JobOutcome {
        job_id: job.id,
        state,
        summary,
        error,
        metadata: job.metadata.clone(),
        completed_at: chrono::Utc::now(),
    }
}

pub fn cancelled_outcome(job: &EvaluationJob) -> JobOutcome {
    JobOutcome {
        job_id: job.id,
        state: JobState::Cancelled,
        summary: None,
        error: Some("cancelled by request".to_string()),
        metadata: job.metadata.clone(),
        completed_at: chrono::Utc::now(),
    }
}

/// Drive `evaluation` unless `cancelled` fires first
///
/// Losing the race drops the evaluation future, which tears down every
/// sandbox it holds.
pub async fn run_job<E, C>(job: &EvaluationJob, evaluation: E, cancelled: C) -> JobOutcome
where
    E: Future<Output = Result<EvaluationSummary, EngineError>>,
    C: Future<Output = ()>,
{
    tokio::select! {
        result = evaluation => {
            let outcome = outcome_from(job, result);
            info!(job_id = %job.id, state = ?outcome.state, "Job finished");
            outcome
        }
        _ = cancelled => {
            warn!(job_id = %job.id, "Job cancelled, evaluation dropped");
            cancelled_outcome(job)
        }
    }
}

/// Resolve once the job's cancellation flag shows up in Redis
pub async fn watch_cancel(mut conn: ::redis::aio::ConnectionManager, job_id: Uuid) {
    loop {
        tokio::time::sleep(CANCEL_POLL_INTERVAL).await;
        match redis::is_job_cancelled(&mut conn, &job_id).await {
            Ok(true) => return,
            Ok(false) => {}
            Err(e) => debug!(job_id = %job_id, error = %e, "Cancel check failed"),
        }
    }
}
