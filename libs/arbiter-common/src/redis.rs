use crate::types::{EvaluationJob, JobOutcome, JobState, Language};
use redis::{AsyncCommands, RedisResult};

/// Redis queue semantics shared by the worker and anything that enqueues jobs.
/// Keys are deterministic so producers and consumers never drift.
///
/// Results are a handoff, not storage: they expire after a TTL and the caller
/// persists whatever it needs.

pub const QUEUE_PREFIX: &str = "arbiter:queue";
pub const RESULT_PREFIX: &str = "arbiter:result";
pub const STATUS_PREFIX: &str = "arbiter:status";
pub const CANCEL_PREFIX: &str = "arbiter:cancel";

/// Cancellation flags outlive any reasonable evaluation
const CANCEL_TTL_SECONDS: u64 = 3600;

/// Deterministic queue name for a language
pub fn queue_name(language: &Language) -> String {
    format!("{}:{}", QUEUE_PREFIX, language)
}

pub fn result_key(job_id: &uuid::Uuid) -> String {
    format!("{}:{}", RESULT_PREFIX, job_id)
}

pub fn status_key(job_id: &uuid::Uuid) -> String {
    format!("{}:{}", STATUS_PREFIX, job_id)
}

pub fn cancel_key(job_id: &uuid::Uuid) -> String {
    format!("{}:{}", CANCEL_PREFIX, job_id)
}

/// SET with an expiry, in seconds
async fn set_with_ttl(
    conn: &mut redis::aio::ConnectionManager,
    key: String,
    value: &str,
    ttl_seconds: u64,
) -> RedisResult<()> {
    redis::cmd("SET")
        .arg(key)
        .arg(value)
        .arg("EX")
        .arg(ttl_seconds)
        .query_async(conn)
        .await
}

fn serialization_error(e: serde_json::Error) -> redis::RedisError {
    redis::RedisError::from((redis::ErrorKind::TypeError, "serialization error", e.to_string()))
}

/// Push a job to its language queue (RPUSH, FIFO with BLPOP)
pub async fn push_job(
    conn: &mut redis::aio::ConnectionManager,
    language: &Language,
    job: &EvaluationJob,
) -> RedisResult<()> {
    let payload = serde_json::to_string(job).map_err(serialization_error)?;
    let _: () = conn.rpush(queue_name(language), payload).await?;
    set_state(conn, &job.id, JobState::Queued, crate::config::DEFAULT_RESULT_TTL_SECONDS).await
}

/// Pop the next job from any of the given language queues
///
/// BLPOP with a timeout so the caller can notice shutdown between polls.
pub async fn pop_job(
    conn: &mut redis::aio::ConnectionManager,
    languages: &[Language],
    timeout_seconds: f64,
) -> RedisResult<Option<EvaluationJob>> {
    let queues: Vec<String> = languages.iter().map(queue_name).collect();
    let result: Option<(String, String)> = conn.blpop(&queues, timeout_seconds).await?;

    match result {
        Some((_key, payload)) => {
            let job: EvaluationJob = serde_json::from_str(&payload).map_err(serialization_error)?;
            Ok(Some(job))
        }
        None => Ok(None),
    }
}

pub async fn set_state(
    conn: &mut redis::aio::ConnectionManager,
    job_id: &uuid::Uuid,
    state: JobState,
    ttl_seconds: u64,
) -> RedisResult<()> {
    let state = serde_json::to_string(&state).map_err(serialization_error)?;
    set_with_ttl(conn, status_key(job_id), &state, ttl_seconds).await
}

/// Publish a finished job's outcome, plus its state for quick lookup
pub async fn store_outcome(
    conn: &mut redis::aio::ConnectionManager,
    outcome: &JobOutcome,
    ttl_seconds: u64,
) -> RedisResult<()> {
    let payload = serde_json::to_string(outcome).map_err(serialization_error)?;
    set_with_ttl(conn, result_key(&outcome.job_id), &payload, ttl_seconds).await?;
    set_state(conn, &outcome.job_id, outcome.state, ttl_seconds).await
}

pub async fn get_outcome(
    conn: &mut redis::aio::ConnectionManager,
    job_id: &uuid::Uuid,
) -> RedisResult<Option<JobOutcome>> {
    let payload: Option<String> = conn.get(result_key(job_id)).await?;

    match payload {
        Some(data) => {
            let outcome: JobOutcome = serde_json::from_str(&data).map_err(serialization_error)?;
            Ok(Some(outcome))
        }
        None => Ok(None),
    }
}

/// Ask the worker to abandon a job; running sandboxes are torn down
pub async fn request_cancel(
    conn: &mut redis::aio::ConnectionManager,
    job_id: &uuid::Uuid,
) -> RedisResult<()> {
    set_with_ttl(conn, cancel_key(job_id), "1", CANCEL_TTL_SECONDS).await
}

pub async fn is_job_cancelled(
    conn: &mut redis::aio::ConnectionManager,
    job_id: &uuid::Uuid,
) -> RedisResult<bool> {
    conn.exists(cancel_key(job_id)).await
}
