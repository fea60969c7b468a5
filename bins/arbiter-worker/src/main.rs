mod config;
mod health;
mod jobs;

use arbiter_common::redis;
use arbiter_common::types::{EvaluationJob, JobState};
use arbiter_engine::config::{EngineSettings, LanguageConfigManager};
use arbiter_engine::Engine;
use config::WorkerConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, instrument, warn};

/// How long in-flight jobs get to finish after a shutdown signal
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true);

    if std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json")) {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    info!("Arbiter Worker booting...");

    let worker_config = WorkerConfig::from_env()?;

    let languages = LanguageConfigManager::load_default().map_err(|e| {
        error!("Failed to load language configurations: {:#}", e);
        e
    })?;
    info!("Loaded language configurations for: {:?}", languages.languages());

    for language in &worker_config.languages {
        if languages.get_config(language).is_none() {
            error!("Language '{}' is not configured", language);
            error!("Available languages: {:?}", languages.languages());
            std::process::exit(1);
        }
    }

    let engine = Arc::new(Engine::connect(languages, EngineSettings::from_env())?);

    // Images are pulled here and never on the request path
    if let Err(e) = engine.warm_up(&worker_config.languages).await {
        error!(error = %e, "Warm-up failed, refusing to start");
        std::process::exit(1);
    }

    let client = ::redis::Client::open(worker_config.queue.redis_url.as_str())?;
    let redis_conn = ::redis::aio::ConnectionManager::new(client).await?;
    info!("Connected to Redis: {}", worker_config.queue.redis_url);

    tokio::spawn(health::serve(worker_config.health_addr, Arc::clone(&engine)));

    let permits = Arc::new(Semaphore::new(worker_config.max_parallel_jobs));
    let queues: Vec<String> = worker_config.languages.iter().map(redis::queue_name).collect();
    info!(
        queues = ?queues,
        max_parallel_jobs = worker_config.max_parallel_jobs,
        "Worker ready"
    );

    let shutdown = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
        warn!("Received shutdown signal, draining in-flight jobs...");
    };

    tokio::select! {
        _ = worker_loop(redis_conn, Arc::clone(&engine), &worker_config, Arc::clone(&permits)) => {},
        _ = shutdown => {},
    }

    let max_jobs = u32::try_from(worker_config.max_parallel_jobs).unwrap_or(u32::MAX);
    match tokio::time::timeout(SHUTDOWN_GRACE, permits.acquire_many(max_jobs)).await {
        Ok(_) => info!("All in-flight jobs finished"),
        Err(_) => warn!("Shutdown grace period elapsed with jobs still running"),
    }

    info!("Worker shutdown complete");
    Ok(())
}

#[instrument(skip_all, fields(languages = ?worker_config.languages))]
async fn worker_loop(
    mut redis_conn: ::redis::aio::ConnectionManager,
    engine: Arc<Engine>,
    worker_config: &WorkerConfig,
    permits: Arc<Semaphore>,
) {
    loop {
        // Only take a job off the queue when there is room to run it
        let permit = match Arc::clone(&permits).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return,
        };

        // BLPOP with 5 second timeout for graceful shutdown
        match redis::pop_job(&mut redis_conn, &worker_config.languages, 5.0).await {
            Ok(Some(job)) => {
                info!(
                    job_id = %job.id,
                    language = %job.language,
                    timeout_ms = ?job.timeout_ms,
                    test_cases = job.test_cases.len(),
                    source_size = job.source_code.len(),
                    "Received job"
                );

                let engine = Arc::clone(&engine);
                let conn = redis_conn.clone();
                let ttl = worker_config.queue.result_ttl_seconds;
                tokio::spawn(async move {
                    process_job(engine, conn, job, ttl).await;
                    drop(permit);
                });
            }
            Ok(None) => continue,
            Err(e) => {
                error!(error = %e, "Redis error");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}

#[instrument(skip_all, fields(job_id = %job.id))]
async fn process_job(
    engine: Arc<Engine>,
    mut conn: ::redis::aio::ConnectionManager,
    job: EvaluationJob,
    ttl_seconds: u64,
) {
    let outcome = if redis::is_job_cancelled(&mut conn, &job.id).await.unwrap_or(false) {
        info!("Job cancelled before it started");
        jobs::cancelled_outcome(&job)
    } else {
        if let Err(e) = redis::set_state(&mut conn, &job.id, JobState::Running, ttl_seconds).await {
            debug!(error = %e, "Failed to mark job running");
        }

        let start = std::time::Instant::now();
        let evaluation = engine.evaluate(&job.source_code, &job.language, &job.test_cases, job.timeout_ms);
        let outcome = jobs::run_job(&job, evaluation, jobs::watch_cancel(conn.clone(), job.id)).await;

        if let Some(summary) = &outcome.summary {
            info!(
                status = ?summary.status,
                passed_cases = summary.passed_cases,
                total_cases = summary.total_cases,
                execution_ms = start.elapsed().as_millis() as u64,
                "Evaluation completed"
            );
            for verdict in &summary.verdicts {
                debug!(
                    index = verdict.index,
                    status = ?verdict.status,
                    execution_ms = verdict.execution_time_ms,
                    "Test result"
                );
            }
        }
        outcome
    };

    match redis::store_outcome(&mut conn, &outcome, ttl_seconds).await {
        Ok(()) => info!(state = ?outcome.state, "Outcome published to Redis"),
        // Non-fatal - worker continues
        Err(e) => error!(error = %e, "Failed to publish outcome"),
    }
}
