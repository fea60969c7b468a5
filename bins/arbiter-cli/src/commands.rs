// CLI commands for operating Arbiter
use anyhow::{bail, Context, Result};
use arbiter_common::config::QueueConfig;
use arbiter_common::redis;
use arbiter_common::types::{EvaluationJob, JobMetadata, Language, TestCase};
use arbiter_engine::config::{EngineSettings, LanguageConfigManager};
use arbiter_engine::Engine;
use std::fs;
use std::path::Path;
use uuid::Uuid;

fn load_languages() -> Result<LanguageConfigManager> {
    LanguageConfigManager::load_default().context("Failed to load language configurations")
}

fn connect_engine() -> Result<Engine> {
    let engine = Engine::connect(load_languages()?, EngineSettings::from_env())
        .context("Failed to connect to Docker")?;
    Ok(engine)
}

async fn connect_redis() -> Result<::redis::aio::ConnectionManager> {
    let queue = QueueConfig::from_env();
    let client = ::redis::Client::open(queue.redis_url.as_str())
        .with_context(|| format!("Invalid REDIS_URL '{}'", queue.redis_url))?;
    ::redis::aio::ConnectionManager::new(client)
        .await
        .with_context(|| format!("Failed to connect to Redis at {}", queue.redis_url))
}

fn read_file(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

fn parse_language(name: &str) -> Result<Language> {
    name.parse::<Language>()
        .map_err(|e| anyhow::anyhow!("{} (supported: python, cpp)", e))
}

/// Named languages, or every configured one when none are named
fn resolve_languages(names: &[String], configured: &LanguageConfigManager) -> Result<Vec<Language>> {
    if names.is_empty() {
        return Ok(configured.languages());
    }
    names.iter().map(|n| parse_language(n)).collect()
}

/// A test file is a JSON array of test cases. `index` may be omitted and
/// then follows file order, starting at 1.
pub fn parse_test_cases(content: &str) -> Result<Vec<TestCase>> {
    let raw: Vec<serde_json::Value> =
        serde_json::from_str(content).context("Test file must be a JSON array")?;

    raw.into_iter()
        .enumerate()
        .map(|(position, mut value)| {
            if let Some(object) = value.as_object_mut() {
                object
                    .entry("index")
                    .or_insert_with(|| serde_json::json!(position + 1));
            }
            serde_json::from_value(value)
                .with_context(|| format!("Invalid test case at position {}", position + 1))
        })
        .collect()
}

fn load_test_cases(path: &Path) -> Result<Vec<TestCase>> {
    let cases = parse_test_cases(&read_file(path)?)?;
    if cases.is_empty() {
        bail!("{} contains no test cases", path.display());
    }
    Ok(cases)
}

/// Verify the runtime and cache images, pulling any that are missing
pub async fn warm_up(names: &[String]) -> Result<()> {
    let engine = connect_engine()?;
    let languages = resolve_languages(names, &load_languages()?)?;

    println!("🔥 Warming up: {:?}", languages);
    engine.warm_up(&languages).await?;
    println!("✅ Sandbox runtime reachable, {} image(s) ready", languages.len());
    Ok(())
}

pub fn list_languages() -> Result<()> {
    let configured = load_languages()?;

    println!("📋 Configured Languages:\n");
    println!(
        "{:<8} {:<8} {:<20} {:<10} {:<6} {:<8} {:<10}",
        "NAME", "VERSION", "IMAGE", "MEMORY", "CPU", "PIDS", "TIMEOUT"
    );
    println!("{}", "─".repeat(76));

    for language in configured.languages() {
        if let Some(config) = configured.get_config(&language) {
            println!(
                "{:<8} {:<8} {:<20} {:<10} {:<6.1} {:<8} {:<10}",
                language.as_str(),
                config.version,
                config.image,
                format!("{} MB", config.memory_limit_mb),
                config.cpu_limit,
                config.pids_limit,
                format!("{} ms", config.default_timeout_ms)
            );
        }
    }

    println!("\n✅ Total: {} language(s)", configured.languages().len());
    Ok(())
}

/// Ad-hoc execution, no comparison
pub async fn run(
    language: &str,
    file: &Path,
    stdin_file: Option<&Path>,
    timeout_ms: Option<u64>,
) -> Result<()> {
    let parsed = parse_language(language)?;
    let source = read_file(file)?;
    let stdin = match stdin_file {
        Some(path) => read_file(path)?,
        None => String::new(),
    };

    let engine = connect_engine()?;
    engine.warm_up(&[parsed]).await?;

    let result = engine.execute(&source, language, &stdin, timeout_ms).await?;

    if let Some(diagnostics) = &result.compile_output {
        eprintln!("{}", diagnostics);
    }
    print!("{}", result.stdout);
    eprint!("{}", result.stderr);

    eprintln!();
    if result.compile_failed {
        eprintln!("❌ Compilation failed");
    } else if result.timed_out {
        eprintln!("⏱️  Timed out after {} ms", result.wall_time_ms);
    } else if let Some(reason) = &result.sandbox_failure {
        eprintln!("⚠️  Sandbox failure: {}", reason);
    } else {
        eprintln!(
            "✅ Exit code {:?} in {} ms, {} MB peak",
            result.exit_code, result.wall_time_ms, result.memory_mb
        );
    }
    Ok(())
}

/// Full evaluation; prints the summary as JSON
pub async fn evaluate(
    language: &str,
    file: &Path,
    tests: &Path,
    timeout_ms: Option<u64>,
) -> Result<()> {
    let parsed = parse_language(language)?;
    let source = read_file(file)?;
    let cases = load_test_cases(tests)?;

    let engine = connect_engine()?;
    engine.warm_up(&[parsed]).await?;

    let summary = engine.evaluate(&source, language, &cases, timeout_ms).await?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

/// Enqueue an evaluation for a worker
pub async fn submit(
    language: &str,
    file: &Path,
    tests: &Path,
    timeout_ms: Option<u64>,
    submitter: Option<String>,
) -> Result<()> {
    let parsed = parse_language(language)?;
    let job = EvaluationJob {
        id: Uuid::new_v4(),
        language: parsed.to_string(),
        source_code: read_file(file)?,
        test_cases: load_test_cases(tests)?,
        timeout_ms,
        metadata: JobMetadata {
            submitter,
            submitted_at: Some(chrono::Utc::now()),
            ..Default::default()
        },
    };

    let mut conn = connect_redis().await?;
    redis::push_job(&mut conn, &parsed, &job).await?;

    println!("📨 Queued job {} on {}", job.id, redis::queue_name(&parsed));
    Ok(())
}

pub async fn status(job_id: &str) -> Result<()> {
    let job_id = Uuid::parse_str(job_id).context("Invalid job ID format")?;
    let mut conn = connect_redis().await?;

    match redis::get_outcome(&mut conn, &job_id).await? {
        Some(outcome) => println!("{}", serde_json::to_string_pretty(&outcome)?),
        None => println!("⏳ No outcome yet for {}", job_id),
    }
    Ok(())
}

pub async fn cancel(job_id: &str) -> Result<()> {
    let job_id = Uuid::parse_str(job_id).context("Invalid job ID format")?;
    let mut conn = connect_redis().await?;

    redis::request_cancel(&mut conn, &job_id).await?;
    println!("🛑 Cancellation requested for {}", job_id);
    Ok(())
}
