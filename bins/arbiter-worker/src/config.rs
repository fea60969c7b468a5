// Worker settings read from the environment
use anyhow::{Context, Result};
use arbiter_common::config::QueueConfig;
use arbiter_common::types::Language;
use std::net::SocketAddr;

pub const DEFAULT_HEALTH_ADDR: &str = "0.0.0.0:8080";

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Queues this worker consumes, one per language
    pub languages: Vec<Language>,
    pub max_parallel_jobs: usize,
    pub health_addr: SocketAddr,
    pub queue: QueueConfig,
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self> {
        let languages = std::env::var("WORKER_LANGUAGES").ok();
        let max_parallel_jobs = std::env::var("WORKER_MAX_PARALLEL_JOBS").ok();
        let health_addr =
            std::env::var("HEALTH_ADDR").unwrap_or_else(|_| DEFAULT_HEALTH_ADDR.to_string());

        Ok(Self {
            languages: parse_languages(languages.as_deref())?,
            max_parallel_jobs: parse_parallelism(max_parallel_jobs.as_deref()),
            health_addr: health_addr
                .parse()
                .with_context(|| format!("Invalid HEALTH_ADDR '{}'", health_addr))?,
            queue: QueueConfig::from_env(),
        })
    }
}

/// Comma-separated identifiers; unset means every supported language
fn parse_languages(raw: Option<&str>) -> Result<Vec<Language>> {
    let Some(raw) = raw.filter(|r| !r.trim().is_empty()) else {
        return Ok(Language::ALL.to_vec());
    };

    let mut languages = Vec::new();
    for item in raw.split(',').filter(|s| !s.trim().is_empty()) {
        let language: Language = item
            .parse()
            .with_context(|| format!("Invalid WORKER_LANGUAGES entry '{}'", item.trim()))?;
        if !languages.contains(&language) {
            languages.push(language);
        }
    }
    Ok(languages)
}

fn parse_parallelism(raw: Option<&str>) -> usize {
    raw.and_then(|v| v.trim().parse().ok()).unwrap_or(1usize).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_languages_default_to_all() {
        assert_eq!(parse_languages(None).unwrap(), Language::ALL.to_vec());
        assert_eq!(parse_languages(Some("  ")).unwrap(), Language::ALL.to_vec());
    }

    #[test]
    fn test_languages_parse_aliases_and_dedupe() {
        let languages = parse_languages(Some("Python, c++,py")).unwrap();
        assert_eq!(languages, vec![Language::Python, Language::Cpp]);
    }

    #[test]
    fn test_unknown_language_is_rejected() {
        assert!(parse_languages(Some("python,cobol")).is_err());
    }

    #[test]
    fn test_parallelism_is_at_least_one() {
        assert_eq!(parse_parallelism(None), 1);
        assert_eq!(parse_parallelism(Some("0")), 1);
        assert_eq!(parse_parallelism(Some("8")), 8);
        assert_eq!(parse_parallelism(Some("lots")), 1);
    }
}
