// Queue connection settings shared by the worker and the CLI

pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";
pub const DEFAULT_RESULT_TTL_SECONDS: u64 = 86400;

#[derive(Debug, Clone, PartialEq)]
pub struct QueueConfig {
    pub redis_url: String,
    pub result_ttl_seconds: u64,
}

impl QueueConfig {
    pub fn from_env() -> Self {
        let redis_url = std::env::var("REDIS_URL")
            .unwrap_or_else(|_| DEFAULT_REDIS_URL.to_string());
        let result_ttl_seconds = std::env::var("RESULT_TTL_SECONDS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_RESULT_TTL_SECONDS);

        Self {
            redis_url,
            result_ttl_seconds,
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            redis_url: DEFAULT_REDIS_URL.to_string(),
            result_ttl_seconds: DEFAULT_RESULT_TTL_SECONDS,
        }
    }
}
