/// Single-run pipeline: resolve language → acquire sandbox → stage source →
/// supervise. Shared by ad-hoc `execute` and every case of `evaluate`.
use crate::config::{LanguageConfig, LanguageConfigManager};
use crate::error::{EngineError, Result};
use crate::language::runner_for;
use crate::materializer::stage;
use crate::provisioner::Provisioner;
use crate::supervisor::Supervisor;
use arbiter_common::types::{ExecutionRequest, ExecutionResult, Language};
use std::sync::Arc;
use tracing::{error, instrument};

pub const MAX_SOURCE_BYTES: usize = 1024 * 1024;
pub const MAX_STDIN_BYTES: usize = 10 * 1024 * 1024;

pub struct Executor {
    languages: LanguageConfigManager,
    provisioner: Arc<Provisioner>,
    supervisor: Supervisor,
}

impl Executor {
    pub fn new(
        languages: LanguageConfigManager,
        provisioner: Arc<Provisioner>,
        supervisor: Supervisor,
    ) -> Self {
        Self {
            languages,
            provisioner,
            supervisor,
        }
    }

    pub fn languages(&self) -> &LanguageConfigManager {
        &self.languages
    }

    pub fn provisioner(&self) -> &Provisioner {
        &self.provisioner
    }

    /// Parse a caller-supplied identifier. Fails before any sandbox exists.
    pub fn resolve(&self, language: &str) -> Result<(Language, &LanguageConfig)> {
        let parsed: Language = language
            .parse()
            .map_err(|_| EngineError::UnsupportedLanguage(language.to_string()))?;
        let config = self
            .languages
            .get_config(&parsed)
            .ok_or_else(|| EngineError::UnsupportedLanguage(language.to_string()))?;
        Ok((parsed, config))
    }

    pub fn check_limits(source_code: &str, stdin: &str) -> Result<()> {
        if source_code.len() > MAX_SOURCE_BYTES {
            return Err(EngineError::InputTooLarge {
                what: "source code",
                limit: MAX_SOURCE_BYTES,
            });
        }
        if stdin.len() > MAX_STDIN_BYTES {
            return Err(EngineError::InputTooLarge {
                what: "stdin",
                limit: MAX_STDIN_BYTES,
            });
        }
        Ok(())
    }

    /// Run one request in a fresh sandbox, released before returning
    #[instrument(skip_all, fields(language = %request.language))]
    pub async fn run(
        &self,
        request: &ExecutionRequest,
        timeout_ms: Option<u64>,
    ) -> Result<ExecutionResult> {
        let config = self
            .languages
            .get_config(&request.language)
            .ok_or_else(|| EngineError::UnsupportedLanguage(request.language.to_string()))?;
        Self::check_limits(&request.source_code, &request.stdin)?;

        let timeout_ms = config.effective_timeout_ms(timeout_ms);
        let handle = self.provisioner.acquire(config, timeout_ms).await?;
        let runner = runner_for(request.language, config);

        let staged = match stage(&handle, runner.as_ref(), &request.source_code).await {
            Ok(staged) => staged,
            Err(e) => {
                error!(sandbox = %handle.name(), error = %e, "Staging failed");
                handle.release().await;
                return Err(e);
            }
        };

        Ok(self
            .supervisor
            .run(
                handle,
                runner.as_ref(),
                &staged,
                &request.stdin,
                timeout_ms,
                config.compile_timeout_ms,
            )
            .await)
    }
}
