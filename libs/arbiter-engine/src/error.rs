use thiserror::Error;

/// Hard failures of `execute` / `evaluate` / `warm_up`.
///
/// Everything caused by the submitted code itself (compile errors, crashes,
/// timeouts, wrong answers) is reported inside the returned result instead.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Isolation runtime is down or the language image is not cached locally.
    #[error("sandbox unavailable: {0}")]
    SandboxUnavailable(String),

    /// Caller asked for a language this engine has no runner for.
    #[error("unsupported language: {0}")]
    UnsupportedLanguage(String),

    /// Writing the submission into the sandbox failed.
    #[error("failed to stage submission: {0}")]
    InternalStaging(String),

    /// Warm-up could neither find nor pull the image for a language.
    #[error("image unavailable for {language}: {reason}")]
    ImageUnavailable { language: String, reason: String },

    /// Source or stdin exceeds the guardrail sizes.
    #[error("{what} exceeds maximum size of {limit} bytes")]
    InputTooLarge { what: &'static str, limit: usize },
}

/// Errors raised by a sandbox backend.
#[derive(Error, Debug)]
pub enum SandboxError {
    /// The isolation runtime could not be reached at all.
    #[error("isolation runtime unreachable: {0}")]
    RuntimeUnreachable(String),

    #[error("image not available locally: {0}")]
    ImageMissing(String),

    #[error("failed to create sandbox: {0}")]
    Create(String),

    #[error("failed to launch process in sandbox: {0}")]
    Launch(String),

    #[error("sandbox {0} is no longer available")]
    Gone(String),
}

impl SandboxError {
    /// True when the runtime itself looks down, which clears the readiness flag
    pub fn is_runtime_failure(&self) -> bool {
        matches!(self, SandboxError::RuntimeUnreachable(_))
    }
}

impl From<SandboxError> for EngineError {
    fn from(e: SandboxError) -> Self {
        EngineError::SandboxUnavailable(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
