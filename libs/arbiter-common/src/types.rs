use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Sentinel that replaces hidden test data in externally visible verdicts
pub const REDACTED: &str = "Hidden";

/// Supported submission languages
///
/// Identifiers are matched case-insensitively, so `Python`, `PY` and
/// `python3` all resolve to [`Language::Python`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Language {
    Python,
    Cpp,
}

impl Language {
    pub const ALL: [Language; 2] = [Language::Python, Language::Cpp];

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::Cpp => "cpp",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownLanguage(pub String);

impl fmt::Display for UnknownLanguage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unsupported language: {}", self.0)
    }
}

impl std::error::Error for UnknownLanguage {}

impl FromStr for Language {
    type Err = UnknownLanguage;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "python" | "python3" | "py" => Ok(Language::Python),
            "cpp" | "c++" | "cxx" | "cc" => Ok(Language::Cpp),
            _ => Err(UnknownLanguage(s.to_string())),
        }
    }
}

impl TryFrom<String> for Language {
    type Error = UnknownLanguage;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Language> for String {
    fn from(language: Language) -> Self {
        language.as_str().to_string()
    }
}

/// One program run: source, language and the stdin fed to it.
/// Immutable and single-use.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub source_code: String,
    pub language: Language,
    pub stdin: String,
}

impl ExecutionRequest {
    pub fn new(source_code: impl Into<String>, language: Language, stdin: impl Into<String>) -> Self {
        Self {
            source_code: source_code.into(),
            language,
            stdin: stdin.into(),
        }
    }

    /// Same submission, different stdin
    pub fn with_stdin(&self, stdin: impl Into<String>) -> Self {
        Self {
            source_code: self.source_code.clone(),
            language: self.language,
            stdin: stdin.into(),
        }
    }
}

/// Raw outcome of one supervised run
///
/// Code-caused failures (compile error, crash, timeout) are data here, never errors.
/// `compile_output` holds compiler diagnostics, kept apart from the program's own stderr.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub stdout: String,
    pub stderr: String,
    pub compile_output: Option<String>,
    pub exit_code: Option<i64>,
    pub wall_time_ms: u64,
    pub memory_mb: u64,
    pub timed_out: bool,
    pub compile_failed: bool,
    pub sandbox_failure: Option<String>,
}

impl ExecutionResult {
    /// Result for a run the sandbox could not launch; carries no partial output
    pub fn from_sandbox_failure(reason: impl Into<String>) -> Self {
        Self {
            sandbox_failure: Some(reason.into()),
            ..Default::default()
        }
    }

    pub fn from_compile_failure(diagnostics: impl Into<String>, wall_time_ms: u64) -> Self {
        Self {
            compile_output: Some(diagnostics.into()),
            compile_failed: true,
            wall_time_ms,
            ..Default::default()
        }
    }

    /// Program ran to completion but exited non-zero
    pub fn runtime_error(&self) -> bool {
        !self.timed_out
            && !self.compile_failed
            && self.sandbox_failure.is_none()
            && self.exit_code.is_some_and(|code| code != 0)
    }
}

/// A test case owned by the caller's test bank
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    /// 1-based, stable position in the suite
    pub index: u32,
    pub input: String,
    pub expected_output: String,
    #[serde(default)]
    pub hidden: bool,
}

/// Outcome of a single test case
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseStatus {
    Passed,
    WrongAnswer,
    RuntimeError,
    Timeout,
    CompileError,
    SandboxFailure,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCaseVerdict {
    pub index: u32,
    pub status: CaseStatus,
    pub passed: bool,
    pub input: String,
    pub expected_output: String,
    pub actual_output: String,
    pub stderr: String,
    pub execution_time_ms: u64,
    pub memory_used_mb: u64,
    pub hidden: bool,
}

impl TestCaseVerdict {
    /// Replace test data with [`REDACTED`] if the owning case is hidden.
    ///
    /// Compiler diagnostics are derived from the source alone and stay visible.
    pub fn redacted(mut self) -> Self {
        if !self.hidden {
            return self;
        }
        self.input = REDACTED.to_string();
        self.expected_output = REDACTED.to_string();
        self.actual_output = REDACTED.to_string();
        if self.status != CaseStatus::CompileError {
            self.stderr = REDACTED.to_string();
        }
        self
    }
}

/// Aggregate status of an evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationStatus {
    Accepted,
    WrongAnswer,
    CompileError,
    RuntimeError,
    Timeout,
    SandboxUnavailable,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationSummary {
    pub total_cases: usize,
    pub passed_cases: usize,
    pub status: EvaluationStatus,
    pub verdicts: Vec<TestCaseVerdict>,
    pub compile_output: Option<String>,
    pub total_time_ms: u64,
    pub peak_memory_mb: u64,
}

/// Submission context recorded alongside a queued evaluation
///
/// Attempt limits are enforced by the recorder, never by the engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobMetadata {
    pub submitter: Option<String>,
    pub test_id: Option<String>,
    pub assessment_id: Option<String>,
    #[serde(default)]
    pub attempt: u32,
    pub submitted_at: Option<DateTime<Utc>>,
}

/// Queue envelope for one `evaluate` call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationJob {
    pub id: Uuid,
    pub language: String,
    pub source_code: String,
    pub test_cases: Vec<TestCase>,
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub metadata: JobMetadata,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    Completed,
    Cancelled,
    Failed,
}

/// What the worker hands back to the caller for a queued job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobOutcome {
    pub job_id: Uuid,
    pub state: JobState,
    pub summary: Option<EvaluationSummary>,
    pub error: Option<String>,
    pub metadata: JobMetadata,
    pub completed_at: DateTime<Utc>,
}
