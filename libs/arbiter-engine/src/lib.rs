//! Sandboxed execution and evaluation of untrusted submissions.
//!
//! [`Engine`] is the entry point: `warm_up` once at start-up, then `execute`
//! for ad-hoc runs and `evaluate` for full test-suite runs. Every run gets
//! its own resource-capped, network-less sandbox that is torn down before
//! the call returns.

pub mod comparator;
pub mod config;
pub mod error;
pub mod evaluator;
pub mod executor;
pub mod language;
pub mod materializer;
pub mod provisioner;
pub mod sandbox;
pub mod supervisor;

#[cfg(test)]
mod testing;

use arbiter_common::types::{
    EvaluationSummary, ExecutionRequest, ExecutionResult, Language, TestCase,
};
use config::{EngineSettings, LanguageConfigManager};
use error::{EngineError, Result};
use executor::Executor;
use provisioner::Provisioner;
use sandbox::{DockerSandbox, SandboxBackend};
use std::sync::Arc;
use supervisor::Supervisor;
use tracing::info;

pub use comparator::compare;

pub struct Engine {
    executor: Executor,
    settings: EngineSettings,
}

impl Engine {
    /// Engine backed by the local Docker daemon
    pub fn connect(languages: LanguageConfigManager, settings: EngineSettings) -> Result<Self> {
        let backend = DockerSandbox::connect()?;
        Ok(Self::with_backend(Arc::new(backend), languages, settings))
    }

    pub fn with_backend(
        backend: Arc<dyn SandboxBackend>,
        languages: LanguageConfigManager,
        settings: EngineSettings,
    ) -> Self {
        let provisioner = Arc::new(Provisioner::new(backend));
        Self {
            executor: Executor::new(languages, provisioner, Supervisor::default()),
            settings,
        }
    }

    /// Whether the isolation runtime was reachable at last contact
    pub fn is_ready(&self) -> bool {
        self.executor.provisioner().is_ready()
    }

    pub fn languages(&self) -> Vec<Language> {
        self.executor.languages().languages()
    }

    /// Probe the runtime and cache every image `languages` need
    pub async fn warm_up(&self, languages: &[Language]) -> Result<()> {
        let images = languages
            .iter()
            .map(|language| {
                self.executor
                    .languages()
                    .get_config(language)
                    .map(|config| (*language, config.image.clone()))
                    .ok_or_else(|| EngineError::UnsupportedLanguage(language.to_string()))
            })
            .collect::<Result<Vec<_>>>()?;

        self.executor.provisioner().warm_up(&images).await?;
        info!(languages = ?languages, "Engine warmed up");
        Ok(())
    }

    /// One ad-hoc run with no comparison
    pub async fn execute(
        &self,
        source_code: &str,
        language: &str,
        stdin: &str,
        timeout_ms: Option<u64>,
    ) -> Result<ExecutionResult> {
        let (language, _) = self.executor.resolve(language)?;
        let request = ExecutionRequest::new(source_code, language, stdin);
        self.executor.run(&request, timeout_ms).await
    }

    /// Run `source_code` against every test case
    pub async fn evaluate(
        &self,
        source_code: &str,
        language: &str,
        test_cases: &[TestCase],
        timeout_ms: Option<u64>,
    ) -> Result<EvaluationSummary> {
        let (language, _) = self.executor.resolve(language)?;
        let request = ExecutionRequest::new(source_code, language, "");
        evaluator::evaluate(
            &self.executor,
            &request,
            test_cases,
            timeout_ms,
            self.settings.max_parallel_cases,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeExec, FakeSandbox};
    use arbiter_common::types::{CaseStatus, EvaluationStatus, REDACTED};

    async fn engine(fake: &Arc<FakeSandbox>, max_parallel_cases: usize) -> Engine {
        let engine = Engine::with_backend(
            fake.clone(),
            LanguageConfigManager::builtin(),
            EngineSettings { max_parallel_cases },
        );
        engine.warm_up(&Language::ALL).await.unwrap();
        engine
    }

    fn case(index: u32, input: &str, expected: &str, hidden: bool) -> TestCase {
        TestCase {
            index,
            input: input.to_string(),
            expected_output: expected.to_string(),
            hidden,
        }
    }

    #[tokio::test]
    async fn test_python_prints_six_is_accepted() {
        let fake = Arc::new(FakeSandbox::new());
        let engine = engine(&fake, 1).await;

        let summary = engine
            .evaluate("print(6)", "python", &[case(1, "", "6\n", false)], None)
            .await
            .unwrap();

        assert_eq!(summary.status, EvaluationStatus::Accepted);
        assert_eq!(summary.passed_cases, 1);
        assert_eq!(fake.created(), fake.destroyed());
    }

    #[tokio::test]
    async fn test_cpp_syntax_error_is_compile_error() {
        let fake = Arc::new(FakeSandbox::new());
        let engine = engine(&fake, 1).await;
        let source = "#include <iostream>\nint main() { return 0 }";

        let summary = engine
            .evaluate(
                source,
                "cpp",
                &[case(1, "", "0", false), case(2, "", "0", true)],
                None,
            )
            .await
            .unwrap();

        assert_eq!(summary.status, EvaluationStatus::CompileError);
        assert_eq!(summary.passed_cases, 0);
        for verdict in &summary.verdicts {
            assert_eq!(verdict.status, CaseStatus::CompileError);
            assert!(verdict.stderr.contains("error:"));
        }
        assert_eq!(fake.program_runs(), 0);
    }

    #[tokio::test]
    async fn test_infinite_loop_times_out() {
        let fake = Arc::new(FakeSandbox::new());
        let engine = engine(&fake, 1).await;

        let result = engine
            .execute("while True: pass", "python", "", Some(2_000))
            .await
            .unwrap();
        assert!(result.timed_out);
        assert!(result.wall_time_ms >= 2_000 && result.wall_time_ms < 4_000);

        let summary = engine
            .evaluate("while True: pass", "python", &[case(1, "", "", false)], Some(2_000))
            .await
            .unwrap();
        assert_eq!(summary.status, EvaluationStatus::Timeout);
        assert_eq!(fake.live(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_evaluations_stay_independent() {
        let fake = Arc::new(FakeSandbox::new());
        let engine = engine(&fake, 2).await;

        let adder = "import sys\nprint(sum(map(int, sys.stdin.read().split())))";
        let echo = "import sys\nsys.stdout.write(sys.stdin.read())  # echo";
        let adder_cases = vec![case(1, "1 2", "3", false), case(2, "10 20", "30", false)];
        let echo_cases = vec![case(1, "hello", "hello", false), case(2, "world", "world", false)];

        let (a, b) = tokio::join!(
            engine.evaluate(adder, "python", &adder_cases, None),
            engine.evaluate(echo, "PYTHON", &echo_cases, None)
        );
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_eq!(a.status, EvaluationStatus::Accepted);
        assert_eq!(b.status, EvaluationStatus::Accepted);
        assert_eq!(a.verdicts[1].actual_output, "30\n");
        assert_eq!(b.verdicts[0].actual_output, "hello");
        assert_eq!(fake.created(), 4);
        assert_eq!(fake.destroyed(), 4);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_evaluations_can_be_spawned() {
        const ECHO: &str = "import sys\nsys.stdout.write(sys.stdin.read())  # echo";

        let fake = Arc::new(FakeSandbox::new());
        let engine = Arc::new(engine(&fake, 2).await);

        let tasks: Vec<_> = ["1 2", "3 4"]
            .into_iter()
            .map(|input| {
                let engine = Arc::clone(&engine);
                let cases = vec![case(1, input, input, false), case(2, "5", "5", false)];
                tokio::spawn(async move { engine.evaluate(ECHO, "python", &cases, None).await })
            })
            .collect();

        for task in tasks {
            let summary = task.await.unwrap().unwrap();
            assert_eq!(summary.status, EvaluationStatus::Accepted);
        }
        assert_eq!(fake.created(), 4);
        assert_eq!(fake.live(), 0);
    }

    #[tokio::test]
    async fn test_unsupported_language_never_acquires() {
        let fake = Arc::new(FakeSandbox::new());
        let engine = engine(&fake, 1).await;

        let err = engine.execute("puts 1", "ruby", "", None).await.unwrap_err();
        assert!(matches!(err, EngineError::UnsupportedLanguage(_)));
        assert_eq!(fake.created(), 0);
    }

    #[tokio::test]
    async fn test_release_matches_acquire_across_outcomes() {
        let fake = Arc::new(FakeSandbox::new());
        let engine = engine(&fake, 3).await;
        let sources = ["print(1)", "crash()", "oom", "int main() { return 0 }"];

        for source in sources {
            let _ = engine.execute(source, "python", "", Some(1_000)).await;
            let _ = engine.execute(source, "cpp", "", Some(1_000)).await;
        }
        fake.set_staging_fails(true);
        let _ = engine.execute("print(1)", "python", "", None).await;

        assert_eq!(fake.created(), fake.destroyed());
        assert_eq!(fake.live(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_evaluation_tears_down_sandboxes() {
        let fake = Arc::new(FakeSandbox::new());
        let engine = engine(&fake, 2).await;

        let cancelled = tokio::time::timeout(
            std::time::Duration::from_millis(200),
            engine.evaluate("while True: pass", "python", &[case(1, "", "", false)], Some(5_000)),
        )
        .await;
        assert!(cancelled.is_err());

        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(fake.created(), 1);
        assert_eq!(fake.live(), 0);
    }

    #[tokio::test]
    async fn test_hidden_cases_never_leak() {
        let fake = Arc::new(FakeSandbox::new());
        fake.script(|_| FakeExec::ok("the secret answer"));
        let engine = engine(&fake, 1).await;

        let summary = engine
            .evaluate(
                "print(input())",
                "python",
                &[
                    case(1, "the secret input", "the secret answer", true),
                    case(2, "the secret input", "something else", true),
                ],
                None,
            )
            .await
            .unwrap();

        for verdict in &summary.verdicts {
            assert_eq!(verdict.input, REDACTED);
            assert_eq!(verdict.expected_output, REDACTED);
            assert_eq!(verdict.actual_output, REDACTED);
        }
        assert!(summary.verdicts[0].passed);
        assert!(!summary.verdicts[1].passed);
    }

    #[tokio::test]
    async fn test_repeat_evaluation_is_stable() {
        let fake = Arc::new(FakeSandbox::new());
        let engine = engine(&fake, 2).await;
        let cases = vec![case(1, "1 1", "2", false), case(2, "2 2", "5", false)];
        let source = "import sys\nprint(sum(map(int, sys.stdin.read().split())))";

        let first = engine.evaluate(source, "python", &cases, None).await.unwrap();
        let second = engine.evaluate(source, "python", &cases, None).await.unwrap();

        assert_eq!(first.passed_cases, second.passed_cases);
        assert_eq!(first.status, second.status);
        assert_eq!(first.status, EvaluationStatus::WrongAnswer);
    }

    #[tokio::test]
    async fn test_warm_up_fails_when_runtime_down() {
        let fake = Arc::new(FakeSandbox::new());
        fake.set_runtime_up(false);
        let engine = Engine::with_backend(
            fake.clone(),
            LanguageConfigManager::builtin(),
            EngineSettings::default(),
        );

        assert!(engine.warm_up(&Language::ALL).await.is_err());
        assert!(!engine.is_ready());
    }
}
