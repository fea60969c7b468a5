//! In-memory sandbox backend for unit tests.
//!
//! Staging (`mkdir`, `tee`) and compilation (`g++`) are simulated; staged
//! files live in a map keyed by sandbox id. Everything else is a "program"
//! whose behavior comes either from a test-supplied script or from a tiny
//! interpreter keyed on markers in the staged source:
//!
//! - `while True` / `hang`: never exits (`partial-then-hang` prints first)
//! - `crash`: ZeroDivisionError on stderr, exit 1
//! - `oom`: exit 137
//! - `echo`: stdin back on stdout
//! - `sum`: sum of the integers on stdin
//! - `print(x)`: prints `x`
//!
//! The fake compiler rejects `return 0 }` and `syntax error`. Stalls in
//! staging, memory queries and teardown can be switched on per test.

use crate::error::SandboxError;
use crate::sandbox::{ExecCommand, OutputSink, SandboxBackend, SandboxSpec};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

const DEFAULT_IMAGES: [&str; 2] = ["python:3.12-slim", "gcc:13"];
const DEFAULT_PEAK_MEMORY: u64 = 12 * 1024 * 1024;

/// A program launch as the fake sees it
#[derive(Debug, Clone)]
pub struct FakeProgram {
    pub argv: Vec<String>,
    pub stdin: String,
    /// Staged source (or compiled "binary") the argv points at
    pub source: String,
}

#[derive(Debug, Clone)]
pub enum FakeExec {
    Exit {
        stdout: String,
        stderr: String,
        code: i64,
    },
    /// Print, then never exit
    Hang { partial_stdout: String },
    LaunchError,
}

impl FakeExec {
    pub fn ok(stdout: impl Into<String>) -> Self {
        FakeExec::Exit {
            stdout: stdout.into(),
            stderr: String::new(),
            code: 0,
        }
    }

    pub fn exit(code: i64, stderr: impl Into<String>) -> Self {
        FakeExec::Exit {
            stdout: String::new(),
            stderr: stderr.into(),
            code,
        }
    }
}

type Script = Arc<dyn Fn(&FakeProgram) -> FakeExec + Send + Sync>;

struct FakeState {
    runtime_up: bool,
    pull_fails: bool,
    staging_fails: bool,
    staging_hangs: bool,
    memory_query_hangs: bool,
    destroy_delay: Option<Duration>,
    images: HashSet<String>,
    pings: usize,
    pulls: usize,
    created: usize,
    next_id: usize,
    live: HashSet<String>,
    max_live: usize,
    destroyed: HashSet<String>,
    files: HashMap<(String, String), String>,
    program_runs: usize,
    peak_memory: Option<u64>,
}

pub struct FakeSandbox {
    state: Mutex<FakeState>,
    script: Mutex<Option<Script>>,
}

enum Step {
    Done(FakeExec),
    Run(FakeProgram),
}

impl FakeSandbox {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeState {
                runtime_up: true,
                pull_fails: false,
                staging_fails: false,
                staging_hangs: false,
                memory_query_hangs: false,
                destroy_delay: None,
                images: DEFAULT_IMAGES.iter().map(|i| i.to_string()).collect(),
                pings: 0,
                pulls: 0,
                created: 0,
                next_id: 0,
                live: HashSet::new(),
                max_live: 0,
                destroyed: HashSet::new(),
                files: HashMap::new(),
                program_runs: 0,
                peak_memory: Some(DEFAULT_PEAK_MEMORY),
            }),
            script: Mutex::new(None),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    pub fn spec(&self, image: &str) -> SandboxSpec {
        SandboxSpec {
            name: "arbiter-test".to_string(),
            image: image.to_string(),
            memory_limit_mb: 512,
            cpu_limit: 1.0,
            pids_limit: 64,
            scratch_size_mb: 64,
            user: "65534:65534".to_string(),
            lifetime_secs: 60,
        }
    }

    /// Replace the built-in interpreter for program launches
    pub fn script(&self, f: impl Fn(&FakeProgram) -> FakeExec + Send + Sync + 'static) {
        *self.script.lock().unwrap() = Some(Arc::new(f));
    }

    pub fn set_runtime_up(&self, up: bool) {
        self.lock().runtime_up = up;
    }

    pub fn set_pull_fails(&self, fails: bool) {
        self.lock().pull_fails = fails;
    }

    pub fn set_staging_fails(&self, fails: bool) {
        self.lock().staging_fails = fails;
    }

    pub fn set_staging_hangs(&self, hangs: bool) {
        self.lock().staging_hangs = hangs;
    }

    pub fn set_memory_query_hangs(&self, hangs: bool) {
        self.lock().memory_query_hangs = hangs;
    }

    /// Make every destroy take `delay` before it removes anything
    pub fn set_destroy_delay(&self, delay: Option<Duration>) {
        self.lock().destroy_delay = delay;
    }

    pub fn set_peak_memory(&self, bytes: Option<u64>) {
        self.lock().peak_memory = bytes;
    }

    pub fn remove_image(&self, image: &str) {
        self.lock().images.remove(image);
    }

    pub fn pings(&self) -> usize {
        self.lock().pings
    }

    pub fn pulls(&self) -> usize {
        self.lock().pulls
    }

    pub fn created(&self) -> usize {
        self.lock().created
    }

    /// Distinct sandboxes torn down
    pub fn destroyed(&self) -> usize {
        self.lock().destroyed.len()
    }

    pub fn live(&self) -> usize {
        self.lock().live.len()
    }

    /// Most sandboxes alive at the same moment
    pub fn max_live(&self) -> usize {
        self.lock().max_live
    }

    pub fn program_runs(&self) -> usize {
        self.lock().program_runs
    }

    pub fn file(&self, id: &str, path: &str) -> Option<String> {
        self.lock()
            .files
            .get(&(id.to_string(), path.to_string()))
            .cloned()
    }

    fn unreachable() -> SandboxError {
        SandboxError::RuntimeUnreachable("connection refused".to_string())
    }
}

fn compile(state: &mut FakeState, id: &str, argv: &[String]) -> FakeExec {
    let source_path = argv.last().cloned().unwrap_or_default();
    let binary_path = argv
        .iter()
        .position(|a| a == "-o")
        .and_then(|i| argv.get(i + 1))
        .cloned()
        .unwrap_or_default();

    let Some(source) = state.files.get(&(id.to_string(), source_path.clone())).cloned() else {
        return FakeExec::exit(1, format!("g++: error: {}: No such file or directory", source_path));
    };

    if source.contains("return 0 }") || source.contains("syntax error") {
        return FakeExec::exit(
            1,
            format!("{}:1:24: error: expected ';' before '}}' token\n", source_path),
        );
    }

    state.files.insert((id.to_string(), binary_path), source);
    FakeExec::ok("")
}

fn interpret(program: &FakeProgram) -> FakeExec {
    let source = program.source.as_str();

    if source.contains("partial-then-hang") {
        return FakeExec::Hang {
            partial_stdout: "partial".to_string(),
        };
    }
    if source.contains("while True") || source.contains("hang") {
        return FakeExec::Hang {
            partial_stdout: String::new(),
        };
    }
    if source.contains("crash") {
        return FakeExec::exit(
            1,
            "Traceback (most recent call last):\nZeroDivisionError: division by zero\n",
        );
    }
    if source.contains("oom") {
        return FakeExec::exit(137, "");
    }
    if source.contains("echo") {
        return FakeExec::ok(program.stdin.clone());
    }
    if source.contains("sum") {
        let total: i64 = program
            .stdin
            .split_whitespace()
            .filter_map(|t| t.parse::<i64>().ok())
            .sum();
        return FakeExec::ok(format!("{}\n", total));
    }
    if let Some(inner) = source
        .trim()
        .strip_prefix("print(")
        .and_then(|s| s.strip_suffix(')'))
    {
        return FakeExec::ok(format!("{}\n", inner));
    }
    FakeExec::ok("")
}

#[async_trait]
impl SandboxBackend for FakeSandbox {
    async fn ping(&self) -> Result<(), SandboxError> {
        let mut state = self.lock();
        state.pings += 1;
        if state.runtime_up {
            Ok(())
        } else {
            Err(Self::unreachable())
        }
    }

    async fn image_exists(&self, image: &str) -> Result<bool, SandboxError> {
        let state = self.lock();
        if !state.runtime_up {
            return Err(Self::unreachable());
        }
        Ok(state.images.contains(image))
    }

    async fn pull_image(&self, image: &str) -> Result<(), SandboxError> {
        let mut state = self.lock();
        state.pulls += 1;
        if state.pull_fails {
            return Err(SandboxError::ImageMissing(format!(
                "pull access denied for {}",
                image
            )));
        }
        state.images.insert(image.to_string());
        Ok(())
    }

    async fn create(&self, spec: &SandboxSpec) -> Result<String, SandboxError> {
        let mut state = self.lock();
        if !state.runtime_up {
            return Err(Self::unreachable());
        }
        if !state.images.contains(&spec.image) {
            return Err(SandboxError::ImageMissing(spec.image.clone()));
        }
        state.created += 1;
        state.next_id += 1;
        let id = format!("fake-{}", state.next_id);
        state.live.insert(id.clone());
        state.max_live = state.max_live.max(state.live.len());
        Ok(id)
    }

    async fn exec(
        &self,
        id: &str,
        command: ExecCommand<'_>,
        sink: &mut OutputSink,
    ) -> Result<Option<i64>, SandboxError> {
        let stdin = String::from_utf8_lossy(command.stdin).into_owned();
        let argv = command.argv.to_vec();

        let step = {
            let mut state = self.lock();
            if !state.runtime_up {
                return Err(Self::unreachable());
            }
            if !state.live.contains(id) {
                return Err(SandboxError::Gone(id.to_string()));
            }

            match argv.first().map(String::as_str) {
                Some("mkdir") if state.staging_hangs => Step::Done(FakeExec::Hang {
                    partial_stdout: String::new(),
                }),
                Some("mkdir") if state.staging_fails => Step::Done(FakeExec::exit(
                    1,
                    "mkdir: cannot create directory: Read-only file system",
                )),
                Some("mkdir") => Step::Done(FakeExec::ok("")),
                Some("tee") => {
                    let path = argv.get(1).cloned().unwrap_or_default();
                    state.files.insert((id.to_string(), path), stdin.clone());
                    Step::Done(FakeExec::ok(stdin.clone()))
                }
                Some("g++") => Step::Done(compile(&mut state, id, &argv)),
                _ => {
                    state.program_runs += 1;
                    let source = argv
                        .iter()
                        .rev()
                        .find_map(|arg| state.files.get(&(id.to_string(), arg.clone())))
                        .cloned()
                        .unwrap_or_default();
                    Step::Run(FakeProgram {
                        argv: argv.clone(),
                        stdin,
                        source,
                    })
                }
            }
        };

        let outcome = match step {
            Step::Done(outcome) => outcome,
            Step::Run(program) => {
                let script = self.script.lock().unwrap().clone();
                match script {
                    Some(f) => f(&program),
                    None => interpret(&program),
                }
            }
        };

        // Let concurrent executions interleave
        tokio::task::yield_now().await;

        match outcome {
            FakeExec::Exit {
                stdout,
                stderr,
                code,
            } => {
                sink.push_stdout(stdout.as_bytes());
                sink.push_stderr(stderr.as_bytes());
                Ok(Some(code))
            }
            FakeExec::Hang { partial_stdout } => {
                sink.push_stdout(partial_stdout.as_bytes());
                std::future::pending::<Result<Option<i64>, SandboxError>>().await
            }
            FakeExec::LaunchError => Err(SandboxError::Launch(
                "cannot exec in a stopped container".to_string(),
            )),
        }
    }

    async fn peak_memory_bytes(&self, id: &str) -> Option<u64> {
        let (hangs, peak) = {
            let state = self.lock();
            let peak = if state.live.contains(id) {
                state.peak_memory
            } else {
                None
            };
            (state.memory_query_hangs, peak)
        };
        if hangs {
            std::future::pending::<()>().await;
        }
        peak
    }

    async fn destroy(&self, id: &str) -> Result<(), SandboxError> {
        let delay = self.lock().destroy_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.lock();
        state.live.remove(id);
        state.files.retain(|(owner, _), _| owner != id);
        state.destroyed.insert(id.to_string());
        Ok(())
    }
}
