/// Execution Supervisor
///
/// Drives one sandbox end-to-end: optional compile, run with stdin, capture,
/// timeout, metrics, teardown. It consumes the handle and releases it on
/// every return path.
///
/// **Outcome classification:**
/// - Compile step failed or timed out → `compile_failed`, run never attempted
/// - Deadline hit → `timed_out`, partial output kept, sandbox torn down
/// - Non-zero exit → reported through `exit_code` (runtime error)
/// - Launch failure after acquisition → `sandbox_failure`, no output
///
/// Memory is the sandbox-wide peak. For compiled languages the compiler runs
/// in the same sandbox, so the figure is the larger of the compiler's and the
/// program's peaks.
use crate::language::{LanguageRunner, Workspace};
use crate::materializer::StagedSource;
use crate::sandbox::{ExecCommand, OutputSink, SandboxHandle};
use arbiter_common::types::ExecutionResult;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Cap on each captured stream
pub const DEFAULT_OUTPUT_LIMIT: usize = 8 * 1024 * 1024;

const BYTES_PER_MB: u64 = 1024 * 1024;

/// A stuck metrics query must not hold the sandbox open
const MEMORY_QUERY_TIMEOUT: Duration = Duration::from_secs(5);

enum CompileOutcome {
    /// Compiled; carries warnings if the compiler printed any
    Succeeded(Option<String>),
    Failed(ExecutionResult),
}

#[derive(Debug, Clone)]
pub struct Supervisor {
    output_limit: usize,
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new(DEFAULT_OUTPUT_LIMIT)
    }
}

impl Supervisor {
    pub fn new(output_limit: usize) -> Self {
        Self { output_limit }
    }

    /// Run one staged submission and release its sandbox
    #[tracing::instrument(
        skip_all,
        fields(sandbox = %handle.name(), language = %runner.language(), timeout_ms = timeout_ms)
    )]
    pub async fn run(
        &self,
        handle: SandboxHandle,
        runner: &dyn LanguageRunner,
        staged: &StagedSource,
        stdin: &str,
        timeout_ms: u64,
        compile_timeout_ms: u64,
    ) -> ExecutionResult {
        let mut result = self
            .drive(&handle, runner, &staged.workspace, stdin, timeout_ms, compile_timeout_ms)
            .await;

        if result.sandbox_failure.is_none() {
            // Best effort: 0 when the sandbox reports nothing in time
            result.memory_mb = tokio::time::timeout(MEMORY_QUERY_TIMEOUT, handle.peak_memory_bytes())
                .await
                .ok()
                .flatten()
                .map(|bytes| bytes.div_ceil(BYTES_PER_MB))
                .unwrap_or(0);
        }

        handle.release().await;
        result
    }

    async fn drive(
        &self,
        handle: &SandboxHandle,
        runner: &dyn LanguageRunner,
        workspace: &Workspace,
        stdin: &str,
        timeout_ms: u64,
        compile_timeout_ms: u64,
    ) -> ExecutionResult {
        let mut compile_output = None;
        if let Some(argv) = runner.compile_command(workspace) {
            match self
                .compile(handle, runner, &argv, workspace, compile_timeout_ms)
                .await
            {
                CompileOutcome::Succeeded(warnings) => compile_output = warnings,
                CompileOutcome::Failed(result) => return result,
            }
        }

        let argv = runner.run_command(workspace);
        let mut sink = OutputSink::new(self.output_limit);
        let command = ExecCommand {
            argv: &argv,
            working_dir: Some(&workspace.workdir),
            stdin: stdin.as_bytes(),
        };

        let start = Instant::now();
        let outcome =
            tokio::time::timeout(Duration::from_millis(timeout_ms), handle.exec(command, &mut sink))
                .await;
        let wall_time_ms = start.elapsed().as_millis() as u64;

        let mut result = ExecutionResult {
            compile_output,
            wall_time_ms,
            ..Default::default()
        };

        match outcome {
            Ok(Ok(exit_code)) => {
                let mut stderr = sink.stderr();
                match exit_code {
                    Some(137) => stderr.push_str("\n[Process killed: likely exceeded memory limit]"),
                    Some(139) => stderr.push_str("\n[Process killed: segmentation fault]"),
                    _ => {}
                }
                if sink.truncated() {
                    stderr.push_str("\n[Output truncated]");
                }

                info!(
                    exit_code = ?exit_code,
                    wall_time_ms = wall_time_ms,
                    stdout_bytes = sink.stdout().len(),
                    "Process exited"
                );

                result.stdout = sink.stdout();
                result.stderr = stderr;
                result.exit_code = exit_code;
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Failed to launch process in sandbox");
                return ExecutionResult::from_sandbox_failure(e.to_string());
            }
            Err(_) => {
                warn!(
                    wall_time_ms = wall_time_ms,
                    timeout_ms = timeout_ms,
                    "Execution timed out, tearing down sandbox"
                );

                let mut stderr = sink.stderr();
                stderr.push_str(&format!("\n[Execution timed out after {}ms]", timeout_ms));
                result.stdout = sink.stdout();
                result.stderr = stderr;
                // The process is still alive; `run` kills it with the container
                result.timed_out = true;
            }
        }

        result
    }

    async fn compile(
        &self,
        handle: &SandboxHandle,
        runner: &dyn LanguageRunner,
        argv: &[String],
        workspace: &Workspace,
        compile_timeout_ms: u64,
    ) -> CompileOutcome {
        let mut sink = OutputSink::new(self.output_limit);
        let command = ExecCommand {
            argv,
            working_dir: Some(&workspace.workdir),
            stdin: b"",
        };

        let start = Instant::now();
        let outcome = tokio::time::timeout(
            Duration::from_millis(compile_timeout_ms),
            handle.exec(command, &mut sink),
        )
        .await;
        let compile_time_ms = start.elapsed().as_millis() as u64;

        match outcome {
            Ok(Ok(exit_code)) => {
                let mut diagnostics = sink.stderr();
                diagnostics.push_str(&sink.stdout());

                if runner.compilation_failed(exit_code, &diagnostics) {
                    info!(
                        compile_time_ms = compile_time_ms,
                        exit_code = ?exit_code,
                        error_preview = diagnostics.lines().next().unwrap_or(""),
                        "Compile finished: failed"
                    );
                    CompileOutcome::Failed(ExecutionResult::from_compile_failure(
                        diagnostics,
                        compile_time_ms,
                    ))
                } else {
                    info!(compile_time_ms = compile_time_ms, "Compile finished: succeeded");
                    let warnings = Some(diagnostics).filter(|d| !d.trim().is_empty());
                    CompileOutcome::Succeeded(warnings)
                }
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Failed to launch compiler in sandbox");
                CompileOutcome::Failed(ExecutionResult::from_sandbox_failure(e.to_string()))
            }
            Err(_) => {
                debug!(compile_time_ms = compile_time_ms, "Compilation timed out");
                CompileOutcome::Failed(ExecutionResult::from_compile_failure(
                    format!("Compilation timed out after {}ms", compile_timeout_ms),
                    compile_time_ms,
                ))
            }
        }
    }
}
