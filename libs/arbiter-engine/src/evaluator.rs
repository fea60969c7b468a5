/// Evaluation Orchestrator
///
/// **Core Responsibility:**
/// Run one submission against an ordered list of test cases and turn the
/// raw execution results into verdicts and a summary.
///
/// **Flow:**
/// 1. First case runs alone. Compilation is per language, not per case, so a
///    compile failure here marks every case `CompileError` and nothing else
///    runs.
/// 2. Remaining cases run with up to `max_parallel_cases` in flight, each in
///    its own sandbox. Results come back in input order.
/// 3. A failing case (timeout, crash, wrong answer) never stops later cases.
/// 4. Aggregate, then redact hidden cases.
///
/// **Summary status, worst first:**
/// CompileError > SandboxUnavailable > RuntimeError > Timeout > WrongAnswer > Accepted
use crate::comparator::compare;
use crate::error::Result;
use crate::executor::Executor;
use arbiter_common::types::{
    CaseStatus, EvaluationStatus, EvaluationSummary, ExecutionRequest, ExecutionResult, TestCase,
    TestCaseVerdict,
};
use futures_util::future::{BoxFuture, FutureExt};
use futures_util::stream::{self, StreamExt, TryStreamExt};
use tracing::{debug, info};

/// Judge a single case from its raw execution result
pub fn judge_case(case: &TestCase, result: &ExecutionResult) -> TestCaseVerdict {
    let (status, stderr) = if result.compile_failed {
        (
            CaseStatus::CompileError,
            result.compile_output.clone().unwrap_or_default(),
        )
    } else if let Some(reason) = &result.sandbox_failure {
        (CaseStatus::SandboxFailure, reason.clone())
    } else if result.timed_out {
        (CaseStatus::Timeout, result.stderr.clone())
    } else if result.exit_code != Some(0) {
        (CaseStatus::RuntimeError, result.stderr.clone())
    } else if compare(&result.stdout, &case.expected_output) {
        (CaseStatus::Passed, result.stderr.clone())
    } else {
        (CaseStatus::WrongAnswer, result.stderr.clone())
    };

    TestCaseVerdict {
        index: case.index,
        status,
        passed: status == CaseStatus::Passed,
        input: case.input.clone(),
        expected_output: case.expected_output.clone(),
        actual_output: result.stdout.clone(),
        stderr,
        execution_time_ms: result.wall_time_ms,
        memory_used_mb: result.memory_mb,
        hidden: case.hidden,
    }
}

fn severity(status: CaseStatus) -> (u8, EvaluationStatus) {
    match status {
        CaseStatus::CompileError => (5, EvaluationStatus::CompileError),
        CaseStatus::SandboxFailure => (4, EvaluationStatus::SandboxUnavailable),
        CaseStatus::RuntimeError => (3, EvaluationStatus::RuntimeError),
        CaseStatus::Timeout => (2, EvaluationStatus::Timeout),
        CaseStatus::WrongAnswer => (1, EvaluationStatus::WrongAnswer),
        CaseStatus::Passed => (0, EvaluationStatus::Accepted),
    }
}

/// Fold verdicts into a summary and redact hidden cases
pub fn aggregate(verdicts: Vec<TestCaseVerdict>, compile_output: Option<String>) -> EvaluationSummary {
    let total_cases = verdicts.len();
    let passed_cases = verdicts.iter().filter(|v| v.passed).count();
    let total_time_ms = verdicts.iter().map(|v| v.execution_time_ms).sum();
    let peak_memory_mb = verdicts
        .iter()
        .map(|v| v.memory_used_mb)
        .max()
        .unwrap_or(0);

    let status = verdicts
        .iter()
        .map(|v| severity(v.status))
        .max_by_key(|(rank, _)| *rank)
        .map(|(_, status)| status)
        .unwrap_or(EvaluationStatus::Accepted);

    info!(
        total_cases = total_cases,
        passed_cases = passed_cases,
        status = ?status,
        total_time_ms = total_time_ms,
        "Evaluation aggregated"
    );

    EvaluationSummary {
        total_cases,
        passed_cases,
        status,
        verdicts: verdicts.into_iter().map(TestCaseVerdict::redacted).collect(),
        compile_output,
        total_time_ms,
        peak_memory_mb,
    }
}

/// Reject oversized source or case input before anything is provisioned
fn check_inputs(request: &ExecutionRequest, cases: &[TestCase]) -> Result<()> {
    Executor::check_limits(&request.source_code, "")?;
    cases
        .iter()
        .try_for_each(|case| Executor::check_limits("", &case.input))
}

fn run_case<'a>(
    executor: &'a Executor,
    request: &'a ExecutionRequest,
    case: &'a TestCase,
    timeout_ms: Option<u64>,
) -> BoxFuture<'a, Result<TestCaseVerdict>> {
    async move {
        let result = executor
            .run(&request.with_stdin(case.input.clone()), timeout_ms)
            .await?;
        let verdict = judge_case(case, &result);
        debug!(index = case.index, status = ?verdict.status, "Test case judged");
        Ok(verdict)
    }
    .boxed()
}

/// Evaluate `request`'s source against `cases`
///
/// `request.stdin` is ignored; each case supplies its own input.
pub async fn evaluate(
    executor: &Executor,
    request: &ExecutionRequest,
    cases: &[TestCase],
    timeout_ms: Option<u64>,
    max_parallel_cases: usize,
) -> Result<EvaluationSummary> {
    let Some((first_case, rest)) = cases.split_first() else {
        return Ok(aggregate(Vec::new(), None));
    };

    check_inputs(request, cases)?;

    info!(
        language = %request.language,
        test_cases = cases.len(),
        max_parallel_cases = max_parallel_cases,
        "Evaluating submission"
    );

    let first = executor
        .run(&request.with_stdin(first_case.input.clone()), timeout_ms)
        .await?;
    let compile_output = first.compile_output.clone();

    if first.compile_failed {
        info!(
            skipped_cases = rest.len(),
            "Compilation failed, skipping remaining test cases"
        );
        let skipped = ExecutionResult::from_compile_failure(
            compile_output.clone().unwrap_or_default(),
            0,
        );
        let verdicts = std::iter::once(judge_case(first_case, &first))
            .chain(rest.iter().map(|case| judge_case(case, &skipped)))
            .collect();
        return Ok(aggregate(verdicts, compile_output));
    }

    let mut verdicts = Vec::with_capacity(cases.len());
    verdicts.push(judge_case(first_case, &first));

    let pending: Vec<_> = rest
        .iter()
        .map(|case| run_case(executor, request, case, timeout_ms))
        .collect();
    let remaining: Vec<TestCaseVerdict> = stream::iter(pending)
        .buffered(max_parallel_cases.max(1))
        .try_collect()
        .await?;
    verdicts.extend(remaining);

    Ok(aggregate(verdicts, compile_output))
}
