/// Source Materializer
///
/// Every staging creates a fresh `/sandbox/<uuid>` directory, so two
/// executions never share an artifact even inside the same image. Source
/// bytes travel over the exec's stdin pipe into `tee`; nothing is written on
/// the host and nothing is interpolated into a command line.
use crate::error::{EngineError, Result};
use crate::language::{LanguageRunner, Workspace};
use crate::sandbox::{ExecCommand, OutputSink, SandboxHandle, SCRATCH_DIR};
use std::time::Duration;
use tracing::debug;

/// Staging output is only inspected for error messages
const STAGING_OUTPUT_LIMIT: usize = 4096;

/// Per staging step; these are tiny and never run user code
const STAGING_STEP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct StagedSource {
    pub id: uuid::Uuid,
    pub workspace: Workspace,
}

async fn run_step(handle: &SandboxHandle, argv: Vec<String>, stdin: &[u8]) -> Result<()> {
    let mut sink = OutputSink::new(STAGING_OUTPUT_LIMIT);
    let command = ExecCommand {
        argv: &argv,
        working_dir: Some(SCRATCH_DIR),
        stdin,
    };

    let exit_code = tokio::time::timeout(STAGING_STEP_TIMEOUT, handle.exec(command, &mut sink))
        .await
        .map_err(|_| {
            EngineError::InternalStaging(format!(
                "{} did not finish within {}ms",
                argv[0],
                STAGING_STEP_TIMEOUT.as_millis()
            ))
        })?
        .map_err(|e| EngineError::InternalStaging(e.to_string()))?;

    if exit_code != Some(0) {
        return Err(EngineError::InternalStaging(format!(
            "{} exited with {:?}: {}",
            argv[0],
            exit_code,
            sink.stderr().trim()
        )));
    }
    Ok(())
}

/// Write `source_code` into a new private directory in the sandbox
pub async fn stage(
    handle: &SandboxHandle,
    runner: &dyn LanguageRunner,
    source_code: &str,
) -> Result<StagedSource> {
    let id = uuid::Uuid::new_v4();
    let workspace = Workspace::new(format!("{}/{}", SCRATCH_DIR, id), runner.source_file());

    run_step(
        handle,
        vec![
            "mkdir".to_string(),
            "-m".to_string(),
            "700".to_string(),
            workspace.workdir.clone(),
        ],
        b"",
    )
    .await?;

    run_step(
        handle,
        vec!["tee".to_string(), workspace.source_path.clone()],
        source_code.as_bytes(),
    )
    .await?;

    debug!(
        sandbox = %handle.name(),
        workdir = %workspace.workdir,
        source_bytes = source_code.len(),
        "Source staged"
    );

    Ok(StagedSource { id, workspace })
}
