/// Sandbox backends and the scoped handle every execution runs through.
///
/// A backend knows how to create, exec into and destroy isolation units.
/// It knows nothing about languages, test cases or scoring. The Docker
/// backend is the production one; tests use an in-memory fake.
pub mod docker;

use crate::error::SandboxError;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub use docker::DockerSandbox;

/// Size-capped tmpfs inside every sandbox; the only writable path
pub const SCRATCH_DIR: &str = "/sandbox";

/// Upper bound on one teardown call against the runtime
pub const TEARDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Resource envelope for one sandbox
#[derive(Debug, Clone, PartialEq)]
pub struct SandboxSpec {
    /// Collision-free name, unique per acquisition
    pub name: String,
    pub image: String,
    pub memory_limit_mb: u32,
    pub cpu_limit: f32,
    pub pids_limit: i64,
    pub scratch_size_mb: u32,
    pub user: String,
    /// Upper bound on the sandbox's own life, in case teardown never arrives
    pub lifetime_secs: u64,
}

/// One process to launch inside a sandbox. Arguments are passed as-is,
/// never through a shell.
#[derive(Debug, Clone, Copy)]
pub struct ExecCommand<'a> {
    pub argv: &'a [String],
    pub working_dir: Option<&'a str>,
    pub stdin: &'a [u8],
}

/// Captured stdout/stderr, bounded so a chatty program cannot exhaust the worker
#[derive(Debug, Clone)]
pub struct OutputSink {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    limit: usize,
    truncated: bool,
}

impl OutputSink {
    pub fn new(limit: usize) -> Self {
        Self {
            stdout: Vec::new(),
            stderr: Vec::new(),
            limit,
            truncated: false,
        }
    }

    pub fn push_stdout(&mut self, bytes: &[u8]) {
        self.truncated |= append_bounded(&mut self.stdout, bytes, self.limit);
    }

    pub fn push_stderr(&mut self, bytes: &[u8]) {
        self.truncated |= append_bounded(&mut self.stderr, bytes, self.limit);
    }

    pub fn stdout(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }

    pub fn truncated(&self) -> bool {
        self.truncated
    }
}

fn append_bounded(buf: &mut Vec<u8>, bytes: &[u8], limit: usize) -> bool {
    let room = limit.saturating_sub(buf.len());
    if bytes.len() <= room {
        buf.extend_from_slice(bytes);
        false
    } else {
        buf.extend_from_slice(&bytes[..room]);
        true
    }
}

/// Isolation runtime operations
#[async_trait]
pub trait SandboxBackend: Send + Sync {
    /// Liveness probe for the runtime itself
    async fn ping(&self) -> Result<(), SandboxError>;

    /// Whether `image` is cached locally. Never pulls.
    async fn image_exists(&self, image: &str) -> Result<bool, SandboxError>;

    /// Fetch `image`; only called from warm-up
    async fn pull_image(&self, image: &str) -> Result<(), SandboxError>;

    /// Create and start a sandbox, returning its id
    async fn create(&self, spec: &SandboxSpec) -> Result<String, SandboxError>;

    /// Run a process to completion, streaming its output into `sink` as it
    /// arrives. If the returned future is dropped early, whatever reached
    /// `sink` stays there.
    async fn exec(
        &self,
        id: &str,
        command: ExecCommand<'_>,
        sink: &mut OutputSink,
    ) -> Result<Option<i64>, SandboxError>;

    /// Peak memory the sandbox reports, if it reports one
    async fn peak_memory_bytes(&self, id: &str) -> Option<u64>;

    /// Force-remove the sandbox and everything in it. Removing an already
    /// removed sandbox succeeds.
    async fn destroy(&self, id: &str) -> Result<(), SandboxError>;
}

/// Scoped ownership of one live sandbox
///
/// `release` is idempotent. A handle counts as released only once the
/// backend confirmed removal; dropping it before that (panic, the owning
/// future cancelled mid-release, a failed or stalled destroy) schedules
/// forced removal on the runtime.
pub struct SandboxHandle {
    backend: Arc<dyn SandboxBackend>,
    id: String,
    name: String,
    released: AtomicBool,
}

impl SandboxHandle {
    pub(crate) fn new(backend: Arc<dyn SandboxBackend>, id: String, name: String) -> Self {
        Self {
            backend,
            id,
            name,
            released: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    pub async fn exec(
        &self,
        command: ExecCommand<'_>,
        sink: &mut OutputSink,
    ) -> Result<Option<i64>, SandboxError> {
        if self.is_released() {
            return Err(SandboxError::Gone(self.name.clone()));
        }
        self.backend.exec(&self.id, command, sink).await
    }

    pub async fn peak_memory_bytes(&self) -> Option<u64> {
        if self.is_released() {
            return None;
        }
        self.backend.peak_memory_bytes(&self.id).await
    }

    /// Tear the sandbox down. Calls after a successful one do nothing.
    pub async fn release(&self) {
        if self.is_released() {
            return;
        }
        match tokio::time::timeout(TEARDOWN_TIMEOUT, self.backend.destroy(&self.id)).await {
            Ok(Ok(())) => {
                self.released.store(true, Ordering::SeqCst);
                info!(sandbox = %self.name, "Sandbox released");
            }
            Ok(Err(e)) => {
                warn!(sandbox = %self.name, error = %e, "Failed to release sandbox, retrying on drop")
            }
            Err(_) => warn!(
                sandbox = %self.name,
                timeout_ms = TEARDOWN_TIMEOUT.as_millis() as u64,
                "Sandbox teardown timed out, retrying on drop"
            ),
        }
    }
}

impl std::fmt::Debug for SandboxHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxHandle")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("released", &self.is_released())
            .finish()
    }
}

impl Drop for SandboxHandle {
    fn drop(&mut self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }

        // Cannot await in Drop; hand removal to the runtime
        let backend = Arc::clone(&self.backend);
        let id = self.id.clone();
        let name = self.name.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                debug!(sandbox = %name, "Sandbox dropped without release, scheduling teardown");
                runtime.spawn(async move {
                    match tokio::time::timeout(TEARDOWN_TIMEOUT, backend.destroy(&id)).await {
                        Ok(Ok(())) => debug!(sandbox = %name, "Abandoned sandbox torn down"),
                        Ok(Err(e)) => {
                            warn!(sandbox = %name, error = %e, "Failed to tear down abandoned sandbox")
                        }
                        Err(_) => warn!(sandbox = %name, "Teardown of abandoned sandbox timed out"),
                    }
                });
            }
            Err(_) => {
                warn!(sandbox = %name, "No runtime to tear down abandoned sandbox; it expires on its own");
            }
        }
    }
}
