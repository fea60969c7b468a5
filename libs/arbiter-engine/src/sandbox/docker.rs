/// Docker-based sandbox backend
///
/// **Isolation per container:**
/// - No network (`network_mode = none`, networking disabled)
/// - Memory ceiling with swap disabled, CPU ceiling via nano-CPUs
/// - Process-count ceiling against fork bombs
/// - Read-only root filesystem; the only writable path is a size-capped tmpfs
/// - All capabilities dropped, `no-new-privileges`, unprivileged user
/// - Keep-alive command bounded by the sandbox lifetime, so a lost teardown
///   still ends on its own; `auto_remove` then deletes the stopped container
///
/// Everything is driven through the Docker API with explicit argv; no shell
/// ever sees user-controlled bytes.
use super::{ExecCommand, OutputSink, SandboxBackend, SandboxSpec, SCRATCH_DIR};
use crate::error::SandboxError;
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, LogOutput, RemoveContainerOptions, StartContainerOptions,
    StatsOptions,
};
use bollard::errors::Error as DockerError;
use bollard::exec::{CreateExecOptions, StartExecOptions, StartExecResults};
use bollard::image::CreateImageOptions;
use bollard::models::HostConfig;
use bollard::Docker;
use futures_util::stream::StreamExt;
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// cgroup v2 exposes the peak directly; v1 goes through the stats endpoint
const CGROUP_V2_PEAK: &str = "/sys/fs/cgroup/memory.peak";

/// Docker occasionally reports an exec as running for a while after its
/// streams close. Polling has no cap of its own; every exec runs under a
/// caller deadline.
const EXEC_INSPECT_BACKOFF: Duration = Duration::from_millis(20);

pub struct DockerSandbox {
    docker: Docker,
}

impl DockerSandbox {
    /// Connect using the local defaults (unix socket / DOCKER_HOST)
    pub fn connect() -> Result<Self, SandboxError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| SandboxError::RuntimeUnreachable(e.to_string()))?;
        Ok(Self { docker })
    }

    fn container_config(spec: &SandboxSpec) -> Config<String> {
        let mut tmpfs = HashMap::new();
        tmpfs.insert(
            SCRATCH_DIR.to_string(),
            format!(
                "rw,exec,nosuid,nodev,size={}m,mode=1777",
                spec.scratch_size_mb
            ),
        );

        let mut labels = HashMap::new();
        labels.insert("arbiter.managed".to_string(), "true".to_string());

        let memory_bytes = i64::from(spec.memory_limit_mb) * 1024 * 1024;

        Config {
            image: Some(spec.image.clone()),
            entrypoint: Some(vec![]),
            cmd: Some(vec!["sleep".to_string(), spec.lifetime_secs.to_string()]),
            env: Some(vec![
                format!("HOME={}", SCRATCH_DIR),
                format!("TMPDIR={}", SCRATCH_DIR),
            ]),
            user: Some(spec.user.clone()),
            working_dir: Some(SCRATCH_DIR.to_string()),
            network_disabled: Some(true),
            labels: Some(labels),
            host_config: Some(HostConfig {
                memory: Some(memory_bytes),
                memory_swap: Some(memory_bytes),
                nano_cpus: Some((f64::from(spec.cpu_limit) * 1_000_000_000.0) as i64),
                pids_limit: Some(spec.pids_limit),
                network_mode: Some("none".to_string()),
                readonly_rootfs: Some(true),
                tmpfs: Some(tmpfs),
                cap_drop: Some(vec!["ALL".to_string()]),
                security_opt: Some(vec!["no-new-privileges".to_string()]),
                auto_remove: Some(true),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    async fn exit_code(&self, exec_id: &str) -> Result<Option<i64>, SandboxError> {
        let docker = &self.docker;
        wait_for_exit(move || async move {
            let inspect = docker
                .inspect_exec(exec_id)
                .await
                .map_err(|e| classify(e, SandboxError::Launch))?;
            Ok((inspect.running, inspect.exit_code))
        })
        .await
    }

    async fn cgroup_peak(&self, id: &str) -> Option<u64> {
        let argv = vec!["cat".to_string(), CGROUP_V2_PEAK.to_string()];
        let mut sink = OutputSink::new(64);
        let command = ExecCommand {
            argv: &argv,
            working_dir: None,
            stdin: b"",
        };
        match self.exec(id, command, &mut sink).await {
            Ok(Some(0)) => sink.stdout().trim().parse().ok(),
            _ => None,
        }
    }
}

/// Poll `inspect` until the exec stops reporting itself as running
async fn wait_for_exit<F, Fut>(mut inspect: F) -> Result<Option<i64>, SandboxError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(Option<bool>, Option<i64>), SandboxError>>,
{
    let mut polls = 0u32;
    loop {
        let (running, exit_code) = inspect().await?;
        if running != Some(true) {
            if polls > 0 {
                debug!(polls = polls, "Exec finished after its streams closed");
            }
            return Ok(exit_code);
        }
        polls += 1;
        tokio::time::sleep(EXEC_INSPECT_BACKOFF).await;
    }
}

/// Server replies mean the daemon is up; anything else means it is not reachable
fn classify(e: DockerError, reached: fn(String) -> SandboxError) -> SandboxError {
    match e {
        DockerError::DockerResponseServerError { status_code, message } => {
            reached(format!("{} ({})", message, status_code))
        }
        other => SandboxError::RuntimeUnreachable(other.to_string()),
    }
}

fn is_not_found(e: &DockerError) -> bool {
    matches!(
        e,
        DockerError::DockerResponseServerError {
            status_code: 404,
            ..
        }
    )
}

/// `auto_remove` may already be deleting a container we force-remove
fn is_removal_in_progress(e: &DockerError) -> bool {
    matches!(
        e,
        DockerError::DockerResponseServerError { status_code: 409, message }
            if message.contains("already in progress")
    )
}

#[async_trait]
impl SandboxBackend for DockerSandbox {
    async fn ping(&self) -> Result<(), SandboxError> {
        self.docker
            .ping()
            .await
            .map(|_| ())
            .map_err(|e| SandboxError::RuntimeUnreachable(e.to_string()))
    }

    async fn image_exists(&self, image: &str) -> Result<bool, SandboxError> {
        match self.docker.inspect_image(image).await {
            Ok(_) => {
                debug!(image = image, "Image cache hit");
                Ok(true)
            }
            Err(e) if is_not_found(&e) => {
                debug!(image = image, "Image cache miss");
                Ok(false)
            }
            Err(e) => Err(classify(e, SandboxError::ImageMissing)),
        }
    }

    async fn pull_image(&self, image: &str) -> Result<(), SandboxError> {
        warn!(image = image, "Image not cached, pulling");

        let options = Some(CreateImageOptions {
            from_image: image,
            ..Default::default()
        });

        let mut stream = self.docker.create_image(options, None, None);
        while let Some(result) = stream.next().await {
            result.map_err(|e| classify(e, SandboxError::ImageMissing))?;
        }

        info!(image = image, "Image pulled");
        Ok(())
    }

    async fn create(&self, spec: &SandboxSpec) -> Result<String, SandboxError> {
        let options = CreateContainerOptions {
            name: spec.name.as_str(),
            platform: None,
        };

        let container = self
            .docker
            .create_container(Some(options), Self::container_config(spec))
            .await
            .map_err(|e| classify(e, SandboxError::Create))?;

        if let Err(e) = self
            .docker
            .start_container(&container.id, None::<StartContainerOptions<String>>)
            .await
        {
            // Never leave a created-but-dead container behind
            let _ = self.destroy(&container.id).await;
            return Err(classify(e, SandboxError::Create));
        }

        Ok(container.id)
    }

    async fn exec(
        &self,
        id: &str,
        command: ExecCommand<'_>,
        sink: &mut OutputSink,
    ) -> Result<Option<i64>, SandboxError> {
        let options = CreateExecOptions {
            cmd: Some(command.argv.to_vec()),
            attach_stdin: Some(true),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            working_dir: command.working_dir.map(str::to_string),
            ..Default::default()
        };

        let exec = self
            .docker
            .create_exec(id, options)
            .await
            .map_err(|e| {
                if is_not_found(&e) {
                    SandboxError::Gone(id.to_string())
                } else {
                    classify(e, SandboxError::Launch)
                }
            })?;

        let started = self
            .docker
            .start_exec(&exec.id, Some(StartExecOptions::default()))
            .await
            .map_err(|e| classify(e, SandboxError::Launch))?;

        let StartExecResults::Attached { mut output, mut input } = started else {
            return Err(SandboxError::Launch("exec started detached".to_string()));
        };

        let stdin = command.stdin;
        let feed = async move {
            if !stdin.is_empty() {
                input.write_all(stdin).await?;
            }
            input.shutdown().await
        };

        let collect = async {
            while let Some(chunk) = output.next().await {
                match chunk {
                    Ok(LogOutput::StdOut { message }) => sink.push_stdout(&message),
                    Ok(LogOutput::StdErr { message }) => sink.push_stderr(&message),
                    Ok(_) => {}
                    Err(e) => return Err(SandboxError::Launch(e.to_string())),
                }
            }
            Ok(())
        };

        let (fed, collected) = tokio::join!(feed, collect);
        if let Err(e) = fed {
            // Programs that exit without reading stdin close the pipe early
            debug!(error = %e, "Stdin pipe closed before all input was written");
        }
        collected?;

        self.exit_code(&exec.id).await
    }

    /// Container-wide peak. cgroup v2 offers no reset a locked-down
    /// container can use, so a compile step in the same container counts
    /// toward it.
    async fn peak_memory_bytes(&self, id: &str) -> Option<u64> {
        if let Some(peak) = self.cgroup_peak(id).await {
            return Some(peak);
        }

        let mut stream = self.docker.stats(
            id,
            Some(StatsOptions {
                stream: false,
                one_shot: true,
            }),
        );
        match stream.next().await {
            Some(Ok(stats)) => stats
                .memory_stats
                .max_usage
                .or(stats.memory_stats.usage),
            Some(Err(e)) => {
                debug!(error = %e, "Memory stats unavailable");
                None
            }
            None => None,
        }
    }

    async fn destroy(&self, id: &str) -> Result<(), SandboxError> {
        let options = RemoveContainerOptions {
            force: true,
            v: true,
            ..Default::default()
        };

        match self.docker.remove_container(id, Some(options)).await {
            Ok(()) => Ok(()),
            Err(e) if is_not_found(&e) || is_removal_in_progress(&e) => Ok(()),
            Err(e) => Err(classify(e, SandboxError::Gone)),
        }
    }
}
