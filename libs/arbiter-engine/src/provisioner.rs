/// Sandbox Provisioner
///
/// Turns a language configuration into a live, resource-capped sandbox.
/// Images must already be cached: warm-up (out of band, at process start)
/// is the only place an image is ever pulled, and acquisition fails fast
/// when one is missing.
///
/// Runtime readiness is a process-wide flag. Warm-up sets it; a
/// connection-level failure clears it; only a cleared flag costs a ping on
/// the next acquisition.
use crate::config::LanguageConfig;
use crate::error::{EngineError, Result, SandboxError};
use crate::sandbox::{SandboxBackend, SandboxHandle, SandboxSpec};
use arbiter_common::types::Language;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

/// Slack added to the keep-alive beyond the longest legitimate use
const LIFETIME_SLACK_SECS: u64 = 30;

pub struct Provisioner {
    backend: Arc<dyn SandboxBackend>,
    ready: AtomicBool,
    warmed_images: RwLock<HashSet<String>>,
}

impl Provisioner {
    pub fn new(backend: Arc<dyn SandboxBackend>) -> Self {
        Self {
            backend,
            ready: AtomicBool::new(false),
            warmed_images: RwLock::new(HashSet::new()),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    fn mark_unready(&self, reason: &SandboxError) {
        if self.ready.swap(false, Ordering::SeqCst) {
            warn!(error = %reason, "Isolation runtime marked unavailable");
        }
    }

    fn is_warmed(&self, image: &str) -> bool {
        self.warmed_images
            .read()
            .map(|images| images.contains(image))
            .unwrap_or(false)
    }

    fn remember_image(&self, image: &str) {
        if let Ok(mut images) = self.warmed_images.write() {
            images.insert(image.to_string());
        }
    }

    /// Probe the runtime and make sure every image is cached, pulling if needed
    pub async fn warm_up(&self, images: &[(Language, String)]) -> Result<()> {
        if let Err(e) = self.backend.ping().await {
            self.mark_unready(&e);
            return Err(EngineError::SandboxUnavailable(e.to_string()));
        }
        self.ready.store(true, Ordering::SeqCst);

        for (language, image) in images {
            let present = self.backend.image_exists(image).await.map_err(|e| {
                EngineError::ImageUnavailable {
                    language: language.to_string(),
                    reason: e.to_string(),
                }
            })?;

            if !present {
                self.backend.pull_image(image).await.map_err(|e| {
                    EngineError::ImageUnavailable {
                        language: language.to_string(),
                        reason: e.to_string(),
                    }
                })?;
            }

            self.remember_image(image);
            info!(language = %language, image = %image, "Image ready");
        }

        Ok(())
    }

    async fn ensure_ready(&self) -> Result<()> {
        if self.is_ready() {
            return Ok(());
        }
        match self.backend.ping().await {
            Ok(()) => {
                self.ready.store(true, Ordering::SeqCst);
                info!("Isolation runtime reachable again");
                Ok(())
            }
            Err(e) => Err(EngineError::SandboxUnavailable(e.to_string())),
        }
    }

    async fn ensure_cached(&self, image: &str) -> Result<()> {
        if self.is_warmed(image) {
            return Ok(());
        }
        match self.backend.image_exists(image).await {
            Ok(true) => {
                self.remember_image(image);
                Ok(())
            }
            Ok(false) => Err(EngineError::SandboxUnavailable(format!(
                "image {} is not cached; run warm-up first",
                image
            ))),
            Err(e) => {
                if e.is_runtime_failure() {
                    self.mark_unready(&e);
                }
                Err(e.into())
            }
        }
    }

    /// Create a fresh sandbox for one execution
    pub async fn acquire(
        &self,
        config: &LanguageConfig,
        timeout_ms: u64,
    ) -> Result<SandboxHandle> {
        self.ensure_ready().await?;
        self.ensure_cached(&config.image).await?;

        let spec = SandboxSpec {
            name: format!("arbiter-{}", uuid::Uuid::new_v4()),
            image: config.image.clone(),
            memory_limit_mb: config.memory_limit_mb,
            cpu_limit: config.cpu_limit,
            pids_limit: config.pids_limit,
            scratch_size_mb: config.scratch_size_mb,
            user: config.user.clone(),
            lifetime_secs: (config.compile_timeout_ms + timeout_ms) / 1000 + LIFETIME_SLACK_SECS,
        };

        match self.backend.create(&spec).await {
            Ok(id) => {
                debug!(
                    sandbox = %spec.name,
                    image = %spec.image,
                    memory_mb = spec.memory_limit_mb,
                    cpu_limit = spec.cpu_limit,
                    "Sandbox acquired"
                );
                Ok(SandboxHandle::new(Arc::clone(&self.backend), id, spec.name))
            }
            Err(e) => {
                if e.is_runtime_failure() {
                    self.mark_unready(&e);
                }
                Err(e.into())
            }
        }
    }
}
