use std::sync::Arc;
use std::time::Duration;

use crate::animation::discovery::discover;
use crate::browser::chromium::ChromiumFactory;
use crate::browser::driver::{PageDriver, PageOpener};
use crate::capture::deterministic::{DeterministicPlan, capture_deterministic};
use crate::capture::event_driven::{EventCapturePlan, capture_event_driven};
use crate::encode::session::{EncodeSession, EncodedAnimation};
use crate::encode::sink::{EncoderFactory, FfmpegEncoderFactory};
use crate::foundation::config::CaptureConfig;
use crate::foundation::core::{CaptureTarget, Fps, Viewport};
use crate::foundation::error::CaptureResult;
use crate::pool::resource_pool::{Lease, Pool, PoolOpts, ResourceFactory};
use crate::quality::preset::{QualityKey, QualityPreset, resolve_preset};
use crate::storage::store::{LocalDirStore, ObjectStore};

/// Replay a discovered animation group by protocol seeking.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct DeterministicRequest {
    pub target: CaptureTarget,
    pub fps: u32,
    #[serde(default)]
    pub animation_index: usize,
    /// `low`, `medium` or `high`; absent means `medium`.
    #[serde(default)]
    pub quality: Option<String>,
}

/// Let the page request frames itself.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct EventDrivenRequest {
    pub target: CaptureTarget,
    pub frame_duration_seconds: f64,
    pub time_compression_factor: f64,
    pub timeout_ms: u64,
    #[serde(default)]
    pub quality: Option<String>,
}

/// How a capture was produced.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum CaptureMode {
    Deterministic {
        fps: f64,
        animation_length_ms: f64,
        animation_index: usize,
    },
    EventDriven {
        /// Realized per-frame delay, in whole centiseconds.
        frame_duration_seconds: f64,
        time_compression_factor: f64,
    },
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CaptureMetadata {
    /// Storage-derived unique id.
    pub id: String,
    pub width: u32,
    pub height: u32,
    pub frame_count: u64,
    pub duration_seconds: f64,
    pub quality: QualityKey,
    #[serde(flatten)]
    pub mode: CaptureMode,
}

impl CaptureMetadata {
    fn new(encoded: &EncodedAnimation, quality: QualityKey, mode: CaptureMode) -> Self {
        Self {
            id: encoded.key.id(),
            width: encoded.width,
            height: encoded.height,
            frame_count: encoded.frame_count,
            duration_seconds: encoded.fps.frames_to_secs(encoded.frame_count),
            quality,
            mode,
        }
    }
}

/// Public result of a capture.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CaptureOutput {
    pub url: String,
    pub metadata: CaptureMetadata,
}

type PageOf<F> = <<F as ResourceFactory>::Resource as PageOpener>::Page;

/// The capture service: browser pool, encoder factory and object store wired together.
pub struct CaptureService<F>
where
    F: ResourceFactory,
    F::Resource: PageOpener,
{
    pool: Pool<F>,
    store: Arc<dyn ObjectStore>,
    encoders: Arc<dyn EncoderFactory>,
    config: CaptureConfig,
}

impl CaptureService<ChromiumFactory> {
    /// Chromium browsers, the system `ffmpeg` and a local media directory, all from `config`.
    pub fn from_config(config: CaptureConfig) -> CaptureResult<Self> {
        let store = Arc::new(LocalDirStore::new(
            config.storage.root.clone(),
            config.storage.media_url_template.clone(),
        ));
        let encoders = Arc::new(FfmpegEncoderFactory::new(&config.encoder));
        Self::new(
            ChromiumFactory::new(config.browser.clone()),
            store,
            encoders,
            config,
        )
    }
}

impl<F> CaptureService<F>
where
    F: ResourceFactory,
    F::Resource: PageOpener,
{
    /// Must be called inside a tokio runtime (the pool starts its reaper).
    pub fn new(
        factory: F,
        store: Arc<dyn ObjectStore>,
        encoders: Arc<dyn EncoderFactory>,
        config: CaptureConfig,
    ) -> CaptureResult<Self> {
        config.validate()?;
        let pool = Pool::new(factory, PoolOpts::from(&config.pool))?;
        Ok(Self {
            pool,
            store,
            encoders,
            config,
        })
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    pub fn pool(&self) -> &Pool<F> {
        &self.pool
    }

    pub async fn shutdown(&self) {
        self.pool.shutdown().await;
    }

    #[tracing::instrument(skip_all, fields(selector = %req.target.selector, fps = req.fps))]
    pub async fn create_deterministic_capture(
        &self,
        req: &DeterministicRequest,
    ) -> CaptureResult<CaptureOutput> {
        let preset = resolve_preset(req.quality.as_deref())?;
        let plan = DeterministicPlan {
            fps: Fps::new(req.fps, 1)?,
            animation_index: req.animation_index,
        };

        let (lease, page) = self.lease_page(req.target.viewport).await?;
        let result = async {
            let discovery = discover(
                &page,
                &req.target.selector,
                &req.target.source,
                &self.config.discovery,
            )
            .await?;
            capture_deterministic(
                &page,
                &req.target,
                &discovery,
                preset,
                &plan,
                self.new_session(preset),
            )
            .await
        }
        .await;
        return_page(lease, &page).await;

        let capture = result?;
        let mode = CaptureMode::Deterministic {
            fps: plan.fps.as_f64(),
            animation_length_ms: capture.animation_length_ms,
            animation_index: plan.animation_index,
        };
        Ok(CaptureOutput {
            metadata: CaptureMetadata::new(&capture.encoded, preset.key, mode),
            url: capture.encoded.url,
        })
    }

    #[tracing::instrument(skip_all, fields(selector = %req.target.selector))]
    pub async fn create_event_driven_capture(
        &self,
        req: &EventDrivenRequest,
    ) -> CaptureResult<CaptureOutput> {
        let preset = resolve_preset(req.quality.as_deref())?;
        let plan = EventCapturePlan {
            frame_fps: Fps::from_frame_duration_secs(req.frame_duration_seconds)?,
            time_compression: req.time_compression_factor,
            timeout: Duration::from_millis(req.timeout_ms),
            hold_rate: self.config.event_capture.hold_rate,
        };
        plan.validate()?;

        let (lease, page) = self.lease_page(req.target.viewport).await?;
        let page = Arc::new(page);
        let result = capture_event_driven(
            Arc::clone(&page),
            &req.target,
            preset,
            &plan,
            self.new_session(preset),
        )
        .await;
        return_page(lease, &*page).await;

        let capture = result?;
        let mode = CaptureMode::EventDriven {
            frame_duration_seconds: plan.frame_fps.frame_duration_secs(),
            time_compression_factor: plan.time_compression,
        };
        Ok(CaptureOutput {
            metadata: CaptureMetadata::new(&capture.encoded, preset.key, mode),
            url: capture.encoded.url,
        })
    }

    fn new_session(&self, preset: &QualityPreset) -> EncodeSession {
        EncodeSession::new(
            self.encoders.create(),
            Arc::clone(&self.store),
            preset.palette,
        )
    }

    async fn lease_page(&self, viewport: Viewport) -> CaptureResult<(Lease<F>, PageOf<F>)> {
        let lease = self.pool.acquire().await?;
        let opened = lease.open_page(viewport).await;
        match opened {
            Ok(page) => Ok((lease, page)),
            Err(e) => {
                tracing::warn!(error = %e, "could not open page; discarding browser");
                lease.discard().await;
                Err(e)
            }
        }
    }
}

/// Close the capture page and hand the browser back, or destroy it if the page would not close.
async fn return_page<F, P>(lease: Lease<F>, page: &P)
where
    F: ResourceFactory,
    P: PageDriver + ?Sized,
{
    match page.close().await {
        Ok(()) => lease.release(),
        Err(e) => {
            tracing::warn!(error = %e, "page close failed; discarding browser");
            lease.discard().await;
        }
    }
}

#[cfg(test)]
#[path = "../tests/unit/service.rs"]
mod tests;
