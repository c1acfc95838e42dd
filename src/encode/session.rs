use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::encode::sink::{EncodeConfig, FrameEncoder};
use crate::foundation::core::{FrameBuffer, Fps, even_dimension};
use crate::foundation::error::{CaptureError, CaptureResult};
use crate::quality::preset::PaletteParams;
use crate::storage::store::{ObjectStore, StorageKey};

/// MIME type of every uploaded animation.
pub const GIF_CONTENT_TYPE: &str = "image/gif";

/// Lifecycle of an [`EncodeSession`]. Transitions only move forward.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum EncodeState {
    Created,
    Ready,
    FramesAccepted,
    Closed,
}

/// A finished, uploaded animation.
#[derive(Clone, Debug, PartialEq)]
pub struct EncodedAnimation {
    pub key: StorageKey,
    pub url: String,
    pub width: u32,
    pub height: u32,
    pub fps: Fps,
    pub frame_count: u64,
    /// Bytes stored.
    pub bytes: u64,
}

/// One encoder process wired to one upload stream.
///
/// The encoder is spawned lazily by the first [`EncodeSession::ensure_encoder`] call. The public
/// URL only exists once the encoder has exited cleanly and the upload has completed. The object
/// stays staged until then and is committed last; any failure after the upload started deletes
/// it.
pub struct EncodeSession {
    encoder: Box<dyn FrameEncoder>,
    store: Arc<dyn ObjectStore>,
    key: StorageKey,
    palette: PaletteParams,
    state: EncodeState,
    config: Option<EncodeConfig>,
    frames: u64,
    upload: Option<JoinHandle<CaptureResult<u64>>>,
}

impl EncodeSession {
    pub fn new(
        encoder: Box<dyn FrameEncoder>,
        store: Arc<dyn ObjectStore>,
        palette: PaletteParams,
    ) -> Self {
        Self {
            encoder,
            store,
            key: StorageKey::generate("gif"),
            palette,
            state: EncodeState::Created,
            config: None,
            frames: 0,
            upload: None,
        }
    }

    pub fn key(&self) -> &StorageKey {
        &self.key
    }

    pub fn state(&self) -> EncodeState {
        self.state
    }

    pub fn config(&self) -> Option<&EncodeConfig> {
        self.config.as_ref()
    }

    pub fn frames_written(&self) -> u64 {
        self.frames
    }

    /// Spawn the encoder and start streaming its output into storage.
    ///
    /// Idempotent: later calls return the existing config. Odd dimensions are rounded up to the
    /// next even value before the encoder is created.
    pub async fn ensure_encoder(
        &mut self,
        width: u32,
        height: u32,
        fps: Fps,
    ) -> CaptureResult<EncodeConfig> {
        if let Some(cfg) = self.config {
            return Ok(cfg);
        }
        if self.state == EncodeState::Closed {
            return Err(CaptureError::encoder_not_ready("encode session is closed"));
        }

        let cfg = EncodeConfig {
            width: even_dimension(width),
            height: even_dimension(height),
            fps,
            palette: self.palette,
        };
        cfg.validate()?;

        let body = self.encoder.start(&cfg).await?;
        let store = Arc::clone(&self.store);
        let key = self.key.clone();
        self.upload = Some(tokio::spawn(async move {
            store.put_stream(&key, GIF_CONTENT_TYPE, body).await
        }));

        tracing::debug!(key = %self.key, width = cfg.width, height = cfg.height, "encoder ready");
        self.config = Some(cfg);
        self.state = EncodeState::Ready;
        Ok(cfg)
    }

    /// Append one frame. Fails with [`CaptureError::EncoderNotReady`] before `ensure_encoder`
    /// or after `close`.
    pub async fn write(&mut self, frame: &FrameBuffer) -> CaptureResult<()> {
        match self.state {
            EncodeState::Ready | EncodeState::FramesAccepted => {}
            EncodeState::Created => {
                return Err(CaptureError::encoder_not_ready(
                    "write before ensure_encoder",
                ));
            }
            EncodeState::Closed => {
                return Err(CaptureError::encoder_not_ready("write after close"));
            }
        }
        self.encoder.write_frame(frame).await?;
        self.frames += 1;
        self.state = EncodeState::FramesAccepted;
        Ok(())
    }

    /// End the input, wait for the encoder and the upload, and derive the public URL.
    pub async fn close(&mut self) -> CaptureResult<EncodedAnimation> {
        let cfg = match (self.state, self.config) {
            (EncodeState::Closed, _) => {
                return Err(CaptureError::encoder_not_ready("session already closed"));
            }
            (_, None) => {
                return Err(CaptureError::encoder_not_ready(
                    "close before ensure_encoder",
                ));
            }
            (_, Some(cfg)) => cfg,
        };
        self.state = EncodeState::Closed;

        let finished = self.encoder.finish().await;
        let uploaded = match self.upload.take() {
            Some(handle) => handle
                .await
                .map_err(|e| CaptureError::storage(format!("upload task failed: {e}")))
                .and_then(|r| r),
            None => Err(CaptureError::storage("upload never started")),
        };

        let bytes = match (finished, uploaded) {
            (Ok(()), Ok(bytes)) => bytes,
            (Err(e), _) | (Ok(()), Err(e)) => {
                self.discard_object().await;
                return Err(e);
            }
        };
        if let Err(e) = self.store.commit(&self.key).await {
            self.discard_object().await;
            return Err(e);
        }

        let url = self.store.public_url(&self.key);
        tracing::info!(key = %self.key, frames = self.frames, bytes, "animation uploaded");
        Ok(EncodedAnimation {
            key: self.key.clone(),
            url,
            width: cfg.width,
            height: cfg.height,
            fps: cfg.fps,
            frame_count: self.frames,
            bytes,
        })
    }

    /// Kill the encoder, cancel the upload and remove anything already stored.
    pub async fn abort(&mut self) {
        if self.state == EncodeState::Closed {
            return;
        }
        self.state = EncodeState::Closed;
        self.encoder.abort().await;
        if let Some(upload) = self.upload.take() {
            upload.abort();
            let _ = upload.await;
            self.discard_object().await;
        }
    }

    async fn discard_object(&self) {
        if let Err(e) = self.store.delete(&self.key).await {
            tracing::warn!(key = %self.key, error = %e, "failed to delete partial upload");
        }
    }
}

impl Drop for EncodeSession {
    fn drop(&mut self) {
        if let Some(upload) = self.upload.take() {
            upload.abort();
        }
    }
}

#[cfg(test)]
#[path = "../../tests/unit/encode/session.rs"]
mod tests;
