use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncWriteExt as _, DuplexStream};

use crate::encode::ffmpeg::{FfmpegGifEncoder, FfmpegOpts};
use crate::foundation::config::EncoderConfig;
use crate::foundation::core::{FrameBuffer, Fps};
use crate::foundation::error::{CaptureError, CaptureResult};
use crate::quality::preset::PaletteParams;
use crate::storage::store::UploadBody;

/// Configuration handed to a [`FrameEncoder`] when it is started.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EncodeConfig {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Input frame rate; the inverse is the per-frame delay.
    pub fps: Fps,
    pub palette: PaletteParams,
}

impl EncodeConfig {
    pub fn validate(&self) -> CaptureResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(CaptureError::validation(
                "encode width/height must be non-zero",
            ));
        }
        if !self.width.is_multiple_of(2) || !self.height.is_multiple_of(2) {
            return Err(CaptureError::validation(
                "encode width/height must be even (palette encoder rejects odd chroma planes)",
            ));
        }
        if self.fps.num == 0 || self.fps.den == 0 {
            return Err(CaptureError::validation("encode fps must be non-zero"));
        }
        if self.palette.max_colors < 2 || self.palette.max_colors > 256 {
            return Err(CaptureError::validation(
                "palette max_colors must be in 2..=256",
            ));
        }
        Ok(())
    }
}

/// Encoder contract: PNG frames in, animation bytes out.
///
/// Ordering contract: `write_frame` is called in strictly increasing `seq` order between `start`
/// and `finish`. The stream returned by `start` must be drained concurrently with writes.
#[async_trait]
pub trait FrameEncoder: Send {
    /// Start the encoder and return its output stream.
    async fn start(&mut self, cfg: &EncodeConfig) -> CaptureResult<UploadBody>;
    /// Push one encoded frame.
    async fn write_frame(&mut self, frame: &FrameBuffer) -> CaptureResult<()>;
    /// End the input and wait for the encoder to exit.
    async fn finish(&mut self) -> CaptureResult<()>;
    /// Stop the encoder without producing output.
    async fn abort(&mut self);
}

/// Produces one fresh [`FrameEncoder`] per capture.
pub trait EncoderFactory: Send + Sync {
    fn create(&self) -> Box<dyn FrameEncoder>;
}

/// Factory for [`FfmpegGifEncoder`]s sharing one invocation config.
#[derive(Clone, Debug)]
pub struct FfmpegEncoderFactory {
    opts: FfmpegOpts,
}

impl FfmpegEncoderFactory {
    pub fn new(cfg: &EncoderConfig) -> Self {
        Self {
            opts: FfmpegOpts::from(cfg),
        }
    }
}

impl EncoderFactory for FfmpegEncoderFactory {
    fn create(&self) -> Box<dyn FrameEncoder> {
        Box::new(FfmpegGifEncoder::new(self.opts.clone()))
    }
}

/// Everything an [`InMemoryEncoder`] received.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RecordedEncode {
    pub config: Option<EncodeConfig>,
    /// Frames in write order.
    pub frames: Vec<FrameBuffer>,
    pub finished: bool,
    pub aborted: bool,
}

/// In-memory encoder for tests and debugging.
///
/// Emits a tiny GIF-like stream (`GIF89a` header, one 8-byte seq per frame, `;` trailer) so
/// uploads have something to store.
pub struct InMemoryEncoder {
    recording: Arc<Mutex<RecordedEncode>>,
    out: Option<DuplexStream>,
    fail_on_finish: bool,
    write_delay: Duration,
}

const IN_MEMORY_PIPE_CAPACITY: usize = 64 * 1024;

impl InMemoryEncoder {
    pub fn new() -> Self {
        Self::with_recording(Arc::new(Mutex::new(RecordedEncode::default())))
    }

    fn with_recording(recording: Arc<Mutex<RecordedEncode>>) -> Self {
        Self {
            recording,
            out: None,
            fail_on_finish: false,
            write_delay: Duration::ZERO,
        }
    }

    /// Make `finish` report a failed encode, as a non-zero encoder exit would.
    pub fn failing_on_finish(mut self) -> Self {
        self.fail_on_finish = true;
        self
    }

    /// Spend `delay` in every `write_frame`, like an encoder that falls behind.
    pub fn with_write_delay(mut self, delay: Duration) -> Self {
        self.write_delay = delay;
        self
    }

    pub fn recording(&self) -> RecordedEncode {
        lock(&self.recording).clone()
    }

    async fn emit(&mut self, bytes: &[u8]) -> CaptureResult<()> {
        let out = self
            .out
            .as_mut()
            .ok_or_else(|| CaptureError::encoder_not_ready("in-memory encoder not started"))?;
        out.write_all(bytes)
            .await
            .map_err(|e| CaptureError::encode_failed(format!("in-memory output closed: {e}")))
    }
}

impl Default for InMemoryEncoder {
    fn default() -> Self {
        Self::new()
    }
}

fn lock(rec: &Mutex<RecordedEncode>) -> MutexGuard<'_, RecordedEncode> {
    rec.lock().unwrap_or_else(|e| e.into_inner())
}

#[async_trait]
impl FrameEncoder for InMemoryEncoder {
    async fn start(&mut self, cfg: &EncodeConfig) -> CaptureResult<UploadBody> {
        cfg.validate()?;
        let (writer, reader) = tokio::io::duplex(IN_MEMORY_PIPE_CAPACITY);
        self.out = Some(writer);
        *lock(&self.recording) = RecordedEncode {
            config: Some(*cfg),
            ..RecordedEncode::default()
        };
        self.emit(b"GIF89a").await?;
        Ok(Box::new(reader))
    }

    async fn write_frame(&mut self, frame: &FrameBuffer) -> CaptureResult<()> {
        if !self.write_delay.is_zero() {
            tokio::time::sleep(self.write_delay).await;
        }
        self.emit(&frame.seq.to_le_bytes()).await?;
        lock(&self.recording).frames.push(frame.clone());
        Ok(())
    }

    async fn finish(&mut self) -> CaptureResult<()> {
        if self.fail_on_finish {
            drop(self.out.take());
            return Err(CaptureError::encode_failed(
                "in-memory encoder exited with status 1",
            ));
        }
        self.emit(b";").await?;
        if let Some(mut out) = self.out.take() {
            let _ = out.shutdown().await;
        }
        lock(&self.recording).finished = true;
        Ok(())
    }

    async fn abort(&mut self) {
        drop(self.out.take());
        lock(&self.recording).aborted = true;
    }
}

/// Hands out [`InMemoryEncoder`]s and keeps what each of them received.
#[derive(Clone, Default)]
pub struct InMemoryEncoderFactory {
    runs: Arc<Mutex<Vec<Arc<Mutex<RecordedEncode>>>>>,
    fail_on_finish: bool,
    write_delay: Duration,
}

impl InMemoryEncoderFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on_finish(mut self) -> Self {
        self.fail_on_finish = true;
        self
    }

    pub fn with_write_delay(mut self, delay: Duration) -> Self {
        self.write_delay = delay;
        self
    }

    /// Recordings of every encoder created so far, in creation order.
    pub fn runs(&self) -> Vec<RecordedEncode> {
        self.runs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|r| lock(r).clone())
            .collect()
    }
}

impl EncoderFactory for InMemoryEncoderFactory {
    fn create(&self) -> Box<dyn FrameEncoder> {
        let recording = Arc::new(Mutex::new(RecordedEncode::default()));
        self.runs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Arc::clone(&recording));
        let mut enc = InMemoryEncoder::with_recording(recording);
        enc.fail_on_finish = self.fail_on_finish;
        enc.write_delay = self.write_delay;
        Box::new(enc)
    }
}

#[cfg(test)]
#[path = "../../tests/unit/encode/sink.rs"]
mod tests;
