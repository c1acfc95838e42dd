use std::io::Cursor;

use image::ImageEncoder as _;
use image::codecs::png::{FilterType as PngFilter, PngEncoder};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::encode::session::EncodeSession;
use crate::foundation::core::{CaptureClip, FrameBuffer, Fps};
use crate::foundation::error::{CaptureError, CaptureResult};
use crate::quality::preset::{QualityPreset, ResampleParams};

/// A frame whose processing may still be running. `Ok(None)` marks a frame that was skipped.
pub type PendingFrame = JoinHandle<CaptureResult<Option<FrameBuffer>>>;

/// Resizes and recompresses screenshots to the preset's output size.
#[derive(Clone, Copy, Debug)]
pub struct FrameProcessor {
    resample: ResampleParams,
    width: u32,
    height: u32,
}

impl FrameProcessor {
    pub fn new(preset: &QualityPreset, clip: CaptureClip) -> Self {
        let (width, height) = preset.output_dims(clip);
        Self {
            resample: preset.resample,
            width,
            height,
        }
    }

    pub fn output_dims(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Decode, resample and re-encode one PNG screenshot. CPU-bound.
    pub fn process_blocking(&self, seq: u64, png: &[u8]) -> CaptureResult<FrameBuffer> {
        let decoded = image::load_from_memory_with_format(png, image::ImageFormat::Png)
            .map_err(|e| CaptureError::protocol(format!("screenshot is not a valid PNG: {e}")))?
            .to_rgba8();
        let resized = if decoded.dimensions() == (self.width, self.height) {
            decoded
        } else {
            image::imageops::resize(&decoded, self.width, self.height, self.resample.filter)
        };

        let mut out = Cursor::new(Vec::with_capacity(png.len()));
        PngEncoder::new_with_quality(&mut out, self.resample.compression, PngFilter::Adaptive)
            .write_image(
                resized.as_raw(),
                self.width,
                self.height,
                image::ExtendedColorType::Rgba8,
            )
            .map_err(|e| CaptureError::Other(anyhow::anyhow!("frame {seq} encode: {e}")))?;

        Ok(FrameBuffer {
            seq,
            width: self.width,
            height: self.height,
            data: out.into_inner(),
        })
    }

    /// [`FrameProcessor::process_blocking`] on the blocking pool.
    pub async fn process(&self, seq: u64, png: Vec<u8>) -> CaptureResult<FrameBuffer> {
        let this = *self;
        tokio::task::spawn_blocking(move || this.process_blocking(seq, &png))
            .await
            .map_err(|e| CaptureError::Other(anyhow::anyhow!("frame {seq} task failed: {e}")))?
    }

    /// Start processing in the background, returning a handle for the ordered writer.
    pub fn spawn(&self, seq: u64, png: Vec<u8>) -> PendingFrame {
        let this = *self;
        tokio::spawn(async move { this.process(seq, png).await.map(Some) })
    }
}

/// Frames that may wait between the capture loop and the writer. Once the queue is full,
/// [`OrderedFrameWriter::push`] waits for the encoder to catch up.
pub const FRAME_QUEUE_DEPTH: usize = 8;

/// Outcome of draining an [`OrderedFrameWriter`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WriterReport {
    pub written: u64,
    /// Frames whose capture was swallowed (page closing).
    pub skipped: u64,
    /// The last frame matched the first and was left out to avoid a loop seam.
    pub dropped_seam: bool,
}

/// Single sequential queue in front of the encoder.
///
/// Frames are processed concurrently but written strictly in push order: the writer awaits each
/// pending frame before moving to the next. The writer task owns the [`EncodeSession`] for the
/// duration, so nothing else can write to the encoder. At most [`FRAME_QUEUE_DEPTH`] frames are
/// queued at a time.
pub struct OrderedFrameWriter {
    tx: mpsc::Sender<PendingFrame>,
    task: JoinHandle<(EncodeSession, CaptureResult<WriterReport>)>,
}

impl OrderedFrameWriter {
    /// Take ownership of `session` and start writing. With `drop_seam`, a final frame that is
    /// pixel-identical to the first one is not written.
    pub fn spawn(session: EncodeSession, fps: Fps, drop_seam: bool) -> Self {
        let (tx, rx) = mpsc::channel(FRAME_QUEUE_DEPTH);
        let task = tokio::spawn(write_loop(session, rx, fps, drop_seam));
        Self { tx, task }
    }

    /// Queue the next frame, waiting while the queue is full. Fails once the writer has stopped
    /// on an error.
    pub async fn push(&self, frame: PendingFrame) -> CaptureResult<()> {
        self.tx.send(frame).await.map_err(|rejected| {
            rejected.0.abort();
            CaptureError::encoder_not_ready("frame writer has stopped")
        })
    }

    /// Close the queue, wait for every queued frame to be written and hand the session back.
    pub async fn finish(self) -> CaptureResult<(EncodeSession, CaptureResult<WriterReport>)> {
        drop(self.tx);
        self.task
            .await
            .map_err(|e| CaptureError::Other(anyhow::anyhow!("frame writer task failed: {e}")))
    }
}

async fn write_loop(
    mut session: EncodeSession,
    mut rx: mpsc::Receiver<PendingFrame>,
    fps: Fps,
    drop_seam: bool,
) -> (EncodeSession, CaptureResult<WriterReport>) {
    let mut report = WriterReport::default();
    let mut first: Option<FrameBuffer> = None;
    let mut held: Option<FrameBuffer> = None;

    while let Some(pending) = rx.recv().await {
        let frame = match pending.await {
            Ok(Ok(Some(frame))) => frame,
            Ok(Ok(None)) => {
                report.skipped += 1;
                continue;
            }
            Ok(Err(e)) => return (session, Err(e)),
            Err(e) => {
                let err = CaptureError::Other(anyhow::anyhow!("frame task failed: {e}"));
                return (session, Err(err));
            }
        };

        if let Err(e) = session.ensure_encoder(frame.width, frame.height, fps).await {
            return (session, Err(e));
        }
        if drop_seam && first.is_none() {
            first = Some(frame.clone());
        }

        let ready = if drop_seam {
            held.replace(frame)
        } else {
            Some(frame)
        };
        if let Some(frame) = ready {
            if let Err(e) = session.write(&frame).await {
                return (session, Err(e));
            }
            report.written += 1;
            tracing::debug!(seq = frame.seq, "frame written");
        }
    }

    if let Some(last) = held {
        let seam = first
            .as_ref()
            .is_some_and(|f| f.seq != last.seq && f.same_pixels(&last));
        if seam {
            report.dropped_seam = true;
            tracing::debug!(seq = last.seq, "dropped final frame identical to the first");
        } else {
            if let Err(e) = session.write(&last).await {
                return (session, Err(e));
            }
            report.written += 1;
        }
    }

    (session, Ok(report))
}

#[cfg(test)]
#[path = "../../tests/unit/capture/frames.rs"]
mod tests;
