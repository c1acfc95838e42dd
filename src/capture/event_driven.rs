use std::sync::Arc;
use std::time::Duration;

use crate::browser::driver::{PageDriver, ScriptId};
use crate::capture::frames::{FrameProcessor, OrderedFrameWriter, WriterReport};
use crate::encode::session::{EncodeSession, EncodedAnimation};
use crate::foundation::core::{CaptureClip, CaptureTarget, FrameBuffer, Fps};
use crate::foundation::error::{CaptureError, CaptureResult};
use crate::quality::preset::QualityPreset;

/// Host function the page calls to request a frame now.
pub const CAPTURE_FRAME_BINDING: &str = "__animcapCaptureFrame";
/// Host function the page calls once the capturable sequence is over.
pub const STOP_CAPTURE_BINDING: &str = "__animcapStopCapture";

/// Bumped whenever the shim's page-side API changes.
pub const TIME_SHIM_VERSION: u32 = 1;

const TIME_SHIM_TEMPLATE: &str = include_str!("time_shim.js");
const RESET_TIME_EXPR: &str = "window.__animcapTime && window.__animcapTime.reset()";

/// Timer-dilation shim with `factor` as its initial time-compression factor.
pub fn time_shim_script(factor: f64) -> String {
    TIME_SHIM_TEMPLATE
        .replace("__ANIMCAP_VERSION__", &TIME_SHIM_VERSION.to_string())
        .replace("__ANIMCAP_FACTOR__", &format!("{factor}"))
}

fn set_factor_expr(factor: f64) -> String {
    format!("window.__animcapTime && window.__animcapTime.setFactor({factor})")
}

/// Parameters of one event-driven session.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EventCapturePlan {
    /// Encoder input rate; its inverse is the per-frame delay of the output.
    pub frame_fps: Fps,
    /// In-page timers run this many times faster than wall-clock time.
    pub time_compression: f64,
    /// Maximum wait for the stop signal.
    pub timeout: Duration,
    /// Rate the page runs at while a screenshot is in flight.
    pub hold_rate: f64,
}

impl EventCapturePlan {
    pub fn validate(&self) -> CaptureResult<()> {
        if !(self.time_compression.is_finite() && self.time_compression > 0.0) {
            return Err(CaptureError::validation(
                "time compression factor must be a positive number",
            ));
        }
        if !(self.hold_rate > 0.0 && self.hold_rate < 1.0) {
            return Err(CaptureError::validation("hold rate must be in (0, 1)"));
        }
        if self.timeout.is_zero() {
            return Err(CaptureError::validation("capture timeout must be non-zero"));
        }
        Ok(())
    }

    /// Rate applied while a screenshot is in flight. Never faster than the session rate.
    pub fn effective_hold_rate(&self) -> f64 {
        self.hold_rate.min(self.time_compression)
    }
}

/// Result of a successful event-driven session.
#[derive(Clone, Debug, PartialEq)]
pub struct EventDrivenCapture {
    pub encoded: EncodedAnimation,
    pub clip: CaptureClip,
    pub report: WriterReport,
}

/// Reference-counted playback freeze. The first holder slows the page to the hold rate, the
/// last one to leave restores the session rate.
struct PlaybackHold<P: ?Sized> {
    page: Arc<P>,
    holders: tokio::sync::Mutex<usize>,
    hold_rate: f64,
    resume_rate: f64,
}

impl<P: PageDriver + ?Sized> PlaybackHold<P> {
    fn new(page: Arc<P>, hold_rate: f64, resume_rate: f64) -> Self {
        Self {
            page,
            holders: tokio::sync::Mutex::new(0),
            hold_rate,
            resume_rate,
        }
    }

    /// Always pair with [`PlaybackHold::release`], even when this fails.
    async fn hold(&self) -> CaptureResult<()> {
        let mut holders = self.holders.lock().await;
        *holders += 1;
        if *holders == 1 {
            apply_rate(&*self.page, self.hold_rate).await?;
        }
        Ok(())
    }

    async fn release(&self) {
        let mut holders = self.holders.lock().await;
        *holders = holders.saturating_sub(1);
        if *holders == 0
            && let Err(e) = apply_rate(&*self.page, self.resume_rate).await
        {
            tracing::warn!(error = %e, "failed to resume page playback");
        }
    }
}

async fn apply_rate<P: PageDriver + ?Sized>(page: &P, rate: f64) -> CaptureResult<()> {
    page.evaluate(&set_factor_expr(rate)).await?;
    page.set_playback_rate(rate).await
}

async fn capture_one<P: PageDriver + ?Sized>(
    page: Arc<P>,
    hold: Arc<PlaybackHold<P>>,
    clip: CaptureClip,
    processor: FrameProcessor,
    seq: u64,
) -> CaptureResult<Option<FrameBuffer>> {
    let shot = match hold.hold().await {
        Ok(()) => page.screenshot(clip).await,
        Err(e) => Err(e),
    };
    hold.release().await;

    let png = match shot {
        Ok(png) => png,
        Err(e) if e.is_page_closed() => {
            tracing::warn!(seq, error = %e, "frame skipped: page is closing");
            return Ok(None);
        }
        Err(e) => return Err(e),
    };
    processor.process(seq, png).await.map(Some)
}

/// Let the page drive capture through injected host functions.
///
/// Installs the timer shim and both bindings, loads the page, then captures one frame per
/// capture request until the stop request arrives. Page-side state is reset on every exit path
/// once the encoder and upload are settled.
#[tracing::instrument(skip_all, fields(selector = %target.selector))]
pub async fn capture_event_driven<P: PageDriver + 'static>(
    page: Arc<P>,
    target: &CaptureTarget,
    preset: &QualityPreset,
    plan: &EventCapturePlan,
    session: EncodeSession,
) -> CaptureResult<EventDrivenCapture> {
    plan.validate()?;
    let script = page
        .add_init_script(&time_shim_script(plan.time_compression))
        .await?;
    let result = run_session(&page, target, preset, plan, session).await;
    reset_page(&*page, &script).await;
    result
}

async fn run_session<P: PageDriver + 'static>(
    page: &Arc<P>,
    target: &CaptureTarget,
    preset: &QualityPreset,
    plan: &EventCapturePlan,
    session: EncodeSession,
) -> CaptureResult<EventDrivenCapture> {
    let mut calls = page.binding_calls().await?;
    page.add_binding(CAPTURE_FRAME_BINDING).await?;
    page.add_binding(STOP_CAPTURE_BINDING).await?;
    page.enable_animations().await?;
    page.set_playback_rate(plan.time_compression).await?;
    page.load(&target.source).await?;

    let hold = Arc::new(PlaybackHold::new(
        Arc::clone(page),
        plan.effective_hold_rate(),
        plan.time_compression,
    ));
    let writer = OrderedFrameWriter::spawn(session, plan.frame_fps, false);
    let mut setup: Option<(CaptureClip, FrameProcessor)> = None;
    let mut seq = 0u64;

    let deadline = tokio::time::sleep(plan.timeout);
    tokio::pin!(deadline);

    let outcome: CaptureResult<()> = loop {
        tokio::select! {
            call = calls.recv() => {
                let Some(call) = call else {
                    break Err(CaptureError::page_closed("page stopped delivering binding calls"));
                };
                match call.name.as_str() {
                    CAPTURE_FRAME_BINDING => {
                        let (clip, processor) = match setup {
                            Some(s) => s,
                            None => match resolve_clip(&**page, target, preset).await {
                                Ok(s) => *setup.insert(s),
                                Err(e) => break Err(e),
                            },
                        };
                        let task = tokio::spawn(capture_one(
                            Arc::clone(page),
                            Arc::clone(&hold),
                            clip,
                            processor,
                            seq,
                        ));
                        tracing::debug!(seq, "frame requested");
                        seq += 1;
                        if let Err(e) = writer.push(task).await {
                            break Err(e);
                        }
                    }
                    STOP_CAPTURE_BINDING => break Ok(()),
                    other => tracing::debug!(binding = other, "ignoring unknown binding call"),
                }
            }
            () = &mut deadline => break Err(CaptureError::CaptureTimeout(plan.timeout)),
        }
    };

    let (mut session, written) = writer.finish().await?;
    let report = match (outcome, written) {
        (Ok(()), Ok(report)) => report,
        (Err(e), _) | (Ok(()), Err(e)) => {
            session.abort().await;
            return Err(e);
        }
    };
    let Some((clip, _)) = setup.filter(|_| report.written > 0) else {
        session.abort().await;
        return Err(CaptureError::NoFramesCaptured);
    };

    let encoded = session.close().await?;
    tracing::info!(
        frames = encoded.frame_count,
        skipped = report.skipped,
        url = %encoded.url,
        "event-driven capture finished"
    );
    Ok(EventDrivenCapture {
        encoded,
        clip,
        report,
    })
}

async fn resolve_clip<P: PageDriver + ?Sized>(
    page: &P,
    target: &CaptureTarget,
    preset: &QualityPreset,
) -> CaptureResult<(CaptureClip, FrameProcessor)> {
    let rect = page
        .subtree_bounds(&target.selector)
        .await?
        .ok_or_else(|| CaptureError::ElementNotFound(target.selector.clone()))?;
    let clip = CaptureClip::from_rect(rect);
    Ok((clip, FrameProcessor::new(preset, clip)))
}

async fn reset_page<P: PageDriver + ?Sized>(page: &P, script: &ScriptId) {
    let steps = [
        ("reset time shim", page.evaluate(RESET_TIME_EXPR).await.map(|_| ())),
        (
            "remove capture binding",
            page.remove_binding(CAPTURE_FRAME_BINDING).await,
        ),
        (
            "remove stop binding",
            page.remove_binding(STOP_CAPTURE_BINDING).await,
        ),
        ("remove time shim", page.remove_init_script(script).await),
        ("restore playback rate", page.set_playback_rate(1.0).await),
    ];
    for (step, result) in steps {
        if let Err(e) = result {
            tracing::warn!(step, error = %e, "page reset step failed");
        }
    }
}

#[cfg(test)]
#[path = "../../tests/unit/capture/event_driven.rs"]
mod tests;
