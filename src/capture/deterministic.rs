use crate::animation::discovery::Discovery;
use crate::browser::driver::PageDriver;
use crate::capture::frames::{FrameProcessor, OrderedFrameWriter, WriterReport};
use crate::encode::session::{EncodeSession, EncodedAnimation};
use crate::foundation::core::{CaptureClip, CaptureTarget, Fps, Rect};
use crate::foundation::error::{CaptureError, CaptureResult};
use crate::quality::preset::QualityPreset;

/// Timeline positions (ms) sampled for an animation of `length_ms`, both ends included.
///
/// Positions are computed as `i * step_ms` rather than accumulated, so the grid stays exact
/// however long the animation is.
pub fn sample_times(length_ms: f64, step_ms: f64) -> Vec<f64> {
    if !(length_ms.is_finite() && step_ms.is_finite() && length_ms >= 0.0 && step_ms > 0.0) {
        return Vec::new();
    }
    let last = (length_ms / step_ms + 1e-9).floor() as u64;
    (0..=last).map(|i| i as f64 * step_ms).collect()
}

/// Which group to replay and how densely.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DeterministicPlan {
    pub fps: Fps,
    pub animation_index: usize,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DeterministicCapture {
    pub encoded: EncodedAnimation,
    pub clip: CaptureClip,
    pub animation_length_ms: f64,
    /// Timeline positions visited by the capture pass.
    pub sampled: usize,
    pub report: WriterReport,
}

/// Replay one discovered animation group by seeking, one frame per sample time.
///
/// A bounds pass first seeks through the whole timeline to find the clip that contains the
/// target at every sampled instant. The capture pass then seeks to `t mod length` and
/// screenshots, so the final sample lands back on the first frame and is dropped as a loop seam.
#[tracing::instrument(skip_all, fields(selector = %target.selector, index = plan.animation_index))]
pub async fn capture_deterministic<P: PageDriver + ?Sized>(
    page: &P,
    target: &CaptureTarget,
    discovery: &Discovery,
    preset: &QualityPreset,
    plan: &DeterministicPlan,
    session: EncodeSession,
) -> CaptureResult<DeterministicCapture> {
    let group = discovery.group(plan.animation_index)?;
    let length = group.animation_length();
    if !(length.is_finite() && length > 0.0) {
        return Err(CaptureError::validation(format!(
            "animation group {} has no playable length",
            plan.animation_index
        )));
    }
    let timeline = Timeline {
        ids: group.ids(),
        times: sample_times(length, plan.fps.frame_step_ms()),
        length,
    };

    let result = sample_group(page, target, preset, plan, &timeline, session).await;

    if let Err(e) = page.release_animations(&discovery.all_ids()).await {
        tracing::debug!(error = %e, "failed to release animations");
    }
    result
}

/// The animations being replayed and the positions to visit.
struct Timeline {
    ids: Vec<String>,
    times: Vec<f64>,
    length: f64,
}

async fn sample_group<P: PageDriver + ?Sized>(
    page: &P,
    target: &CaptureTarget,
    preset: &QualityPreset,
    plan: &DeterministicPlan,
    timeline: &Timeline,
    mut session: EncodeSession,
) -> CaptureResult<DeterministicCapture> {
    let (ids, length) = (&timeline.ids, timeline.length);
    let clip = match measure_clip(page, &target.selector, timeline).await {
        Ok(clip) => clip,
        Err(e) => {
            session.abort().await;
            return Err(e);
        }
    };
    let processor = FrameProcessor::new(preset, clip);
    let (width, height) = processor.output_dims();
    if let Err(e) = session.ensure_encoder(width, height, plan.fps).await {
        session.abort().await;
        return Err(e);
    }

    let writer = OrderedFrameWriter::spawn(session, plan.fps, true);
    let mut captured: CaptureResult<()> = Ok(());
    for (seq, &t) in timeline.times.iter().enumerate() {
        if let Err(e) = page.seek_animations(ids, t % length).await {
            captured = Err(e);
            break;
        }
        let png = match page.screenshot(clip).await {
            Ok(png) => png,
            Err(e) if e.is_page_closed() => {
                tracing::warn!(seq, error = %e, "frame skipped: page is closing");
                continue;
            }
            Err(e) => {
                captured = Err(e);
                break;
            }
        };
        if let Err(e) = writer.push(processor.spawn(seq as u64, png)).await {
            captured = Err(e);
            break;
        }
    }

    let (mut session, written) = writer.finish().await?;
    let report = match (captured, written) {
        (Ok(()), Ok(report)) => report,
        (Err(e), _) | (Ok(()), Err(e)) => {
            session.abort().await;
            return Err(e);
        }
    };
    if report.written == 0 {
        session.abort().await;
        return Err(CaptureError::NoFramesCaptured);
    }

    let encoded = session.close().await?;
    tracing::info!(
        frames = encoded.frame_count,
        sampled = timeline.times.len(),
        dropped_seam = report.dropped_seam,
        url = %encoded.url,
        "deterministic capture finished"
    );
    Ok(DeterministicCapture {
        encoded,
        clip,
        animation_length_ms: length,
        sampled: timeline.times.len(),
        report,
    })
}

/// Union of the target's subtree bounds over every sample time.
async fn measure_clip<P: PageDriver + ?Sized>(
    page: &P,
    selector: &str,
    timeline: &Timeline,
) -> CaptureResult<CaptureClip> {
    let mut bounds: Option<Rect> = None;
    for &t in &timeline.times {
        page.seek_animations(&timeline.ids, t.min(timeline.length)).await?;
        let rect = page
            .subtree_bounds(selector)
            .await?
            .ok_or_else(|| CaptureError::ElementNotFound(selector.to_string()))?;
        bounds = Some(bounds.map_or(rect, |b| b.union(rect)));
    }
    bounds
        .map(CaptureClip::from_rect)
        .ok_or_else(|| CaptureError::validation("no sample times to measure"))
}

#[cfg(test)]
#[path = "../../tests/unit/capture/deterministic.rs"]
mod tests;
