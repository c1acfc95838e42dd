use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

use crate::browser::driver::{AnimationRecord, NodeHandle, PageDriver};
use crate::foundation::config::DiscoveryConfig;
use crate::foundation::core::{DOCUMENT_ROOT_SELECTOR, PageSource};
use crate::foundation::error::{CaptureError, CaptureResult};

/// Two animations belong to the same group when their start times differ by less than this.
pub const START_TIME_EPSILON_MS: f64 = 1e-3;

// Poll interval while the container is unresolved or containment checks are being retried.
const RETRY_TICK: Duration = Duration::from_millis(50);

/// Animations that started together and replay as one unit.
#[derive(Clone, Debug, PartialEq)]
pub struct AnimationGroup {
    pub start_time: f64,
    pub animations: Vec<AnimationRecord>,
}

impl AnimationGroup {
    /// Longest single-iteration end time in the group, in milliseconds.
    pub fn animation_length(&self) -> f64 {
        self.animations
            .iter()
            .map(AnimationRecord::end_time)
            .fold(0.0, f64::max)
    }

    pub fn ids(&self) -> Vec<String> {
        self.animations.iter().map(|a| a.id.clone()).collect()
    }
}

/// Everything found while the page loaded.
#[derive(Clone, Debug, PartialEq)]
pub struct Discovery {
    /// Groups in order of first appearance.
    pub groups: Vec<AnimationGroup>,
    pub container: NodeHandle,
    /// Discovery stopped at the hard ceiling rather than after a quiet window.
    pub hit_ceiling: bool,
    /// Animations dropped after repeated containment failures.
    pub dropped: usize,
}

impl Discovery {
    /// The group at `index`, or [`CaptureError::Index`].
    pub fn group(&self, index: usize) -> CaptureResult<&AnimationGroup> {
        self.groups.get(index).ok_or(CaptureError::Index {
            index,
            available: self.groups.len(),
        })
    }

    pub fn all_ids(&self) -> Vec<String> {
        self.groups.iter().flat_map(AnimationGroup::ids).collect()
    }
}

/// Add `record` to the group sharing its start time, creating one if needed.
///
/// Returns `false` when an animation with the same id is already grouped.
pub fn insert_record(groups: &mut Vec<AnimationGroup>, record: AnimationRecord) -> bool {
    if groups
        .iter()
        .any(|g| g.animations.iter().any(|a| a.id == record.id))
    {
        return false;
    }
    match groups
        .iter_mut()
        .find(|g| (g.start_time - record.start_time).abs() < START_TIME_EPSILON_MS)
    {
        Some(group) => group.animations.push(record),
        None => groups.push(AnimationGroup {
            start_time: record.start_time,
            animations: vec![record],
        }),
    }
    true
}

struct PendingRecord {
    record: AnimationRecord,
    failed_checks: u32,
}

struct DiscoveryState {
    container: Option<NodeHandle>,
    pending: VecDeque<PendingRecord>,
    groups: Vec<AnimationGroup>,
    dropped: usize,
}

impl DiscoveryState {
    fn needs_retry(&self) -> bool {
        self.container.is_none() || !self.pending.is_empty()
    }

    /// Resolve the container if needed, then classify every queued record.
    ///
    /// Nothing is classified before the container resolves.
    async fn settle<P: PageDriver + ?Sized>(
        &mut self,
        page: &P,
        selector: &str,
        max_retries: u32,
    ) -> CaptureResult<()> {
        if self.container.is_none() {
            self.container = page.query_selector(selector).await?;
            if self.container.is_none() {
                return Ok(());
            }
            tracing::debug!(selector, "capture container resolved");
        }
        let Some(container) = self.container.clone() else {
            return Ok(());
        };

        let mut retry = VecDeque::new();
        while let Some(mut item) = self.pending.pop_front() {
            match is_contained(page, &container, selector, &item.record).await {
                Ok(true) => {
                    page.set_paused(std::slice::from_ref(&item.record.id), true)
                        .await?;
                    let id = item.record.id.clone();
                    if !insert_record(&mut self.groups, item.record) {
                        tracing::debug!(id = %id, "duplicate animation event ignored");
                    }
                }
                Ok(false) => {
                    tracing::debug!(id = %item.record.id, "animation outside capture target");
                }
                Err(e) if e.is_page_closed() => return Err(e),
                Err(e) => {
                    item.failed_checks += 1;
                    if item.failed_checks > max_retries {
                        tracing::debug!(id = %item.record.id, error = %e, "dropping animation");
                        self.dropped += 1;
                    } else {
                        retry.push_back(item);
                    }
                }
            }
        }
        self.pending = retry;
        Ok(())
    }
}

async fn is_contained<P: PageDriver + ?Sized>(
    page: &P,
    container: &NodeHandle,
    selector: &str,
    record: &AnimationRecord,
) -> CaptureResult<bool> {
    match record.backend_node_id {
        Some(node) => page.node_contains(container, node).await,
        // Document-level animations only belong to a whole-document capture.
        None => Ok(selector == DOCUMENT_ROOT_SELECTOR),
    }
}

/// Load `source` and collect the animations it starts inside `selector`.
///
/// Each contained animation is paused as soon as it is seen. Discovery ends after
/// `cfg.quiescence()` without a new animation, or at `cfg.ceiling()` on pages that never go
/// quiet. The quiet window is a heuristic: an animation started after it is missed. On return
/// every discovered animation has been seeked to 0.
#[tracing::instrument(skip_all, fields(selector = %selector))]
pub async fn discover<P: PageDriver + ?Sized>(
    page: &P,
    selector: &str,
    source: &PageSource,
    cfg: &DiscoveryConfig,
) -> CaptureResult<Discovery> {
    let mut events = page.animation_events().await?;
    page.enable_animations().await?;
    page.set_playback_rate(1.0).await?;
    page.load(source).await?;

    let ceiling = Instant::now() + cfg.ceiling();
    let mut quiet_until = Instant::now() + cfg.quiescence();
    let mut events_open = true;
    let mut state = DiscoveryState {
        container: None,
        pending: VecDeque::new(),
        groups: Vec::new(),
        dropped: 0,
    };

    loop {
        state
            .settle(page, selector, cfg.max_containment_retries)
            .await?;
        let retrying = state.needs_retry();
        tokio::select! {
            event = events.recv(), if events_open => match event {
                Some(record) => {
                    quiet_until = Instant::now() + cfg.quiescence();
                    state.pending.push_back(PendingRecord { record, failed_checks: 0 });
                }
                None => events_open = false,
            },
            () = tokio::time::sleep_until(quiet_until.min(ceiling)) => break,
            () = tokio::time::sleep(RETRY_TICK), if retrying => {}
        }
    }

    // Drain anything that arrived in the same instant the window closed.
    while let Ok(record) = events.try_recv() {
        state.pending.push_back(PendingRecord {
            record,
            failed_checks: 0,
        });
    }
    state
        .settle(page, selector, cfg.max_containment_retries)
        .await?;

    let hit_ceiling = quiet_until > ceiling;
    if hit_ceiling {
        tracing::warn!(
            ceiling_ms = cfg.ceiling_ms,
            groups = state.groups.len(),
            "animation discovery reached its ceiling; page keeps starting animations"
        );
    }

    let container = state
        .container
        .ok_or_else(|| CaptureError::ElementNotFound(selector.to_string()))?;
    let dropped = state.dropped + state.pending.len();

    let discovery = Discovery {
        groups: state.groups,
        container,
        hit_ceiling,
        dropped,
    };
    let ids = discovery.all_ids();
    if !ids.is_empty() {
        page.seek_animations(&ids, 0.0).await?;
    }
    tracing::info!(
        groups = discovery.groups.len(),
        animations = ids.len(),
        dropped,
        "animation discovery finished"
    );
    Ok(discovery)
}

#[cfg(test)]
#[path = "../../tests/unit/animation/discovery.rs"]
mod tests;
