use std::collections::{HashMap, HashSet};
use std::io::Cursor;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::browser::driver::{
    AnimationRecord, BindingCall, EVENT_CHANNEL_CAPACITY, NodeHandle, PageDriver, ScriptId,
};
use crate::foundation::core::{CaptureClip, DOCUMENT_ROOT_SELECTOR, PageSource, Rect, Viewport};
use crate::foundation::error::{CaptureError, CaptureResult};

/// Bounds of an element as a function of the animation timeline (ms).
pub type BoundsFn = Arc<dyn Fn(f64) -> Option<Rect> + Send + Sync>;

/// Everything a [`ScriptedPage`] was asked to do, in call order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PageLog {
    pub loaded: Option<PageSource>,
    pub viewports: Vec<Viewport>,
    pub playback_rates: Vec<f64>,
    pub paused: Vec<String>,
    pub seeks: Vec<f64>,
    pub released: Vec<String>,
    /// Time-compression factors pushed into the page via `setFactor(..)`.
    pub time_factors: Vec<f64>,
    pub time_resets: usize,
    pub screenshots: u64,
    /// Init scripts still registered.
    pub init_scripts: Vec<String>,
    pub bindings: Vec<String>,
    pub closed: bool,
}

struct ScriptState {
    time_ms: f64,
    animation_tx: Option<mpsc::Sender<AnimationRecord>>,
    binding_tx: Option<mpsc::Sender<BindingCall>>,
    query_calls: u32,
    containment_failures_left: u32,
    next_script: u64,
    scripts: Vec<(ScriptId, String)>,
    tasks: Vec<JoinHandle<()>>,
    log: PageLog,
}

/// Deterministic in-memory page for tests and offline checks.
///
/// Animations and page-initiated calls are replayed on a timer after `load`. Screenshots are
/// solid-color PNGs whose color is a pure function of the current (seeked) animation time, so
/// two screenshots at the same time are byte-identical.
pub struct ScriptedPage {
    animations: Vec<(Duration, AnimationRecord)>,
    calls: Vec<(Duration, BindingCall)>,
    elements: HashMap<String, BoundsFn>,
    outside: HashSet<i64>,
    container_ready_after: u32,
    shot_delays: HashMap<u64, Duration>,
    fail_after_shots: Option<u64>,
    advance_per_shot_ms: f64,
    state: Mutex<ScriptState>,
}

impl ScriptedPage {
    /// A blank page whose document root covers `viewport`.
    pub fn new(viewport: Viewport) -> Self {
        let root = Rect::new(0.0, 0.0, f64::from(viewport.width), f64::from(viewport.height));
        Self {
            animations: Vec::new(),
            calls: Vec::new(),
            elements: HashMap::new(),
            outside: HashSet::new(),
            container_ready_after: 0,
            shot_delays: HashMap::new(),
            fail_after_shots: None,
            advance_per_shot_ms: 0.0,
            state: Mutex::new(ScriptState {
                time_ms: 0.0,
                animation_tx: None,
                binding_tx: None,
                query_calls: 0,
                containment_failures_left: 0,
                next_script: 0,
                scripts: Vec::new(),
                tasks: Vec::new(),
                log: PageLog::default(),
            }),
        }
        .with_element(DOCUMENT_ROOT_SELECTOR, root)
    }

    /// Report `record` as started `after` the page finished loading.
    pub fn with_animation(mut self, record: AnimationRecord, after: Duration) -> Self {
        self.animations.push((after, record));
        self
    }

    /// Invoke the host function `name` from the page `after` load.
    pub fn with_page_call(mut self, name: &str, payload: &str, after: Duration) -> Self {
        self.calls.push((
            after,
            BindingCall {
                name: name.to_string(),
                payload: payload.to_string(),
            },
        ));
        self
    }

    /// Static element matched by `selector`.
    pub fn with_element(self, selector: &str, bounds: Rect) -> Self {
        self.with_moving_element(selector, move |_| Some(bounds))
    }

    /// Element whose bounding box depends on the animation time.
    pub fn with_moving_element(
        mut self,
        selector: &str,
        bounds: impl Fn(f64) -> Option<Rect> + Send + Sync + 'static,
    ) -> Self {
        self.elements.insert(selector.to_string(), Arc::new(bounds));
        self
    }

    /// Animations targeting `backend_node_id` are not inside any captured element other than
    /// the document root.
    pub fn with_outside_node(mut self, backend_node_id: i64) -> Self {
        self.outside.insert(backend_node_id);
        self
    }

    /// `query_selector` finds nothing for the first `calls` attempts.
    pub fn with_container_ready_after(mut self, calls: u32) -> Self {
        self.container_ready_after = calls;
        self
    }

    /// The first `n` containment checks fail with a protocol error.
    pub fn with_containment_failures(self, n: u32) -> Self {
        self.lock().containment_failures_left = n;
        self
    }

    /// Delay the `seq`-th screenshot (0-based) by `delay`.
    pub fn with_screenshot_delay(mut self, seq: u64, delay: Duration) -> Self {
        self.shot_delays.insert(seq, delay);
        self
    }

    /// Every screenshot from the `n`-th on fails as if the page were closing.
    pub fn failing_after_shots(mut self, n: u64) -> Self {
        self.fail_after_shots = Some(n);
        self
    }

    /// Advance the page clock after each screenshot so un-seeked frames still differ.
    pub fn advancing_per_shot(mut self, ms: f64) -> Self {
        self.advance_per_shot_ms = ms;
        self
    }

    /// Snapshot of what the page has been asked to do so far.
    pub fn log(&self) -> PageLog {
        let st = self.lock();
        let mut log = st.log.clone();
        log.init_scripts = st.scripts.iter().map(|(_, src)| src.clone()).collect();
        log
    }

    pub fn current_time_ms(&self) -> f64 {
        self.lock().time_ms
    }

    /// Invoke an exposed host function from the page right now.
    pub fn page_call(&self, name: &str, payload: &str) -> CaptureResult<()> {
        let tx = self
            .lock()
            .binding_tx
            .clone()
            .ok_or_else(|| CaptureError::protocol("no binding subscription"))?;
        tx.try_send(BindingCall {
            name: name.to_string(),
            payload: payload.to_string(),
        })
        .map_err(|e| CaptureError::protocol(format!("binding channel: {e}")))
    }

    /// Solid-color PNG for the pixel contents of the page at `time_ms`.
    pub fn render_png(width: u32, height: u32, time_ms: f64) -> CaptureResult<Vec<u8>> {
        let t = time_ms.max(0.0).round() as u64;
        let px = image::Rgba([(t % 256) as u8, ((t / 256) % 256) as u8, 128, 255]);
        let img = image::RgbaImage::from_pixel(width, height, px);
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, image::ImageFormat::Png)
            .map_err(|e| CaptureError::protocol(format!("scripted screenshot encode: {e}")))?;
        Ok(out.into_inner())
    }

    fn lock(&self) -> MutexGuard<'_, ScriptState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn ensure_open(&self) -> CaptureResult<()> {
        if self.lock().log.closed {
            return Err(CaptureError::page_closed("scripted page is closed"));
        }
        Ok(())
    }

    fn spawn_replays(&self) {
        let mut st = self.lock();
        let start = tokio::time::Instant::now();

        if let Some(tx) = st.animation_tx.clone() {
            let mut animations = self.animations.clone();
            animations.sort_by_key(|(after, _)| *after);
            st.tasks.push(tokio::spawn(async move {
                for (after, record) in animations {
                    tokio::time::sleep_until(start + after).await;
                    if tx.send(record).await.is_err() {
                        break;
                    }
                }
            }));
        }

        if let Some(tx) = st.binding_tx.clone() {
            let mut calls = self.calls.clone();
            calls.sort_by_key(|(after, _)| *after);
            st.tasks.push(tokio::spawn(async move {
                for (after, call) in calls {
                    tokio::time::sleep_until(start + after).await;
                    if tx.send(call).await.is_err() {
                        break;
                    }
                }
            }));
        }
    }
}

#[async_trait]
impl PageDriver for ScriptedPage {
    async fn set_viewport(&self, viewport: Viewport) -> CaptureResult<()> {
        self.ensure_open()?;
        self.lock().log.viewports.push(viewport);
        Ok(())
    }

    async fn load(&self, source: &PageSource) -> CaptureResult<()> {
        self.ensure_open()?;
        self.lock().log.loaded = Some(source.clone());
        self.spawn_replays();
        Ok(())
    }

    async fn animation_events(&self) -> CaptureResult<mpsc::Receiver<AnimationRecord>> {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        self.lock().animation_tx = Some(tx);
        Ok(rx)
    }

    async fn enable_animations(&self) -> CaptureResult<()> {
        self.ensure_open()
    }

    async fn set_playback_rate(&self, rate: f64) -> CaptureResult<()> {
        self.ensure_open()?;
        self.lock().log.playback_rates.push(rate);
        Ok(())
    }

    async fn set_paused(&self, ids: &[String], paused: bool) -> CaptureResult<()> {
        self.ensure_open()?;
        if paused {
            self.lock().log.paused.extend(ids.iter().cloned());
        }
        Ok(())
    }

    async fn seek_animations(&self, _ids: &[String], time_ms: f64) -> CaptureResult<()> {
        self.ensure_open()?;
        let mut st = self.lock();
        st.time_ms = time_ms;
        st.log.seeks.push(time_ms);
        Ok(())
    }

    async fn release_animations(&self, ids: &[String]) -> CaptureResult<()> {
        self.ensure_open()?;
        self.lock().log.released.extend(ids.iter().cloned());
        Ok(())
    }

    async fn query_selector(&self, selector: &str) -> CaptureResult<Option<NodeHandle>> {
        self.ensure_open()?;
        let mut st = self.lock();
        st.query_calls += 1;
        if st.query_calls <= self.container_ready_after {
            return Ok(None);
        }
        Ok(self
            .elements
            .contains_key(selector)
            .then(|| NodeHandle(selector.to_string())))
    }

    async fn node_contains(
        &self,
        container: &NodeHandle,
        backend_node_id: i64,
    ) -> CaptureResult<bool> {
        self.ensure_open()?;
        {
            let mut st = self.lock();
            if st.containment_failures_left > 0 {
                st.containment_failures_left -= 1;
                return Err(CaptureError::protocol("could not resolve animation source node"));
            }
        }
        Ok(container.0 == DOCUMENT_ROOT_SELECTOR || !self.outside.contains(&backend_node_id))
    }

    async fn subtree_bounds(&self, selector: &str) -> CaptureResult<Option<Rect>> {
        self.ensure_open()?;
        let t = self.current_time_ms();
        Ok(self.elements.get(selector).and_then(|f| f(t)))
    }

    async fn screenshot(&self, clip: CaptureClip) -> CaptureResult<Vec<u8>> {
        let (seq, time_ms) = {
            let mut st = self.lock();
            if st.log.closed {
                return Err(CaptureError::page_closed("scripted page is closed"));
            }
            let seq = st.log.screenshots;
            st.log.screenshots += 1;
            let time_ms = st.time_ms;
            st.time_ms += self.advance_per_shot_ms;
            (seq, time_ms)
        };
        if self.fail_after_shots.is_some_and(|n| seq >= n) {
            return Err(CaptureError::page_closed("target closed during screenshot"));
        }
        if let Some(delay) = self.shot_delays.get(&seq) {
            tokio::time::sleep(*delay).await;
        }
        Self::render_png(clip.width, clip.height, time_ms)
    }

    async fn evaluate(&self, expression: &str) -> CaptureResult<serde_json::Value> {
        self.ensure_open()?;
        let mut st = self.lock();
        if let Some(rest) = expression.split("setFactor(").nth(1)
            && let Some(arg) = rest.split(')').next()
            && let Ok(factor) = arg.trim().parse::<f64>()
        {
            st.log.time_factors.push(factor);
        } else if expression.contains(".reset(") {
            st.log.time_resets += 1;
        }
        Ok(serde_json::Value::Null)
    }

    async fn add_init_script(&self, source: &str) -> CaptureResult<ScriptId> {
        self.ensure_open()?;
        let mut st = self.lock();
        st.next_script += 1;
        let id = ScriptId(st.next_script.to_string());
        st.scripts.push((id.clone(), source.to_string()));
        Ok(id)
    }

    async fn remove_init_script(&self, id: &ScriptId) -> CaptureResult<()> {
        self.ensure_open()?;
        self.lock().scripts.retain(|(sid, _)| sid != id);
        Ok(())
    }

    async fn add_binding(&self, name: &str) -> CaptureResult<()> {
        self.ensure_open()?;
        self.lock().log.bindings.push(name.to_string());
        Ok(())
    }

    async fn remove_binding(&self, name: &str) -> CaptureResult<()> {
        self.ensure_open()?;
        self.lock().log.bindings.retain(|b| b != name);
        Ok(())
    }

    async fn binding_calls(&self) -> CaptureResult<mpsc::Receiver<BindingCall>> {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        self.lock().binding_tx = Some(tx);
        Ok(rx)
    }

    async fn close(&self) -> CaptureResult<()> {
        let mut st = self.lock();
        st.log.closed = true;
        st.animation_tx = None;
        st.binding_tx = None;
        for task in st.tasks.drain(..) {
            task.abort();
        }
        Ok(())
    }
}

impl Drop for ScriptedPage {
    fn drop(&mut self) {
        for task in self.lock().tasks.drain(..) {
            task.abort();
        }
    }
}

#[cfg(test)]
#[path = "../../tests/unit/browser/scripted.rs"]
mod tests;
