use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::foundation::core::{CaptureClip, PageSource, Rect, Viewport};
use crate::foundation::error::CaptureResult;

/// Capacity of the FIFO channels that carry protocol events to their single consumer.
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// One protocol-level animation instance, as reported by the "animation started" event.
#[derive(Clone, Debug, PartialEq)]
pub struct AnimationRecord {
    pub id: String,
    /// Page timeline start, in milliseconds.
    pub start_time: f64,
    pub delay: f64,
    pub duration: f64,
    /// DOM node the animation targets, when it has one.
    pub backend_node_id: Option<i64>,
}

impl AnimationRecord {
    /// Time at which one iteration has fully played, relative to the animation start.
    pub fn end_time(&self) -> f64 {
        self.delay + self.duration
    }
}

/// A page invoked one of the host functions exposed with [`PageDriver::add_binding`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BindingCall {
    pub name: String,
    pub payload: String,
}

/// In-page reference to a resolved DOM node.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct NodeHandle(pub String);

/// Identifier of a script registered with [`PageDriver::add_init_script`].
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ScriptId(pub String);

/// Typed client over the browser instrumentation protocol.
///
/// One method per protocol command the capture pipeline uses. Event subscriptions are delivered
/// through bounded FIFO channels so a single task consumes them in order.
#[async_trait]
pub trait PageDriver: Send + Sync {
    async fn set_viewport(&self, viewport: Viewport) -> CaptureResult<()>;

    /// Navigate to a URL or inject an HTML document, waiting for the load to finish.
    async fn load(&self, source: &PageSource) -> CaptureResult<()>;

    /// Subscribe to "animation started" events. Subscribe before [`PageDriver::load`].
    async fn animation_events(&self) -> CaptureResult<mpsc::Receiver<AnimationRecord>>;

    async fn enable_animations(&self) -> CaptureResult<()>;

    async fn set_playback_rate(&self, rate: f64) -> CaptureResult<()>;

    async fn set_paused(&self, ids: &[String], paused: bool) -> CaptureResult<()>;

    /// Seek animations to `time_ms` on their own timeline.
    async fn seek_animations(&self, ids: &[String], time_ms: f64) -> CaptureResult<()>;

    async fn release_animations(&self, ids: &[String]) -> CaptureResult<()>;

    async fn query_selector(&self, selector: &str) -> CaptureResult<Option<NodeHandle>>;

    /// Whether the node behind `backend_node_id` is `container` or one of its descendants.
    async fn node_contains(
        &self,
        container: &NodeHandle,
        backend_node_id: i64,
    ) -> CaptureResult<bool>;

    /// Union of the page-space boxes of the selected element and all its descendants.
    async fn subtree_bounds(&self, selector: &str) -> CaptureResult<Option<Rect>>;

    /// PNG screenshot of `clip`.
    async fn screenshot(&self, clip: CaptureClip) -> CaptureResult<Vec<u8>>;

    /// Evaluate an expression in the page, returning its JSON value (`null` when undefined).
    async fn evaluate(&self, expression: &str) -> CaptureResult<serde_json::Value>;

    /// Register a script that runs before any page script on every new document.
    async fn add_init_script(&self, source: &str) -> CaptureResult<ScriptId>;

    async fn remove_init_script(&self, id: &ScriptId) -> CaptureResult<()>;

    /// Expose a page-invokable host function named `name`.
    async fn add_binding(&self, name: &str) -> CaptureResult<()>;

    async fn remove_binding(&self, name: &str) -> CaptureResult<()>;

    /// Subscribe to invocations of exposed host functions.
    async fn binding_calls(&self) -> CaptureResult<mpsc::Receiver<BindingCall>>;

    async fn close(&self) -> CaptureResult<()>;
}

/// Opens pages on a pooled browser resource.
#[async_trait]
pub trait PageOpener: Send + Sync {
    type Page: PageDriver + 'static;

    async fn open_page(&self, viewport: Viewport) -> CaptureResult<Self::Page>;
}
