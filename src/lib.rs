//! animcap turns animated web content into looping GIFs.
//!
//! A page is leased from a pool of headless browsers, its animations are discovered and paused
//! through the browser's instrumentation protocol, and frames are sampled in one of two modes:
//!
//! 1. **Deterministic**: pick a discovered animation group and seek it through its timeline at a
//!    fixed rate. Pure CSS/Web Animations content replays exactly.
//! 2. **Event-driven**: the page calls an injected host function for every frame it wants
//!    captured and another one when it is done. A timer shim dilates the page clock so canvas
//!    and script-driven effects can be slowed down or sped up.
//!
//! Frames are resized per quality preset, written in order to an `ffmpeg` palette pipeline and
//! streamed straight into object storage. A public URL is only produced once both the encoder
//! and the upload have finished.
//!
//! - **No unsafe**: `unsafe` is forbidden in this crate.
//! - **No partial output**: a failed encode deletes whatever was uploaded.
//! - **Offline testable**: [`ScriptedPage`], [`InMemoryEncoder`] and [`MemoryStore`] stand in
//!   for the browser, the encoder and the store.
#![forbid(unsafe_code)]

mod animation;
mod browser;
mod capture;
mod encode;
mod foundation;
mod pool;
mod quality;
mod service;
mod storage;

pub use animation::discovery::{
    AnimationGroup, Discovery, START_TIME_EPSILON_MS, discover, insert_record,
};
pub use browser::chromium::{ChromiumBrowser, ChromiumFactory, ChromiumPage};
pub use browser::driver::{
    AnimationRecord, BindingCall, EVENT_CHANNEL_CAPACITY, NodeHandle, PageDriver, PageOpener,
    ScriptId,
};
pub use browser::scripted::{BoundsFn, PageLog, ScriptedPage};
pub use capture::deterministic::{
    DeterministicCapture, DeterministicPlan, capture_deterministic, sample_times,
};
pub use capture::event_driven::{
    CAPTURE_FRAME_BINDING, EventCapturePlan, EventDrivenCapture, STOP_CAPTURE_BINDING,
    TIME_SHIM_VERSION, capture_event_driven, time_shim_script,
};
pub use capture::frames::{
    FRAME_QUEUE_DEPTH, FrameProcessor, OrderedFrameWriter, PendingFrame, WriterReport,
};
pub use encode::ffmpeg::{
    FfmpegGifEncoder, FfmpegOpts, build_args, build_palette_filter, is_ffmpeg_on_path,
};
pub use encode::session::{EncodeSession, EncodeState, EncodedAnimation, GIF_CONTENT_TYPE};
pub use encode::sink::{
    EncodeConfig, EncoderFactory, FfmpegEncoderFactory, FrameEncoder, InMemoryEncoder,
    InMemoryEncoderFactory, RecordedEncode,
};
pub use foundation::config::{
    BrowserConfig, CaptureConfig, DiscoveryConfig, EncoderConfig, EventCaptureConfig,
    PoolConfig, StorageConfig,
};
pub use foundation::core::{
    CaptureClip, CaptureTarget, DOCUMENT_ROOT_SELECTOR, Fps, FrameBuffer, MIN_CLIP_EDGE,
    PageSource, Point, Rect, Viewport, even_dimension,
};
pub use foundation::error::{CaptureError, CaptureResult};
pub use pool::resource_pool::{Lease, Pool, PoolOpts, PoolStats, ResourceFactory};
pub use quality::preset::{
    Dither, PaletteParams, QualityKey, QualityPreset, ResampleParams, StatsMode, resolve_preset,
};
pub use service::{
    CaptureMetadata, CaptureMode, CaptureOutput, CaptureService, DeterministicRequest,
    EventDrivenRequest,
};
pub use storage::store::{
    LocalDirStore, MemoryStore, ObjectStore, StorageKey, StoredObject, UploadBody,
    render_media_url,
};
