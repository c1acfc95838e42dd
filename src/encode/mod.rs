//! GIF encoding and the upload it feeds.
//!
//! Frames reach the encoder in capture order; its output streams straight into object storage.

/// `ffmpeg`-based GIF encoder.
pub mod ffmpeg;
/// Encoder lifecycle tied to one upload.
pub mod session;
/// Encoder trait and built-in encoders.
pub mod sink;
