//! Frame sampling: deterministic seeking and page-driven capture.

pub mod deterministic;
pub mod event_driven;
/// Per-frame resampling and the ordered write queue.
pub mod frames;
