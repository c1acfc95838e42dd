//! Browser pages behind a typed protocol client.

/// Chromium over the DevTools protocol.
pub mod chromium;
/// The page-driver trait every capture mode is written against.
pub mod driver;
/// Deterministic in-memory page.
pub mod scripted;
