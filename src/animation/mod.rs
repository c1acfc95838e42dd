//! Protocol-level animation discovery and grouping.

pub mod discovery;
