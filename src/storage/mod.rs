//! Object keys, public URLs and the stores behind them.

pub mod store;
