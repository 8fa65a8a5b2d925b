//! Common utilities shared across consul-pager crates.

pub mod logging;

pub use logging::LogFormat;
