//! Shared helpers: process bootstrap and send instrumentation.

pub mod bootstrap;
pub mod metrics;
