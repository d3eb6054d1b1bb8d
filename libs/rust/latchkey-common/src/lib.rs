//! Shared library for cross-cutting concerns in latchkey Rust services.
//!
//! This crate provides centralized implementations for:
//! - Error types with retryability classification
//! - Retry policies with fixed backoff
//! - Tracing subscriber configuration

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod retry;
pub mod tracing_config;

pub use error::PlatformError;
pub use retry::{RetryConfig, RetryPolicy};
pub use tracing_config::{init_tracing, TracingConfig};
