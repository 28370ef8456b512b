//! Zero-cost tracing helpers.
//!
//! When the `tracing` feature is enabled, these macros forward to the
//! `tracing` crate. When disabled (default), they compile to no-ops with
//! zero runtime overhead.
//!
//! ```bash
//! # Normal build - no tracing overhead
//! cargo build --release
//!
//! # Run tests with slab/buffer churn logged
//! RUST_LOG=metamem=debug cargo test --features tracing
//! ```

#![allow(unused_macros, unused_imports)]

/// Trace-level logging (most verbose). Compiles to no-op without `tracing` feature.
#[cfg(feature = "tracing")]
macro_rules! trace_log {
    ($($arg:tt)*) => {
        tracing::trace!($($arg)*)
    };
}

#[cfg(not(feature = "tracing"))]
macro_rules! trace_log {
    ($($arg:tt)*) => {
        // Completely empty - zero cost
    };
}

/// Debug-level logging. Compiles to no-op without `tracing` feature.
#[cfg(feature = "tracing")]
macro_rules! debug_log {
    ($($arg:tt)*) => {
        tracing::debug!($($arg)*)
    };
}

#[cfg(not(feature = "tracing"))]
macro_rules! debug_log {
    ($($arg:tt)*) => {};
}

/// Warn-level logging. Compiles to no-op without `tracing` feature.
#[cfg(feature = "tracing")]
macro_rules! warn_log {
    ($($arg:tt)*) => {
        tracing::warn!($($arg)*)
    };
}

#[cfg(not(feature = "tracing"))]
macro_rules! warn_log {
    ($($arg:tt)*) => {};
}

// Export macros for use within crate
pub(crate) use debug_log;
pub(crate) use trace_log;
pub(crate) use warn_log;
