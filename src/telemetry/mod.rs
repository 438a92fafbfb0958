// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Tracing and metrics infrastructure.
//!
//! - **Tracing**: structured logging through `tracing-subscriber`, filtered
//!   by `RUST_LOG` or a configured directive.
//! - **Metrics**: in-process counters and latency histograms for git
//!   invocations and task executions, compiled in with the `telemetry`
//!   feature.
//!
//! # Usage
//!
//! Initialize telemetry at application startup:
//!
//! ```rust,ignore
//! use minion::telemetry::{init_telemetry, TelemetryConfig};
//!
//! let _guard = init_telemetry(&TelemetryConfig::default())?;
//! ```
//!
//! Public async entry points carry `#[instrument]`; lifecycle transitions log
//! at `info`, git invocations at `debug`, best-effort failures at `warn`.

mod init;
pub mod metrics;

pub use init::{init_telemetry, TelemetryConfig, TelemetryGuard};
pub use metrics::{
    Histogram, Metrics, MetricsSnapshot, OperationMetrics, TaskMetrics, GLOBAL_METRICS,
};
