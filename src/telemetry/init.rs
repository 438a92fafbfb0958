// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Telemetry initialization and configuration.

use std::io;
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Configuration for telemetry initialization.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Default log level if RUST_LOG is not set.
    pub default_level: Level,

    /// Whether to include span events (enter/exit).
    pub include_span_events: bool,

    /// Whether to include file/line information.
    pub include_file_line: bool,

    /// Whether to include target module path.
    pub include_target: bool,

    /// Whether to use ANSI colors in output.
    pub ansi_colors: bool,

    /// Whether to use compact log format.
    pub compact: bool,

    /// Filter directive used when RUST_LOG is not set (overrides default_level).
    pub filter_directive: Option<String>,

    /// Log a metrics report when the guard drops.
    pub report_metrics: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            default_level: Level::INFO,
            include_span_events: false,
            include_file_line: false,
            include_target: true,
            ansi_colors: true,
            compact: true,
            filter_directive: None,
            report_metrics: false,
        }
    }
}

impl TelemetryConfig {
    /// Create a config suitable for development with verbose output.
    pub fn development() -> Self {
        Self {
            default_level: Level::DEBUG,
            include_span_events: true,
            include_file_line: true,
            include_target: true,
            ansi_colors: true,
            compact: false,
            filter_directive: None,
            report_metrics: true,
        }
    }

    /// Create a config suitable for production with minimal output.
    pub fn production() -> Self {
        Self {
            default_level: Level::WARN,
            include_span_events: false,
            include_file_line: false,
            include_target: false,
            ansi_colors: false,
            compact: true,
            filter_directive: None,
            report_metrics: false,
        }
    }
}

/// Guard returned by [`init_telemetry`].
///
/// Keep this guard alive for the duration of your program. With the
/// `telemetry` feature and `report_metrics` set, dropping it logs a metrics
/// report at debug level.
pub struct TelemetryGuard {
    #[cfg_attr(not(feature = "telemetry"), allow(dead_code))]
    report_metrics: bool,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        #[cfg(feature = "telemetry")]
        if self.report_metrics {
            tracing::debug!("{}", super::metrics::GLOBAL_METRICS.snapshot().format_report());
        }
    }
}

/// Initialize telemetry with the given configuration.
///
/// This should be called once at application startup.
///
/// # Example
///
/// ```rust,ignore
/// use minion::telemetry::{init_telemetry, TelemetryConfig};
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let _guard = init_telemetry(&TelemetryConfig::default())?;
///
///     // Your application code here
///
///     Ok(())
/// }
/// ```
pub fn init_telemetry(config: &TelemetryConfig) -> io::Result<TelemetryGuard> {
    let filter = build_filter(config);

    // Build span events
    let span_events = if config.include_span_events {
        FmtSpan::ENTER | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    // Build the formatter layer
    let fmt_layer = fmt::layer()
        .with_ansi(config.ansi_colors)
        .with_target(config.include_target)
        .with_file(config.include_file_line)
        .with_line_number(config.include_file_line)
        .with_span_events(span_events);

    // Apply compact format if requested
    if config.compact {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer.compact())
            .try_init()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer)
            .try_init()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
    }

    Ok(TelemetryGuard {
        report_metrics: config.report_metrics,
    })
}

/// RUST_LOG wins, then the configured directive, then the default level.
fn build_filter(config: &TelemetryConfig) -> EnvFilter {
    let fallback = || EnvFilter::new(config.default_level.to_string());
    EnvFilter::try_from_default_env().unwrap_or_else(|_| match &config.filter_directive {
        Some(directive) => EnvFilter::try_new(directive).unwrap_or_else(|_| fallback()),
        None => fallback(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_filter_uses_directive() {
        let config = TelemetryConfig {
            filter_directive: Some("minion=trace".to_string()),
            ..TelemetryConfig::production()
        };
        if std::env::var_os("RUST_LOG").is_none() {
            assert_eq!(build_filter(&config).to_string(), "minion=trace");
        }
    }

    #[test]
    fn test_telemetry_config_default() {
        let config = TelemetryConfig::default();
        assert_eq!(config.default_level, Level::INFO);
        assert!(config.ansi_colors);
        assert!(config.compact);
    }

    #[test]
    fn test_telemetry_config_development() {
        let config = TelemetryConfig::development();
        assert_eq!(config.default_level, Level::DEBUG);
        assert!(config.include_span_events);
    }

    #[test]
    fn test_telemetry_config_production() {
        let config = TelemetryConfig::production();
        assert_eq!(config.default_level, Level::WARN);
        assert!(!config.include_span_events);
        assert!(!config.report_metrics);
    }
}
