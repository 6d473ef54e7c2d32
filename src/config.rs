//! Configuration for scanning and edit sessions.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default horizontal gap allowed between tokens of one text run.
pub const DEFAULT_X_TOLERANCE: f64 = 4.0;

/// Default vertical drift allowed between tokens of one text run.
pub const DEFAULT_Y_TOLERANCE: f64 = 2.0;

/// Default lookback (in bytes) when attaching a `cm` to a draw or path.
pub const DEFAULT_LOOKBACK_WINDOW: usize = 600;

/// Default decimal places for rewritten operands.
pub const DEFAULT_NUMBER_PRECISION: usize = 4;

/// Content-stream scanning options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanOptions {
    /// Maximum horizontal gap between coalesced text tokens.
    pub x_tolerance: f64,

    /// Maximum vertical difference between coalesced text tokens.
    pub y_tolerance: f64,

    /// How far back (in bytes) to look for a transform feeding an
    /// XObject draw, rectangle or path.
    pub lookback_window: usize,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl ScanOptions {
    /// Create options with the default tolerances.
    pub fn new() -> Self {
        Self {
            x_tolerance: DEFAULT_X_TOLERANCE,
            y_tolerance: DEFAULT_Y_TOLERANCE,
            lookback_window: DEFAULT_LOOKBACK_WINDOW,
        }
    }

    /// Set the horizontal coalescing tolerance.
    pub fn with_x_tolerance(mut self, tolerance: f64) -> Self {
        self.x_tolerance = tolerance;
        self
    }

    /// Set the vertical coalescing tolerance.
    pub fn with_y_tolerance(mut self, tolerance: f64) -> Self {
        self.y_tolerance = tolerance;
        self
    }

    /// Set the transform lookback window.
    pub fn with_lookback_window(mut self, window: usize) -> Self {
        self.lookback_window = window;
        self
    }
}

/// Edit-session and worker configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Quiet period before scheduled edits are appended as one revision.
    pub debounce: Duration,

    /// Idle time after the last append before a background re-parse.
    pub reconcile_idle: Duration,

    /// Number of scan workers in the pool.
    pub scan_workers: usize,

    /// Decimal places kept when formatting rewritten operands.
    pub number_precision: usize,

    /// Field widths `[type, offset, generation]` for appended xref streams.
    pub xref_widths: [usize; 3],
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionConfig {
    /// Create a configuration with defaults.
    pub fn new() -> Self {
        Self {
            debounce: Duration::from_millis(450),
            reconcile_idle: Duration::from_millis(1200),
            scan_workers: 4,
            number_precision: DEFAULT_NUMBER_PRECISION,
            xref_widths: [1, 8, 2],
        }
    }

    /// Set the debounce window.
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Set the idle delay before reconciliation.
    pub fn with_reconcile_idle(mut self, idle: Duration) -> Self {
        self.reconcile_idle = idle;
        self
    }

    /// Set the scan pool size (at least one worker).
    pub fn with_scan_workers(mut self, workers: usize) -> Self {
        self.scan_workers = workers.max(1);
        self
    }

    /// Set the decimal places for rewritten operands.
    pub fn with_number_precision(mut self, precision: usize) -> Self {
        self.number_precision = precision;
        self
    }

    /// Set the xref stream field widths.
    pub fn with_xref_widths(mut self, widths: [usize; 3]) -> Self {
        self.xref_widths = widths;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_defaults() {
        let opts = ScanOptions::default();
        assert_eq!(opts.x_tolerance, 4.0);
        assert_eq!(opts.y_tolerance, 2.0);
        assert_eq!(opts.lookback_window, 600);
    }

    #[test]
    fn test_scan_builder() {
        let opts = ScanOptions::new()
            .with_x_tolerance(10.0)
            .with_y_tolerance(0.5)
            .with_lookback_window(64);
        assert_eq!(opts.x_tolerance, 10.0);
        assert_eq!(opts.y_tolerance, 0.5);
        assert_eq!(opts.lookback_window, 64);
    }

    #[test]
    fn test_session_workers_never_zero() {
        let cfg = SessionConfig::new().with_scan_workers(0);
        assert_eq!(cfg.scan_workers, 1);
    }

    #[test]
    fn test_session_config_json() {
        let cfg = SessionConfig::new().with_debounce(Duration::from_millis(10));
        let json = serde_json::to_string(&cfg).unwrap();
        let back: SessionConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cfg);
    }
}
