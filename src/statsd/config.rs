//! Daemon configuration.

use std::time::Duration;

use crate::{StatError, StatResult};

/// Per-key-prefix histogram rule for timers.
///
/// A timer whose key starts with the rule's prefix accumulates bin counts
/// alongside its quantile state. Bin 0 holds values below `min_val`, the
/// last bin holds values at or above `max_val`, and the bins between are
/// evenly spaced with width `bin_width` starting at `min_val`.
#[derive(Debug, Clone, PartialEq)]
pub struct HistogramRule {
    prefix: Vec<u8>,
    min_val: f64,
    max_val: f64,
    bin_width: f64,
    num_bins: usize,
}

impl HistogramRule {
    /// Creates a rule for keys starting with `prefix`.
    ///
    /// # Errors
    /// Returns [`StatError`] if `bin_width` is not positive or `max_val`
    /// does not exceed `min_val`.
    pub fn new(
        prefix: impl Into<Vec<u8>>,
        min_val: f64,
        max_val: f64,
        bin_width: f64,
    ) -> StatResult<Self> {
        if !(bin_width > 0.0) {
            return Err(StatError::from("histogram bin width must be positive"));
        }
        if max_val <= min_val {
            return Err(StatError::from(
                "histogram max value must exceed the min value",
            ));
        }
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let num_bins = ((max_val - min_val) / bin_width) as usize + 2;
        Ok(Self {
            prefix: prefix.into(),
            min_val,
            max_val,
            bin_width,
            num_bins,
        })
    }

    /// Whether this rule applies to `key`.
    #[must_use]
    pub fn matches(&self, key: &[u8]) -> bool {
        key.starts_with(&self.prefix)
    }

    /// Lower bound of the evenly spaced bins.
    #[must_use]
    pub const fn min_val(&self) -> f64 {
        self.min_val
    }

    /// Upper bound; values at or above it land in the overflow bin.
    #[must_use]
    pub const fn max_val(&self) -> f64 {
        self.max_val
    }

    /// Width of each evenly spaced bin.
    #[must_use]
    pub const fn bin_width(&self) -> f64 {
        self.bin_width
    }

    /// Total bin count, including the underflow and overflow bins.
    #[must_use]
    pub const fn num_bins(&self) -> usize {
        self.num_bins
    }
}

/// Options controlling ingest, aggregation and flushing.
#[derive(Debug, Clone)]
pub struct Config {
    /// Error tolerance promised for timer quantile queries.
    pub timer_eps: f64,
    /// Histogram rules applied to timers by key prefix; first match wins.
    pub histograms: Vec<HistogramRule>,
    /// Accuracy knob for set cardinality estimation.
    pub set_precision: u8,
    /// Emit packed binary records instead of text lines on flush.
    pub binary_stream: bool,
    /// Command each flushed snapshot is streamed to.
    pub stream_cmd: String,
    /// When set, a counter under this key is bumped once per accepted sample.
    pub input_counter: Option<String>,
    /// How often the live aggregator is rotated.
    pub flush_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            timer_eps: 0.01,
            histograms: Vec::new(),
            set_precision: 12,
            binary_stream: false,
            stream_cmd: "cat".to_string(),
            input_counter: None,
            flush_interval: Duration::from_secs(10),
        }
    }
}
