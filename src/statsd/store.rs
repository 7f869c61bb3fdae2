//! Per-generation aggregation state.
//!
//! One [`MetricStore`] lives per flush generation: mutated by the ingest
//! path until rotation, then read-only for the drain task that formats it.

use std::collections::{HashMap, HashSet};
use std::io;

use tracing::error;

use crate::statsd::config::HistogramRule;
use crate::statsd::MetricKind;

/// Running moment sketch shared by counters and timers.
#[derive(Debug, Clone)]
pub struct RunningStats {
    count: u64,
    sum: f64,
    sum_sq: f64,
    min: f64,
    max: f64,
}

impl RunningStats {
    const fn new() -> Self {
        Self {
            count: 0,
            sum: 0.0,
            sum_sq: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }

    fn add(&mut self, value: f64) {
        self.count += 1;
        self.sum += value;
        self.sum_sq += value * value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }

    /// Number of recorded samples.
    #[must_use]
    pub const fn count(&self) -> u64 {
        self.count
    }

    /// Sum of recorded samples.
    #[must_use]
    pub const fn sum(&self) -> f64 {
        self.sum
    }

    /// Sum of squared samples.
    #[must_use]
    pub const fn sum_sq(&self) -> f64 {
        self.sum_sq
    }

    /// Arithmetic mean, or zero before the first sample.
    #[must_use]
    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        {
            self.sum / self.count as f64
        }
    }

    /// Sample standard deviation, or zero below two samples.
    #[must_use]
    pub fn stddev(&self) -> f64 {
        if self.count < 2 {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let n = self.count as f64;
        let variance = (self.sum_sq - self.sum * self.sum / n) / (n - 1.0);
        variance.max(0.0).sqrt()
    }

    /// Smallest recorded sample.
    #[must_use]
    pub const fn min(&self) -> f64 {
        self.min
    }

    /// Largest recorded sample.
    #[must_use]
    pub const fn max(&self) -> f64 {
        self.max
    }
}

/// Bin counts for a timer matched by a histogram rule.
#[derive(Debug, Clone)]
pub struct TimerHistogram {
    conf: HistogramRule,
    counts: Vec<u32>,
}

impl TimerHistogram {
    fn new(conf: HistogramRule) -> Self {
        let counts = vec![0; conf.num_bins()];
        Self { conf, counts }
    }

    fn record(&mut self, value: f64) {
        let last = self.conf.num_bins() - 1;
        let at = if value < self.conf.min_val() {
            0
        } else if value >= self.conf.max_val() {
            last
        } else {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let bin = ((value - self.conf.min_val()) / self.conf.bin_width()) as usize;
            (bin + 1).min(last - 1)
        };
        self.counts[at] = self.counts[at].saturating_add(1);
    }

    /// The rule this histogram was built from.
    #[must_use]
    pub const fn conf(&self) -> &HistogramRule {
        &self.conf
    }

    /// Bin counts; index 0 is the underflow bin, the last index the overflow.
    #[must_use]
    pub fn counts(&self) -> &[u32] {
        &self.counts
    }
}

/// Aggregated state for one timer key.
#[derive(Debug, Clone)]
pub struct TimerState {
    stats: RunningStats,
    samples: Vec<f64>,
    histogram: Option<TimerHistogram>,
}

impl TimerState {
    const fn new(histogram: Option<TimerHistogram>) -> Self {
        Self {
            stats: RunningStats::new(),
            samples: Vec::new(),
            histogram,
        }
    }

    fn record(&mut self, value: f64) {
        self.stats.add(value);
        // Kept sorted so quantile queries stay read-only during the drain.
        let at = self.samples.partition_point(|s| s.total_cmp(&value).is_lt());
        self.samples.insert(at, value);
        if let Some(histogram) = &mut self.histogram {
            histogram.record(value);
        }
    }

    /// Running aggregates over all recorded samples.
    #[must_use]
    pub const fn stats(&self) -> &RunningStats {
        &self.stats
    }

    /// Bin counts when a histogram rule matched this key.
    #[must_use]
    pub const fn histogram(&self) -> Option<&TimerHistogram> {
        self.histogram.as_ref()
    }

    /// Answers the quantile `q` in `[0, 1]` by linear interpolation over the
    /// sorted samples; zero when no samples were recorded.
    #[must_use]
    pub fn query(&self, q: f64) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let rank = q.clamp(0.0, 1.0) * (self.samples.len() - 1) as f64;
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let lo = rank.floor() as usize;
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let hi = rank.ceil() as usize;
        if lo == hi {
            return self.samples[lo];
        }
        #[allow(clippy::cast_precision_loss)]
        let weight = rank - lo as f64;
        self.samples[lo] * (1.0 - weight) + self.samples[hi] * weight
    }
}

/// Read-only view of one metric handed to [`MetricStore::iterate`] callbacks.
#[derive(Debug)]
pub enum MetricView<'a> {
    /// The stored key/value pair.
    KeyValue(f64),
    /// The current gauge value.
    Gauge(f64),
    /// Running counter aggregates.
    Counter(&'a RunningStats),
    /// Estimated set cardinality.
    Set(u64),
    /// Timer aggregates, quantiles and optional histogram.
    Timer(&'a TimerState),
}

/// Aggregator owning all per-key state for one flush generation.
///
/// Each key's kind is fixed by its first update: every kind aggregates in
/// its own map, so a later update of a different kind opens a new slot
/// instead of corrupting the first.
pub struct MetricStore {
    timer_eps: f64,
    quantiles: Vec<f64>,
    set_precision: u8,
    histogram_rules: Vec<HistogramRule>,
    key_values: HashMap<Vec<u8>, f64>,
    gauges: HashMap<Vec<u8>, f64>,
    counters: HashMap<Vec<u8>, RunningStats>,
    timers: HashMap<Vec<u8>, TimerState>,
    sets: HashMap<Vec<u8>, HashSet<Vec<u8>>>,
}

impl MetricStore {
    /// Creates an empty store from a configuration snapshot.
    #[must_use]
    pub fn new(
        timer_eps: f64,
        quantiles: &[f64],
        histogram_rules: Vec<HistogramRule>,
        set_precision: u8,
    ) -> Self {
        Self {
            timer_eps,
            quantiles: quantiles.to_vec(),
            set_precision,
            histogram_rules,
            key_values: HashMap::new(),
            gauges: HashMap::new(),
            counters: HashMap::new(),
            timers: HashMap::new(),
            sets: HashMap::new(),
        }
    }

    /// Records one numeric sample. [`MetricKind::Set`] samples carry no
    /// number and must go through [`set_update`](Self::set_update).
    pub fn update(&mut self, kind: MetricKind, key: &[u8], value: f64) {
        match kind {
            MetricKind::Counter => {
                self.counters
                    .entry(key.to_vec())
                    .or_insert_with(RunningStats::new)
                    .add(value);
            }
            MetricKind::Timer => {
                if let Some(timer) = self.timers.get_mut(key) {
                    timer.record(value);
                } else {
                    let histogram = self
                        .histogram_rules
                        .iter()
                        .find(|rule| rule.matches(key))
                        .cloned()
                        .map(TimerHistogram::new);
                    let mut timer = TimerState::new(histogram);
                    timer.record(value);
                    self.timers.insert(key.to_vec(), timer);
                }
            }
            MetricKind::KeyValue => {
                self.key_values.insert(key.to_vec(), value);
            }
            MetricKind::Gauge => {
                self.gauges.insert(key.to_vec(), value);
            }
            MetricKind::GaugeDelta => {
                *self.gauges.entry(key.to_vec()).or_insert(0.0) += value;
            }
            MetricKind::Set => {
                error!("Set samples carry members, not values; update dropped");
            }
        }
    }

    /// Adds `member` to the set named `key`.
    pub fn set_update(&mut self, key: &[u8], member: &[u8]) {
        self.sets
            .entry(key.to_vec())
            .or_default()
            .insert(member.to_vec());
    }

    /// Visits every aggregated metric, stopping at the first callback error.
    ///
    /// # Errors
    /// Propagates the first error returned by `visit`.
    pub fn iterate<F>(&self, mut visit: F) -> io::Result<()>
    where
        F: FnMut(MetricKind, &[u8], MetricView<'_>) -> io::Result<()>,
    {
        for (key, value) in &self.key_values {
            visit(MetricKind::KeyValue, key, MetricView::KeyValue(*value))?;
        }
        for (key, value) in &self.gauges {
            visit(MetricKind::Gauge, key, MetricView::Gauge(*value))?;
        }
        for (key, stats) in &self.counters {
            visit(MetricKind::Counter, key, MetricView::Counter(stats))?;
        }
        for (key, members) in &self.sets {
            visit(MetricKind::Set, key, MetricView::Set(members.len() as u64))?;
        }
        for (key, timer) in &self.timers {
            visit(MetricKind::Timer, key, MetricView::Timer(timer))?;
        }
        Ok(())
    }

    /// The quantile accuracy bound promised to downstream consumers.
    #[must_use]
    pub const fn timer_epsilon(&self) -> f64 {
        self.timer_eps
    }

    /// The configured set cardinality precision.
    #[must_use]
    pub const fn set_precision(&self) -> u8 {
        self.set_precision
    }

    /// The quantiles tracked for every timer.
    #[must_use]
    pub fn quantiles(&self) -> &[f64] {
        &self.quantiles
    }
}
