//! Snapshot renderers for the streaming flush.
//!
//! Both formatters walk one drained generation and emit a record per
//! aggregate: UTF-8 `NAME|VALUE|TIMESTAMP` lines, or packed little-endian
//! records opened by a fixed 20-byte prefix. Each record write is a single
//! fallible call so a downstream failure stops the walk immediately.

use std::io::{self, Write};

use crate::statsd::store::{MetricStore, MetricView, RunningStats, TimerHistogram, TimerState};
use crate::statsd::MetricKind;

/// Value-type byte of a binary output record.
mod out {
    pub const NO_TYPE: u8 = 0x00;
    pub const SUM: u8 = 0x01;
    pub const SUM_SQ: u8 = 0x02;
    pub const MEAN: u8 = 0x03;
    pub const COUNT: u8 = 0x04;
    pub const STDDEV: u8 = 0x05;
    pub const MIN: u8 = 0x06;
    pub const MAX: u8 = 0x07;
    pub const HIST_FLOOR: u8 = 0x08;
    pub const HIST_BIN: u8 = 0x09;
    pub const HIST_CEIL: u8 = 0x0a;
    /// Or-ed with the percentile in `[0, 99]`.
    pub const PCT: u8 = 0x80;
}

/// Renders the snapshot as UTF-8 lines of the form `NAME|VALUE|TIMESTAMP`.
///
/// # Errors
/// Propagates the first write failure.
pub fn format_text(store: &MetricStore, timestamp: u64, out: &mut dyn Write) -> io::Result<()> {
    let mut ts_buf = itoa::Buffer::new();
    let ts = ts_buf.format(timestamp);

    store.iterate(|_, name, view| match view {
        MetricView::KeyValue(value) | MetricView::Gauge(value) => {
            float_line(out, "", name, "", value, ts)
        }
        MetricView::Counter(stats) => float_line(out, "", name, "", stats.sum(), ts),
        MetricView::Set(cardinality) => int_line(out, "", name, "", cardinality, ts),
        MetricView::Timer(timer) => text_timer(out, name, timer, ts),
    })
}

fn float_line(
    out: &mut dyn Write,
    prefix: &str,
    name: &[u8],
    suffix: &str,
    value: f64,
    ts: &str,
) -> io::Result<()> {
    out.write_all(prefix.as_bytes())?;
    out.write_all(name)?;
    writeln!(out, "{suffix}|{value:.6}|{ts}")
}

fn int_line(
    out: &mut dyn Write,
    prefix: &str,
    name: &[u8],
    suffix: &str,
    value: u64,
    ts: &str,
) -> io::Result<()> {
    out.write_all(prefix.as_bytes())?;
    out.write_all(name)?;
    writeln!(out, "{suffix}|{value}|{ts}")
}

fn text_timer(out: &mut dyn Write, name: &[u8], timer: &TimerState, ts: &str) -> io::Result<()> {
    let stats = timer.stats();
    float_line(out, "timers.", name, ".sum", stats.sum(), ts)?;
    float_line(out, "timers.", name, ".sum_sq", stats.sum_sq(), ts)?;
    float_line(out, "timers.", name, ".mean", stats.mean(), ts)?;
    float_line(out, "timers.", name, ".lower", stats.min(), ts)?;
    float_line(out, "timers.", name, ".upper", stats.max(), ts)?;
    int_line(out, "timers.", name, ".count", stats.count(), ts)?;
    float_line(out, "timers.", name, ".stdev", stats.stddev(), ts)?;
    float_line(out, "timers.", name, ".median", timer.query(0.5), ts)?;
    float_line(out, "timers.", name, ".upper_90", timer.query(0.9), ts)?;
    float_line(out, "timers.", name, ".upper_95", timer.query(0.95), ts)?;
    float_line(out, "timers.", name, ".upper_99", timer.query(0.99), ts)?;

    if let Some(histogram) = timer.histogram() {
        text_histogram(out, name, histogram, ts)?;
    }
    Ok(())
}

fn text_histogram(
    out: &mut dyn Write,
    name: &[u8],
    histogram: &TimerHistogram,
    ts: &str,
) -> io::Result<()> {
    let conf = histogram.conf();
    let counts = histogram.counts();

    out.write_all(name)?;
    writeln!(
        out,
        ".histogram.bin_<{:.2}|{}|{ts}",
        conf.min_val(),
        counts[0]
    )?;
    for i in 0..conf.num_bins() - 2 {
        #[allow(clippy::cast_precision_loss)]
        let floor = conf.bin_width().mul_add(i as f64, conf.min_val());
        out.write_all(name)?;
        writeln!(out, ".histogram.bin_{floor:.2}|{}|{ts}", counts[i + 1])?;
    }
    out.write_all(name)?;
    writeln!(
        out,
        ".histogram.bin_>{:.2}|{}|{ts}",
        conf.max_val(),
        counts[conf.num_bins() - 1]
    )
}

/// Renders the snapshot as packed little-endian records.
///
/// Every record opens with a 20-byte prefix (`u64` timestamp, kind code,
/// value-type code, `u16` key length, `f64` value) followed by the
/// NUL-terminated key. Histogram bin counts trail their records as raw
/// `u32` values.
///
/// # Errors
/// Propagates the first write failure.
pub fn format_binary(store: &MetricStore, timestamp: u64, out: &mut dyn Write) -> io::Result<()> {
    store.iterate(|_, name, view| match view {
        MetricView::KeyValue(value) => bin_record(
            out,
            timestamp,
            MetricKind::KeyValue,
            out::NO_TYPE,
            value,
            name,
        ),
        MetricView::Gauge(value) => {
            bin_record(out, timestamp, MetricKind::Gauge, out::NO_TYPE, value, name)
        }
        MetricView::Counter(stats) => bin_stats(out, timestamp, MetricKind::Counter, stats, name),
        MetricView::Set(cardinality) => {
            #[allow(clippy::cast_precision_loss)]
            let value = cardinality as f64;
            bin_record(out, timestamp, MetricKind::Set, out::SUM, value, name)
        }
        MetricView::Timer(timer) => bin_timer(out, timestamp, timer, name),
    })
}

fn bin_record(
    out: &mut dyn Write,
    timestamp: u64,
    kind: MetricKind,
    value_type: u8,
    value: f64,
    name: &[u8],
) -> io::Result<()> {
    #[allow(clippy::cast_possible_truncation)]
    let key_len = (name.len() + 1) as u16;
    out.write_all(&timestamp.to_le_bytes())?;
    out.write_all(&[kind.wire_code(), value_type])?;
    out.write_all(&key_len.to_le_bytes())?;
    out.write_all(&value.to_le_bytes())?;
    out.write_all(name)?;
    out.write_all(&[0x00])
}

fn bin_count(out: &mut dyn Write, count: u32) -> io::Result<()> {
    out.write_all(&count.to_le_bytes())
}

fn bin_stats(
    out: &mut dyn Write,
    timestamp: u64,
    kind: MetricKind,
    stats: &RunningStats,
    name: &[u8],
) -> io::Result<()> {
    #[allow(clippy::cast_precision_loss)]
    let count = stats.count() as f64;
    bin_record(out, timestamp, kind, out::SUM, stats.sum(), name)?;
    bin_record(out, timestamp, kind, out::SUM_SQ, stats.sum_sq(), name)?;
    bin_record(out, timestamp, kind, out::MEAN, stats.mean(), name)?;
    bin_record(out, timestamp, kind, out::COUNT, count, name)?;
    bin_record(out, timestamp, kind, out::STDDEV, stats.stddev(), name)?;
    bin_record(out, timestamp, kind, out::MIN, stats.min(), name)?;
    bin_record(out, timestamp, kind, out::MAX, stats.max(), name)
}

fn bin_timer(
    out: &mut dyn Write,
    timestamp: u64,
    timer: &TimerState,
    name: &[u8],
) -> io::Result<()> {
    bin_stats(out, timestamp, MetricKind::Timer, timer.stats(), name)?;
    for pct in [50_u8, 90, 95, 99] {
        let q = f64::from(pct) / 100.0;
        bin_record(
            out,
            timestamp,
            MetricKind::Timer,
            out::PCT | pct,
            timer.query(q),
            name,
        )?;
    }

    if let Some(histogram) = timer.histogram() {
        bin_histogram(out, timestamp, histogram, name)?;
    }
    Ok(())
}

fn bin_histogram(
    out: &mut dyn Write,
    timestamp: u64,
    histogram: &TimerHistogram,
    name: &[u8],
) -> io::Result<()> {
    let conf = histogram.conf();
    let counts = histogram.counts();
    let kind = MetricKind::Timer;

    bin_record(out, timestamp, kind, out::HIST_FLOOR, conf.min_val(), name)?;
    bin_count(out, counts[0])?;
    for i in 0..conf.num_bins() - 2 {
        #[allow(clippy::cast_precision_loss)]
        let floor = conf.bin_width().mul_add(i as f64, conf.min_val());
        bin_record(out, timestamp, kind, out::HIST_BIN, floor, name)?;
        bin_count(out, counts[i + 1])?;
    }
    bin_record(out, timestamp, kind, out::HIST_CEIL, conf.max_val(), name)?;
    bin_count(out, counts[conf.num_bins() - 1])
}
