pub mod buffer;
mod binary;
pub mod config;
pub mod format;
pub mod handler;
mod parse;
pub mod store;
pub mod stream;
mod text;

/// The kind of a single metric sample.
///
/// Wire codes (used verbatim by the binary protocol in both directions) are
/// `0x1`=[`KeyValue`](Self::KeyValue), `0x2`=[`Counter`](Self::Counter),
/// `0x3`=[`Timer`](Self::Timer), `0x4`=[`Set`](Self::Set),
/// `0x5`=[`Gauge`](Self::Gauge), `0x6`=[`GaugeDelta`](Self::GaugeDelta).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricKind {
    /// Summed value, optionally scaled by a client sample rate.
    Counter,
    /// Latency-style sample feeding quantiles and optional histograms.
    Timer,
    /// Plain key/value pair; the last value wins.
    KeyValue,
    /// Point-in-time measurement; the last value wins.
    Gauge,
    /// Signed adjustment applied to the current gauge value.
    GaugeDelta,
    /// Opaque member added to a cardinality estimator.
    Set,
}

impl MetricKind {
    pub(crate) const fn from_wire(code: u8) -> Option<Self> {
        match code {
            0x1 => Some(Self::KeyValue),
            0x2 => Some(Self::Counter),
            0x3 => Some(Self::Timer),
            0x4 => Some(Self::Set),
            0x5 => Some(Self::Gauge),
            0x6 => Some(Self::GaugeDelta),
            _ => None,
        }
    }

    /// The binary-protocol code for this kind.
    #[must_use]
    pub const fn wire_code(self) -> u8 {
        match self {
            Self::KeyValue => 0x1,
            Self::Counter => 0x2,
            Self::Timer => 0x3,
            Self::Set => 0x4,
            Self::Gauge => 0x5,
            Self::GaugeDelta => 0x6,
        }
    }
}

/// Destination for parsed samples.
///
/// The ingest state machines validate input first and dispatch through this
/// trait second, so a failed frame or line never produces a partial update.
pub trait SampleSink {
    /// Records one numeric sample for `key`.
    fn update(&self, kind: MetricKind, key: &[u8], value: f64);

    /// Adds `member` to the set named `key`.
    fn set_update(&self, key: &[u8], member: &[u8]);
}

// Bumped before the sample it counts; a later per-sample failure may leave
// the counter over by one.
pub(crate) fn count_input<S: SampleSink + ?Sized>(sink: &S, input_counter: Option<&[u8]>) {
    if let Some(key) = input_counter {
        sink.update(MetricKind::Counter, key, 1.0);
    }
}
