//! # statfold
//!
//! The connection-handling and flush core of a statsd-compatible metrics
//! aggregation daemon.
//!
//! ## Features
//!
//! - **Dual-Protocol Ingest**: line-oriented text (statsd-compatible) and a
//!   length-prefixed binary protocol, selected by the first byte a
//!   connection delivers
//! - **Atomic Flush Rotation**: the live aggregator is swapped for a fresh
//!   one on every flush interval; the previous generation drains on a
//!   background thread without ever blocking ingest
//! - **Metric Types**: counters, timers (with quantiles and optional
//!   histograms), gauges, gauge deltas, sets, and raw key/values
//! - **Dual Output Formats**: UTF-8 lines or packed little-endian records,
//!   streamed to an external command's standard input
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use statfold::{Config, Connection, Core, FlushScheduler, MemoryBuffer};
//!
//! let config = Config {
//!     stream_cmd: "cat >> /tmp/metrics.out".to_string(),
//!     ..Config::default()
//! };
//! let core = Arc::new(Core::new(config));
//! let scheduler = FlushScheduler::start(Arc::clone(&core));
//!
//! // Per readability edge: feed the transport bytes, then run the handler.
//! let mut conn = Connection::new(MemoryBuffer::new());
//! conn.buffer_mut().feed(b"requests:1|c\nlatency:3.5|m\n");
//! if core.handle_client_connect(&mut conn).is_err() {
//!     // malformed input: close the connection
//! }
//!
//! // Rotates one last time and waits for the drain to finish.
//! scheduler.shutdown();
//! ```

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::todo)]
#![deny(clippy::unimplemented)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
#![warn(clippy::missing_errors_doc)]
#![warn(clippy::missing_panics_doc)]
#![allow(clippy::module_name_repetitions)]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

mod error;
mod statsd;

pub use error::{ProtocolError, StatError};
pub use statsd::buffer::{ConnectionBuffer, MemoryBuffer};
pub use statsd::config::{Config, HistogramRule};
pub use statsd::format::{format_binary, format_text};
pub use statsd::handler::{Connection, Core, FlushScheduler};
pub use statsd::store::{MetricStore, MetricView, RunningStats, TimerHistogram, TimerState};
pub use statsd::stream::{CommandSink, Formatter, StreamSink};
pub use statsd::{MetricKind, SampleSink};

/// Result type for daemon operations.
///
/// Wraps errors that can occur while ingesting samples and streaming
/// flushed snapshots.
pub type StatResult<T> = Result<T, StatError>;
