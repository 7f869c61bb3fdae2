//! Connection dispatch and flush-interval rotation.
//!
//! [`Core`] owns the live aggregator generation behind an atomic slot.
//! Ingest may run from any number of event-loop threads: updates serialize
//! on the generation's lock, and the rotation is a single atomic swap, so
//! every sample lands in exactly one generation, the one live when its
//! update acquired the lock. After the swap the old generation belongs to
//! its drain thread alone.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use arc_swap::ArcSwapOption;
use crossbeam::channel::{bounded, tick, Receiver, Sender};
use crossbeam::select;
use parking_lot::Mutex;
use tracing::{error, warn};

use crate::error::ProtocolError;
use crate::statsd::binary::{drain_frames, MAGIC_BYTE};
use crate::statsd::buffer::ConnectionBuffer;
use crate::statsd::config::Config;
use crate::statsd::format::{format_binary, format_text};
use crate::statsd::store::MetricStore;
use crate::statsd::stream::{CommandSink, Formatter, StreamSink};
use crate::statsd::text::drain_lines;
use crate::statsd::{MetricKind, SampleSink};

/// The quantiles tracked for every timer.
const QUANTILES: [f64; 4] = [0.5, 0.9, 0.95, 0.99];

/// Pause between attempts to gain exclusive ownership of a drained store.
const DRAIN_RETRY: Duration = Duration::from_millis(10);

struct Generation {
    store: Mutex<MetricStore>,
}

impl Generation {
    fn new(config: &Config) -> Self {
        Self {
            store: Mutex::new(MetricStore::new(
                config.timer_eps,
                &QUANTILES,
                config.histograms.clone(),
                config.set_precision,
            )),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Wire {
    Text,
    Binary,
}

/// Per-connection state: the inbound byte buffer plus the wire protocol,
/// pinned by the first byte the connection ever delivers.
pub struct Connection<B> {
    buf: B,
    wire: Option<Wire>,
}

impl<B: ConnectionBuffer> Connection<B> {
    /// Wraps a transport buffer into a fresh connection.
    #[must_use]
    pub const fn new(buf: B) -> Self {
        Self { buf, wire: None }
    }

    /// The underlying buffer, for the transport to feed.
    pub fn buffer_mut(&mut self) -> &mut B {
        &mut self.buf
    }
}

/// The daemon core: the live aggregator, its configuration, and the sink
/// drained generations are streamed to.
pub struct Core {
    live: ArcSwapOption<Generation>,
    config: Arc<Config>,
    sink: Arc<dyn StreamSink>,
    input_counter: Option<Vec<u8>>,
}

impl Core {
    /// Builds the core with the default command sink.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self::with_sink(config, Arc::new(CommandSink))
    }

    /// Builds the core with a custom sink.
    #[must_use]
    pub fn with_sink(config: Config, sink: Arc<dyn StreamSink>) -> Self {
        let input_counter = config
            .input_counter
            .as_ref()
            .map(|key| key.clone().into_bytes());
        let live = ArcSwapOption::from(Some(Arc::new(Generation::new(&config))));
        Self {
            live,
            config: Arc::new(config),
            sink,
            input_counter,
        }
    }

    /// Handles one readability edge on a connection, consuming every
    /// complete line or frame currently buffered. Returns `Ok` when the
    /// remaining bytes are an incomplete message awaiting more data.
    ///
    /// # Errors
    /// Returns the protocol violation on malformed input; the transport
    /// must close the connection. Samples accepted earlier are retained.
    pub fn handle_client_connect<B: ConnectionBuffer>(
        &self,
        conn: &mut Connection<B>,
    ) -> Result<(), ProtocolError> {
        let wire = match conn.wire {
            Some(wire) => wire,
            None => {
                // The first byte decides the protocol for the connection's
                // whole lifetime.
                let Some(first) = conn.buf.peek_byte() else {
                    return Ok(());
                };
                let wire = if first == MAGIC_BYTE {
                    Wire::Binary
                } else {
                    Wire::Text
                };
                conn.wire = Some(wire);
                wire
            }
        };

        match wire {
            Wire::Binary => drain_frames(&mut conn.buf, self, self.input_counter.as_deref()),
            Wire::Text => drain_lines(&mut conn.buf, self, self.input_counter.as_deref()),
        }
    }

    /// Rotates the live aggregator: a fresh generation replaces the live
    /// one atomically and the previous generation is drained on a detached
    /// background thread, so rotation never blocks ingest.
    pub fn flush_interval_trigger(&self) {
        let fresh = Arc::new(Generation::new(&self.config));
        if let Some(old) = self.live.swap(Some(fresh)) {
            drop(self.spawn_drain(old));
        }
    }

    /// Shutdown rotation: replaces the live generation with the closed
    /// sentinel and waits for its drain to complete. Samples arriving
    /// afterwards are dropped.
    pub fn final_flush(&self) {
        if let Some(old) = self.live.swap(None) {
            if self.spawn_drain(old).join().is_err() {
                error!("Final flush thread panicked");
            }
        }
    }

    fn spawn_drain(&self, generation: Arc<Generation>) -> JoinHandle<()> {
        let config = Arc::clone(&self.config);
        let sink = Arc::clone(&self.sink);
        thread::spawn(move || drain_generation(generation, &config, sink.as_ref()))
    }

    pub(crate) fn flush_interval(&self) -> Duration {
        self.config.flush_interval
    }
}

impl SampleSink for Core {
    fn update(&self, kind: MetricKind, key: &[u8], value: f64) {
        // An empty live slot means the daemon is shutting down; late
        // samples are dropped.
        if let Some(generation) = &*self.live.load() {
            generation.store.lock().update(kind, key, value);
        }
    }

    fn set_update(&self, key: &[u8], member: &[u8]) {
        if let Some(generation) = &*self.live.load() {
            generation.store.lock().set_update(key, member);
        }
    }
}

fn drain_generation(mut generation: Arc<Generation>, config: &Config, sink: &dyn StreamSink) {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_secs());

    // Ingest loads issued just before the swap may still hold the
    // generation; wait them out before taking the store apart.
    let generation = loop {
        match Arc::try_unwrap(generation) {
            Ok(generation) => break generation,
            Err(still_shared) => {
                generation = still_shared;
                thread::sleep(DRAIN_RETRY);
            }
        }
    };
    let store = generation.store.into_inner();

    let formatter: Formatter = if config.binary_stream {
        format_binary
    } else {
        format_text
    };
    match sink.stream(&store, timestamp, formatter, &config.stream_cmd) {
        Ok(0) => {}
        Ok(status) => warn!("Streaming command exited with status {status}"),
        Err(err) => warn!("Streaming command failed: {err}"),
    }
}

/// Background thread driving the flush interval.
///
/// Rotates the live generation on every tick; on shutdown it stops the
/// timer first and then runs the final flush, so no trigger can race the
/// closed sentinel.
pub struct FlushScheduler {
    sender: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl FlushScheduler {
    /// Spawns the scheduler for `core`.
    #[must_use]
    pub fn start(core: Arc<Core>) -> Self {
        let (sender, receiver) = bounded::<()>(1);
        let handle = thread::spawn(move || run_schedule(&core, &receiver));
        Self {
            sender: Some(sender),
            handle: Some(handle),
        }
    }

    /// Stops the flush timer, runs the final flush, and waits for it.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        // Dropping the sender closes the channel; the schedule loop sees
        // the disconnect and performs the final flush before exiting.
        drop(self.sender.take());
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("Flush scheduler thread panicked");
            }
        }
    }
}

impl Drop for FlushScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_schedule(core: &Core, shutdown: &Receiver<()>) {
    let flush_tick = tick(core.flush_interval());
    loop {
        select! {
            recv(flush_tick) -> _ => core.flush_interval_trigger(),
            recv(shutdown) -> _ => break,
        }
    }
    core.final_flush();
}
