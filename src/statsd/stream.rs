//! Streaming flushed snapshots to an external command.

use std::io::{self, BufWriter, Write};
use std::process::{Command, Stdio};

use tracing::warn;

use crate::statsd::store::MetricStore;
use crate::StatResult;

/// Renders one snapshot into a writer, stamped with the rotation timestamp.
pub type Formatter = fn(&MetricStore, u64, &mut dyn Write) -> io::Result<()>;

/// Destination for a drained generation.
///
/// The drain task calls this once per rotation with exclusive access to the
/// snapshot. Implementations own the transport: the default spawns the
/// configured command, tests typically capture the formatted bytes.
pub trait StreamSink: Send + Sync {
    /// Streams the formatted snapshot and reports the downstream exit
    /// status. A non-zero status is logged by the caller, never fatal.
    ///
    /// # Errors
    /// Returns an error when the destination could not be reached at all.
    fn stream(
        &self,
        store: &MetricStore,
        timestamp: u64,
        formatter: Formatter,
        command: &str,
    ) -> StatResult<i32>;
}

/// Default sink: spawns `command` under `/bin/sh -c` and feeds the
/// formatted snapshot to its standard input.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandSink;

impl StreamSink for CommandSink {
    fn stream(
        &self,
        store: &MetricStore,
        timestamp: u64,
        formatter: Formatter,
        command: &str,
    ) -> StatResult<i32> {
        let mut child = Command::new("/bin/sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::piped())
            .spawn()?;

        // A write failure mid-stream is a downstream problem; the child is
        // still reaped and its status reported.
        if let Some(stdin) = child.stdin.take() {
            let mut pipe = BufWriter::new(stdin);
            if let Err(err) = formatter(store, timestamp, &mut pipe).and_then(|()| pipe.flush()) {
                warn!("Error streaming snapshot to command: {err}");
            }
        }

        let status = child.wait()?;
        Ok(status.code().unwrap_or(-1))
    }
}
