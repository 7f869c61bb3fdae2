//! Line-oriented ingest, statsd-compatible.
//!
//! One sample per `\n`-terminated line: `KEY:VALUE|TYPE[|@RATE]`. The type
//! is its first byte (`c`ounter, ti`m`er, `k`ey/value, `g`auge, `s`et); a
//! gauge whose value starts with `+` or `-` is a delta update, and counters
//! may carry a client sample rate to extrapolate the unsampled total.

use tracing::warn;

use crate::error::ProtocolError;
use crate::statsd::buffer::ConnectionBuffer;
use crate::statsd::parse::{parse_double, split_term};
use crate::statsd::{count_input, MetricKind, SampleSink};

/// Consumes every complete line buffered on the connection. Returns `Ok`
/// when no full line remains; any malformed line is connection-fatal.
pub(crate) fn drain_lines<B, S>(
    buf: &mut B,
    sink: &S,
    input_counter: Option<&[u8]>,
) -> Result<(), ProtocolError>
where
    B: ConnectionBuffer + ?Sized,
    S: SampleSink + ?Sized,
{
    loop {
        let Some(line) = buf.extract_until(b'\n') else {
            return Ok(());
        };
        apply_line(line, sink, input_counter)?;
    }
}

fn apply_line<S>(line: &[u8], sink: &S, input_counter: Option<&[u8]>) -> Result<(), ProtocolError>
where
    S: SampleSink + ?Sized,
{
    // Scan for the colon, then the pipe
    let Some((key, rest)) = split_term(line, b':') else {
        return malformed(line);
    };
    let Some((value, type_rest)) = split_term(rest, b'|') else {
        return malformed(line);
    };
    let mut value = value;

    // Convert the type
    let kind = match type_rest.first().copied().unwrap_or(0) {
        b'c' => MetricKind::Counter,
        b'm' => MetricKind::Timer,
        b'k' => MetricKind::KeyValue,
        b'g' => match value.first() {
            Some(b'+') => {
                // Advance past the + so the numeric parse stays valid
                value = &value[1..];
                MetricKind::GaugeDelta
            }
            Some(b'-') => MetricKind::GaugeDelta,
            _ => MetricKind::Gauge,
        },
        b's' => MetricKind::Set,
        other => {
            warn!("Received unknown metric type! Input: {}", other as char);
            return Err(ProtocolError::UnknownTextType(other));
        }
    };

    count_input(sink, input_counter);

    // Fast track the set updates, which carry no number
    if kind == MetricKind::Set {
        sink.set_update(key, value);
        return Ok(());
    }

    let (mut val, consumed) = parse_double(value);
    if consumed == 0 {
        warn!(
            "Failed value conversion! Input: {}",
            String::from_utf8_lossy(value)
        );
        return Err(ProtocolError::BadValue);
    }

    // Handle counter sampling if applicable
    if kind == MetricKind::Counter {
        if let Some((_, rate_str)) = split_term(type_rest, b'@') {
            let (rate, consumed) = parse_double(rate_str);
            if consumed == 0 {
                warn!(
                    "Failed sample rate conversion! Input: {}",
                    String::from_utf8_lossy(rate_str)
                );
                return Err(ProtocolError::BadSampleRate);
            }
            if rate > 0.0 && rate <= 1.0 {
                // Magnify the value back to the unsampled total
                val *= 1.0 / rate;
            }
        }
    }

    sink.update(kind, key, val);
    Ok(())
}

fn malformed(line: &[u8]) -> Result<(), ProtocolError> {
    warn!(
        "Failed parse metric! Input: {}",
        String::from_utf8_lossy(line)
    );
    Err(ProtocolError::MalformedLine)
}
