//! Length-prefixed binary ingest.
//!
//! Every frame opens with the magic byte, a type code and a key length.
//! Non-set frames pack an 8-byte value ahead of the key; set frames carry a
//! second length and the member bytes after the key. All multi-byte fields
//! are little-endian and every length-prefixed string ends in a NUL.

use tracing::warn;

use crate::error::ProtocolError;
use crate::statsd::buffer::ConnectionBuffer;
use crate::statsd::{count_input, MetricKind, SampleSink};

/// First byte of every binary frame.
pub(crate) const MAGIC_BYTE: u8 = 0xAA;

/// Bytes peeked to learn a frame's type and lengths.
const MIN_HEADER_LEN: usize = 6;

/// Header length of a non-set frame, value included.
const FULL_HEADER_LEN: usize = 12;

/// Consumes every complete frame buffered on the connection. Returns `Ok`
/// when the next frame has not fully arrived (the peeked header stays
/// buffered); any malformed frame is connection-fatal.
pub(crate) fn drain_frames<B, S>(
    buf: &mut B,
    sink: &S,
    input_counter: Option<&[u8]>,
) -> Result<(), ProtocolError>
where
    B: ConnectionBuffer + ?Sized,
    S: SampleSink + ?Sized,
{
    loop {
        // Peek the fixed header: magic, type code, key length, and for set
        // frames the member length.
        let header: [u8; MIN_HEADER_LEN] = {
            let Some(peeked) = buf.peek_n(MIN_HEADER_LEN) else {
                return Ok(());
            };
            let mut header = [0_u8; MIN_HEADER_LEN];
            header.copy_from_slice(peeked);
            header
        };

        if header[0] != MAGIC_BYTE {
            warn!(
                "Received command from binary stream without magic byte! Byte: {}",
                header[0]
            );
            return Err(ProtocolError::BadMagic(header[0]));
        }

        let key_len = usize::from(u16::from_le_bytes([header[2], header[3]]));

        let kind = match MetricKind::from_wire(header[1]) {
            Some(MetricKind::Set) => {
                let set_len = usize::from(u16::from_le_bytes([header[4], header[5]]));
                if apply_set_frame(buf, sink, input_counter, key_len, set_len)? {
                    continue;
                }
                return Ok(());
            }
            Some(kind) => kind,
            None => {
                warn!(
                    "Received command from binary stream with unknown type: {}!",
                    header[1]
                );
                return Err(ProtocolError::UnknownBinaryType(header[1]));
            }
        };

        // Wait for the full frame; a short read leaves the header buffered.
        let Some(frame) = buf.read_n(FULL_HEADER_LEN + key_len) else {
            return Ok(());
        };

        let key = &frame[FULL_HEADER_LEN..];
        if key.last() != Some(&0) {
            warn!(
                "Received command from binary stream with non-null terminated key: {}!",
                String::from_utf8_lossy(key)
            );
            return Err(ProtocolError::MissingTerminator("key"));
        }

        let mut raw = [0_u8; 8];
        raw.copy_from_slice(&frame[4..FULL_HEADER_LEN]);
        let value = f64::from_le_bytes(raw);

        count_input(sink, input_counter);
        sink.update(kind, &key[..key_len - 1], value);
    }
}

// Returns Ok(false) when the full frame has not arrived yet.
fn apply_set_frame<B, S>(
    buf: &mut B,
    sink: &S,
    input_counter: Option<&[u8]>,
    key_len: usize,
    set_len: usize,
) -> Result<bool, ProtocolError>
where
    B: ConnectionBuffer + ?Sized,
    S: SampleSink + ?Sized,
{
    let Some(frame) = buf.read_n(MIN_HEADER_LEN + key_len + set_len) else {
        return Ok(false);
    };

    let key = &frame[MIN_HEADER_LEN..MIN_HEADER_LEN + key_len];
    let member = &frame[MIN_HEADER_LEN + key_len..];
    if key.last() != Some(&0) {
        warn!(
            "Received command from binary stream with non-null terminated key: {}!",
            String::from_utf8_lossy(key)
        );
        return Err(ProtocolError::MissingTerminator("key"));
    }
    if member.last() != Some(&0) {
        warn!(
            "Received command from binary stream with non-null terminated set key: {}!",
            String::from_utf8_lossy(member)
        );
        return Err(ProtocolError::MissingTerminator("set member"));
    }

    count_input(sink, input_counter);
    sink.set_update(&key[..key_len - 1], &member[..set_len - 1]);
    Ok(true)
}
