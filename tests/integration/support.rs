use crossbeam::channel::Sender;
use statfold::{Formatter, MetricStore, StatResult, StreamSink};

/// Sink that renders each drained snapshot and hands the bytes to a channel.
pub struct CaptureSink {
    tx: Sender<Vec<u8>>,
}

impl CaptureSink {
    pub fn new(tx: Sender<Vec<u8>>) -> Self {
        Self { tx }
    }
}

impl StreamSink for CaptureSink {
    fn stream(
        &self,
        store: &MetricStore,
        timestamp: u64,
        formatter: Formatter,
        _command: &str,
    ) -> StatResult<i32> {
        let mut out = Vec::new();
        formatter(store, timestamp, &mut out)?;
        let _ = self.tx.send(out);
        Ok(0)
    }
}

/// One decoded binary record; histogram records carry their trailing count.
#[derive(Debug)]
pub struct BinRecord {
    pub timestamp: u64,
    pub type_code: u8,
    pub value_type: u8,
    pub key: Vec<u8>,
    pub value: f64,
    pub hist_count: Option<u32>,
}

const HIST_VALUE_TYPES: [u8; 3] = [0x08, 0x09, 0x0a];

/// Decodes a full binary snapshot into records.
pub fn decode_records(bytes: &[u8]) -> Vec<BinRecord> {
    let mut records = Vec::new();
    let mut at = 0;
    while at < bytes.len() {
        let prefix = &bytes[at..at + 20];
        let timestamp = u64::from_le_bytes(prefix[0..8].try_into().unwrap());
        let type_code = prefix[8];
        let value_type = prefix[9];
        let key_len = usize::from(u16::from_le_bytes(prefix[10..12].try_into().unwrap()));
        let value = f64::from_le_bytes(prefix[12..20].try_into().unwrap());
        assert!(key_len >= 1, "key length includes the NUL terminator");
        let key = bytes[at + 20..at + 20 + key_len - 1].to_vec();
        assert_eq!(bytes[at + 20 + key_len - 1], 0, "key must be NUL terminated");
        at += 20 + key_len;

        let hist_count = HIST_VALUE_TYPES.contains(&value_type).then(|| {
            let count = u32::from_le_bytes(bytes[at..at + 4].try_into().unwrap());
            at += 4;
            count
        });

        records.push(BinRecord {
            timestamp,
            type_code,
            value_type,
            key,
            value,
            hist_count,
        });
    }
    records
}
