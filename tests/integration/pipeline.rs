use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel::{unbounded, Receiver};
use statfold::{format_binary, format_text, Config, Connection, Core, MemoryBuffer, MetricKind, MetricStore};

use crate::support::{decode_records, CaptureSink};

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

fn capture_core(config: Config) -> (Core, Receiver<Vec<u8>>) {
    let (tx, rx) = unbounded();
    let core = Core::with_sink(config, Arc::new(CaptureSink::new(tx)));
    (core, rx)
}

/// `NAME|VALUE|TIMESTAMP` lines parsed into a name -> (value, timestamp) map.
fn parse_text_lines(snapshot: &str) -> HashMap<String, (String, String)> {
    snapshot
        .lines()
        .map(|line| {
            let mut fields = line.rsplitn(3, '|');
            let ts = fields.next().unwrap().to_string();
            let value = fields.next().unwrap().to_string();
            let name = fields.next().unwrap().to_string();
            (name, (value, ts))
        })
        .collect()
}

fn kv_frame(type_code: u8, key: &[u8], value: f64) -> Vec<u8> {
    let key_len = u16::try_from(key.len() + 1).unwrap();
    let mut out = vec![0xAA, type_code];
    out.extend_from_slice(&key_len.to_le_bytes());
    out.extend_from_slice(&value.to_le_bytes());
    out.extend_from_slice(key);
    out.push(0);
    out
}

#[test]
fn text_ingest_to_text_snapshot() {
    let (core, rx) = capture_core(Config::default());
    let mut conn = Connection::new(MemoryBuffer::new());

    conn.buffer_mut().feed(
        b"requests:1|c\nrequests:1|c|@0.5\n\
          latency:10|ms\nlatency:20|ms\nlatency:30|ms\n\
          depth:7|g\ndepth:+2|g\n\
          users:alice|s\nusers:bob|s\nusers:alice|s\n\
          build:42|k\n",
    );
    core.handle_client_connect(&mut conn).unwrap();
    core.final_flush();

    let snapshot = String::from_utf8(rx.recv_timeout(RECV_TIMEOUT).unwrap()).unwrap();
    let lines = parse_text_lines(&snapshot);

    // 1 + (1 / 0.5) = 3
    assert_eq!(lines["requests"].0, "3.000000");
    assert_eq!(lines["depth"].0, "9.000000");
    assert_eq!(lines["users"].0, "2");
    assert_eq!(lines["build"].0, "42.000000");
    assert_eq!(lines["timers.latency.count"].0, "3");
    assert_eq!(lines["timers.latency.median"].0, "20.000000");
    assert_eq!(lines["timers.latency.lower"].0, "10.000000");
    assert_eq!(lines["timers.latency.upper"].0, "30.000000");

    // Every record of a generation carries the same timestamp.
    let timestamps: Vec<&String> = lines.values().map(|(_, ts)| ts).collect();
    assert!(timestamps.windows(2).all(|pair| pair[0] == pair[1]));
}

#[test]
fn binary_ingest_to_text_snapshot() {
    let (core, rx) = capture_core(Config::default());
    let mut conn = Connection::new(MemoryBuffer::new());

    let mut bytes = kv_frame(MetricKind::Counter.wire_code(), b"hits", 5.0);
    bytes.extend_from_slice(&kv_frame(MetricKind::Gauge.wire_code(), b"depth", 3.0));
    bytes.extend_from_slice(&kv_frame(MetricKind::GaugeDelta.wire_code(), b"depth", -1.0));
    conn.buffer_mut().feed(&bytes);
    core.handle_client_connect(&mut conn).unwrap();
    core.final_flush();

    let snapshot = String::from_utf8(rx.recv_timeout(RECV_TIMEOUT).unwrap()).unwrap();
    let lines = parse_text_lines(&snapshot);
    assert_eq!(lines["hits"].0, "5.000000");
    assert_eq!(lines["depth"].0, "2.000000");
}

#[test]
fn text_and_binary_formatters_agree_on_a_snapshot() {
    let mut store = MetricStore::new(0.01, &[0.5, 0.9, 0.95, 0.99], Vec::new(), 12);
    store.update(MetricKind::Counter, b"hits", 2.0);
    store.update(MetricKind::Counter, b"hits", 4.0);
    store.update(MetricKind::Gauge, b"depth", 7.0);
    store.update(MetricKind::KeyValue, b"build", 42.0);
    for value in [10.0, 20.0, 30.0] {
        store.update(MetricKind::Timer, b"lat", value);
    }
    store.set_update(b"users", b"alice");
    store.set_update(b"users", b"bob");

    let mut text = Vec::new();
    format_text(&store, 1234, &mut text).unwrap();
    let lines = parse_text_lines(&String::from_utf8(text).unwrap());

    let mut binary = Vec::new();
    format_binary(&store, 1234, &mut binary).unwrap();
    let records = decode_records(&binary);

    // Same timestamp everywhere.
    assert!(lines.values().all(|(_, ts)| ts == "1234"));
    assert!(records.iter().all(|r| r.timestamp == 1234));

    // Same key set.
    let mut bin_keys: Vec<&[u8]> = records.iter().map(|r| r.key.as_slice()).collect();
    bin_keys.sort_unstable();
    bin_keys.dedup();
    assert_eq!(
        bin_keys,
        vec![&b"build"[..], b"depth", b"hits", b"lat", b"users"]
    );

    // Matching aggregates: counter sum, gauge value, set cardinality,
    // timer sum and median.
    let sum_of = |key: &[u8], value_type: u8| {
        records
            .iter()
            .find(|r| r.key == key && r.value_type == value_type)
            .map(|r| r.value)
            .unwrap()
    };
    assert_eq!(lines["hits"].0, "6.000000");
    assert_eq!(sum_of(b"hits", 0x01), 6.0);
    assert_eq!(lines["depth"].0, "7.000000");
    assert_eq!(sum_of(b"depth", 0x00), 7.0);
    assert_eq!(lines["users"].0, "2");
    assert_eq!(sum_of(b"users", 0x01), 2.0);
    assert_eq!(lines["timers.lat.sum"].0, "60.000000");
    assert_eq!(sum_of(b"lat", 0x01), 60.0);
    assert_eq!(lines["timers.lat.median"].0, "20.000000");
    assert_eq!(sum_of(b"lat", 0x80 | 50), 20.0);
}

#[test]
fn malformed_line_closes_but_keeps_accepted_samples() {
    let (core, rx) = capture_core(Config::default());
    let mut conn = Connection::new(MemoryBuffer::new());

    conn.buffer_mut().feed(b"good:1|c\nbad line\n");
    assert!(core.handle_client_connect(&mut conn).is_err());
    core.final_flush();

    let snapshot = String::from_utf8(rx.recv_timeout(RECV_TIMEOUT).unwrap()).unwrap();
    assert!(snapshot.contains("good|1.000000|"));
}

#[test]
fn split_feeds_match_single_feed() {
    let input = b"alpha:1|c\nbeta:2.5|m\nusers:x|s\n";

    let single = {
        let (core, rx) = capture_core(Config::default());
        let mut conn = Connection::new(MemoryBuffer::new());
        conn.buffer_mut().feed(input);
        core.handle_client_connect(&mut conn).unwrap();
        core.final_flush();
        String::from_utf8(rx.recv_timeout(RECV_TIMEOUT).unwrap()).unwrap()
    };

    let split = {
        let (core, rx) = capture_core(Config::default());
        let mut conn = Connection::new(MemoryBuffer::new());
        for half in [&input[..13], &input[13..]] {
            conn.buffer_mut().feed(half);
            core.handle_client_connect(&mut conn).unwrap();
        }
        core.final_flush();
        String::from_utf8(rx.recv_timeout(RECV_TIMEOUT).unwrap()).unwrap()
    };

    // Timestamps may differ between the two runs; compare name -> value.
    let strip =
        |snapshot: &str| -> HashMap<String, String> {
            parse_text_lines(snapshot)
                .into_iter()
                .map(|(name, (value, _))| (name, value))
                .collect()
        };
    assert_eq!(strip(&single), strip(&split));
}
