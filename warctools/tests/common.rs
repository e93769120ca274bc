#![allow(dead_code)]

use std::io::{Cursor, Write};
use std::sync::Once;

use flate2::write::GzEncoder;
use flate2::Compression;
use warctools::{RecordStream, StreamConfig};

pub fn setup_logger() {
    static START: Once = Once::new();
    START.call_once(|| {
        let test_log = std::env::var("TEST_LOG")
            .map(|x| x != "0" && x.to_lowercase() != "false")
            .unwrap_or(false);
        let level = if test_log {
            log::LevelFilter::Trace
        } else {
            log::LevelFilter::Info
        };
        let _ = env_logger::builder()
            .is_test(true)
            .filter_level(log::LevelFilter::Warn)
            .filter_module("warctools", level)
            .try_init();
    });
}

/// Compress `data` into a single gzip member.
pub fn gzip_member(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

pub fn stream(data: Vec<u8>) -> RecordStream<Cursor<Vec<u8>>> {
    setup_logger();
    RecordStream::from_reader(Cursor::new(data), StreamConfig::default()).unwrap()
}

/// A file path in the temp directory unique to this test process.
pub fn temp_path(name: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!("warctools-{}-{}", std::process::id(), name))
}
