// Copyright 2025 Janek Bevendorff
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::path::Path;

use crate::config::Dialect;

pub(crate) const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Whether `peek` starts with the gzip magic bytes.
pub fn is_gzip_magic(peek: &[u8]) -> bool {
    peek.starts_with(&GZIP_MAGIC)
}

pub fn is_gzip_filename<P: AsRef<Path>>(path: P) -> bool {
    path.as_ref().extension().is_some_and(|ext| ext == "gz")
}

/// Guess the record dialect from the first non-blank (decompressed) line of a stream.
///
/// Leading line breaks are ignored. An empty stream counts as WARC.
pub fn guess_dialect(peek: &[u8]) -> Option<Dialect> {
    let start = peek.iter().position(|&b| b != b'\r' && b != b'\n').unwrap_or(peek.len());
    let peek = &peek[start..];
    if peek.is_empty() || peek.starts_with(b"WARC/") {
        Some(Dialect::Warc)
    } else if peek.starts_with(b"filedesc://") {
        Some(Dialect::Arc)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gzip_detection() {
        assert!(is_gzip_magic(b"\x1f\x8b\x08\x00"));
        assert!(!is_gzip_magic(b"WARC/1.0"));
        assert!(!is_gzip_magic(b"\x1f"));
        assert!(is_gzip_filename("crawl.warc.gz"));
        assert!(!is_gzip_filename("crawl.warc"));
    }

    #[test]
    fn dialect_detection() {
        assert_eq!(guess_dialect(b"WARC/1.0\r\n"), Some(Dialect::Warc));
        assert_eq!(guess_dialect(b"\r\n\r\nWARC/0.17\n"), Some(Dialect::Warc));
        assert_eq!(guess_dialect(b""), Some(Dialect::Warc));
        assert_eq!(guess_dialect(b"filedesc://x.arc 0.0.0.0"), Some(Dialect::Arc));
        assert_eq!(guess_dialect(b"<html>"), None);
    }
}
