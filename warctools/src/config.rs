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

/// Gzip framing of an archive stream.
#[derive(Debug, Eq, PartialEq, Clone, Copy, Default)]
pub enum GzipMode {
    /// Per-record gzip if the file name ends in `.gz` or the stream starts with the gzip
    /// magic bytes, otherwise uncompressed.
    #[default]
    Auto,
    /// Every record is its own gzip member.
    Record,
    /// The whole file is one gzip stream. Records have no offsets.
    File,
    /// Uncompressed.
    None,
}

/// Record dialect of an archive stream.
#[derive(Debug, Eq, PartialEq, Clone, Copy, Default)]
pub enum Dialect {
    /// Guess from the first line of the stream.
    #[default]
    Auto,
    Warc,
    Arc,
    /// Decide per record: lines starting with `WARC` are WARC records, all others ARC.
    Mixed,
}

/// Options for opening a [`RecordStream`](crate::stream::RecordStream).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamConfig {
    pub gzip: GzipMode,
    pub dialect: Dialect,
    /// Report record offsets.
    pub offsets: bool,
    /// Number of ignored lines the WARC parser tolerates while looking for a version line.
    pub bad_line_limit: usize,
    /// Buffer size for decompressed input and for skipping unread content.
    pub chunk_size: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        StreamConfig {
            gzip: GzipMode::Auto,
            dialect: Dialect::Auto,
            offsets: true,
            bad_line_limit: 5,
            chunk_size: 8192,
        }
    }
}

impl StreamConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn gzip(mut self, gzip: GzipMode) -> Self {
        self.gzip = gzip;
        self
    }

    pub fn dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = dialect;
        self
    }

    pub fn offsets(mut self, offsets: bool) -> Self {
        self.offsets = offsets;
        self
    }

    pub fn bad_line_limit(mut self, limit: usize) -> Self {
        self.bad_line_limit = limit;
        self
    }

    /// Set the buffer size. Zero is raised to one byte.
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size.max(1);
        self
    }
}
