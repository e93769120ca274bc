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

use std::io;

use thiserror::Error;

use crate::http::HttpError;

/// Hard failures. The stream or record that produced one of these cannot be used further
/// for the failed operation.
#[derive(Debug, Error)]
pub enum Error {
    /// Wrapped I/O error of the underlying source or sink. Gzip structure and CRC
    /// violations surface here as well.
    #[error(transparent)]
    Io(#[from] io::Error),

    /// An HTTP message fed from a reader could not be parsed.
    #[error(transparent)]
    Http(#[from] HttpError),

    /// The archive dialect could not be determined from the first bytes of the stream.
    #[error("unable to guess archive format")]
    UnknownFormat,

    /// The record content was backed by a stream which has already been drained.
    #[error("record content has already been consumed")]
    ContentConsumed,

    /// A content stream supplied for writing ended before its declared length.
    #[error("content stream ended after {read} of {expected} bytes")]
    ContentTruncated { expected: u64, read: u64 },

    /// Seeking is not possible in this framing (whole-file gzip).
    #[error("stream framing does not support seeking")]
    UnsupportedSeek,

    /// A record could not be parsed at all.
    #[error("errors while decoding record at offset {offset:?}: {}", join_errors(.errors))]
    Corrupt {
        offset: Option<u64>,
        errors: Vec<ParseError>,
    },
}

fn join_errors(errors: &[ParseError]) -> String {
    errors.iter().map(|e| e.to_string()).collect::<Vec<_>>().join(", ")
}

/// Where an offending newline was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    Version,
    Header,
    Continuation,
}

/// Non-fatal record diagnostics.
///
/// Header-level problems are attached to the record, which is still returned. Record-level
/// problems are returned next to a missing record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("ignored line: {:?}", String::from_utf8_lossy(.0))]
    IgnoredLine(Vec<u8>),

    #[error("too many errors, giving up hope")]
    TooManyErrors,

    #[error("warc version but no headers: {:?}", String::from_utf8_lossy(.0))]
    VersionWithoutHeaders(Vec<u8>),

    #[error("incorrect newline in {kind:?} line: {:?}", String::from_utf8_lossy(.newline))]
    IncorrectNewline { kind: LineKind, newline: Vec<u8> },

    #[error("version field is not known: {:?}", String::from_utf8_lossy(.0))]
    UnknownVersion(Vec<u8>),

    #[error("bad prefix on WARC version header: {:?}", String::from_utf8_lossy(.0))]
    BadPrefix(Vec<u8>),

    #[error("malformed header line: {:?}", String::from_utf8_lossy(.0))]
    MalformedHeaderLine(Vec<u8>),

    #[error("invalid header {:?}: {:?}", String::from_utf8_lossy(.name), String::from_utf8_lossy(.value))]
    InvalidHeader { name: Vec<u8>, value: Vec<u8> },

    #[error("missing mandatory header {0}")]
    MissingHeader(&'static str),

    #[error("invalid header field count: expected {expected}, found {found} in {:?}", String::from_utf8_lossy(.line))]
    InvalidFieldCount {
        expected: usize,
        found: usize,
        line: Vec<u8>,
    },

    #[error("content truncated: read {read} of {expected} bytes")]
    Truncated { expected: u64, read: u64 },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
