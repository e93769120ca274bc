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

//! Incremental HTTP/1.x message parsing.
//!
//! Messages are fed arbitrary slices of bytes and hand back whatever suffix they did not
//! consume. Feeding a message all at once, line by line or byte by byte yields the same
//! result.
//!
//! Body framing follows the usual precedence:
//!
//! * `Transfer-Encoding: chunked` wins over everything else.
//! * `Content-Length` limits the body to a fixed number of bytes.
//! * Otherwise a response body runs until [`HttpMessage::close`] is called. Requests without
//!   either header have no body.
//!
//! `Content-Encoding` is recorded but bodies are only decompressed when a decoded message is
//! requested.

mod body;
mod header;
mod message;

use thiserror::Error;

pub use body::{BodyReader, ChunkReader, LengthReader};
pub use header::{HttpHeader, MessageHead, RequestHeader, ResponseHeader};
pub use message::{HttpMessage, Mode, Predict, RequestMessage, ResponseMessage};

/// HTTP decode errors, recorded against the message that produced them.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HttpError {
    #[error("malformed start line: {:?}", String::from_utf8_lossy(.0))]
    MalformedStartLine(Vec<u8>),

    #[error("malformed header line: {:?}", String::from_utf8_lossy(.0))]
    MalformedHeaderLine(Vec<u8>),

    #[error("invalid content length: {:?}", String::from_utf8_lossy(.0))]
    InvalidContentLength(Vec<u8>),

    #[error("invalid chunk size: {:?}", String::from_utf8_lossy(.0))]
    InvalidChunkSize(Vec<u8>),
}

pub(crate) fn is_newline(line: &[u8]) -> bool {
    line == b"\r\n" || line == b"\n"
}
