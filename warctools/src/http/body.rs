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

use super::header::HttpHeader;
use super::message::Predict;
use super::{is_newline, HttpError};

/// Raw message bytes plus the spans of body data inside them.
#[derive(Debug, Clone, Default)]
pub(crate) struct MessageBuffer {
    pub(crate) data: Vec<u8>,
    /// End of the last complete line or body slice.
    pub(crate) offset: usize,
    pub(crate) chunks: Vec<(usize, usize)>,
}

impl MessageBuffer {
    /// Append `text` up to and including the next `\n`. Returns the completed line, if any,
    /// and whatever follows it.
    pub(crate) fn feed_line<'t>(&mut self, text: &'t [u8]) -> (Option<Vec<u8>>, &'t [u8]) {
        match text.iter().position(|&b| b == b'\n') {
            Some(pos) => {
                self.data.extend_from_slice(&text[..=pos]);
                let line = self.data[self.offset..].to_vec();
                self.offset = self.data.len();
                (Some(line), &text[pos + 1..])
            }
            None => {
                self.data.extend_from_slice(text);
                (None, &[])
            }
        }
    }

    /// Append at most `remaining` bytes of `text`.
    pub(crate) fn feed_length<'t>(&mut self, text: &'t [u8], remaining: u64) -> (u64, &'t [u8]) {
        let take = usize::try_from(remaining).unwrap_or(usize::MAX).min(text.len());
        let (body, rest) = text.split_at(take);
        self.data.extend_from_slice(body);
        self.offset = self.data.len();
        (remaining - take as u64, rest)
    }

    /// Append everything as close-delimited body data.
    pub(crate) fn feed_to_end(&mut self, text: &[u8]) {
        self.data.extend_from_slice(text);
        self.offset = self.data.len();
        if let Some(last) = self.chunks.last_mut() {
            last.1 += text.len();
        }
    }
}

/// Body framing for a message with a declared length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LengthReader {
    remaining: u64,
}

impl LengthReader {
    pub fn new(length: u64) -> Self {
        LengthReader { remaining: length }
    }

    /// Body bytes still expected.
    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    pub fn is_done(&self) -> bool {
        self.remaining == 0
    }

    pub(crate) fn feed<'t>(&mut self, buf: &mut MessageBuffer, text: &'t [u8]) -> &'t [u8] {
        if self.remaining == 0 {
            return text;
        }
        let (remaining, rest) = buf.feed_length(text, self.remaining);
        self.remaining = remaining;
        rest
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkState {
    Start,
    Chunk,
    Trailer,
    End,
}

/// Why a chunked body could not be read as such.
pub(crate) enum ChunkFailure<'t> {
    /// The very first size line was not hexadecimal, so the body is not chunked after all.
    /// Carries the input following that line.
    Broken(&'t [u8]),
    Http(HttpError),
}

impl From<HttpError> for ChunkFailure<'_> {
    fn from(e: HttpError) -> Self {
        ChunkFailure::Http(e)
    }
}

/// Body framing for `Transfer-Encoding: chunked`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkReader {
    state: ChunkState,
    first: bool,
    remaining: u64,
}

impl Default for ChunkReader {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkReader {
    pub fn new() -> Self {
        ChunkReader {
            state: ChunkState::Start,
            first: true,
            remaining: 0,
        }
    }

    /// Bytes left in the current chunk.
    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    pub fn is_done(&self) -> bool {
        self.state == ChunkState::End
    }

    pub(crate) fn predict(&self) -> Predict {
        match self.state {
            ChunkState::Chunk if self.remaining > 0 => Predict::Bytes(self.remaining),
            ChunkState::End => Predict::Done,
            _ => Predict::Line,
        }
    }

    pub(crate) fn feed<'t>(
        &mut self,
        buf: &mut MessageBuffer,
        fields: &mut HttpHeader,
        mut text: &'t [u8],
    ) -> Result<&'t [u8], ChunkFailure<'t>> {
        while !text.is_empty() {
            text = match self.state {
                ChunkState::Start => self.feed_size(buf, text)?,
                ChunkState::Chunk => self.feed_chunk(buf, text),
                ChunkState::Trailer => self.feed_trailer(buf, fields, text)?,
                ChunkState::End => break,
            };
        }
        Ok(text)
    }

    fn feed_size<'t>(
        &mut self,
        buf: &mut MessageBuffer,
        text: &'t [u8],
    ) -> Result<&'t [u8], ChunkFailure<'t>> {
        let (line, rest) = buf.feed_line(text);
        let Some(line) = line else {
            return Ok(rest);
        };

        let first = std::mem::replace(&mut self.first, false);
        let size = match parse_chunk_size(&line) {
            Some(size) => size,
            None if first => return Err(ChunkFailure::Broken(rest)),
            None => return Err(HttpError::InvalidChunkSize(line).into()),
        };

        trace!("http chunk of {} bytes", size);
        buf.chunks.push((buf.offset, usize::try_from(size).unwrap_or(usize::MAX)));
        self.remaining = size;
        self.state = if size == 0 {
            ChunkState::Trailer
        } else {
            ChunkState::Chunk
        };
        Ok(rest)
    }

    fn feed_chunk<'t>(&mut self, buf: &mut MessageBuffer, mut text: &'t [u8]) -> &'t [u8] {
        if self.remaining > 0 {
            let (remaining, rest) = buf.feed_length(text, self.remaining);
            self.remaining = remaining;
            text = rest;
        }
        if self.remaining == 0 {
            // line terminator after the chunk data
            let (line, rest) = buf.feed_line(text);
            if line.is_some() {
                self.state = ChunkState::Start;
            }
            text = rest;
        }
        text
    }

    fn feed_trailer<'t>(
        &mut self,
        buf: &mut MessageBuffer,
        fields: &mut HttpHeader,
        text: &'t [u8],
    ) -> Result<&'t [u8], HttpError> {
        let (line, rest) = buf.feed_line(text);
        if let Some(line) = line {
            fields.add_trailer_line(&line)?;
            if is_newline(&line) {
                self.state = ChunkState::End;
            }
        }
        Ok(rest)
    }
}

fn parse_chunk_size(line: &[u8]) -> Option<u64> {
    let size = line.split(|&b| b == b';').next()?.trim_ascii();
    u64::from_str_radix(std::str::from_utf8(size).ok()?, 16).ok()
}

/// Active body framing of a message. A message without one reads its body until closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BodyReader {
    Length(LengthReader),
    Chunked(ChunkReader),
}

impl BodyReader {
    pub fn is_done(&self) -> bool {
        match self {
            BodyReader::Length(r) => r.is_done(),
            BodyReader::Chunked(r) => r.is_done(),
        }
    }

    pub(crate) fn predict(&self) -> Predict {
        match self {
            BodyReader::Length(r) if r.is_done() => Predict::Done,
            BodyReader::Length(r) => Predict::Bytes(r.remaining()),
            BodyReader::Chunked(r) => r.predict(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feed_line_keeps_partial_lines() {
        let mut buf = MessageBuffer::default();
        let (line, rest) = buf.feed_line(b"ab");
        assert!(line.is_none());
        assert!(rest.is_empty());
        let (line, rest) = buf.feed_line(b"c\r\nde");
        assert_eq!(line.as_deref(), Some(&b"abc\r\n"[..]));
        assert_eq!(rest, b"de");
        assert_eq!(buf.offset, 5);
    }

    #[test]
    fn chunk_sizes() {
        assert_eq!(parse_chunk_size(b"1a\r\n"), Some(26));
        assert_eq!(parse_chunk_size(b"8;name=value\r\n"), Some(8));
        assert_eq!(parse_chunk_size(b"\r\n"), None);
        assert_eq!(parse_chunk_size(b"<html>\n"), None);
    }

    #[test]
    fn chunked_body_spans() {
        let mut buf = MessageBuffer::default();
        let mut fields = HttpHeader::new(std::iter::empty::<&[u8]>());
        let mut reader = ChunkReader::new();
        let rest = match reader.feed(&mut buf, &mut fields, b"3\r\nabc\r\n2\r\nde\r\n0\r\n\r\nnext") {
            Ok(rest) => rest,
            Err(_) => panic!("chunked body rejected"),
        };
        assert_eq!(rest, b"next");
        assert!(reader.is_done());
        let body: Vec<u8> = buf
            .chunks
            .iter()
            .flat_map(|&(o, l)| buf.data[o..o + l].to_vec())
            .collect();
        assert_eq!(body, b"abcde");
    }

    #[test]
    fn late_bad_chunk_size_is_an_error() {
        let mut buf = MessageBuffer::default();
        let mut fields = HttpHeader::new(std::iter::empty::<&[u8]>());
        let mut reader = ChunkReader::new();
        let result = reader.feed(&mut buf, &mut fields, b"1\r\na\r\nzz\r\n");
        assert!(matches!(
            result,
            Err(ChunkFailure::Http(HttpError::InvalidChunkSize(_)))
        ));
    }

    #[test]
    fn length_reader_stops_at_length() {
        let mut buf = MessageBuffer::default();
        let mut reader = LengthReader::new(3);
        assert_eq!(reader.feed(&mut buf, b"ab"), b"");
        assert_eq!(reader.feed(&mut buf, b"cde"), b"de");
        assert!(reader.is_done());
        assert_eq!(buf.data, b"abc");
    }
}
