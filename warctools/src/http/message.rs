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

use std::io::{BufRead, Read};
use std::rc::Rc;

use flate2::{Decompress, FlushDecompress, Status};

use super::body::{BodyReader, ChunkFailure, ChunkReader, LengthReader, MessageBuffer};
use super::header::{MessageHead, RequestHeader, ResponseHeader};
use super::{is_newline, HttpError};

/// Parser state of an HTTP message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Start,
    Headers,
    Body,
    End,
    /// Input ended early or could not be parsed. Everything read so far is kept.
    Incomplete,
}

/// What a message wants to be fed next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Predict {
    /// One line.
    Line,
    /// Up to this many bytes.
    Bytes(u64),
    /// Everything until the input is closed.
    ToEnd,
    /// Nothing, the message is finished.
    Done,
}

/// Incremental HTTP message parser.
///
/// The message keeps every byte it consumes. Body data is tracked as spans into that buffer,
/// so chunked bodies are reassembled without copying each chunk.
#[derive(Debug, Clone)]
pub struct HttpMessage<H: MessageHead> {
    buf: MessageBuffer,
    header: H,
    mode: Mode,
    body_reader: Option<BodyReader>,
    body_start: usize,
    interim: Vec<H>,
    errors: Vec<HttpError>,
}

/// Parser for an HTTP request.
pub type RequestMessage = HttpMessage<RequestHeader>;

/// Parser for an HTTP response. Interim `100 Continue` responses are collected and parsing
/// carries on with the final response.
pub type ResponseMessage = HttpMessage<ResponseHeader>;

impl HttpMessage<RequestHeader> {
    /// WARC `Content-Type` of a record holding a request.
    pub const CONTENT_TYPE: &'static [u8] = b"application/http;msgtype=request";

    pub fn new() -> Self {
        Self::with_header(RequestHeader::default())
    }

    /// Create a request parser that leaves the named headers out of framing decisions.
    pub fn with_ignore_headers<I, N>(ignore_headers: I) -> Self
    where
        I: IntoIterator<Item = N>,
        N: AsRef<[u8]>,
    {
        Self::with_header(RequestHeader::new(ignore_headers))
    }

    /// Reconstructed request URL.
    pub fn url(&self) -> Vec<u8> {
        self.header.url()
    }
}

impl Default for HttpMessage<RequestHeader> {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpMessage<ResponseHeader> {
    /// WARC `Content-Type` of a record holding a response.
    pub const CONTENT_TYPE: &'static [u8] = b"application/http;msgtype=response";

    /// Create a parser for the response to `request`.
    ///
    /// Whether the response has a body depends on the request method, so the request
    /// header is carried along.
    pub fn new(request: &RequestMessage) -> Self {
        Self::with_ignore_headers(request, std::iter::empty::<&[u8]>())
    }

    pub fn with_ignore_headers<I, N>(request: &RequestMessage, ignore_headers: I) -> Self
    where
        I: IntoIterator<Item = N>,
        N: AsRef<[u8]>,
    {
        let request = Rc::new(request.header().clone());
        Self::with_header(ResponseHeader::new(Some(request), ignore_headers))
    }

    /// Status code of the final response.
    pub fn code(&self) -> u16 {
        self.header.code()
    }

    /// Whether one or more `100 Continue` responses preceded this one.
    pub fn got_continue(&self) -> bool {
        !self.interim.is_empty()
    }
}

impl<H: MessageHead> HttpMessage<H> {
    pub fn with_header(header: H) -> Self {
        HttpMessage {
            buf: MessageBuffer::default(),
            header,
            mode: Mode::Start,
            body_reader: None,
            body_start: 0,
            interim: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn header(&self) -> &H {
        &self.header
    }

    /// Headers of interim responses, in the order received.
    pub fn interim(&self) -> &[H] {
        &self.interim
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn body_reader(&self) -> Option<&BodyReader> {
        self.body_reader.as_ref()
    }

    /// Errors recorded while parsing, including soft header errors.
    pub fn errors(&self) -> Vec<HttpError> {
        let mut errors = self.errors.clone();
        errors.extend_from_slice(self.header.fields().errors());
        errors
    }

    /// Whether the header block has been read in full.
    pub fn headers_complete(&self) -> bool {
        matches!(self.mode, Mode::Body | Mode::End)
    }

    /// Whether the message has been read in full and expects no more input.
    pub fn complete(&self) -> bool {
        self.mode == Mode::End
    }

    /// Push more input into the parser.
    ///
    /// Returns the part of `text` that does not belong to this message, which is empty
    /// until the message is complete. On error the message switches to
    /// [`Mode::Incomplete`] and keeps what it has parsed.
    pub fn feed<'t>(&mut self, text: &'t [u8]) -> Result<&'t [u8], HttpError> {
        let result = self.feed_once(text).and_then(|mut rest| {
            while self.complete() {
                let Some(next) = self.header.interim_successor() else {
                    break;
                };
                debug!("interim response, parsing the next one");
                let done = std::mem::replace(&mut self.header, next);
                self.interim.push(done);
                self.buf.chunks.clear();
                self.body_reader = None;
                self.mode = Mode::Start;
                rest = self.feed_once(rest)?;
            }
            Ok(rest)
        });

        result.inspect_err(|e| {
            self.mode = Mode::Incomplete;
            self.errors.push(e.clone());
        })
    }

    fn feed_once<'t>(&mut self, mut text: &'t [u8]) -> Result<&'t [u8], HttpError> {
        if !text.is_empty() && self.mode == Mode::Start {
            text = self.feed_start(text)?;
        }
        if !text.is_empty() && self.mode == Mode::Headers {
            text = self.feed_headers(text)?;
            if self.mode == Mode::Body {
                self.begin_body();
            }
        }
        if !text.is_empty() && self.mode == Mode::Body {
            text = self.feed_body(text)?;
        }
        Ok(text)
    }

    fn feed_start<'t>(&mut self, text: &'t [u8]) -> Result<&'t [u8], HttpError> {
        let (line, rest) = self.buf.feed_line(text);
        if let Some(line) = line {
            // Blank lines before the start line are skipped.
            if !is_newline(&line) {
                self.header.set_start_line(&line)?;
                self.mode = Mode::Headers;
            }
        }
        Ok(rest)
    }

    fn feed_headers<'t>(&mut self, mut text: &'t [u8]) -> Result<&'t [u8], HttpError> {
        while !text.is_empty() {
            let (line, rest) = self.buf.feed_line(text);
            text = rest;
            if let Some(line) = line {
                self.header.fields_mut().add_header_line(&line)?;
                if is_newline(&line) {
                    self.mode = Mode::Body;
                    break;
                }
            }
        }
        Ok(text)
    }

    fn begin_body(&mut self) {
        self.header.headers_complete();
        self.body_start = self.buf.offset;

        if !self.header.has_body() {
            self.mode = Mode::End;
            return;
        }

        let fields = self.header.fields();
        if fields.body_is_chunked() {
            self.body_reader = Some(BodyReader::Chunked(ChunkReader::new()));
        } else if let Some(length) = fields.body_length() {
            let span = usize::try_from(length).unwrap_or(usize::MAX);
            self.buf.chunks = vec![(self.buf.offset, span)];
            self.body_reader = Some(BodyReader::Length(LengthReader::new(length)));
            if length == 0 {
                self.mode = Mode::End;
            }
        } else {
            self.buf.chunks = vec![(self.buf.offset, 0)];
            self.body_reader = None;
        }
    }

    fn feed_body<'t>(&mut self, mut text: &'t [u8]) -> Result<&'t [u8], HttpError> {
        let mut broken = false;
        match self.body_reader.as_mut() {
            Some(BodyReader::Length(reader)) => {
                text = reader.feed(&mut self.buf, text);
                if reader.is_done() {
                    self.mode = Mode::End;
                }
            }
            Some(BodyReader::Chunked(reader)) => {
                match reader.feed(&mut self.buf, self.header.fields_mut(), text) {
                    Ok(rest) => {
                        text = rest;
                        if reader.is_done() {
                            self.mode = Mode::End;
                        }
                    }
                    Err(ChunkFailure::Broken(rest)) => {
                        broken = true;
                        text = rest;
                    }
                    Err(ChunkFailure::Http(e)) => return Err(e),
                }
            }
            None => {}
        }

        if broken {
            warn!("chunked body without valid chunk size, reading until close instead");
            self.body_reader = None;
            self.buf.chunks = vec![(self.body_start, self.buf.data.len() - self.body_start)];
        }

        if self.body_reader.is_none() {
            self.buf.feed_to_end(text);
            text = &[];
        }
        Ok(text)
    }

    /// Mark the end of input.
    ///
    /// A close-delimited body ends here. Any other message that is not complete yet becomes
    /// [`Mode::Incomplete`] and its last body span is cut to the bytes actually received.
    pub fn close(&mut self) {
        if self.body_reader.is_none() && self.mode == Mode::Body {
            self.mode = Mode::End;
        } else if self.mode != Mode::End {
            let available = self.buf.data.len();
            if let Some(last) = self.buf.chunks.last_mut() {
                last.1 = last.1.min(available.saturating_sub(last.0));
            }
            self.mode = Mode::Incomplete;
        }
    }

    /// What the parser wants next.
    pub fn feed_predict(&self) -> Predict {
        match self.mode {
            Mode::Start | Mode::Headers => Predict::Line,
            Mode::Body => self
                .body_reader
                .as_ref()
                .map_or(Predict::ToEnd, BodyReader::predict),
            Mode::End | Mode::Incomplete => Predict::Done,
        }
    }

    /// Feed the message from a reader, pulling only as much as [`Self::feed_predict`] asks for.
    ///
    /// The message is closed when the reader runs dry. Returns any bytes that were read but
    /// not consumed.
    pub fn feed_reader<R: BufRead>(&mut self, reader: &mut R) -> crate::Result<Vec<u8>> {
        let mut text = Vec::new();
        loop {
            text.clear();
            match self.feed_predict() {
                Predict::Done => return Ok(text),
                Predict::Line => {
                    reader.read_until(b'\n', &mut text)?;
                }
                Predict::Bytes(n) => {
                    reader.by_ref().take(n).read_to_end(&mut text)?;
                }
                Predict::ToEnd => {
                    reader.read_to_end(&mut text)?;
                }
            }

            if text.is_empty() {
                self.close();
                return Ok(text);
            }
            let rest = self.feed(&text)?;
            if !rest.is_empty() {
                return Ok(rest.to_vec());
            }
        }
    }

    /// Everything fed into the message so far.
    pub fn get_message(&self) -> &[u8] {
        &self.buf.data
    }

    /// Reassembled body, still transfer-decoded but not content-decoded.
    pub fn get_body(&self) -> Vec<u8> {
        let mut body = Vec::new();
        self.write_body(&mut body);
        body
    }

    pub fn write_body(&self, buf: &mut Vec<u8>) {
        for &(offset, length) in &self.buf.chunks {
            let start = offset.min(self.buf.data.len());
            let end = offset.saturating_add(length).min(self.buf.data.len());
            buf.extend_from_slice(&self.buf.data[start..end]);
        }
    }

    /// The message rebuilt from its parsed parts. See [`Self::write_decoded_message`].
    pub fn get_decoded_message(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.write_decoded_message(&mut buf);
        buf
    }

    /// Write the message rebuilt from its parsed parts.
    ///
    /// Framing headers are dropped and replaced with a `Content-Length` matching the written
    /// body. A body with `Content-Encoding` is decompressed if possible. Otherwise the
    /// encoding header is written back so the output stays truthful.
    pub fn write_decoded_message(&self, buf: &mut Vec<u8>) {
        self.header.write_decoded(buf);

        let mut body = self.get_body();
        let mut undecoded = None;
        if let Some(encoding) = self.header.fields().encoding() {
            if !body.is_empty() {
                match decompress(&body) {
                    Some(decoded) => body = decoded,
                    None => undecoded = Some(encoding),
                }
            }
        }

        if self.header.has_body() {
            buf.extend_from_slice(format!("Content-Length: {}\r\n", body.len()).as_bytes());
        }
        if let Some(encoding) = undecoded {
            if self.header.has_body() {
                buf.extend_from_slice(b"Content-Encoding: ");
                buf.extend_from_slice(encoding);
                buf.extend_from_slice(b"\r\n");
            }
        }
        buf.extend_from_slice(b"\r\n");
        buf.extend_from_slice(&body);
    }
}

/// Try zlib, raw deflate and gzip in that order.
fn decompress(data: &[u8]) -> Option<Vec<u8>> {
    inflate(data, true)
        .or_else(|| inflate(data, false))
        .or_else(|| gunzip(data))
}

fn inflate(data: &[u8], zlib_header: bool) -> Option<Vec<u8>> {
    let mut inflater = Decompress::new(zlib_header);
    let mut out = Vec::with_capacity(data.len().saturating_mul(4).max(64));
    loop {
        if out.len() == out.capacity() {
            out.reserve(out.capacity());
        }
        let consumed = usize::try_from(inflater.total_in()).ok()?;
        let (in_before, out_before) = (inflater.total_in(), inflater.total_out());
        let status = inflater
            .decompress_vec(&data[consumed..], &mut out, FlushDecompress::Finish)
            .ok()?;
        if status == Status::StreamEnd {
            return Some(out);
        }
        if inflater.total_in() == in_before && inflater.total_out() == out_before {
            // no progress with room to spare: the stream is truncated
            return None;
        }
    }
}

fn gunzip(data: &[u8]) -> Option<Vec<u8>> {
    let mut out = Vec::new();
    flate2::read::GzDecoder::new(data).read_to_end(&mut out).ok()?;
    Some(out)
}
