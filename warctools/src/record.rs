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

//! Record model shared by WARC and ARC records.

use std::fmt;
use std::io::{self, BufRead, BufReader, Read, Write};

use crate::arc::{ArcFiledescRecord, ArcRecord};
use crate::error::{Error, ParseError, Result};
use crate::header::HeaderMap;
use crate::warc::WarcRecord;
use crate::writer::Compression;

/// Bounded reader over a record's content.
///
/// Reads never go past the declared content length, so reading to the end of a content file
/// never yields bytes of the following record.
pub struct ContentFile<'a> {
    reader: Box<dyn BufRead + 'a>,
    length: u64,
    consumed: u64,
}

impl<'a> ContentFile<'a> {
    /// Wrap a reader that holds exactly `length` content bytes.
    ///
    /// Bytes beyond `length` are never read from `reader`.
    pub fn new<R: Read + 'a>(reader: R, length: u64) -> Self {
        Self::from_buf_read(BufReader::new(reader.take(length)), length)
    }

    pub(crate) fn from_buf_read<R: BufRead + 'a>(reader: R, length: u64) -> Self {
        ContentFile {
            reader: Box::new(reader),
            length,
            consumed: 0,
        }
    }

    /// Declared content length.
    pub fn length(&self) -> u64 {
        self.length
    }

    /// Bytes not read yet.
    pub fn remaining(&self) -> u64 {
        self.length - self.consumed
    }

    fn limit(&self, len: usize) -> usize {
        usize::try_from(self.remaining()).map_or(len, |r| r.min(len))
    }
}

impl Read for ContentFile<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let limit = self.limit(buf.len());
        if limit == 0 {
            return Ok(0);
        }
        let n = self.reader.read(&mut buf[..limit])?;
        self.consumed += n as u64;
        Ok(n)
    }
}

impl BufRead for ContentFile<'_> {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        let remaining = self.remaining();
        if remaining == 0 {
            return Ok(&[]);
        }
        let buf = self.reader.fill_buf()?;
        let n = usize::try_from(remaining).map_or(buf.len(), |r| r.min(buf.len()));
        Ok(&buf[..n])
    }

    fn consume(&mut self, amt: usize) {
        let amt = self.limit(amt);
        self.reader.consume(amt);
        self.consumed += amt as u64;
    }
}

impl fmt::Debug for ContentFile<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContentFile")
            .field("length", &self.length)
            .field("consumed", &self.consumed)
            .finish()
    }
}

/// Record content.
///
/// Content read from a stream starts out as [`Content::Stream`] and turns into
/// [`Content::Buffered`] when it is first accessed as a whole. The transition never goes back.
#[derive(Debug)]
pub enum Content<'a> {
    Buffered {
        content_type: Option<Vec<u8>>,
        body: Vec<u8>,
    },
    Stream(ContentFile<'a>),
    /// The content stream has been handed out or drained.
    Spent,
}

impl Content<'static> {
    pub fn buffered(content_type: Option<&[u8]>, body: impl Into<Vec<u8>>) -> Self {
        Content::Buffered {
            content_type: content_type.map(<[u8]>::to_vec),
            body: body.into(),
        }
    }
}

/// Headers, content and diagnostics common to all record kinds.
#[derive(Debug)]
pub struct RecordData<'a> {
    headers: HeaderMap,
    content: Content<'a>,
    errors: Vec<ParseError>,
    content_type_field: &'static str,
    length_field: &'static str,
}

impl<'a> RecordData<'a> {
    pub(crate) fn new(
        headers: HeaderMap,
        content: Content<'a>,
        errors: Vec<ParseError>,
        content_type_field: &'static str,
        length_field: &'static str,
    ) -> Self {
        RecordData {
            headers,
            content,
            errors,
            content_type_field,
            length_field,
        }
    }

    /// Move headers and errors over to new content.
    pub(crate) fn with_content<'b>(self, content: Content<'b>) -> RecordData<'b> {
        RecordData {
            headers: self.headers,
            content,
            errors: self.errors,
            content_type_field: self.content_type_field,
            length_field: self.length_field,
        }
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// Parse diagnostics, in the order they were found.
    pub fn errors(&self) -> &[ParseError] {
        &self.errors
    }

    pub(crate) fn push_error(&mut self, error: ParseError) {
        self.errors.push(error);
    }

    /// Content type of buffered content, or else the content type header.
    pub fn content_type(&self) -> Option<&[u8]> {
        match &self.content {
            Content::Buffered { content_type, .. } => content_type.as_deref(),
            _ => self.headers.get(self.content_type_field),
        }
    }

    /// Length of buffered content, or else the declared length.
    ///
    /// The two differ when the header length covers more than the content. An ARC
    /// `filedesc://` record declares its version and field name lines as well, so the value
    /// drops to the length of the remaining body once [`Self::content`] has buffered it.
    pub fn content_length(&self) -> u64 {
        match &self.content {
            Content::Buffered { body, .. } => body.len() as u64,
            Content::Stream(file) => self.header_length().unwrap_or(file.length()),
            Content::Spent => self.header_length().unwrap_or(0),
        }
    }

    fn header_length(&self) -> Option<u64> {
        std::str::from_utf8(self.headers.get(self.length_field)?)
            .ok()?
            .trim()
            .parse()
            .ok()
    }

    /// Content type and body. A content stream is read to its end and buffered on first access.
    ///
    /// A stream that ends early yields what was read and records a truncation error.
    pub fn content(&mut self) -> Result<(Option<&[u8]>, &[u8])> {
        self.materialise()?;
        match &self.content {
            Content::Buffered { content_type, body } => Ok((content_type.as_deref(), body)),
            _ => Err(Error::ContentConsumed),
        }
    }

    /// Bounded reader over content that has not been buffered yet.
    pub fn content_file(&mut self) -> Option<&mut ContentFile<'a>> {
        match &mut self.content {
            Content::Stream(file) => Some(file),
            _ => None,
        }
    }

    /// Take the content stream, leaving the content spent.
    pub fn take_content_file(&mut self) -> Option<ContentFile<'a>> {
        match std::mem::replace(&mut self.content, Content::Spent) {
            Content::Stream(file) => Some(file),
            other => {
                self.content = other;
                None
            }
        }
    }

    /// Replace the content with a buffer.
    pub fn set_content(&mut self, content_type: Option<&[u8]>, body: impl Into<Vec<u8>>) {
        self.content = Content::Buffered {
            content_type: content_type.map(<[u8]>::to_vec),
            body: body.into(),
        };
    }

    fn materialise(&mut self) -> Result<()> {
        let Content::Stream(mut file) = std::mem::replace(&mut self.content, Content::Spent) else {
            return Ok(());
        };
        let expected = file.remaining();
        let mut body = Vec::with_capacity(usize::try_from(expected.min(1 << 20)).unwrap_or(0));
        file.read_to_end(&mut body)?;

        let read = body.len() as u64;
        if read < expected {
            warn!("record content truncated after {} of {} bytes", read, expected);
            self.errors.push(ParseError::Truncated { expected, read });
        }
        self.content = Content::Buffered {
            content_type: self.headers.get(self.content_type_field).map(<[u8]>::to_vec),
            body,
        };
        Ok(())
    }

    /// Buffer the content and detach the record from its stream.
    pub fn into_owned(mut self) -> Result<RecordData<'static>> {
        self.materialise()?;
        let content = match std::mem::replace(&mut self.content, Content::Spent) {
            Content::Buffered { content_type, body } => Content::Buffered { content_type, body },
            _ => Content::Spent,
        };
        Ok(self.with_content(content))
    }

    /// Content type and length as they will be written, without consuming anything.
    pub(crate) fn write_info(&self) -> Result<(Option<Vec<u8>>, u64)> {
        match &self.content {
            Content::Buffered { content_type, body } => Ok((content_type.clone(), body.len() as u64)),
            Content::Stream(file) => Ok((
                self.headers.get(self.content_type_field).map(<[u8]>::to_vec),
                file.remaining(),
            )),
            Content::Spent => Err(Error::ContentConsumed),
        }
    }

    /// Copy the content into `out`. A content stream is drained and cannot be written again.
    pub(crate) fn write_content(&mut self, out: &mut dyn Write) -> Result<u64> {
        match &self.content {
            Content::Buffered { body, .. } => {
                out.write_all(body)?;
                Ok(body.len() as u64)
            }
            Content::Stream(_) => {
                let Some(mut file) = self.take_content_file() else {
                    return Err(Error::ContentConsumed);
                };
                let expected = file.remaining();
                let read = io::copy(&mut file, out)?;
                if read < expected {
                    return Err(Error::ContentTruncated { expected, read });
                }
                Ok(read)
            }
            Content::Spent => Err(Error::ContentConsumed),
        }
    }
}

/// Outcome of parsing one record header block.
///
/// The record carries no content yet. `skipped` counts bytes before the record that did not
/// belong to it.
#[derive(Debug, Default)]
pub(crate) struct Parsed {
    pub(crate) record: Option<ArchiveRecord<'static>>,
    pub(crate) content_length: u64,
    pub(crate) errors: Vec<ParseError>,
    pub(crate) skipped: u64,
}

/// Which kind of record an [`ArchiveRecord`] holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    Warc,
    ArcFiledesc,
    Arc,
}

/// A WARC or ARC record.
#[derive(Debug)]
pub enum ArchiveRecord<'a> {
    Warc(WarcRecord<'a>),
    ArcHeader(ArcFiledescRecord<'a>),
    Arc(ArcRecord<'a>),
}

impl<'a> ArchiveRecord<'a> {
    pub fn kind(&self) -> RecordKind {
        match self {
            ArchiveRecord::Warc(_) => RecordKind::Warc,
            ArchiveRecord::ArcHeader(_) => RecordKind::ArcFiledesc,
            ArchiveRecord::Arc(_) => RecordKind::Arc,
        }
    }

    pub fn data(&self) -> &RecordData<'a> {
        match self {
            ArchiveRecord::Warc(r) => r.data(),
            ArchiveRecord::ArcHeader(r) => r.data(),
            ArchiveRecord::Arc(r) => r.data(),
        }
    }

    pub fn data_mut(&mut self) -> &mut RecordData<'a> {
        match self {
            ArchiveRecord::Warc(r) => r.data_mut(),
            ArchiveRecord::ArcHeader(r) => r.data_mut(),
            ArchiveRecord::Arc(r) => r.data_mut(),
        }
    }

    /// Record type: the `WARC-Type` value, `filedesc` or `response`.
    pub fn type_name(&self) -> &[u8] {
        match self {
            ArchiveRecord::Warc(r) => r.headers().get("WARC-Type").unwrap_or_default(),
            ArchiveRecord::ArcHeader(r) => r.type_name(),
            ArchiveRecord::Arc(r) => r.type_name(),
        }
    }

    pub fn url(&self) -> Option<&[u8]> {
        match self {
            ArchiveRecord::Warc(r) => r.url(),
            ArchiveRecord::ArcHeader(r) => r.url(),
            ArchiveRecord::Arc(r) => r.url(),
        }
    }

    pub fn date(&self) -> Option<&[u8]> {
        match self {
            ArchiveRecord::Warc(r) => r.date(),
            ArchiveRecord::ArcHeader(r) => r.date(),
            ArchiveRecord::Arc(r) => r.date(),
        }
    }

    pub fn headers(&self) -> &HeaderMap {
        self.data().headers()
    }

    pub fn errors(&self) -> &[ParseError] {
        self.data().errors()
    }

    pub fn content_type(&self) -> Option<&[u8]> {
        self.data().content_type()
    }

    /// See [`RecordData::content_length`]. Depends on whether the content is buffered yet.
    pub fn content_length(&self) -> u64 {
        self.data().content_length()
    }

    pub fn content(&mut self) -> Result<(Option<&[u8]>, &[u8])> {
        self.data_mut().content()
    }

    pub fn content_file(&mut self) -> Option<&mut ContentFile<'a>> {
        self.data_mut().content_file()
    }

    /// Serialise the record in its own format.
    pub fn write_to<W: Write>(&mut self, out: &mut W, compression: Compression) -> Result<()> {
        match self {
            ArchiveRecord::Warc(r) => r.write_to(out, compression),
            ArchiveRecord::ArcHeader(r) => r.write_to(out, compression),
            ArchiveRecord::Arc(r) => r.write_to(out, compression),
        }
    }

    /// Buffer the content and detach the record from its stream.
    pub fn into_owned(self) -> Result<ArchiveRecord<'static>> {
        Ok(match self {
            ArchiveRecord::Warc(r) => ArchiveRecord::Warc(r.into_owned()?),
            ArchiveRecord::ArcHeader(r) => ArchiveRecord::ArcHeader(r.into_owned()?),
            ArchiveRecord::Arc(r) => ArchiveRecord::Arc(r.into_owned()?),
        })
    }

    /// Same record with its content replaced.
    pub(crate) fn with_content<'b>(self, content: Content<'b>) -> ArchiveRecord<'b> {
        match self {
            ArchiveRecord::Warc(r) => ArchiveRecord::Warc(r.with_content(content)),
            ArchiveRecord::ArcHeader(r) => ArchiveRecord::ArcHeader(r.with_content(content)),
            ArchiveRecord::Arc(r) => ArchiveRecord::Arc(r.with_content(content)),
        }
    }
}

impl<'a> From<WarcRecord<'a>> for ArchiveRecord<'a> {
    fn from(record: WarcRecord<'a>) -> Self {
        ArchiveRecord::Warc(record)
    }
}

impl<'a> From<ArcRecord<'a>> for ArchiveRecord<'a> {
    fn from(record: ArcRecord<'a>) -> Self {
        ArchiveRecord::Arc(record)
    }
}

impl<'a> From<ArcFiledescRecord<'a>> for ArchiveRecord<'a> {
    fn from(record: ArcFiledescRecord<'a>) -> Self {
        ArchiveRecord::ArcHeader(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::HeaderEncoding;

    fn data<'a>(content: Content<'a>) -> RecordData<'a> {
        let headers = HeaderMap::from_pairs(
            HeaderEncoding::Unicode,
            [("Content-Type", "text/plain"), ("Content-Length", "10")],
        );
        RecordData::new(headers, content, Vec::new(), "Content-Type", "Content-Length")
    }

    #[test]
    fn content_file_is_bounded() {
        let source: &[u8] = b"0123456789NEXT";
        let mut file = ContentFile::new(source, 10);
        let mut out = String::new();
        file.read_to_string(&mut out).unwrap();
        assert_eq!(out, "0123456789");
        assert_eq!(file.remaining(), 0);
    }

    #[test]
    fn content_file_lines_stop_at_boundary() {
        let source: &[u8] = b"ab\ncd\nef";
        let mut file = ContentFile::new(source, 5);
        let mut line = Vec::new();
        file.read_until(b'\n', &mut line).unwrap();
        assert_eq!(line, b"ab\n");
        line.clear();
        file.read_until(b'\n', &mut line).unwrap();
        assert_eq!(line, b"cd");
    }

    #[test]
    fn stream_content_is_buffered_once() {
        let source: &[u8] = b"0123456789";
        let mut record = data(Content::Stream(ContentFile::new(source, 10)));
        assert_eq!(record.content_length(), 10);
        assert!(record.content_file().is_some());

        let (content_type, body) = record.content().unwrap();
        assert_eq!(content_type, Some(&b"text/plain"[..]));
        assert_eq!(body, b"0123456789");
        assert!(record.content_file().is_none());
        assert_eq!(record.content().unwrap().1, b"0123456789");
    }

    #[test]
    fn short_stream_records_truncation() {
        let source: &[u8] = b"0123";
        let mut record = data(Content::Stream(ContentFile::new(source, 10)));
        assert_eq!(record.content().unwrap().1, b"0123");
        assert_eq!(
            record.errors(),
            &[ParseError::Truncated {
                expected: 10,
                read: 4
            }]
        );
        assert_eq!(record.content_length(), 4);
    }

    #[test]
    fn drained_stream_cannot_be_written_twice() {
        let source: &[u8] = b"0123456789";
        let mut record = data(Content::Stream(ContentFile::new(source, 10)));
        let mut out = Vec::new();
        assert_eq!(record.write_content(&mut out).unwrap(), 10);
        assert!(matches!(record.write_info(), Err(Error::ContentConsumed)));
        assert!(matches!(
            record.write_content(&mut out),
            Err(Error::ContentConsumed)
        ));
        assert!(matches!(record.content(), Err(Error::ContentConsumed)));
    }

    #[test]
    fn taken_stream_leaves_content_spent() {
        let source: &[u8] = b"0123456789";
        let mut record = data(Content::Stream(ContentFile::new(source, 10)));
        assert!(record.take_content_file().is_some());
        assert!(record.take_content_file().is_none());
        assert_eq!(record.content_length(), 10);
        let owned = record.into_owned().unwrap();
        assert!(owned.content_type().is_some());
    }
}
