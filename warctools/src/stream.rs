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

//! Sequential record reading.
//!
//! A [`RecordStream`] finds record boundaries by parsing each header block and then
//! accounting for exactly the declared number of content bytes. Content is not read until
//! someone asks for it: the record hands out a [`ContentFile`] that borrows the stream and
//! cannot read past the end of the content. Whatever is left unread is skipped before the
//! next record is parsed.
//!
//! Offsets always refer to the raw input. For per-record gzip this is the position of the
//! gzip member that holds the record.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use flate2::bufread::MultiGzDecoder;

use crate::arc::ArcParser;
use crate::config::{Dialect, GzipMode, StreamConfig};
use crate::detect::{guess_dialect, is_gzip_filename, is_gzip_magic, GZIP_MAGIC};
use crate::error::{Error, ParseError, Result};
use crate::gz::{read_prefix, CountingReader, GzipMembers};
use crate::header::{is_blank_line, read_line};
use crate::record::{ArchiveRecord, Content, ContentFile, Parsed};
use crate::warc::WarcParser;

enum Source<R> {
    Plain(CountingReader<R>),
    Members(BufReader<GzipMembers<R>>),
    File(BufReader<MultiGzDecoder<CountingReader<R>>>),
}

impl<R: BufRead> Source<R> {
    fn raw_position(&self) -> Option<u64> {
        match self {
            Source::Plain(raw) => Some(raw.count()),
            Source::Members(reader) => Some(reader.get_ref().raw_position()),
            Source::File(_) => None,
        }
    }
}

impl<R: BufRead> Read for Source<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Source::Plain(r) => r.read(buf),
            Source::Members(r) => r.read(buf),
            Source::File(r) => r.read(buf),
        }
    }
}

impl<R: BufRead> BufRead for Source<R> {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        match self {
            Source::Plain(r) => r.fill_buf(),
            Source::Members(r) => r.fill_buf(),
            Source::File(r) => r.fill_buf(),
        }
    }

    fn consume(&mut self, amt: usize) {
        match self {
            Source::Plain(r) => r.consume(amt),
            Source::Members(r) => r.consume(amt),
            Source::File(r) => r.consume(amt),
        }
    }
}

/// Decompressed input with the bytes-to-end-of-content counter. Reads stop at the end of
/// the current content while the counter is set.
struct Body<R> {
    source: Source<R>,
    bytes_to_eoc: Option<u64>,
    chunk_size: usize,
}

impl<R: BufRead> Body<R> {
    fn limit(&self, len: usize) -> usize {
        match self.bytes_to_eoc {
            Some(n) => usize::try_from(n).map_or(len, |n| n.min(len)),
            None => len,
        }
    }

    /// Drop the rest of the current content. Returns an error if the input ends first.
    fn skip_to_eoc(&mut self) -> io::Result<Option<ParseError>> {
        let Some(expected) = self.bytes_to_eoc else {
            return Ok(None);
        };
        let mut skipped = 0u64;
        while skipped < expected {
            let want = usize::try_from(expected - skipped).map_or(self.chunk_size, |n| n.min(self.chunk_size));
            let available = self.source.fill_buf()?.len();
            if available == 0 {
                break;
            }
            let n = available.min(want);
            self.source.consume(n);
            skipped += n as u64;
        }
        self.bytes_to_eoc = None;
        if skipped < expected {
            warn!("input ended {} bytes before end of record content", expected - skipped);
            return Ok(Some(ParseError::Truncated {
                expected,
                read: skipped,
            }));
        }
        Ok(None)
    }

    /// Next line that is not blank, with the raw position it starts at. Empty at the end of
    /// input.
    fn next_line(&mut self) -> io::Result<(Option<u64>, Vec<u8>)> {
        loop {
            let position = self.source.raw_position();
            let line = read_line(self)?;
            if line.is_empty() || !is_blank_line(&line) {
                return Ok((position, line));
            }
        }
    }
}

impl<R: BufRead> Read for Body<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let limit = self.limit(buf.len());
        if limit == 0 {
            return Ok(0);
        }
        let n = self.source.read(&mut buf[..limit])?;
        if let Some(eoc) = &mut self.bytes_to_eoc {
            *eoc -= n as u64;
        }
        Ok(n)
    }
}

impl<R: BufRead> BufRead for Body<R> {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        let buf = self.source.fill_buf()?;
        let n = match self.bytes_to_eoc {
            Some(n) => usize::try_from(n).map_or(buf.len(), |n| n.min(buf.len())),
            None => buf.len(),
        };
        Ok(&buf[..n])
    }

    fn consume(&mut self, amt: usize) {
        let amt = self.limit(amt);
        self.source.consume(amt);
        if let Some(eoc) = &mut self.bytes_to_eoc {
            *eoc -= amt as u64;
        }
    }
}

enum Parser {
    Warc(WarcParser),
    Arc(ArcParser),
    Mixed(WarcParser, ArcParser),
}

impl Parser {
    fn parse<B: BufRead + ?Sized>(&mut self, reader: &mut B, line: Vec<u8>) -> io::Result<Parsed> {
        match self {
            Parser::Warc(warc) => warc.parse(reader, line),
            Parser::Arc(arc) => arc.parse(reader, line),
            Parser::Mixed(warc, _) if line.starts_with(b"WARC") => warc.parse(reader, line),
            Parser::Mixed(_, arc) => arc.parse(reader, line),
        }
    }
}

/// Result of a single [`RecordStream::read_record`] call.
///
/// `record` is `None` at the end of the stream. If `errors` is not empty as well, the stream
/// ended in data that could not be parsed. Errors of a record that could be parsed are
/// attached to the record itself.
#[derive(Debug)]
pub struct ReadRecord<'a> {
    pub offset: Option<u64>,
    pub record: Option<ArchiveRecord<'a>>,
    pub errors: Vec<ParseError>,
}

/// Reader of WARC and ARC records from a byte source.
pub struct RecordStream<R> {
    body: Body<R>,
    parser: Parser,
    dialect: Dialect,
    gzip: GzipMode,
    offsets: bool,
    pending: Option<ParseError>,
    /// First line, already read for dialect detection.
    lookahead: Option<(Option<u64>, Vec<u8>)>,
}

impl RecordStream<BufReader<File>> {
    /// Open an archive file. A `.gz` file name selects per-record gzip in [`GzipMode::Auto`].
    pub fn open<P: AsRef<Path>>(path: P, config: StreamConfig) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let reader = BufReader::with_capacity(config.chunk_size, file);
        Self::build(reader, config, is_gzip_filename(path), 0)
    }

    /// Open an archive file at a record offset. Reported offsets stay absolute.
    pub fn open_at<P: AsRef<Path>>(path: P, offset: u64, config: StreamConfig) -> Result<Self> {
        let path = path.as_ref();
        let mut file = File::open(path)?;
        file.seek(SeekFrom::Start(offset))?;
        let reader = BufReader::with_capacity(config.chunk_size, file);
        Self::build(reader, config, is_gzip_filename(path), offset)
    }
}

impl<R: BufRead> RecordStream<R> {
    /// Read records from any buffered reader. Framing and dialect are detected from the data
    /// unless configured.
    pub fn from_reader(reader: R, config: StreamConfig) -> Result<Self> {
        Self::build(reader, config, false, 0)
    }

    fn build(mut reader: R, config: StreamConfig, gz_name: bool, start: u64) -> Result<Self> {
        // A single fill_buf may hold less than the magic bytes.
        let prefix = match config.gzip {
            GzipMode::Auto if !gz_name => read_prefix(&mut reader, GZIP_MAGIC.len())?,
            _ => Vec::new(),
        };
        let gzip = match config.gzip {
            GzipMode::Auto if gz_name || is_gzip_magic(&prefix) => GzipMode::Record,
            GzipMode::Auto => GzipMode::None,
            mode => mode,
        };

        let raw = CountingReader::with_prefix(reader, start, prefix);
        let source = match gzip {
            GzipMode::Record => Source::Members(BufReader::with_capacity(
                config.chunk_size,
                GzipMembers::from_counting(raw),
            )),
            GzipMode::File => Source::File(BufReader::with_capacity(
                config.chunk_size,
                MultiGzDecoder::new(raw),
            )),
            GzipMode::None | GzipMode::Auto => Source::Plain(raw),
        };

        let mut body = Body {
            source,
            bytes_to_eoc: None,
            chunk_size: config.chunk_size.max(1),
        };
        let mut lookahead = None;
        let dialect = match config.dialect {
            Dialect::Auto => {
                let (position, line) = body.next_line()?;
                let dialect = guess_dialect(&line).ok_or(Error::UnknownFormat)?;
                lookahead = Some((position, line));
                dialect
            }
            dialect => dialect,
        };
        let parser = match dialect {
            Dialect::Arc => Parser::Arc(ArcParser::new()),
            Dialect::Mixed => Parser::Mixed(WarcParser::new(config.bad_line_limit), ArcParser::new()),
            Dialect::Warc | Dialect::Auto => Parser::Warc(WarcParser::new(config.bad_line_limit)),
        };
        debug!("reading {:?} records with {:?} gzip framing", dialect, gzip);

        Ok(RecordStream {
            body,
            parser,
            dialect,
            gzip,
            offsets: config.offsets,
            pending: None,
            lookahead,
        })
    }

    /// Record dialect in use. Never [`Dialect::Auto`].
    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Gzip framing in use. Never [`GzipMode::Auto`].
    pub fn gzip(&self) -> GzipMode {
        self.gzip
    }

    /// Content bytes of the current record not read yet.
    pub fn remaining(&self) -> Option<u64> {
        self.body.bytes_to_eoc
    }

    /// Read the next record.
    ///
    /// Unread content of the previous record is skipped first, and any run of blank lines
    /// between records is ignored. The record's content borrows the stream, so it has to be
    /// dropped before the next call.
    pub fn read_record(&mut self) -> Result<ReadRecord<'_>> {
        if let Some(error) = self.body.skip_to_eoc()? {
            self.pending = Some(error);
        }

        let (position, line) = match self.lookahead.take() {
            Some(first) => first,
            None => self.body.next_line()?,
        };

        let parsed = self.parser.parse(&mut self.body, line)?;
        let offset = if !self.offsets {
            None
        } else {
            match &self.body.source {
                Source::Plain(_) => position.map(|p| p + parsed.skipped),
                Source::Members(reader) if parsed.record.is_none() && parsed.errors.is_empty() => {
                    Some(reader.get_ref().raw_position())
                }
                Source::Members(reader) => Some(reader.get_ref().member_offset()),
                Source::File(_) => None,
            }
        };

        let mut errors = parsed.errors;
        let Some(record) = parsed.record else {
            if let Some(error) = self.pending.take() {
                errors.insert(0, error);
            }
            if !errors.is_empty() {
                warn!("no record at offset {:?}: {} errors", offset, errors.len());
            }
            return Ok(ReadRecord {
                offset,
                record: None,
                errors,
            });
        };
        self.pending = None;

        trace!("{:?} record at offset {:?}, {} content bytes", record.kind(), offset, parsed.content_length);
        self.body.bytes_to_eoc = Some(parsed.content_length);
        let content = ContentFile::from_buf_read(&mut self.body, parsed.content_length);
        Ok(ReadRecord {
            offset,
            record: Some(record.with_content(Content::Stream(content))),
            errors,
        })
    }

    /// Next record and its offset, `None` at the end of the stream. Unparseable data at
    /// the end is returned as [`Error::Corrupt`].
    pub fn next_record(&mut self) -> Option<Result<(Option<u64>, ArchiveRecord<'_>)>> {
        match self.read_record() {
            Err(e) => Some(Err(e)),
            Ok(ReadRecord {
                offset,
                record: Some(record),
                ..
            }) => Some(Ok((offset, record))),
            Ok(ReadRecord { errors, .. }) if errors.is_empty() => None,
            Ok(ReadRecord { offset, errors, .. }) => Some(Err(Error::Corrupt { offset, errors })),
        }
    }

    /// Iterate over records with their content read into memory.
    pub fn records(self) -> Records<R> {
        Records {
            stream: self,
            done: false,
        }
    }

    /// Read a line of the current record's content. Never reads past the end of the content.
    pub fn read_line(&mut self, buf: &mut Vec<u8>) -> Result<usize> {
        if self.body.bytes_to_eoc.is_none() {
            return Ok(0);
        }
        Ok(self.body.read_until(b'\n', buf)?)
    }
}

impl<R: BufRead + Seek> RecordStream<R> {
    /// Continue reading at a raw record offset, as reported by [`Self::read_record`].
    ///
    /// Not supported for whole-file gzip.
    pub fn seek(&mut self, offset: u64) -> Result<()> {
        match &mut self.body.source {
            Source::Plain(raw) => raw.seek_to(offset)?,
            Source::Members(reader) => {
                let buffered = reader.buffer().len();
                reader.consume(buffered);
                reader.get_mut().seek_raw(offset)?;
            }
            Source::File(_) => return Err(Error::UnsupportedSeek),
        }
        debug!("seek to {}", offset);
        self.body.bytes_to_eoc = None;
        self.pending = None;
        self.lookahead = None;
        Ok(())
    }
}

/// Owning record iterator, see [`RecordStream::records`].
///
/// Iteration ends after the first error.
pub struct Records<R> {
    stream: RecordStream<R>,
    done: bool,
}

impl<R> Records<R> {
    pub fn into_inner(self) -> RecordStream<R> {
        self.stream
    }
}

impl<R: BufRead> Iterator for Records<R> {
    type Item = Result<(Option<u64>, ArchiveRecord<'static>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let item = match self.stream.next_record() {
            Some(Ok((offset, record))) => record.into_owned().map(|record| (offset, record)),
            Some(Err(e)) => Err(e),
            None => {
                self.done = true;
                return None;
            }
        };
        if item.is_err() {
            self.done = true;
        }
        Some(item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::RecordKind;
    use std::io::{Cursor, Write};

    const RECORD: &[u8] = b"WARC/1.0\r\n\
        WARC-Type: resource\r\n\
        WARC-Record-ID: <urn:uuid:1>\r\n\
        WARC-Date: 2013-11-15T00:00:00Z\r\n\
        Content-Length: 12\r\n\
        \r\n\
        line 1\nline\r\n\r\n";

    fn stream(data: &[u8]) -> RecordStream<Cursor<Vec<u8>>> {
        RecordStream::from_reader(Cursor::new(data.to_vec()), StreamConfig::default()).unwrap()
    }

    #[test]
    fn content_is_bounded() {
        let data = [RECORD, RECORD].concat();
        let mut stream = stream(&data);
        let mut read = stream.read_record().unwrap();
        assert_eq!(read.offset, Some(0));
        let record = read.record.as_mut().unwrap();
        let mut content = Vec::new();
        record.content_file().unwrap().read_to_end(&mut content).unwrap();
        assert_eq!(content, b"line 1\nline");
        drop(read);

        let read = stream.read_record().unwrap();
        assert_eq!(read.offset, Some(RECORD.len() as u64));
        assert!(read.record.is_some());
    }

    #[test]
    fn read_line_stops_at_content_end() {
        let mut stream = stream(RECORD);
        drop(stream.read_record().unwrap());
        assert_eq!(stream.remaining(), Some(12));

        let mut line = Vec::new();
        stream.read_line(&mut line).unwrap();
        assert_eq!(line, b"line 1\n");
        line.clear();
        stream.read_line(&mut line).unwrap();
        assert_eq!(line, b"line");
        line.clear();
        assert_eq!(stream.read_line(&mut line).unwrap(), 0);
        assert_eq!(stream.remaining(), Some(0));
    }

    #[test]
    fn unknown_format_is_rejected() {
        let result = RecordStream::from_reader(Cursor::new(b"<html>".to_vec()), StreamConfig::default());
        assert!(matches!(result, Err(Error::UnknownFormat)));
    }

    #[test]
    fn detection_reads_past_short_buffers() {
        let gzipped = {
            let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
            encoder.write_all(RECORD).unwrap();
            encoder.finish().unwrap()
        };
        let arc = b"\r\n\nfiledesc://a.arc 0.0.0.0 20131113000000 text/plain 76\n\
            1 0 InternetArchive\n\
            URL IP-address Archive-date Content-type Archive-length\n\n"
            .to_vec();
        let cases = [
            (RECORD.to_vec(), Dialect::Warc, GzipMode::None),
            (gzipped, Dialect::Warc, GzipMode::Record),
            (arc, Dialect::Arc, GzipMode::None),
        ];
        for (data, dialect, gzip) in cases {
            let reader = BufReader::with_capacity(4, Cursor::new(data));
            let mut stream = RecordStream::from_reader(reader, StreamConfig::default()).unwrap();
            assert_eq!(stream.dialect(), dialect);
            assert_eq!(stream.gzip(), gzip);
            assert!(stream.read_record().unwrap().record.is_some());
            assert!(stream.read_record().unwrap().record.is_none());
        }

        let reader = BufReader::with_capacity(1, Cursor::new(b"\r\n<html>".to_vec()));
        let result = RecordStream::from_reader(reader, StreamConfig::default());
        assert!(matches!(result, Err(Error::UnknownFormat)));
    }

    #[test]
    fn truncated_content_ends_stream_with_error() {
        let mut stream = stream(&RECORD[..RECORD.len() - 8]);
        assert!(stream.read_record().unwrap().record.is_some());
        let read = stream.read_record().unwrap();
        assert!(read.record.is_none());
        assert_eq!(
            read.errors,
            vec![ParseError::Truncated {
                expected: 12,
                read: 8
            }]
        );
    }

    #[test]
    fn records_iterator_reports_corrupt_tail() {
        let data = [RECORD, b"garbage\n"].concat();
        let config = StreamConfig::default().bad_line_limit(0);
        let stream = RecordStream::from_reader(Cursor::new(data), config).unwrap();
        let mut records = stream.records();
        let (offset, mut record) = records.next().unwrap().unwrap();
        assert_eq!(offset, Some(0));
        assert_eq!(record.kind(), RecordKind::Warc);
        assert_eq!(record.content().unwrap().1, b"line 1\nline");
        match records.next() {
            Some(Err(Error::Corrupt { offset, errors })) => {
                assert_eq!(offset, Some(RECORD.len() as u64 + 8));
                assert_eq!(errors.len(), 2);
            }
            other => panic!("expected corrupt tail, got {:?}", other.map(|r| r.map(|(o, _)| o))),
        }
        assert!(records.next().is_none());
    }

    #[test]
    fn offsets_can_be_disabled() {
        let config = StreamConfig::default().offsets(false);
        let mut stream = RecordStream::from_reader(Cursor::new(RECORD.to_vec()), config).unwrap();
        assert_eq!(stream.read_record().unwrap().offset, None);
    }

    #[test]
    fn seek_to_second_record() {
        let data = [RECORD, b"\r\n", RECORD].concat();
        let mut stream = stream(&data);
        stream.seek(RECORD.len() as u64 + 2).unwrap();
        let read = stream.read_record().unwrap();
        assert_eq!(read.offset, Some(RECORD.len() as u64 + 2));
        assert!(read.record.is_some());
        drop(read);
        assert!(stream.read_record().unwrap().record.is_none());
    }

    #[test]
    fn mixed_dialect_dispatches_per_record() {
        let arc = b"http://example.org/ 1.2.3.4 20131113000000 text/plain 3\nabc\n";
        let data = [RECORD, &arc[..], RECORD].concat();
        let config = StreamConfig::default().dialect(Dialect::Mixed);
        let stream = RecordStream::from_reader(Cursor::new(data), config).unwrap();
        let kinds: Vec<RecordKind> = stream.records().map(|r| r.unwrap().1.kind()).collect();
        assert_eq!(kinds, vec![RecordKind::Warc, RecordKind::Arc, RecordKind::Warc]);
    }
}
