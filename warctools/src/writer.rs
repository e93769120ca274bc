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

//! Record output.
//!
//! Records are compressed one at a time: every record written with [`Compression::Gzip`] is
//! a complete gzip member on its own, so a reader that knows a record's offset can start
//! decompressing right there.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use flate2::write::GzEncoder;

use crate::error::Result;
use crate::record::ArchiveRecord;

/// Compression applied to a single record.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
pub enum Compression {
    #[default]
    None,
    /// One gzip member per record.
    Gzip,
}

impl Compression {
    /// Guess the compression from a file name. Only the name is looked at.
    pub fn guess_for_filename<P: AsRef<Path>>(path: P) -> Compression {
        match path.as_ref().extension() {
            Some(ext) if ext == "gz" => Compression::Gzip,
            _ => Compression::None,
        }
    }
}

enum Framed<W: Write> {
    Plain(W),
    Gzip(GzEncoder<W>),
}

impl<W: Write> Framed<W> {
    fn new(dest: W, mode: Compression) -> Self {
        match mode {
            Compression::None => Framed::Plain(dest),
            Compression::Gzip => Framed::Gzip(GzEncoder::new(dest, flate2::Compression::default())),
        }
    }

    fn finish(self) -> io::Result<W> {
        match self {
            Framed::Plain(w) => Ok(w),
            Framed::Gzip(gz) => gz.finish(),
        }
    }
}

impl<W: Write> Write for Framed<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Framed::Plain(w) => w.write(buf),
            Framed::Gzip(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Framed::Plain(w) => w.flush(),
            Framed::Gzip(w) => w.flush(),
        }
    }
}

/// Run `write` against `out`, wrapped in its own gzip member if requested.
///
/// The record is assembled in memory and only handed to `out` once `write` succeeded, so a
/// failed record leaves `out` untouched. Flushing `out` is up to the caller.
pub(crate) fn write_framed<W, F>(out: &mut W, compression: Compression, write: F) -> Result<()>
where
    W: Write,
    F: FnOnce(&mut dyn Write) -> Result<()>,
{
    let mut framed = Framed::new(Vec::new(), compression);
    write(&mut framed)?;
    out.write_all(&framed.finish()?)?;
    Ok(())
}

struct CountingWriter<W> {
    inner: W,
    count: u64,
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.count += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Append-only record writer.
///
/// Keeps track of how many bytes have been written so the offset of every record can be
/// handed to an index.
pub struct RecordWriter<W: Write> {
    out: CountingWriter<W>,
    compression: Compression,
}

impl RecordWriter<BufWriter<File>> {
    /// Create (or truncate) a file. Compression is guessed from the file name.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let compression = Compression::guess_for_filename(&path);
        let file = File::create(path)?;
        Ok(Self::new(BufWriter::new(file), compression))
    }
}

impl<W: Write> RecordWriter<W> {
    pub fn new(out: W, compression: Compression) -> Self {
        Self::with_offset(out, compression, 0)
    }

    /// Writer for a sink that already holds `offset` bytes, such as a file opened for appending.
    pub fn with_offset(out: W, compression: Compression, offset: u64) -> Self {
        RecordWriter {
            out: CountingWriter {
                inner: out,
                count: offset,
            },
            compression,
        }
    }

    pub fn compression(&self) -> Compression {
        self.compression
    }

    /// Bytes written so far.
    pub fn position(&self) -> u64 {
        self.out.count
    }

    /// Write a record and return the offset it was written at.
    pub fn write_record(&mut self, record: &mut ArchiveRecord<'_>) -> Result<u64> {
        let offset = self.out.count;
        record.write_to(&mut self.out, self.compression)?;
        debug!(
            "wrote {:?} record at {} ({} bytes)",
            record.kind(),
            offset,
            self.out.count - offset
        );
        Ok(offset)
    }

    pub fn flush(&mut self) -> Result<()> {
        self.out.flush()?;
        Ok(())
    }

    pub fn get_ref(&self) -> &W {
        &self.out.inner
    }

    /// Flush and return the sink.
    pub fn into_inner(mut self) -> Result<W> {
        self.out.flush()?;
        Ok(self.out.inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::MultiGzDecoder;
    use std::io::Read;

    #[test]
    fn compression_from_filename() {
        assert_eq!(Compression::guess_for_filename("a.warc.gz"), Compression::Gzip);
        assert_eq!(Compression::guess_for_filename("a.warc"), Compression::None);
        assert_eq!(Compression::guess_for_filename("gz"), Compression::None);
    }

    #[test]
    fn framed_gzip_is_one_member() {
        let mut out = Vec::new();
        write_framed(&mut out, Compression::Gzip, |w| {
            w.write_all(b"hello ")?;
            w.write_all(b"world")?;
            Ok(())
        })
        .unwrap();
        assert_eq!(&out[..2], b"\x1f\x8b");

        let mut decoded = String::new();
        MultiGzDecoder::new(&out[..]).read_to_string(&mut decoded).unwrap();
        assert_eq!(decoded, "hello world");
    }

    #[test]
    fn failed_record_writes_nothing() {
        for compression in [Compression::None, Compression::Gzip] {
            let mut out = b"previous".to_vec();
            let result = write_framed(&mut out, compression, |w| {
                w.write_all(b"partial record")?;
                Err(crate::Error::ContentTruncated { expected: 20, read: 9 })
            });
            assert!(matches!(result, Err(crate::Error::ContentTruncated { .. })));
            assert_eq!(out, b"previous");
        }
    }

    #[test]
    fn framed_plain_passes_through() {
        let mut out = Vec::new();
        write_framed(&mut out, Compression::None, |w| Ok(w.write_all(b"abc")?)).unwrap();
        assert_eq!(out, b"abc");
    }
}
