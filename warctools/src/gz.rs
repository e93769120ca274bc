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

//! Gzip framing with raw member offsets.
//!
//! [`GzipMembers`] decompresses a sequence of concatenated gzip members and remembers the raw
//! offset at which the member currently being decoded started. The inflater pulls its input
//! through a [`CountingReader`], which only counts bytes the inflater actually consumed, so
//! the offsets are exact even though the source is read ahead in buffered blocks.

use std::io::{self, BufRead, Read, Seek, SeekFrom};

use flate2::bufread::GzDecoder;

/// Buffered reader that counts the bytes read or consumed from it.
///
/// Bytes already taken from the inner reader to look ahead can be put back in front of it
/// with [`Self::with_prefix`].
#[derive(Debug)]
pub struct CountingReader<R> {
    inner: R,
    count: u64,
    prefix: Vec<u8>,
    pos: usize,
}

impl<R> CountingReader<R> {
    pub fn new(inner: R) -> Self {
        Self::with_count(inner, 0)
    }

    /// Start counting from `count` instead of zero.
    pub fn with_count(inner: R, count: u64) -> Self {
        Self::with_prefix(inner, count, Vec::new())
    }

    /// Read `prefix` before the rest of `inner`. `count` is the position of the prefix.
    pub fn with_prefix(inner: R, count: u64, prefix: Vec<u8>) -> Self {
        CountingReader {
            inner,
            count,
            prefix,
            pos: 0,
        }
    }

    fn pending(&self) -> &[u8] {
        &self.prefix[self.pos..]
    }

    /// Bytes taken from the underlying reader so far.
    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Seek> CountingReader<R> {
    /// Seek the underlying reader to an absolute position and continue counting from there.
    pub fn seek_to(&mut self, offset: u64) -> io::Result<()> {
        self.inner.seek(SeekFrom::Start(offset))?;
        self.prefix.clear();
        self.pos = 0;
        self.count = offset;
        Ok(())
    }
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = if self.pending().is_empty() {
            self.inner.read(buf)?
        } else {
            let n = self.pending().len().min(buf.len());
            buf[..n].copy_from_slice(&self.prefix[self.pos..self.pos + n]);
            self.pos += n;
            n
        };
        self.count += n as u64;
        Ok(n)
    }
}

impl<R: BufRead> BufRead for CountingReader<R> {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        if self.pos < self.prefix.len() {
            return Ok(&self.prefix[self.pos..]);
        }
        self.inner.fill_buf()
    }

    fn consume(&mut self, amt: usize) {
        let from_prefix = amt.min(self.pending().len());
        self.pos += from_prefix;
        if amt > from_prefix {
            self.inner.consume(amt - from_prefix);
        }
        self.count += amt as u64;
    }
}

/// Read up to `len` bytes, fewer only at the end of input.
pub(crate) fn read_prefix<R: Read>(reader: &mut R, len: usize) -> io::Result<Vec<u8>> {
    let mut prefix = Vec::with_capacity(len);
    Read::take(reader, len as u64).read_to_end(&mut prefix)?;
    Ok(prefix)
}

#[derive(Debug)]
enum Member<R> {
    Between(CountingReader<R>),
    Inside(GzDecoder<CountingReader<R>>),
    Empty,
}

/// Reader over concatenated gzip members.
///
/// A single `read` call never returns bytes of two different members, so a buffered reader
/// on top of this only ever holds data of the member reported by [`Self::member_offset`].
/// NUL padding between members is skipped.
#[derive(Debug)]
pub struct GzipMembers<R> {
    state: Member<R>,
    member_offset: u64,
    members: u64,
}

impl<R: BufRead> GzipMembers<R> {
    pub fn new(inner: R) -> Self {
        Self::from_counting(CountingReader::new(inner))
    }

    pub fn from_counting(inner: CountingReader<R>) -> Self {
        let member_offset = inner.count();
        GzipMembers {
            state: Member::Between(inner),
            member_offset,
            members: 0,
        }
    }

    /// Raw offset at which the most recently started member begins.
    pub fn member_offset(&self) -> u64 {
        self.member_offset
    }

    /// Number of members started so far.
    pub fn members(&self) -> u64 {
        self.members
    }

    /// Raw bytes consumed from the source so far.
    pub fn raw_position(&self) -> u64 {
        match &self.state {
            Member::Between(raw) => raw.count(),
            Member::Inside(decoder) => decoder.get_ref().count(),
            Member::Empty => self.member_offset,
        }
    }

    fn take_raw(&mut self) -> Option<CountingReader<R>> {
        match std::mem::replace(&mut self.state, Member::Empty) {
            Member::Between(raw) => Some(raw),
            Member::Inside(decoder) => Some(decoder.into_inner()),
            Member::Empty => None,
        }
    }

    fn finish_member(&mut self) {
        if let Some(raw) = self.take_raw() {
            trace!("gzip member at {} ends at {}", self.member_offset, raw.count());
            self.state = Member::Between(raw);
        }
    }

    fn start_member(&mut self) {
        if let Some(raw) = self.take_raw() {
            self.member_offset = raw.count();
            self.members += 1;
            debug!("gzip member #{} starts at {}", self.members, self.member_offset);
            self.state = Member::Inside(GzDecoder::new(raw));
        }
    }
}

impl<R: BufRead + Seek> GzipMembers<R> {
    /// Reposition the raw source. The next read starts a new member at `offset`.
    pub fn seek_raw(&mut self, offset: u64) -> io::Result<()> {
        let Some(mut raw) = self.take_raw() else {
            return Ok(());
        };
        let result = raw.seek_to(offset);
        self.member_offset = raw.count();
        self.state = Member::Between(raw);
        result
    }
}

/// Skip NUL padding. Returns whether there is more input.
fn skip_padding<R: BufRead>(raw: &mut CountingReader<R>) -> io::Result<bool> {
    loop {
        let buf = raw.fill_buf()?;
        if buf.is_empty() {
            return Ok(false);
        }
        let zeros = buf.iter().take_while(|&&b| b == 0).count();
        if zeros == 0 {
            return Ok(true);
        }
        raw.consume(zeros);
    }
}

impl<R: BufRead> Read for GzipMembers<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            match &mut self.state {
                Member::Inside(decoder) => {
                    let n = decoder.read(buf)?;
                    if n > 0 {
                        return Ok(n);
                    }
                    self.finish_member();
                }
                Member::Between(raw) => {
                    if !skip_padding(raw)? {
                        return Ok(0);
                    }
                    self.start_member();
                }
                Member::Empty => return Ok(0),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::{BufReader, Cursor, Write};

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn prefix_is_read_first() {
        let mut inner = BufReader::with_capacity(2, Cursor::new(b"\x1f\x8bwarc\nrest".to_vec()));
        let prefix = read_prefix(&mut inner, 3).unwrap();
        assert_eq!(prefix, b"\x1f\x8bw");

        let mut reader = CountingReader::with_prefix(inner, 10, prefix);
        assert_eq!(reader.fill_buf().unwrap(), b"\x1f\x8bw");
        reader.consume(2);
        let mut line = Vec::new();
        reader.read_until(b'\n', &mut line).unwrap();
        assert_eq!(line, b"warc\n");
        assert_eq!(reader.count(), 17);
        let mut rest = Vec::new();
        reader.read_to_end(&mut rest).unwrap();
        assert_eq!(rest, b"rest");
        assert_eq!(reader.count(), 21);
    }

    #[test]
    fn counting_reader_counts_consumed_bytes() {
        let mut reader = CountingReader::new(Cursor::new(b"hello\nworld\n".to_vec()));
        let mut line = String::new();
        reader.read_line(&mut line).unwrap();
        assert_eq!(reader.count(), 6);
        let mut rest = Vec::new();
        reader.read_to_end(&mut rest).unwrap();
        assert_eq!(reader.count(), 12);
    }

    #[test]
    fn reads_never_cross_members() {
        let first = gzip(b"first member");
        let second = gzip(b"second member");
        let data = [first.clone(), second.clone()].concat();

        let mut members = GzipMembers::new(Cursor::new(data));
        let mut buf = [0u8; 1024];
        let n = members.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"first member");
        assert_eq!(members.member_offset(), 0);

        let n = members.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"second member");
        assert_eq!(members.member_offset(), first.len() as u64);

        assert_eq!(members.read(&mut buf).unwrap(), 0);
        assert_eq!(members.raw_position(), (first.len() + second.len()) as u64);
        assert_eq!(members.members(), 2);
    }

    #[test]
    fn padding_between_members_is_skipped() {
        let first = gzip(b"a");
        let second = gzip(b"b");
        let data = [first.clone(), vec![0; 7], second].concat();

        let mut reader = BufReader::new(GzipMembers::new(Cursor::new(data)));
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"ab");
        assert_eq!(reader.get_ref().member_offset(), first.len() as u64 + 7);
    }

    #[test]
    fn seek_starts_new_member() {
        let first = gzip(b"one");
        let second = gzip(b"two");
        let data = [first.clone(), second].concat();

        let mut members = GzipMembers::new(Cursor::new(data));
        members.seek_raw(first.len() as u64).unwrap();
        let mut out = Vec::new();
        members.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"two");
        assert_eq!(members.member_offset(), first.len() as u64);
    }

    #[test]
    fn corrupt_member_is_an_error() {
        let mut data = gzip(b"some data to compress");
        let len = data.len();
        // break the crc
        data[len - 8] ^= 0xff;
        let mut members = GzipMembers::new(Cursor::new(data));
        let mut out = Vec::new();
        assert!(members.read_to_end(&mut out).is_err());
    }
}
