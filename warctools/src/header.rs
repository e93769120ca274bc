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

use std::io::{self, BufRead};

use encoding::all::WINDOWS_1252;
use encoding::{DecoderTrap, Encoding};

#[derive(Debug, Eq, PartialEq, Clone, Copy, Default)]
pub enum HeaderEncoding {
    #[default]
    Unicode,
    Latin1,
}

/// Ordered multimap of byte-string header fields.
///
/// Lookups are case-insensitive, insertion order is preserved and duplicate names are kept.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderMap {
    encoding: HeaderEncoding,
    headers: Vec<(Vec<u8>, Vec<u8>)>,
}

impl HeaderMap {
    /// Create a new header map with the specified encoding.
    ///
    /// # Arguments
    ///
    /// * `encoding` - Header source encoding, used when decoding values to strings
    pub fn new(encoding: HeaderEncoding) -> Self {
        HeaderMap {
            encoding,
            headers: Vec::new(),
        }
    }

    /// Build a header map from name/value pairs, keeping their order.
    pub fn from_pairs<K, V>(encoding: HeaderEncoding, pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: AsRef<[u8]>,
        V: AsRef<[u8]>,
    {
        let mut map = HeaderMap::new(encoding);
        for (k, v) in pairs {
            map.add(k.as_ref(), v.as_ref());
        }
        map
    }

    /// Get the header encoding.
    pub fn encoding(&self) -> HeaderEncoding {
        self.encoding
    }

    fn decode(&self, byte_str: &[u8]) -> String {
        match &self.encoding {
            HeaderEncoding::Unicode => String::from_utf8_lossy(byte_str).to_string(),
            HeaderEncoding::Latin1 => WINDOWS_1252
                .decode(byte_str, DecoderTrap::Replace)
                .unwrap_or_else(|_| String::from_utf8_lossy(byte_str).to_string()),
        }
    }

    /// Get the first value for a (case-insensitive) header name as bytes.
    ///
    /// # Arguments
    ///
    /// * `name` - Header name
    pub fn get(&self, name: impl AsRef<[u8]>) -> Option<&[u8]> {
        let name = name.as_ref();
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_slice())
    }

    /// Get the first value for a (case-insensitive) header name decoded as a string.
    pub fn get_str(&self, name: impl AsRef<[u8]>) -> Option<String> {
        self.get(name).map(|v| self.decode(v))
    }

    /// All values for a (case-insensitive) header name in insertion order.
    pub fn get_all<'a>(&'a self, name: &'a [u8]) -> impl Iterator<Item = &'a [u8]> + 'a {
        self.headers
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_slice())
    }

    /// Check if a (case-insensitive) header name exists.
    pub fn contains_key(&self, name: impl AsRef<[u8]>) -> bool {
        let name = name.as_ref();
        self.headers.iter().any(|(k, _)| k.eq_ignore_ascii_case(name))
    }

    /// Replace all headers of the given name with a single header appended at the end.
    ///
    /// # Arguments
    ///
    /// * `name` - Header name
    /// * `value` - Header value
    pub fn set(&mut self, name: impl AsRef<[u8]>, value: impl AsRef<[u8]>) {
        let name = name.as_ref();
        self.remove(name);
        self.add(name, value.as_ref());
    }

    /// Remove all headers of the given (case-insensitive) name.
    pub fn remove(&mut self, name: impl AsRef<[u8]>) {
        let name = name.as_ref();
        self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
    }

    /// Append header.
    ///
    /// Appending does not check for existing headers with the same name.
    /// Surrounding whitespace of name and value is stripped.
    pub fn add(&mut self, name: impl AsRef<[u8]>, value: impl AsRef<[u8]>) {
        self.headers.push((
            name.as_ref().trim_ascii().to_vec(),
            value.as_ref().trim_ascii().to_vec(),
        ));
    }

    /// Append a folded continuation value to the most recent header, joined with a space.
    pub fn add_continuation(&mut self, value: &[u8]) {
        let value = value.trim_ascii();
        if let Some(last) = self.headers.last_mut() {
            last.1.push(b' ');
            last.1.extend_from_slice(value);
        } else {
            self.headers.push((Vec::new(), value.to_vec()));
        }
    }

    /// Add a raw header line (with or without its line terminator).
    ///
    /// A line starting with a space or tab continues the previous value. Returns `false` for
    /// lines without a colon; those are left to the caller.
    pub fn add_line(&mut self, line: &[u8]) -> bool {
        if is_continuation(line) && !self.headers.is_empty() {
            self.add_continuation(line);
            return true;
        }
        match line.iter().position(|&b| b == b':') {
            Some(colon) => {
                self.add(&line[..colon], &line[colon + 1..]);
                true
            }
            None => false,
        }
    }

    /// Iterator of names and values as bytes.
    pub fn iter(&self) -> impl Iterator<Item = (&[u8], &[u8])> {
        self.headers.iter().map(|(k, v)| (k.as_slice(), v.as_slice()))
    }

    /// Iterator of names and values decoded as strings.
    pub fn items(&self) -> impl Iterator<Item = (String, String)> + use<'_> {
        self.headers
            .iter()
            .map(|(k, v)| (self.decode(k), self.decode(v)))
    }

    /// Get the number of headers.
    pub fn len(&self) -> usize {
        self.headers.len()
    }

    /// Check if the header map is empty.
    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    /// Clear all headers.
    pub fn clear(&mut self) {
        self.headers.clear();
    }

    /// Write header block into stream, skipping names in `skip` (case-insensitive).
    pub fn write_filtered<W: io::Write + ?Sized>(&self, writer: &mut W, skip: &[&[u8]]) -> io::Result<usize> {
        let mut bytes_written = 0usize;
        for (key, value) in &self.headers {
            if skip.iter().any(|s| key.eq_ignore_ascii_case(s)) {
                continue;
            }
            if !key.is_empty() {
                writer.write_all(key)?;
                bytes_written += key.len();
                writer.write_all(b": ")?;
                bytes_written += 2;
            }
            writer.write_all(value)?;
            bytes_written += value.len();
            writer.write_all(b"\r\n")?;
            bytes_written += 2;
        }
        Ok(bytes_written)
    }

    /// Append the header block to `buf`, skipping names in `skip` (case-insensitive).
    pub fn extend_filtered(&self, buf: &mut Vec<u8>, skip: &[&[u8]]) {
        for (key, value) in &self.headers {
            if skip.iter().any(|s| key.eq_ignore_ascii_case(s)) {
                continue;
            }
            if !key.is_empty() {
                buf.extend_from_slice(key);
                buf.extend_from_slice(b": ");
            }
            buf.extend_from_slice(value);
            buf.extend_from_slice(b"\r\n");
        }
    }

    /// Write header block into stream.
    pub fn write<W: io::Write + ?Sized>(&self, writer: &mut W) -> io::Result<usize> {
        self.write_filtered(writer, &[])
    }
}

/// Whether a header line is a folded continuation of the previous one.
pub(crate) fn is_continuation(line: &[u8]) -> bool {
    matches!(line.first(), Some(b' ') | Some(b'\t'))
}

/// Whether a line consists only of line terminator bytes.
pub(crate) fn is_blank_line(line: &[u8]) -> bool {
    !line.is_empty() && line.iter().all(|&b| b == b'\r' || b == b'\n')
}

/// Read one line including its `\n` terminator. An empty result means end of input.
pub(crate) fn read_line<B: BufRead + ?Sized>(reader: &mut B) -> io::Result<Vec<u8>> {
    let mut line = Vec::new();
    reader.read_until(b'\n', &mut line)?;
    Ok(line)
}

/// Split a line into its content and its terminator (`\r\n`, `\n`, `\r` or empty).
pub(crate) fn split_newline(line: &[u8]) -> (&[u8], &[u8]) {
    if line.ends_with(b"\r\n") {
        line.split_at(line.len() - 2)
    } else if line.ends_with(b"\n") || line.ends_with(b"\r") {
        line.split_at(line.len() - 1)
    } else {
        (line, &[])
    }
}
