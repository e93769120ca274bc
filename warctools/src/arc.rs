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

//! Legacy ARC records.
//!
//! An ARC file starts with a `filedesc://` record whose body declares the format version and
//! the names of the header fields used by all following records. Every record has a single
//! header line of space-separated values. Several producers wrote lines that do not match
//! the declared schema, so header lines go through a fixed list of repairs before they are
//! rejected:
//!
//! 1. A URL containing spaces is joined back together if the remaining values look right.
//! 2. A line one value short is assumed to lack the content type.
//! 3. IP address and date in the wrong order are swapped back.
//! 4. A content type split at its `;` parameter keeps the part before the `;`.

use std::io::{self, BufRead, Write};
use std::sync::LazyLock;

use regex::bytes::Regex;

use crate::error::{ParseError, Result};
use crate::header::{read_line, split_newline, HeaderEncoding, HeaderMap};
use crate::record::{ArchiveRecord, Content, Parsed, RecordData};
use crate::warc::parse_length;
use crate::writer::{write_framed, Compression};

/// Well-known ARC header fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArcField {
    Url,
    IpAddress,
    ArchiveDate,
    ContentType,
    ArchiveLength,
    ResultCode,
    Checksum,
    Location,
    Offset,
    Filename,
}

impl ArcField {
    pub fn name(&self) -> &'static str {
        match self {
            ArcField::Url => "URL",
            ArcField::IpAddress => "IP-address",
            ArcField::ArchiveDate => "Archive-date",
            ArcField::ContentType => "Content-type",
            ArcField::ArchiveLength => "Archive-length",
            ArcField::ResultCode => "Result-code",
            ArcField::Checksum => "Checksum",
            ArcField::Location => "Location",
            ArcField::Offset => "Offset",
            ArcField::Filename => "Filename",
        }
    }
}

impl AsRef<[u8]> for ArcField {
    fn as_ref(&self) -> &[u8] {
        self.name().as_bytes()
    }
}

const V1_FIELDS: [ArcField; 5] = [
    ArcField::Url,
    ArcField::IpAddress,
    ArcField::ArchiveDate,
    ArcField::ContentType,
    ArcField::ArchiveLength,
];

const V2_FIELDS: [ArcField; 10] = [
    ArcField::Url,
    ArcField::IpAddress,
    ArcField::ArchiveDate,
    ArcField::ContentType,
    ArcField::ResultCode,
    ArcField::Checksum,
    ArcField::Location,
    ArcField::Offset,
    ArcField::Filename,
    ArcField::ArchiveLength,
];

/// Header field layout declared by a `filedesc://` record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArcSchema {
    version: Vec<u8>,
    fields: Vec<Vec<u8>>,
}

impl ArcSchema {
    /// Version 1 layout: URL, IP address, date, content type, length.
    pub fn v1() -> Self {
        ArcSchema {
            version: b"1".to_vec(),
            fields: V1_FIELDS.iter().map(|f| f.as_ref().to_vec()).collect(),
        }
    }

    /// Version 2 layout with result code, checksum, location, offset and file name.
    pub fn v2() -> Self {
        ArcSchema {
            version: b"2".to_vec(),
            fields: V2_FIELDS.iter().map(|f| f.as_ref().to_vec()).collect(),
        }
    }

    /// Schema from the version and field name lines of a `filedesc://` record body. An empty
    /// name list falls back to the default layout of the version.
    pub fn from_lines(version_line: &[u8], names_line: &[u8]) -> Self {
        let version = tokens(version_line).next().unwrap_or(b"1").to_vec();
        let fields: Vec<Vec<u8>> = tokens(names_line).map(<[u8]>::to_vec).collect();
        if !fields.is_empty() {
            return ArcSchema { version, fields };
        }
        if version == b"2" {
            Self::v2()
        } else {
            ArcSchema { version, ..Self::v1() }
        }
    }

    pub fn version(&self) -> &[u8] {
        &self.version
    }

    pub fn fields(&self) -> &[Vec<u8>] {
        &self.fields
    }

    fn position(&self, field: ArcField) -> Option<usize> {
        self.fields
            .iter()
            .position(|f| f.eq_ignore_ascii_case(field.as_ref()))
    }
}

fn tokens(line: &[u8]) -> impl Iterator<Item = &[u8]> {
    line.split(u8::is_ascii_whitespace).filter(|t| !t.is_empty())
}

static IP_RX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?-u)^\d{1,3}(\.\d{1,3}){3}$").expect("static regex"));
static DATE_RX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?-u)^\d{12,14}$").expect("static regex"));

fn looks_like_ip(token: &[u8]) -> bool {
    IP_RX.is_match(token)
}

fn looks_like_date(token: &[u8]) -> bool {
    DATE_RX.is_match(token)
}

/// Header values paired with the field names they belong to.
struct HeaderLine<'l> {
    names: Vec<&'l [u8]>,
    values: Vec<Vec<u8>>,
}

/// Join leading values back into the URL when a URL with spaces produced too many values.
/// Applies only if the values after the URL still have an IP address and a date where the
/// schema expects them.
fn collapse_url_spaces(schema: &ArcSchema, values: &mut Vec<Vec<u8>>) -> bool {
    let n = schema.fields.len();
    if values.len() <= n + 1 || schema.position(ArcField::Url) != Some(0) {
        return false;
    }
    let excess = values.len() - n;
    let shape_matches = |field, check: fn(&[u8]) -> bool| {
        schema
            .position(field)
            .is_none_or(|i| i > 0 && check(&values[i + excess]))
    };
    if !shape_matches(ArcField::IpAddress, looks_like_ip) || !shape_matches(ArcField::ArchiveDate, looks_like_date) {
        return false;
    }
    let url = values[..=excess].join(&b' ');
    values.drain(..=excess);
    values.insert(0, url);
    true
}

/// A line one value short is read without the content type.
fn omitted_content_type<'s>(schema: &'s ArcSchema, values: &[Vec<u8>]) -> Option<Vec<&'s [u8]>> {
    let skip = schema.position(ArcField::ContentType)?;
    if values.len() + 1 != schema.fields.len() {
        return None;
    }
    Some(
        schema
            .fields
            .iter()
            .enumerate()
            .filter(|&(i, _)| i != skip)
            .map(|(_, f)| f.as_slice())
            .collect(),
    )
}

/// Swap IP address and date if each looks like the other.
fn swapped_ip_date(schema: &ArcSchema, values: &mut [Vec<u8>]) -> bool {
    let (Some(ip), Some(date)) = (
        schema.position(ArcField::IpAddress),
        schema.position(ArcField::ArchiveDate),
    ) else {
        return false;
    };
    if values.len() != schema.fields.len() || !looks_like_date(&values[ip]) || !looks_like_ip(&values[date]) {
        return false;
    }
    values.swap(ip, date);
    true
}

/// Drop the parameter of a content type that was split at its `;`.
fn split_content_type(schema: &ArcSchema, values: &mut Vec<Vec<u8>>) -> bool {
    let Some(ct) = schema.position(ArcField::ContentType) else {
        return false;
    };
    if values.len() != schema.fields.len() + 1 || !(values[ct].ends_with(b";") || values[ct + 1].starts_with(b";")) {
        return false;
    }
    let content_type = values[ct].strip_suffix(b";").unwrap_or(&values[ct][..]).to_vec();
    values[ct] = content_type;
    values.remove(ct + 1);
    true
}

/// Split a record header line into named values, repairing known producer quirks.
fn split_header_line<'s>(schema: &'s ArcSchema, line: &[u8]) -> Result<HeaderLine<'s>, ParseError> {
    let (text, _) = split_newline(line);
    let mut values: Vec<Vec<u8>> = tokens(text).map(<[u8]>::to_vec).collect();
    let names: Vec<&[u8]> = schema.fields.iter().map(Vec::as_slice).collect();
    let found = values.len();

    if collapse_url_spaces(schema, &mut values) {
        warn!("ARC URL with spaces: {:?}", String::from_utf8_lossy(&values[0]));
    }
    if values.len() == names.len() {
        if swapped_ip_date(schema, &mut values) {
            warn!("ARC IP address and date swapped in {:?}", String::from_utf8_lossy(text));
        }
        return Ok(HeaderLine { names, values });
    }
    if let Some(names) = omitted_content_type(schema, &values) {
        trace!("ARC header line without content type");
        return Ok(HeaderLine { names, values });
    }
    if split_content_type(schema, &mut values) {
        warn!("ARC content type split at parameter in {:?}", String::from_utf8_lossy(text));
        return Ok(HeaderLine { names, values });
    }
    Err(ParseError::InvalidFieldCount {
        expected: names.len(),
        found,
        line: line.to_vec(),
    })
}

/// Header map plus content length and value errors for a header line.
fn read_headers(header_line: HeaderLine<'_>) -> (HeaderMap, u64, Vec<ParseError>) {
    let mut headers = HeaderMap::new(HeaderEncoding::Latin1);
    let mut errors = Vec::new();
    let mut content_length = 0;
    for (name, value) in header_line.names.into_iter().zip(header_line.values) {
        if name.eq_ignore_ascii_case(ArcField::ContentType.as_ref()) && value.is_empty() {
            errors.push(ParseError::InvalidHeader {
                name: name.to_vec(),
                value: value.clone(),
            });
        } else if name.eq_ignore_ascii_case(ArcField::ArchiveLength.as_ref()) {
            match parse_length(&value) {
                Some(length) => content_length = length,
                None => errors.push(ParseError::InvalidHeader {
                    name: name.to_vec(),
                    value: value.clone(),
                }),
            }
        }
        headers.add(name, value);
    }
    (headers, content_length, errors)
}

fn arc_data<'a>(headers: HeaderMap, content: Content<'a>, errors: Vec<ParseError>) -> RecordData<'a> {
    RecordData::new(
        headers,
        content,
        errors,
        ArcField::ContentType.name(),
        ArcField::ArchiveLength.name(),
    )
}

/// Header line values in order, with content type and length replaced by the given ones.
fn header_values(headers: &HeaderMap, content_type: Option<&[u8]>, length: u64) -> Vec<Vec<u8>> {
    headers
        .iter()
        .map(|(name, value)| {
            if name.eq_ignore_ascii_case(ArcField::ArchiveLength.as_ref()) {
                length.to_string().into_bytes()
            } else if name.eq_ignore_ascii_case(ArcField::ContentType.as_ref()) {
                content_type.unwrap_or(value).to_vec()
            } else {
                value.to_vec()
            }
        })
        .collect()
}

/// An ARC record.
#[derive(Debug)]
pub struct ArcRecord<'a> {
    data: RecordData<'a>,
}

impl<'a> ArcRecord<'a> {
    /// Create a record from named header values (in header line order) and content.
    pub fn new(headers: HeaderMap, content: Content<'a>) -> Self {
        ArcRecord {
            data: arc_data(headers, content, Vec::new()),
        }
    }

    pub fn type_name(&self) -> &'static [u8] {
        b"response"
    }

    pub fn data(&self) -> &RecordData<'a> {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut RecordData<'a> {
        &mut self.data
    }

    pub fn headers(&self) -> &HeaderMap {
        self.data.headers()
    }

    pub fn url(&self) -> Option<&[u8]> {
        self.data.headers().get(ArcField::Url)
    }

    pub fn date(&self) -> Option<&[u8]> {
        self.data.headers().get(ArcField::ArchiveDate)
    }

    /// Serialise the header line, content and `\n` trailer. The length is recomputed.
    pub fn write_to<W: Write>(&mut self, out: &mut W, compression: Compression) -> Result<()> {
        let (content_type, length) = self.data.write_info()?;
        let line = header_values(self.data.headers(), content_type.as_deref(), length).join(&b' ');
        let data = &mut self.data;
        write_framed(out, compression, |w| {
            w.write_all(&line)?;
            w.write_all(b"\n")?;
            data.write_content(w)?;
            w.write_all(b"\n")?;
            Ok(())
        })
    }

    pub fn into_owned(self) -> Result<ArcRecord<'static>> {
        Ok(ArcRecord {
            data: self.data.into_owned()?,
        })
    }

    pub(crate) fn with_content<'b>(self, content: Content<'b>) -> ArcRecord<'b> {
        ArcRecord {
            data: self.data.with_content(content),
        }
    }
}

/// The `filedesc://` record at the start of an ARC file.
///
/// Its content excludes the version and field name lines, which are kept as raw header lines.
#[derive(Debug)]
pub struct ArcFiledescRecord<'a> {
    version: Vec<u8>,
    raw_headers: Vec<Vec<u8>>,
    data: RecordData<'a>,
}

impl<'a> ArcFiledescRecord<'a> {
    pub fn type_name(&self) -> &'static [u8] {
        b"filedesc"
    }

    /// Version line of the record body, e.g. `1 0 InternetArchive`.
    pub fn version(&self) -> &[u8] {
        &self.version
    }

    /// Header line, version line and field name line as read.
    pub fn raw_headers(&self) -> &[Vec<u8>] {
        &self.raw_headers
    }

    pub fn schema(&self) -> ArcSchema {
        let line = |i: usize| self.raw_headers.get(i).map_or(&[][..], Vec::as_slice);
        ArcSchema::from_lines(line(1), line(2))
    }

    pub fn data(&self) -> &RecordData<'a> {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut RecordData<'a> {
        &mut self.data
    }

    pub fn headers(&self) -> &HeaderMap {
        self.data.headers()
    }

    pub fn url(&self) -> Option<&[u8]> {
        self.data.headers().get(ArcField::Url)
    }

    pub fn date(&self) -> Option<&[u8]> {
        self.data.headers().get(ArcField::ArchiveDate)
    }

    /// Raw header lines followed by the content.
    pub fn raw(&mut self) -> Result<Vec<u8>> {
        let mut raw = self.raw_headers.concat();
        raw.extend_from_slice(self.data.content()?.1);
        Ok(raw)
    }

    /// Serialise the record. The declared length covers the version and field name lines.
    pub fn write_to<W: Write>(&mut self, out: &mut W, compression: Compression) -> Result<()> {
        let (content_type, length) = self.data.write_info()?;
        let body_lines = self.raw_headers.iter().skip(1).map(Vec::len).sum::<usize>() as u64;
        let line = header_values(self.data.headers(), content_type.as_deref(), length + body_lines).join(&b' ');
        let raw_headers = &self.raw_headers;
        let data = &mut self.data;
        write_framed(out, compression, |w| {
            w.write_all(&line)?;
            w.write_all(b"\n")?;
            for raw in raw_headers.iter().skip(1) {
                w.write_all(raw)?;
            }
            data.write_content(w)?;
            w.write_all(b"\n")?;
            Ok(())
        })
    }

    pub fn into_owned(self) -> Result<ArcFiledescRecord<'static>> {
        Ok(ArcFiledescRecord {
            version: self.version,
            raw_headers: self.raw_headers,
            data: self.data.into_owned()?,
        })
    }

    pub(crate) fn with_content<'b>(self, content: Content<'b>) -> ArcFiledescRecord<'b> {
        ArcFiledescRecord {
            version: self.version,
            raw_headers: self.raw_headers,
            data: self.data.with_content(content),
        }
    }
}

/// Parser for ARC header lines. Remembers the schema of the last `filedesc://` record.
#[derive(Debug, Clone, Default)]
pub struct ArcParser {
    schema: Option<ArcSchema>,
}

impl ArcParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schema in effect for the next record, if a `filedesc://` record has been seen.
    pub fn schema(&self) -> Option<&ArcSchema> {
        self.schema.as_ref()
    }

    /// Parse a record header starting with `line`, which has already been read from `reader`.
    pub(crate) fn parse<B: BufRead + ?Sized>(&mut self, reader: &mut B, mut line: Vec<u8>) -> io::Result<Parsed> {
        let mut parsed = Parsed::default();
        while line.trim_ascii().is_empty() {
            if line.is_empty() {
                return Ok(parsed);
            }
            parsed.skipped += line.len() as u64;
            line = read_line(reader)?;
        }

        if line.starts_with(b"filedesc:") {
            let version_line = read_line(reader)?;
            let names_line = read_line(reader)?;
            let schema = ArcSchema::from_lines(&version_line, &names_line);
            debug!(
                "ARC filedesc version {:?} with {} fields",
                String::from_utf8_lossy(schema.version()),
                schema.fields().len()
            );

            let v1 = ArcSchema::v1();
            let header_line = match split_header_line(&v1, &line) {
                Ok(header_line) => header_line,
                Err(e) => {
                    parsed.errors.push(e);
                    return Ok(parsed);
                }
            };
            let (headers, declared, errors) = read_headers(header_line);
            parsed.content_length = declared.saturating_sub((version_line.len() + names_line.len()) as u64);

            let record = ArcFiledescRecord {
                version: version_line.trim_ascii().to_vec(),
                raw_headers: vec![line, version_line, names_line],
                data: arc_data(headers, Content::Spent, errors),
            };
            self.schema = Some(schema);
            parsed.record = Some(ArchiveRecord::ArcHeader(record));
            return Ok(parsed);
        }

        let schema = self.schema.get_or_insert_with(|| {
            warn!("ARC record without preceding filedesc record, assuming version 1 fields");
            ArcSchema::v1()
        });
        match split_header_line(schema, &line) {
            Ok(header_line) => {
                let (headers, content_length, errors) = read_headers(header_line);
                trace!("ARC record, {} content bytes", content_length);
                parsed.content_length = content_length;
                parsed.record = Some(ArchiveRecord::Arc(ArcRecord {
                    data: arc_data(headers, Content::Spent, errors),
                }));
            }
            Err(e) => parsed.errors.push(e),
        }
        Ok(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn split(line: &[u8]) -> Result<Vec<(String, String)>, ParseError> {
        let schema = ArcSchema::v1();
        let header_line = split_header_line(&schema, line)?;
        let (headers, _, _) = read_headers(header_line);
        Ok(headers.items().collect())
    }

    fn pairs(expected: &[(&str, &str)]) -> Vec<(String, String)> {
        expected.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn five_values() {
        assert_eq!(
            split(b"http://example.org/ 192.168.1.1 20131113000000 text/plain 78\n").unwrap(),
            pairs(&[
                ("URL", "http://example.org/"),
                ("IP-address", "192.168.1.1"),
                ("Archive-date", "20131113000000"),
                ("Content-type", "text/plain"),
                ("Archive-length", "78"),
            ])
        );
    }

    #[test]
    fn four_values_lack_content_type() {
        assert_eq!(
            split(b"http://example.org/ 192.168.1.1 20131113000000 78\n").unwrap(),
            pairs(&[
                ("URL", "http://example.org/"),
                ("IP-address", "192.168.1.1"),
                ("Archive-date", "20131113000000"),
                ("Archive-length", "78"),
            ])
        );
    }

    #[test]
    fn six_values_merge_content_type() {
        let headers = split(b"http://example.org/ 192.168.1.1 20131113000000 text/html; charset=utf-8 78\n").unwrap();
        assert_eq!(headers.len(), 5);
        assert_eq!(headers[3], ("Content-type".to_string(), "text/html".to_string()));
        assert_eq!(headers[4].1, "78");

        let headers = split(b"http://example.org/ 192.168.1.1 20131113000000 text/html ;charset=utf-8 78\n").unwrap();
        assert_eq!(headers[3].1, "text/html");
    }

    #[test]
    fn swapped_ip_and_date() {
        let headers = split(b"http://example.org/ 20131113000000 192.168.1.1 text/plain 78\n").unwrap();
        assert_eq!(headers[1].1, "192.168.1.1");
        assert_eq!(headers[2].1, "20131113000000");
    }

    #[test]
    fn url_with_spaces() {
        let headers = split(b"http://example.org/a b c.html 192.168.1.1 20131113000000 text/plain 78\n").unwrap();
        assert_eq!(headers[0].1, "http://example.org/a b c.html");
        assert_eq!(headers[4].1, "78");
    }

    #[test]
    fn unknown_shapes_are_rejected() {
        assert_eq!(
            split(b"http://example.org/ 192.168.1.1 20131113000000 text/plain 78 extra\n"),
            Err(ParseError::InvalidFieldCount {
                expected: 5,
                found: 6,
                line: b"http://example.org/ 192.168.1.1 20131113000000 text/plain 78 extra\n".to_vec(),
            })
        );
        assert!(split(b"http://example.org/ 78\n").is_err());
        assert!(split(b"a b c d e f g 78\n").is_err());
    }

    #[test]
    fn schema_from_filedesc_body() {
        let schema = ArcSchema::from_lines(b"2 0 Alexa Internet\n", b"\n");
        assert_eq!(schema, ArcSchema::v2());
        let schema = ArcSchema::from_lines(
            b"1 0 InternetArchive\n",
            b"URL IP-address Archive-date Content-type Archive-length\n",
        );
        assert_eq!(schema, ArcSchema::v1());
        assert_eq!(schema.version(), b"1");
    }

    #[test]
    fn filedesc_configures_parser() {
        let content = b"2 0 Alexa\nURL IP-address Archive-date Content-type Result-code Checksum Location Offset Filename Archive-length\nrest\n";
        let first = format!("filedesc://x.arc 0.0.0.0 20131113000000 text/plain {}\n", content.len());
        let mut reader = &content[..];
        let mut parser = ArcParser::new();
        let parsed = parser.parse(&mut reader, first.into_bytes()).unwrap();
        assert_eq!(parsed.content_length, 5);
        assert_eq!(parser.schema(), Some(&ArcSchema::v2()));
        match parsed.record {
            Some(ArchiveRecord::ArcHeader(record)) => {
                assert_eq!(record.version(), b"2 0 Alexa");
                assert_eq!(record.schema(), ArcSchema::v2());
                assert_eq!(record.raw_headers().len(), 3);
            }
            other => panic!("expected filedesc record, got {:?}", other),
        }

        let line = b"http://example.org/ 1.2.3.4 20131113000000 text/html 200 - - 0 x.arc 10\n".to_vec();
        let parsed = parser.parse(&mut &b""[..], line).unwrap();
        assert_eq!(parsed.content_length, 10);
        let record = parsed.record.unwrap();
        assert_eq!(record.headers().get("Result-code"), Some(&b"200"[..]));
    }

    #[test]
    fn missing_filedesc_falls_back_to_v1() {
        let mut parser = ArcParser::new();
        let line = b"http://example.org/ 1.2.3.4 20131113000000 text/html 12\n".to_vec();
        let parsed = parser.parse(&mut &b""[..], line).unwrap();
        assert_eq!(parsed.content_length, 12);
        assert!(parsed.record.is_some());
        assert_eq!(parser.schema(), Some(&ArcSchema::v1()));
    }

    #[test]
    fn write_recomputes_length() {
        let headers = HeaderMap::from_pairs(
            HeaderEncoding::Latin1,
            [
                ("URL", "http://example.org/"),
                ("IP-address", "1.2.3.4"),
                ("Archive-date", "20131113000000"),
                ("Content-type", "text/plain"),
                ("Archive-length", "999"),
            ],
        );
        let mut record = ArcRecord::new(headers, Content::buffered(Some(b"text/plain"), "hello"));
        let mut out = Vec::new();
        record.write_to(&mut out, Compression::None).unwrap();
        assert_eq!(
            out,
            b"http://example.org/ 1.2.3.4 20131113000000 text/plain 5\nhello\n"
        );
    }
}
