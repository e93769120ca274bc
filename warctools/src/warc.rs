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

//! WARC records.

use std::io::{self, BufRead, Write};
use std::sync::LazyLock;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use regex::bytes::Regex;
use sha1::{Digest, Sha1};
use uuid::Uuid;

use crate::error::{LineKind, ParseError, Result};
use crate::header::{is_blank_line, is_continuation, read_line, split_newline, HeaderEncoding, HeaderMap};
use crate::record::{ArchiveRecord, Content, Parsed, RecordData};
use crate::writer::{write_framed, Compression};

/// WARC record type enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WarcRecordType {
    WarcInfo,
    Response,
    Resource,
    Request,
    Metadata,
    Revisit,
    Conversion,
    Continuation,
    Unknown,
}

impl WarcRecordType {
    pub fn as_str(&self) -> &'static str {
        match self {
            WarcRecordType::WarcInfo => "warcinfo",
            WarcRecordType::Response => "response",
            WarcRecordType::Resource => "resource",
            WarcRecordType::Request => "request",
            WarcRecordType::Metadata => "metadata",
            WarcRecordType::Revisit => "revisit",
            WarcRecordType::Conversion => "conversion",
            WarcRecordType::Continuation => "continuation",
            WarcRecordType::Unknown => "unknown",
        }
    }
}

impl TryFrom<&str> for WarcRecordType {
    type Error = &'static str;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value.to_lowercase().as_str() {
            "warcinfo" => Ok(WarcRecordType::WarcInfo),
            "response" => Ok(WarcRecordType::Response),
            "resource" => Ok(WarcRecordType::Resource),
            "request" => Ok(WarcRecordType::Request),
            "metadata" => Ok(WarcRecordType::Metadata),
            "revisit" => Ok(WarcRecordType::Revisit),
            "conversion" => Ok(WarcRecordType::Conversion),
            "continuation" => Ok(WarcRecordType::Continuation),
            "unknown" => Ok(WarcRecordType::Unknown),
            _ => Err("Invalid enum value."),
        }
    }
}

impl From<WarcRecordType> for &'static str {
    fn from(value: WarcRecordType) -> Self {
        value.as_str()
    }
}

/// Well-known WARC header fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WarcField {
    Date,
    Type,
    Id,
    ConcurrentTo,
    RefersTo,
    RefersToTargetUri,
    RefersToDate,
    ContentLength,
    ContentType,
    Url,
    BlockDigest,
    PayloadDigest,
    IpAddress,
    Filename,
    WarcinfoId,
    Profile,
}

impl WarcField {
    /// Header name as written on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            WarcField::Date => "WARC-Date",
            WarcField::Type => "WARC-Type",
            WarcField::Id => "WARC-Record-ID",
            WarcField::ConcurrentTo => "WARC-Concurrent-To",
            WarcField::RefersTo => "WARC-Refers-To",
            WarcField::RefersToTargetUri => "WARC-Refers-To-Target-URI",
            WarcField::RefersToDate => "WARC-Refers-To-Date",
            WarcField::ContentLength => "Content-Length",
            WarcField::ContentType => "Content-Type",
            WarcField::Url => "WARC-Target-URI",
            WarcField::BlockDigest => "WARC-Block-Digest",
            WarcField::PayloadDigest => "WARC-Payload-Digest",
            WarcField::IpAddress => "WARC-IP-Address",
            WarcField::Filename => "WARC-Filename",
            WarcField::WarcinfoId => "WARC-Warcinfo-ID",
            WarcField::Profile => "WARC-Profile",
        }
    }
}

impl AsRef<[u8]> for WarcField {
    fn as_ref(&self) -> &[u8] {
        self.name().as_bytes()
    }
}

const REQUIRED_FIELDS: [WarcField; 4] = [
    WarcField::Type,
    WarcField::Id,
    WarcField::ContentLength,
    WarcField::Date,
];

const KNOWN_VERSIONS: [&[u8]; 3] = [b"1.0", b"0.17", b"0.18"];

/// A WARC record.
#[derive(Debug)]
pub struct WarcRecord<'a> {
    version: Vec<u8>,
    data: RecordData<'a>,
}

impl<'a> WarcRecord<'a> {
    /// Create a `WARC/1.0` record.
    ///
    /// Any `Content-Type` or `Content-Length` in `headers` is replaced by values derived from
    /// `content` when the record is written.
    pub fn new(headers: HeaderMap, content: Content<'a>) -> Self {
        WarcRecord {
            version: b"WARC/1.0".to_vec(),
            data: RecordData::new(
                headers,
                content,
                Vec::new(),
                WarcField::ContentType.name(),
                WarcField::ContentLength.name(),
            ),
        }
    }

    /// Version string, e.g. `WARC/1.0`.
    pub fn version(&self) -> &[u8] {
        &self.version
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

    /// Record type from the `WARC-Type` header. Unrecognised or missing types are `Unknown`.
    pub fn record_type(&self) -> WarcRecordType {
        self.data
            .headers()
            .get_str(WarcField::Type)
            .and_then(|t| WarcRecordType::try_from(t.trim()).ok())
            .unwrap_or(WarcRecordType::Unknown)
    }

    pub fn record_id(&self) -> Option<&[u8]> {
        self.data.headers().get(WarcField::Id)
    }

    pub fn date(&self) -> Option<&[u8]> {
        self.data.headers().get(WarcField::Date)
    }

    pub fn url(&self) -> Option<&[u8]> {
        self.data.headers().get(WarcField::Url)
    }

    /// Serialise the record.
    ///
    /// `Content-Type` and `Content-Length` are written last and derived from the content. A
    /// record backed by a content stream can only be written once.
    pub fn write_to<W: Write>(&mut self, out: &mut W, compression: Compression) -> Result<()> {
        let (content_type, length) = self.data.write_info()?;
        let version = &self.version;
        let data = &mut self.data;
        write_framed(out, compression, |w| {
            w.write_all(version)?;
            w.write_all(b"\r\n")?;
            data.headers().write_filtered(
                w,
                &[WarcField::ContentType.as_ref(), WarcField::ContentLength.as_ref()],
            )?;
            if let Some(content_type) = &content_type {
                w.write_all(b"Content-Type: ")?;
                w.write_all(content_type)?;
                w.write_all(b"\r\n")?;
            }
            write!(w, "Content-Length: {}\r\n\r\n", length)?;
            data.write_content(w)?;
            w.write_all(b"\r\n\r\n")?;
            Ok(())
        })
    }

    pub fn into_owned(self) -> Result<WarcRecord<'static>> {
        Ok(WarcRecord {
            version: self.version,
            data: self.data.into_owned()?,
        })
    }

    pub(crate) fn with_content<'b>(self, content: Content<'b>) -> WarcRecord<'b> {
        WarcRecord {
            version: self.version,
            data: self.data.with_content(content),
        }
    }
}

static VERSION_RX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i-u)^(?P<prefix>.*?)(?P<version>\s*WARC/(?P<number>[^\r\n]*?))(?P<nl>\r\n|\r|\n)$")
        .expect("static regex")
});

struct VersionLine {
    prefix: Vec<u8>,
    version: Vec<u8>,
    number: Vec<u8>,
    newline: Vec<u8>,
}

impl VersionLine {
    fn match_line(line: &[u8]) -> Option<Self> {
        let caps = VERSION_RX.captures(line)?;
        let group = |name| caps.name(name).map_or(Vec::new(), |m| m.as_bytes().to_vec());
        Some(VersionLine {
            prefix: group("prefix"),
            version: group("version").trim_ascii().to_vec(),
            number: group("number"),
            newline: group("nl"),
        })
    }
}

/// Parser for WARC header blocks.
#[derive(Debug, Clone)]
pub struct WarcParser {
    bad_line_limit: usize,
}

impl Default for WarcParser {
    fn default() -> Self {
        Self::new(5)
    }
}

impl WarcParser {
    /// Create a parser that gives up after more than `bad_line_limit` ignored lines.
    pub fn new(bad_line_limit: usize) -> Self {
        WarcParser { bad_line_limit }
    }

    /// Parse a header block starting with `line`, which has already been read from `reader`.
    ///
    /// Lines before the version line are skipped. Non-blank ones are recorded as errors and
    /// too many of them end the search without a record. The reader is left at the first
    /// content byte.
    pub(crate) fn parse<B: BufRead + ?Sized>(&self, reader: &mut B, mut line: Vec<u8>) -> io::Result<Parsed> {
        let mut parsed = Parsed::default();

        let version = loop {
            if line.is_empty() {
                return Ok(parsed);
            }
            if let Some(version) = VersionLine::match_line(&line) {
                break version;
            }
            parsed.skipped += line.len() as u64;
            if !is_blank_line(&line) {
                trace!("ignoring line before WARC version: {:?}", String::from_utf8_lossy(&line));
                parsed.errors.push(ParseError::IgnoredLine(line));
                if parsed.errors.len() > self.bad_line_limit {
                    parsed.errors.push(ParseError::TooManyErrors);
                    return Ok(parsed);
                }
            }
            line = read_line(reader)?;
        };
        parsed.skipped += version.prefix.len() as u64;

        let mut errors = std::mem::take(&mut parsed.errors);
        if version.newline != b"\r\n" {
            errors.push(ParseError::IncorrectNewline {
                kind: LineKind::Version,
                newline: version.newline,
            });
        }
        if !KNOWN_VERSIONS.contains(&version.number.as_slice()) {
            errors.push(ParseError::UnknownVersion(version.number));
        }
        if !version.prefix.is_empty() {
            errors.push(ParseError::BadPrefix(version.prefix));
        }

        line = read_line(reader)?;
        if line.is_empty() {
            errors.push(ParseError::VersionWithoutHeaders(version.version));
            parsed.errors = errors;
            return Ok(parsed);
        }

        let mut headers = HeaderMap::new(HeaderEncoding::Unicode);
        while !line.is_empty() && !is_blank_line(&line) {
            let (text, newline) = split_newline(&line);
            let kind = if is_continuation(text) && !headers.is_empty() {
                LineKind::Continuation
            } else {
                LineKind::Header
            };
            if newline != b"\r\n" {
                errors.push(ParseError::IncorrectNewline {
                    kind,
                    newline: newline.to_vec(),
                });
            }
            if !headers.add_line(text) {
                errors.push(ParseError::MalformedHeaderLine(line.clone()));
            }
            line = read_line(reader)?;
        }

        let mut content_length = 0;
        for (name, value) in headers.iter() {
            if name.eq_ignore_ascii_case(WarcField::ContentType.as_ref()) {
                if value.is_empty() {
                    errors.push(invalid_header(name, value));
                }
            } else if name.eq_ignore_ascii_case(WarcField::ContentLength.as_ref()) {
                match parse_length(value) {
                    Some(length) => content_length = length,
                    None => errors.push(invalid_header(name, value)),
                }
            }
        }
        for field in REQUIRED_FIELDS {
            if !headers.contains_key(field) {
                errors.push(ParseError::MissingHeader(field.name()));
            }
        }

        let mut record = WarcRecord::new(headers, Content::Spent);
        record.version = version.version;
        for error in errors {
            record.data.push_error(error);
        }
        debug!(
            "WARC record {:?}, {} content bytes",
            String::from_utf8_lossy(record.record_id().unwrap_or_default()),
            content_length
        );

        parsed.record = Some(ArchiveRecord::Warc(record));
        parsed.content_length = content_length;
        Ok(parsed)
    }
}

fn invalid_header(name: &[u8], value: &[u8]) -> ParseError {
    ParseError::InvalidHeader {
        name: name.to_vec(),
        value: value.to_vec(),
    }
}

pub(crate) fn parse_length(value: &[u8]) -> Option<u64> {
    std::str::from_utf8(value).ok()?.trim().parse().ok()
}

fn base_headers(record_type: WarcRecordType, id: &[u8], date: &[u8]) -> HeaderMap {
    HeaderMap::from_pairs(
        HeaderEncoding::Unicode,
        [
            (WarcField::Type.name().as_bytes(), record_type.as_str().as_bytes()),
            (WarcField::Id.name().as_bytes(), id),
            (WarcField::Date.name().as_bytes(), date),
        ],
    )
}

/// Build a `response` record, optionally pointing at its request.
pub fn make_response<'a>(
    id: &[u8],
    date: &[u8],
    url: &[u8],
    content: Content<'a>,
    request_id: Option<&[u8]>,
) -> WarcRecord<'a> {
    let mut headers = base_headers(WarcRecordType::Response, id, date);
    headers.add(WarcField::Url, url);
    if let Some(request_id) = request_id {
        headers.add(WarcField::ConcurrentTo, request_id);
    }
    WarcRecord::new(headers, content)
}

/// Build a `request` record, optionally pointing at its response.
pub fn make_request<'a>(
    request_id: &[u8],
    date: &[u8],
    url: &[u8],
    content: Content<'a>,
    response_id: Option<&[u8]>,
) -> WarcRecord<'a> {
    let mut headers = base_headers(WarcRecordType::Request, request_id, date);
    headers.add(WarcField::Url, url);
    if let Some(response_id) = response_id {
        headers.add(WarcField::ConcurrentTo, response_id);
    }
    WarcRecord::new(headers, content)
}

pub fn make_metadata<'a>(
    meta_id: &[u8],
    date: &[u8],
    content: Content<'a>,
    concurrent_to: Option<&[u8]>,
    url: Option<&[u8]>,
) -> WarcRecord<'a> {
    let mut headers = base_headers(WarcRecordType::Metadata, meta_id, date);
    if let Some(concurrent_to) = concurrent_to {
        headers.add(WarcField::ConcurrentTo, concurrent_to);
    }
    if let Some(url) = url {
        headers.add(WarcField::Url, url);
    }
    WarcRecord::new(headers, content)
}

pub fn make_conversion<'a>(
    conv_id: &[u8],
    date: &[u8],
    content: Content<'a>,
    refers_to: Option<&[u8]>,
    url: Option<&[u8]>,
) -> WarcRecord<'a> {
    let mut headers = base_headers(WarcRecordType::Conversion, conv_id, date);
    if let Some(refers_to) = refers_to {
        headers.add(WarcField::RefersTo, refers_to);
    }
    if let Some(url) = url {
        headers.add(WarcField::Url, url);
    }
    WarcRecord::new(headers, content)
}

/// Deterministic record ID derived from the SHA-1 of `text`.
pub fn warc_uuid(text: &[u8]) -> Vec<u8> {
    let hash = Sha1::digest(text);
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&hash[..16]);
    format!("<urn:uuid:{}>", Uuid::from_bytes(bytes)).into_bytes()
}

/// Random (v4) record ID.
pub fn random_warc_uuid() -> Vec<u8> {
    format!("<urn:uuid:{}>", Uuid::new_v4()).into_bytes()
}

/// WARC date with second precision.
pub fn warc_datetime_str(date: DateTime<Utc>) -> Vec<u8> {
    date.format("%Y-%m-%dT%H:%M:%SZ").to_string().into_bytes()
}

/// `WARC-Block-Digest` value for a record body.
pub fn block_digest(content: &[u8]) -> Vec<u8> {
    format!("sha1:{}", BASE64.encode(Sha1::digest(content))).into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn parse(data: &[u8]) -> Parsed {
        let mut reader = data;
        let line = read_line(&mut reader).unwrap();
        WarcParser::default().parse(&mut reader, line).unwrap()
    }

    fn warc(parsed: &Parsed) -> &WarcRecord<'static> {
        match &parsed.record {
            Some(ArchiveRecord::Warc(record)) => record,
            other => panic!("expected WARC record, got {:?}", other),
        }
    }

    #[test]
    fn parses_headers_and_length() {
        let parsed = parse(
            b"WARC/1.0\r\n\
              WARC-Type: resource\r\n\
              WARC-Record-ID: <urn:uuid:1>\r\n\
              WARC-Date: 2013-11-15T00:00:00Z\r\n\
              Content-Type: text/plain\r\n\
              Content-Length: 5\r\n\
              \r\n\
              hello\r\n\r\n",
        );
        let record = warc(&parsed);
        assert_eq!(parsed.content_length, 5);
        assert_eq!(parsed.skipped, 0);
        assert!(record.data().errors().is_empty());
        assert_eq!(record.record_type(), WarcRecordType::Resource);
        assert_eq!(record.version(), b"WARC/1.0");
        assert_eq!(record.headers().len(), 5);
        assert_eq!(record.data().content_type(), Some(&b"text/plain"[..]));
    }

    #[test]
    fn folded_header_lines_are_joined() {
        let parsed = parse(
            b"WARC/1.0\r\n\
              WARC-Type: metadata\r\n\
              X-Long: first\r\n\
              \tsecond\r\n\
              Content-Length: 0\r\n\r\n",
        );
        assert_eq!(warc(&parsed).headers().get("x-long"), Some(&b"first second"[..]));
    }

    #[test]
    fn garbage_before_version_is_skipped() {
        let parsed = parse(b"junk\r\n\r\nmore junkWARC/0.18\n\r\n");
        let record = warc(&parsed);
        assert_eq!(parsed.skipped, 6 + 2 + 9);
        assert_eq!(record.version(), b"WARC/0.18");
        let errors = record.data().errors();
        assert_eq!(errors[0], ParseError::IgnoredLine(b"junk\r\n".to_vec()));
        assert!(errors.contains(&ParseError::BadPrefix(b"more junk".to_vec())));
        assert!(errors.contains(&ParseError::IncorrectNewline {
            kind: LineKind::Version,
            newline: b"\n".to_vec()
        }));
        assert!(errors.contains(&ParseError::MissingHeader("WARC-Type")));
    }

    #[test]
    fn too_many_ignored_lines_give_up() {
        let parsed = parse(b"a\nb\nc\nd\ne\nf\ng\nWARC/1.0\r\n");
        assert!(parsed.record.is_none());
        assert_eq!(parsed.errors.len(), 7);
        assert_eq!(parsed.errors.last(), Some(&ParseError::TooManyErrors));
    }

    #[test]
    fn end_of_input_without_record() {
        let parsed = parse(b"");
        assert!(parsed.record.is_none());
        assert!(parsed.errors.is_empty());

        let parsed = parse(b"WARC/1.0\r\n");
        assert!(parsed.record.is_none());
        assert_eq!(
            parsed.errors,
            vec![ParseError::VersionWithoutHeaders(b"WARC/1.0".to_vec())]
        );
    }

    #[test]
    fn bad_values_are_recorded() {
        let parsed = parse(
            b"WARC/2.5\r\n\
              WARC-Type: response\n\
              Content-Type:\r\n\
              Content-Length: lots\r\n\
              no colon here\r\n\r\n",
        );
        let record = warc(&parsed);
        assert_eq!(parsed.content_length, 0);
        let errors = record.data().errors();
        assert!(errors.contains(&ParseError::UnknownVersion(b"2.5".to_vec())));
        assert!(errors.contains(&ParseError::IncorrectNewline {
            kind: LineKind::Header,
            newline: b"\n".to_vec()
        }));
        assert!(errors.contains(&invalid_header(b"Content-Type", b"")));
        assert!(errors.contains(&invalid_header(b"Content-Length", b"lots")));
        assert!(errors.contains(&ParseError::MalformedHeaderLine(b"no colon here\r\n".to_vec())));
        assert!(errors.contains(&ParseError::MissingHeader("WARC-Date")));
    }

    #[test]
    fn record_type_names() {
        assert_eq!(WarcRecordType::try_from("WarcInfo"), Ok(WarcRecordType::WarcInfo));
        assert!(WarcRecordType::try_from("bogus").is_err());
        let name: &'static str = WarcRecordType::Revisit.into();
        assert_eq!(name, "revisit");
    }

    #[test]
    fn builders_set_headers() {
        let record = make_conversion(
            b"<urn:uuid:2>",
            b"2013-11-15T00:00:00Z",
            Content::buffered(Some(b"text/plain"), "converted"),
            Some(b"<urn:uuid:1>"),
            Some(b"http://example.org/"),
        );
        assert_eq!(record.record_type(), WarcRecordType::Conversion);
        assert_eq!(record.headers().get(WarcField::RefersTo), Some(&b"<urn:uuid:1>"[..]));
        assert_eq!(record.url(), Some(&b"http://example.org/"[..]));

        let record = make_metadata(b"<urn:uuid:3>", b"now", Content::buffered(None, ""), None, None);
        assert_eq!(record.headers().len(), 3);
        assert!(record.url().is_none());
    }

    #[test]
    fn identifiers_and_dates() {
        let id = warc_uuid(b"http://example.org/20131113000000");
        assert_eq!(id, warc_uuid(b"http://example.org/20131113000000"));
        assert!(id.starts_with(b"<urn:uuid:") && id.ends_with(b">"));
        assert_eq!(id.len(), "<urn:uuid:>".len() + 36);
        assert_ne!(random_warc_uuid(), random_warc_uuid());

        let date = Utc.with_ymd_and_hms(2013, 11, 15, 1, 2, 3).unwrap();
        assert_eq!(warc_datetime_str(date), b"2013-11-15T01:02:03Z");

        assert_eq!(block_digest(b""), b"sha1:2jmj7l5rSw0yVb/vlWAYkK/YBwk=");
    }
}
