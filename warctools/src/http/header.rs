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

use std::rc::Rc;
use std::sync::LazyLock;

use regex::bytes::Regex;

use super::{is_newline, HttpError};
use crate::header::{is_continuation, HeaderEncoding, HeaderMap};

/// Headers dropped from a decoded message that has a body, since decoding rewrites framing.
const STRIP_HEADERS: &[&[u8]] = &[
    b"content-length",
    b"transfer-encoding",
    b"content-encoding",
    b"te",
    b"expect",
    b"trailer",
];

static URL_RX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i-u)^(?P<scheme>https?)://(?P<host>[^:/]+)(?::(?P<port>\d+))?(?P<path>.*)$")
        .expect("static regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Framing {
    Close,
    Length,
    Chunked,
}

/// Header state shared by requests and responses.
#[derive(Debug, Clone)]
pub struct HttpHeader {
    headers: HeaderMap,
    trailers: HeaderMap,
    keep_alive: bool,
    framing: Framing,
    content_length: Option<u64>,
    encoding: Option<Vec<u8>>,
    expect_continue: bool,
    ignore_headers: Vec<Vec<u8>>,
    errors: Vec<HttpError>,
}

impl HttpHeader {
    /// Create an empty header block.
    ///
    /// Names in `ignore_headers` are kept in the header list but play no part in framing.
    pub fn new<I, N>(ignore_headers: I) -> Self
    where
        I: IntoIterator<Item = N>,
        N: AsRef<[u8]>,
    {
        HttpHeader {
            headers: HeaderMap::new(HeaderEncoding::Latin1),
            trailers: HeaderMap::new(HeaderEncoding::Latin1),
            keep_alive: false,
            framing: Framing::Close,
            content_length: None,
            encoding: None,
            expect_continue: false,
            ignore_headers: ignore_headers
                .into_iter()
                .map(|n| n.as_ref().to_ascii_lowercase())
                .collect(),
            errors: Vec::new(),
        }
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn trailers(&self) -> &HeaderMap {
        &self.trailers
    }

    pub fn keep_alive(&self) -> bool {
        self.keep_alive
    }

    pub fn expect_continue(&self) -> bool {
        self.expect_continue
    }

    /// Value of `Content-Encoding`, if any.
    pub fn encoding(&self) -> Option<&[u8]> {
        self.encoding.as_deref()
    }

    pub fn body_is_chunked(&self) -> bool {
        self.framing == Framing::Chunked
    }

    /// Declared body length, if framing is by `Content-Length`.
    pub fn body_length(&self) -> Option<u64> {
        match self.framing {
            Framing::Length => self.content_length,
            _ => None,
        }
    }

    /// Soft errors found while interpreting header values.
    pub fn errors(&self) -> &[HttpError] {
        &self.errors
    }

    fn has_declared_body(&self) -> bool {
        matches!(self.framing, Framing::Length | Framing::Chunked)
    }

    /// Add one raw header line. The blank line ending the block triggers interpretation
    /// of the framing headers.
    pub fn add_header_line(&mut self, line: &[u8]) -> Result<(), HttpError> {
        if is_continuation(line) && !self.headers.is_empty() {
            self.headers.add_continuation(line);
        } else if is_newline(line) {
            self.interpret();
        } else if !self.headers.add_line(line) {
            return Err(HttpError::MalformedHeaderLine(line.to_vec()));
        }
        Ok(())
    }

    /// Add one raw trailer line following a chunked body.
    pub fn add_trailer_line(&mut self, line: &[u8]) -> Result<(), HttpError> {
        if is_continuation(line) && !self.trailers.is_empty() {
            self.trailers.add_continuation(line);
        } else if !is_newline(line) && !self.trailers.add_line(line) {
            return Err(HttpError::MalformedHeaderLine(line.to_vec()));
        }
        Ok(())
    }

    fn interpret(&mut self) {
        for (name, value) in self.headers.iter() {
            let name = name.to_ascii_lowercase();
            let value = value.to_ascii_lowercase();

            if self.ignore_headers.contains(&name) {
                continue;
            }
            match name.as_slice() {
                b"expect" => {
                    if contains(&value, b"100-continue") {
                        self.expect_continue = true;
                    }
                }
                b"content-length" => {
                    if self.framing == Framing::Close {
                        match parse_decimal(&value) {
                            Some(length) => {
                                self.content_length = Some(length);
                                self.framing = Framing::Length;
                            }
                            None => self.errors.push(HttpError::InvalidContentLength(value)),
                        }
                    }
                }
                b"transfer-encoding" => {
                    if contains(&value, b"chunked") {
                        self.framing = Framing::Chunked;
                    }
                }
                b"content-encoding" => self.encoding = Some(value),
                b"connection" => {
                    if contains(&value, b"keep-alive") {
                        self.keep_alive = true;
                    } else if contains(&value, b"close") {
                        self.keep_alive = false;
                    }
                }
                _ => {}
            }
        }
        trace!(
            "http framing {:?}, content length {:?}",
            self.framing,
            self.content_length
        );
    }

    /// Write headers and trailers, dropping framing headers if `strip` is set.
    pub fn write_headers(&self, buf: &mut Vec<u8>, strip: bool) {
        let skip = if strip { STRIP_HEADERS } else { &[] };
        self.headers.extend_filtered(buf, skip);
        self.trailers.extend_filtered(buf, skip);
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

fn parse_decimal(value: &[u8]) -> Option<u64> {
    std::str::from_utf8(value).ok()?.trim().parse().ok()
}

fn split_start_line(line: &[u8]) -> Vec<&[u8]> {
    line.trim_ascii_end().splitn(3, |&b| b == b' ').collect()
}

/// Start line and header handling specific to requests or responses.
pub trait MessageHead {
    /// Parse the first line of the message.
    fn set_start_line(&mut self, line: &[u8]) -> Result<(), HttpError>;

    fn fields(&self) -> &HttpHeader;

    fn fields_mut(&mut self) -> &mut HttpHeader;

    /// Whether a body follows the header block.
    fn has_body(&self) -> bool;

    /// Called once the blank line ending the header block has been seen.
    fn headers_complete(&mut self) {}

    fn write_decoded_start(&self, buf: &mut Vec<u8>);

    /// For an interim (`100 Continue`) response, a fresh header for the response that follows.
    fn interim_successor(&self) -> Option<Self>
    where
        Self: Sized,
    {
        None
    }

    /// Decoded header block: start line plus headers and trailers.
    fn write_decoded(&self, buf: &mut Vec<u8>) {
        self.write_decoded_start(buf);
        self.fields().write_headers(buf, self.has_body());
    }
}

/// Parsed request line and headers.
#[derive(Debug, Clone)]
pub struct RequestHeader {
    http: HttpHeader,
    method: Vec<u8>,
    target_uri: Vec<u8>,
    version: Vec<u8>,
    scheme: Vec<u8>,
    host: Vec<u8>,
    port: u16,
    absolute_form: bool,
}

impl Default for RequestHeader {
    fn default() -> Self {
        Self::new(std::iter::empty::<&[u8]>())
    }
}

impl RequestHeader {
    pub fn new<I, N>(ignore_headers: I) -> Self
    where
        I: IntoIterator<Item = N>,
        N: AsRef<[u8]>,
    {
        RequestHeader {
            http: HttpHeader::new(ignore_headers),
            method: Vec::new(),
            target_uri: Vec::new(),
            version: Vec::new(),
            scheme: b"http".to_vec(),
            host: Vec::new(),
            port: 80,
            absolute_form: false,
        }
    }

    pub fn method(&self) -> &[u8] {
        &self.method
    }

    /// Request target in origin form (absolute-form targets have been split up).
    pub fn target_uri(&self) -> &[u8] {
        &self.target_uri
    }

    pub fn version(&self) -> &[u8] {
        &self.version
    }

    pub fn scheme(&self) -> &[u8] {
        &self.scheme
    }

    pub fn host(&self) -> &[u8] {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Reconstructed URL of the request. Default ports are omitted.
    pub fn url(&self) -> Vec<u8> {
        let mut url = Vec::with_capacity(self.host.len() + self.target_uri.len() + 16);
        url.extend_from_slice(&self.scheme);
        url.extend_from_slice(b"://");
        url.extend_from_slice(&self.host);
        if self.port != default_port(&self.scheme) {
            url.extend_from_slice(format!(":{}", self.port).as_bytes());
        }
        url.extend_from_slice(&self.target_uri);
        url
    }

    fn set_host_port(&mut self, authority: &[u8]) {
        match authority.iter().rposition(|&b| b == b':') {
            Some(colon) => {
                self.host = authority[..colon].to_vec();
                if let Some(port) = parse_decimal(&authority[colon + 1..]) {
                    self.port = u16::try_from(port).unwrap_or(self.port);
                }
            }
            None => self.host = authority.to_vec(),
        }
    }
}

fn default_port(scheme: &[u8]) -> u16 {
    if scheme.eq_ignore_ascii_case(b"https") {
        443
    } else {
        80
    }
}

impl MessageHead for RequestHeader {
    fn set_start_line(&mut self, line: &[u8]) -> Result<(), HttpError> {
        let parts = split_start_line(line);
        let [method, target, version] = parts.as_slice() else {
            return Err(HttpError::MalformedStartLine(line.to_vec()));
        };
        self.method = method.to_vec();
        self.target_uri = target.to_vec();
        self.version = version.to_vec();

        if self.method.eq_ignore_ascii_case(b"CONNECT") {
            // host:port, left as is
            let authority = self.target_uri.clone();
            self.set_host_port(&authority);
            self.absolute_form = true;
        } else if let Some(caps) = URL_RX.captures(target) {
            self.scheme = caps["scheme"].to_ascii_lowercase();
            self.host = caps["host"].to_vec();
            self.port = caps
                .name("port")
                .and_then(|p| parse_decimal(p.as_bytes()))
                .and_then(|p| u16::try_from(p).ok())
                .unwrap_or_else(|| default_port(&self.scheme));
            self.target_uri = caps["path"].to_vec();
            if self.target_uri.is_empty() {
                self.target_uri = if self.method.eq_ignore_ascii_case(b"OPTIONS") {
                    b"*".to_vec()
                } else {
                    b"/".to_vec()
                };
            }
            self.absolute_form = true;
        }

        self.http.keep_alive = self.version.eq_ignore_ascii_case(b"HTTP/1.1");
        Ok(())
    }

    fn fields(&self) -> &HttpHeader {
        &self.http
    }

    fn fields_mut(&mut self) -> &mut HttpHeader {
        &mut self.http
    }

    fn has_body(&self) -> bool {
        self.http.has_declared_body()
    }

    fn headers_complete(&mut self) {
        if self.absolute_form {
            return;
        }
        if let Some(host) = self.http.headers.get("Host").map(<[u8]>::to_vec) {
            self.set_host_port(&host);
        }
    }

    fn write_decoded_start(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.method);
        buf.push(b' ');
        buf.extend_from_slice(&self.target_uri);
        buf.push(b' ');
        buf.extend_from_slice(&self.version);
        buf.extend_from_slice(b"\r\n");
    }
}

/// Parsed status line and headers. Holds the header of the request it answers.
#[derive(Debug, Clone)]
pub struct ResponseHeader {
    http: HttpHeader,
    request: Option<Rc<RequestHeader>>,
    version: Vec<u8>,
    code: u16,
    phrase: Vec<u8>,
}

impl ResponseHeader {
    pub fn new<I, N>(request: Option<Rc<RequestHeader>>, ignore_headers: I) -> Self
    where
        I: IntoIterator<Item = N>,
        N: AsRef<[u8]>,
    {
        ResponseHeader {
            http: HttpHeader::new(ignore_headers),
            request,
            version: b"HTTP/1.1".to_vec(),
            code: 0,
            phrase: b"Empty Response".to_vec(),
        }
    }

    /// Fresh header for the next response on the same request, carrying over
    /// the ignored header names.
    fn successor(&self) -> Self {
        ResponseHeader {
            http: HttpHeader {
                ignore_headers: self.http.ignore_headers.clone(),
                ..HttpHeader::new(std::iter::empty::<&[u8]>())
            },
            request: self.request.clone(),
            version: b"HTTP/1.1".to_vec(),
            code: 0,
            phrase: b"Empty Response".to_vec(),
        }
    }

    pub fn request(&self) -> Option<&RequestHeader> {
        self.request.as_deref()
    }

    pub fn version(&self) -> &[u8] {
        &self.version
    }

    pub fn code(&self) -> u16 {
        self.code
    }

    pub fn phrase(&self) -> &[u8] {
        &self.phrase
    }

    fn request_method(&self) -> &[u8] {
        self.request.as_deref().map(|r| r.method()).unwrap_or_default()
    }
}

impl MessageHead for ResponseHeader {
    fn set_start_line(&mut self, line: &[u8]) -> Result<(), HttpError> {
        let parts = split_start_line(line);
        let (version, code) = match parts.as_slice() {
            [version, code, ..] => (version, code),
            _ => return Err(HttpError::MalformedStartLine(line.to_vec())),
        };
        let code = parse_decimal(code)
            .and_then(|c| u16::try_from(c).ok())
            .ok_or_else(|| HttpError::MalformedStartLine(line.to_vec()))?;

        self.version = version.to_vec();
        self.code = code;
        self.phrase = parts.get(2).map(|p| p.to_vec()).unwrap_or_default();
        self.http.keep_alive = self.version.eq_ignore_ascii_case(b"HTTP/1.1");
        Ok(())
    }

    fn fields(&self) -> &HttpHeader {
        &self.http
    }

    fn fields_mut(&mut self) -> &mut HttpHeader {
        &mut self.http
    }

    fn has_body(&self) -> bool {
        let method = self.request_method();
        if method.eq_ignore_ascii_case(b"HEAD") {
            return false;
        }
        if method.eq_ignore_ascii_case(b"CONNECT") && (200..300).contains(&self.code) {
            return false;
        }
        match self.code {
            100..=199 => self.http.body_is_chunked(),
            204 | 304 => false,
            _ => true,
        }
    }

    fn interim_successor(&self) -> Option<Self> {
        (self.code == 100).then(|| self.successor())
    }

    fn write_decoded_start(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.version);
        buf.push(b' ');
        buf.extend_from_slice(self.code.to_string().as_bytes());
        buf.push(b' ');
        buf.extend_from_slice(&self.phrase);
        buf.extend_from_slice(b"\r\n");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(line: &[u8]) -> RequestHeader {
        let mut header = RequestHeader::default();
        header.set_start_line(line).unwrap();
        header
    }

    #[test]
    fn absolute_form_is_split() {
        let header = request(b"GET http://example.org:8080/a?b HTTP/1.1\r\n");
        assert_eq!(header.host(), b"example.org");
        assert_eq!(header.port(), 8080);
        assert_eq!(header.target_uri(), b"/a?b");
        assert_eq!(header.url(), b"http://example.org:8080/a?b");
    }

    #[test]
    fn missing_path_depends_on_method() {
        assert_eq!(request(b"GET https://example.org HTTP/1.1").target_uri(), b"/");
        assert_eq!(request(b"OPTIONS http://example.org HTTP/1.1").target_uri(), b"*");
        assert_eq!(request(b"GET https://example.org HTTP/1.1").url(), b"https://example.org/");
    }

    #[test]
    fn connect_target_is_authority() {
        let header = request(b"CONNECT example.org:443 HTTP/1.1");
        assert_eq!(header.host(), b"example.org");
        assert_eq!(header.port(), 443);
        assert_eq!(header.target_uri(), b"example.org:443");
    }

    #[test]
    fn host_header_fills_origin_form() {
        let mut header = request(b"GET /x HTTP/1.1");
        header.fields_mut().add_header_line(b"Host: example.org:81\r\n").unwrap();
        header.fields_mut().add_header_line(b"\r\n").unwrap();
        header.headers_complete();
        assert_eq!(header.url(), b"http://example.org:81/x");
    }

    #[test]
    fn malformed_start_lines() {
        let mut header = RequestHeader::default();
        assert!(header.set_start_line(b"GET\r\n").is_err());
        let mut header = ResponseHeader::new(None, std::iter::empty::<&[u8]>());
        assert!(header.set_start_line(b"HTTP/1.1 abc OK\r\n").is_err());
        assert!(header.set_start_line(b"HTTP/1.1 404\r\n").is_ok());
        assert_eq!(header.code(), 404);
        assert_eq!(header.phrase(), b"");
    }

    #[test]
    fn chunked_wins_over_length() {
        let mut http = HttpHeader::new(std::iter::empty::<&[u8]>());
        http.add_header_line(b"Content-Length: 10\r\n").unwrap();
        http.add_header_line(b"Transfer-Encoding: chunked\r\n").unwrap();
        http.add_header_line(b"Connection: keep-alive\r\n").unwrap();
        http.add_header_line(b"Expect: 100-continue\r\n").unwrap();
        http.add_header_line(b"\r\n").unwrap();
        assert!(http.body_is_chunked());
        assert_eq!(http.body_length(), None);
        assert!(http.keep_alive());
        assert!(http.expect_continue());
    }

    #[test]
    fn ignored_headers_do_not_frame() {
        let mut http = HttpHeader::new([b"content-length"]);
        http.add_header_line(b"Content-Length: 10\r\n").unwrap();
        http.add_header_line(b"\r\n").unwrap();
        assert_eq!(http.body_length(), None);
        assert_eq!(http.headers().get("content-length"), Some(&b"10"[..]));
    }

    #[test]
    fn bad_content_length_is_soft() {
        let mut http = HttpHeader::new(std::iter::empty::<&[u8]>());
        http.add_header_line(b"Content-Length: lots\r\n").unwrap();
        http.add_header_line(b"\r\n").unwrap();
        assert_eq!(http.body_length(), None);
        assert_eq!(http.errors().len(), 1);
        assert!(http.add_header_line(b"garbage\r\n").is_err());
    }
}
