//! Request/response parsing, serialization, and the ordered, case-preserving
//! header map they share.
//!
//! Grounded on the original recorder's `dpkt_custom_handling/http_response.py`:
//! headers keep their wire case and insertion order, and a repeated header
//! name collapses into a list rather than overwriting the first value.

use indexmap::IndexMap;
use std::fmt;

/// A header value as it appeared on the wire: a single value, or (when the
/// header name repeated) the values in the order they were seen.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(untagged)]
pub enum HeaderValue {
    Scalar(String),
    List(Vec<String>),
}

impl HeaderValue {
    pub fn first(&self) -> &str {
        match self {
            HeaderValue::Scalar(s) => s.as_str(),
            HeaderValue::List(values) => values.first().map(String::as_str).unwrap_or(""),
        }
    }

    pub fn values(&self) -> Vec<&str> {
        match self {
            HeaderValue::Scalar(s) => vec![s.as_str()],
            HeaderValue::List(values) => values.iter().map(String::as_str).collect(),
        }
    }

    fn append(&mut self, value: String) {
        match self {
            HeaderValue::Scalar(existing) => {
                *self = HeaderValue::List(vec![std::mem::take(existing), value]);
            }
            HeaderValue::List(values) => values.push(value),
        }
    }
}

impl fmt::Display for HeaderValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeaderValue::Scalar(s) => write!(f, "{s}"),
            HeaderValue::List(values) => write!(f, "{}", values.join(", ")),
        }
    }
}

/// Ordered, case-preserving header map. Iteration order is insertion order.
pub type HeaderMap = IndexMap<String, HeaderValue>;

/// Looks a header up ignoring ASCII case, the way HTTP header names compare.
pub fn get_ci<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a HeaderValue> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v)
}

fn insert_preserving_duplicates(headers: &mut HeaderMap, name: String, value: String) {
    match headers.get_mut(&name) {
        Some(existing) => existing.append(value),
        None => {
            headers.insert(name, HeaderValue::Scalar(value));
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: String,
    /// Request target exactly as sent (path, or path?query).
    pub uri: String,
    pub version: String,
    pub headers: HeaderMap,
    /// Body bytes as captured off the wire, before Content-Encoding decode.
    pub body: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: String,
    pub reason: String,
    pub version: String,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

#[derive(thiserror::Error, Debug)]
pub enum MessageError {
    #[error("message has no header/body boundary")]
    NoHeaderBoundary,
    #[error("malformed start line: {0:?}")]
    StartLine(String),
    #[error("malformed header line: {0:?}")]
    HeaderLine(String),
    #[error("truncated message: expected {expected} body bytes, got {got}")]
    Truncated { expected: usize, got: usize },
    #[error("malformed chunked body")]
    BadChunkedBody,
    #[error("non-utf8 message text")]
    NotUtf8,
}

/// Splits `bytes` into the header block (start line + header lines, CRLF
/// terminated) and whatever follows the blank line.
fn split_head(bytes: &[u8]) -> Result<(&[u8], &[u8]), MessageError> {
    let needle: &[u8] = b"\r\n\r\n";
    if let Some(pos) = find(bytes, needle) {
        return Ok((&bytes[..pos], &bytes[pos + needle.len()..]));
    }
    let needle2: &[u8] = b"\n\n";
    if let Some(pos) = find(bytes, needle2) {
        return Ok((&bytes[..pos], &bytes[pos + needle2.len()..]));
    }
    Err(MessageError::NoHeaderBoundary)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn split_lines(head: &[u8]) -> Result<Vec<&str>, MessageError> {
    let text = std::str::from_utf8(head).map_err(|_| MessageError::NotUtf8)?;
    Ok(text.split("\r\n").flat_map(|l| l.split('\n')).collect())
}

fn parse_headers(lines: &[&str]) -> Result<HeaderMap, MessageError> {
    let mut headers = HeaderMap::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| MessageError::HeaderLine(line.to_string()))?;
        insert_preserving_duplicates(
            &mut headers,
            name.trim().to_string(),
            value.trim().to_string(),
        );
    }
    Ok(headers)
}

fn content_length(headers: &HeaderMap) -> Option<usize> {
    get_ci(headers, "content-length")?.first().parse().ok()
}

fn is_chunked(headers: &HeaderMap) -> bool {
    get_ci(headers, "transfer-encoding")
        .map(|v| v.values().iter().any(|t| t.eq_ignore_ascii_case("chunked")))
        .unwrap_or(false)
}

/// Reassembles an RFC 7230 chunked body, returning the decoded bytes and how
/// many raw input bytes (through the trailing `0\r\n\r\n`) it consumed —
/// callers that frame a byte stream into discrete messages need the latter.
fn dechunk(body: &[u8]) -> Result<(Vec<u8>, usize), MessageError> {
    let mut out = Vec::new();
    let mut rest = body;
    let mut consumed = 0usize;
    loop {
        let line_end = find(rest, b"\r\n").ok_or(MessageError::BadChunkedBody)?;
        let size_line = std::str::from_utf8(&rest[..line_end]).map_err(|_| MessageError::NotUtf8)?;
        let size_str = size_line.split(';').next().unwrap_or("").trim();
        let size = usize::from_str_radix(size_str, 16).map_err(|_| MessageError::BadChunkedBody)?;
        rest = &rest[line_end + 2..];
        consumed += line_end + 2;
        if size == 0 {
            consumed += 2; // trailing CRLF after the zero-size chunk
            break;
        }
        if rest.len() < size + 2 {
            return Err(MessageError::BadChunkedBody);
        }
        out.extend_from_slice(&rest[..size]);
        rest = &rest[size + 2..];
        consumed += size + 2;
    }
    Ok((out, consumed))
}

/// Extracts a message body from `remainder` (the bytes right after the
/// blank line), returning the decoded body and how many bytes of
/// `remainder` belong to this message.
fn extract_body(headers: &HeaderMap, remainder: &[u8]) -> Result<(Vec<u8>, usize), MessageError> {
    if is_chunked(headers) {
        return dechunk(remainder);
    }
    if let Some(expected) = content_length(headers) {
        if remainder.len() < expected {
            return Err(MessageError::Truncated {
                expected,
                got: remainder.len(),
            });
        }
        return Ok((remainder[..expected].to_vec(), expected));
    }
    Ok((remainder.to_vec(), remainder.len()))
}

/// Response codes that by definition carry no body (informational, 204, 304).
fn response_has_body(status: &str) -> bool {
    match status.parse::<u16>() {
        Ok(code) => !(code / 100 == 1 || code == 204 || code == 304),
        Err(_) => true,
    }
}

pub fn parse_request(bytes: &[u8]) -> Result<HttpRequest, MessageError> {
    Ok(parse_request_inner(bytes)?.0)
}

/// Like `parse_request`, but reports how many leading bytes of `bytes`
/// the message occupies — used to frame a byte stream into messages.
/// Returns `Ok(None)` when the buffer doesn't yet hold a complete message
/// (more header bytes or body bytes are still expected).
pub fn try_parse_request(bytes: &[u8]) -> Result<Option<(HttpRequest, usize)>, MessageError> {
    match parse_request_inner(bytes) {
        Ok(result) => Ok(Some(result)),
        Err(MessageError::NoHeaderBoundary | MessageError::Truncated { .. } | MessageError::BadChunkedBody) => {
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

fn parse_request_inner(bytes: &[u8]) -> Result<(HttpRequest, usize), MessageError> {
    let (head, remainder) = split_head(bytes)?;
    let head_len = bytes.len() - remainder.len();
    let lines = split_lines(head)?;
    let start = lines.first().ok_or(MessageError::NoHeaderBoundary)?;
    let mut parts = start.split(' ');
    let method = parts
        .next()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| MessageError::StartLine(start.to_string()))?;
    let uri = parts
        .next()
        .ok_or_else(|| MessageError::StartLine(start.to_string()))?;
    let version_token = parts.next().unwrap_or("HTTP/1.1");
    let version = version_token
        .strip_prefix("HTTP/")
        .unwrap_or("1.1")
        .to_string();
    let headers = parse_headers(&lines[1..])?;
    let (body, body_len) = extract_body(&headers, remainder)?;
    Ok((
        HttpRequest {
            method: method.to_string(),
            uri: uri.to_string(),
            version,
            headers,
            body,
        },
        head_len + body_len,
    ))
}

pub fn parse_response(bytes: &[u8]) -> Result<HttpResponse, MessageError> {
    Ok(parse_response_inner(bytes)?.0)
}

/// Like `try_parse_request`, for responses.
pub fn try_parse_response(bytes: &[u8]) -> Result<Option<(HttpResponse, usize)>, MessageError> {
    match parse_response_inner(bytes) {
        Ok(result) => Ok(Some(result)),
        Err(MessageError::NoHeaderBoundary | MessageError::Truncated { .. } | MessageError::BadChunkedBody) => {
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

fn parse_response_inner(bytes: &[u8]) -> Result<(HttpResponse, usize), MessageError> {
    let (head, remainder) = split_head(bytes)?;
    let head_len = bytes.len() - remainder.len();
    let lines = split_lines(head)?;
    let start = lines.first().ok_or(MessageError::NoHeaderBoundary)?;
    let mut parts = start.splitn(3, ' ');
    let version_token = parts
        .next()
        .ok_or_else(|| MessageError::StartLine(start.to_string()))?;
    let version = version_token
        .strip_prefix("HTTP/")
        .unwrap_or("1.1")
        .to_string();
    let status = parts
        .next()
        .ok_or_else(|| MessageError::StartLine(start.to_string()))?;
    let reason = parts.next().unwrap_or("").to_string();
    let headers = parse_headers(&lines[1..])?;
    let (body, body_len) = if response_has_body(status) {
        extract_body(&headers, remainder)?
    } else {
        (Vec::new(), 0)
    };
    let total_len = head_len + body_len;
    Ok((
        HttpResponse {
            status: status.to_string(),
            reason,
            version,
            headers,
            body,
        },
        total_len,
    ))
}

/// True if `bytes` begins with a syntactically valid HTTP request head.
pub fn detect_request(bytes: &[u8]) -> bool {
    parse_request(bytes).is_ok()
}

/// True if `bytes` begins with a syntactically valid HTTP response head.
pub fn detect_response(bytes: &[u8]) -> bool {
    parse_response(bytes).is_ok()
}

fn serialize_headers(out: &mut Vec<u8>, headers: &HeaderMap) {
    for (name, value) in headers {
        for v in value.values() {
            out.extend_from_slice(name.as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(v.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
    }
}

pub fn serialize_request(req: &HttpRequest) -> Vec<u8> {
    let mut out = Vec::with_capacity(req.body.len() + 256);
    out.extend_from_slice(req.method.as_bytes());
    out.push(b' ');
    out.extend_from_slice(req.uri.as_bytes());
    out.extend_from_slice(b" HTTP/");
    out.extend_from_slice(req.version.as_bytes());
    out.extend_from_slice(b"\r\n");
    serialize_headers(&mut out, &req.headers);
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(&req.body);
    out
}

pub fn serialize_response(resp: &HttpResponse) -> Vec<u8> {
    let mut out = Vec::with_capacity(resp.body.len() + 256);
    out.extend_from_slice(b"HTTP/");
    out.extend_from_slice(resp.version.as_bytes());
    out.push(b' ');
    out.extend_from_slice(resp.status.as_bytes());
    out.push(b' ');
    out.extend_from_slice(resp.reason.as_bytes());
    out.extend_from_slice(b"\r\n");
    serialize_headers(&mut out, &resp.headers);
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(&resp.body);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_request_with_duplicate_headers() {
        let raw = b"GET /foo?x=1 HTTP/1.1\r\nHost: example.test\r\nX-Thing: a\r\nX-Thing: b\r\n\r\n";
        let req = parse_request(raw).unwrap();
        assert_eq!(req.method, "GET");
        assert_eq!(req.uri, "/foo?x=1");
        assert_eq!(req.version, "1.1");
        assert_eq!(
            get_ci(&req.headers, "x-thing").unwrap().values(),
            vec!["a", "b"]
        );
        assert!(req.body.is_empty());
    }

    #[test]
    fn parses_response_with_content_length_body() {
        let raw = b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello";
        let resp = parse_response(raw).unwrap();
        assert_eq!(resp.status, "200");
        assert_eq!(resp.reason, "OK");
        assert_eq!(resp.body, b"hello");
    }

    #[test]
    fn no_body_for_304() {
        let raw = b"HTTP/1.1 304 Not Modified\r\nContent-Length: 5\r\n\r\nhello";
        let resp = parse_response(raw).unwrap();
        assert!(resp.body.is_empty());
    }

    #[test]
    fn dechunks_transfer_encoding() {
        let raw = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n4\r\nWiki\r\n5\r\npedia\r\n0\r\n\r\n";
        let resp = parse_response(raw).unwrap();
        assert_eq!(resp.body, b"Wikipedia");
    }

    #[test]
    fn round_trips_request() {
        let raw = b"POST /submit HTTP/1.1\r\nHost: t\r\nContent-Length: 3\r\n\r\nabc";
        let req = parse_request(raw).unwrap();
        assert_eq!(serialize_request(&req), raw.to_vec());
    }

    #[test]
    fn truncated_body_is_an_error() {
        let raw = b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\nabc";
        assert!(matches!(
            parse_response(raw),
            Err(MessageError::Truncated { .. })
        ));
    }

    #[test]
    fn try_parse_request_waits_for_a_full_body() {
        let head = b"POST /x HTTP/1.1\r\nContent-Length: 5\r\n\r\n";
        assert_eq!(try_parse_request(head).unwrap(), None);
        let mut buf = head.to_vec();
        buf.extend_from_slice(b"abc");
        assert_eq!(try_parse_request(&buf).unwrap(), None);
        buf.extend_from_slice(b"de");
        let (req, consumed) = try_parse_request(&buf).unwrap().unwrap();
        assert_eq!(req.body, b"abcde");
        assert_eq!(consumed, buf.len());
    }

    #[test]
    fn try_parse_request_reports_consumed_len_for_pipelined_messages() {
        let one = b"GET /a HTTP/1.1\r\nHost: t\r\n\r\n".to_vec();
        let mut buf = one.clone();
        buf.extend_from_slice(b"GET /b HTTP/1.1\r\nHost: t\r\n\r\n");
        let (req, consumed) = try_parse_request(&buf).unwrap().unwrap();
        assert_eq!(req.uri, "/a");
        assert_eq!(consumed, one.len());
    }
}
