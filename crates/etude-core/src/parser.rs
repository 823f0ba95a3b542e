// src/parser.rs
use crate::cursor::ReadCursor;
use crate::http::{HTTP_VERSION, Method};
use memchr::{memchr, memchr2};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParseState {
    #[default]
    AwaitingRequestLine,
    AwaitingHeaders,
    AwaitingBody,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineStatus {
    /// A full line is available; its CRLF was overwritten with NULs.
    Complete,
    /// No terminator yet.
    Incomplete,
    /// Bare `\n`, or `\r` followed by something other than `\n`.
    Malformed,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("request line has {0} tokens, expected 3")]
    TokenCount(usize),
    #[error("unsupported method")]
    UnsupportedMethod,
    #[error("unsupported version")]
    UnsupportedVersion,
    #[error("request target is not valid UTF-8")]
    InvalidTarget,
    #[error("invalid Content-Length value")]
    InvalidContentLength,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestLine<'a> {
    pub method: Method,
    pub url: &'a str,
    pub version: &'a str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Header {
    /// The empty line closing the header block.
    End,
    Connection { keep_alive: bool },
    ContentLength(usize),
    /// Anything else; accepted and ignored.
    Other,
}

/// Scan the unexamined bytes for the next CRLF.
///
/// On `Complete` the two terminator bytes are replaced with NULs and
/// `check_pos` sits just past them. On `Incomplete` caused by a trailing `\r`,
/// `check_pos` stays on that `\r` so the next scan sees it again.
pub fn find_next_line(buf: &mut [u8], cursor: &mut ReadCursor) -> LineStatus {
    let window = cursor.unchecked();
    let Some(offset) = memchr2(b'\r', b'\n', &buf[window.clone()]) else {
        cursor.advance_check(window.len());
        return LineStatus::Incomplete;
    };

    let pos = window.start + offset;
    cursor.advance_check(offset);

    if buf[pos] == b'\n' {
        // A `\r\n` pair is always caught at the `\r`, so this `\n` is bare.
        return LineStatus::Malformed;
    }

    if pos + 1 == window.end {
        return LineStatus::Incomplete;
    }

    if buf[pos + 1] != b'\n' {
        return LineStatus::Malformed;
    }

    buf[pos] = 0;
    buf[pos + 1] = 0;
    cursor.advance_check(2);
    LineStatus::Complete
}

/// The current line: from `line_start` up to its first NUL terminator.
pub fn current_line<'a>(buf: &'a [u8], cursor: &ReadCursor) -> &'a [u8] {
    let raw = &buf[cursor.line_start()..cursor.check()];
    match memchr(0, raw) {
        Some(end) => &raw[..end],
        None => raw,
    }
}

/// `<METHOD> <URL> <VERSION>`, every ASCII whitespace byte being a separator.
pub fn parse_request_line(line: &[u8]) -> Result<RequestLine<'_>, ParseError> {
    let mut tokens = line.split(|b| b.is_ascii_whitespace());
    let (Some(method), Some(url), Some(version)) = (tokens.next(), tokens.next(), tokens.next())
    else {
        let count = line.split(|b| b.is_ascii_whitespace()).count();
        return Err(ParseError::TokenCount(count));
    };
    let extra = tokens.count();
    if extra > 0 {
        return Err(ParseError::TokenCount(3 + extra));
    }

    let method = Method::from_bytes(method).ok_or(ParseError::UnsupportedMethod)?;
    if version != HTTP_VERSION.as_bytes() {
        return Err(ParseError::UnsupportedVersion);
    }
    let url = std::str::from_utf8(url).map_err(|_| ParseError::InvalidTarget)?;

    Ok(RequestLine {
        method,
        url,
        version: HTTP_VERSION,
    })
}

/// `<Name>: <value>`, split on the first `": "`.
pub fn parse_header(line: &[u8]) -> Result<Header, ParseError> {
    if line.is_empty() {
        return Ok(Header::End);
    }

    let Some(split) = line.windows(2).position(|w| w == b": ") else {
        return Ok(Header::Other);
    };
    let name = &line[..split];
    let value = &line[split + 2..];

    if name.eq_ignore_ascii_case(b"connection") {
        return Ok(Header::Connection {
            keep_alive: value.eq_ignore_ascii_case(b"keep-alive"),
        });
    }

    if name.eq_ignore_ascii_case(b"content-length") {
        let len = std::str::from_utf8(value)
            .ok()
            .and_then(|v| v.trim().parse::<usize>().ok())
            .ok_or(ParseError::InvalidContentLength)?;
        return Ok(Header::ContentLength(len));
    }

    Ok(Header::Other)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loaded(bytes: &[u8]) -> (Vec<u8>, ReadCursor) {
        let mut buf = vec![0u8; 64];
        buf[..bytes.len()].copy_from_slice(bytes);
        let mut cursor = ReadCursor::new(buf.len());
        cursor.record_read(bytes.len()).unwrap();
        (buf, cursor)
    }

    #[test]
    fn test_find_line_complete() {
        let (mut buf, mut cursor) = loaded(b"GET / HTTP/1.1\r\nHost");
        assert_eq!(find_next_line(&mut buf, &mut cursor), LineStatus::Complete);
        assert_eq!(cursor.check(), 16);
        assert_eq!(&buf[14..16], &[0, 0]);
        assert_eq!(current_line(&buf, &cursor), b"GET / HTTP/1.1");
    }

    #[test]
    fn test_find_line_incomplete_without_terminator() {
        let (mut buf, mut cursor) = loaded(b"GET / HTT");
        assert_eq!(find_next_line(&mut buf, &mut cursor), LineStatus::Incomplete);
        assert_eq!(cursor.check(), 9);
        assert_eq!(cursor.line_start(), 0);
    }

    #[test]
    fn test_find_line_trailing_cr_is_rescanned() {
        let (mut buf, mut cursor) = loaded(b"GET / HTTP/1.1\r");
        assert_eq!(find_next_line(&mut buf, &mut cursor), LineStatus::Incomplete);
        assert_eq!(cursor.check(), 14);

        buf[15] = b'\n';
        cursor.record_read(1).unwrap();
        assert_eq!(find_next_line(&mut buf, &mut cursor), LineStatus::Complete);
        assert_eq!(current_line(&buf, &cursor), b"GET / HTTP/1.1");
    }

    #[test]
    fn test_find_line_malformed_breaks() {
        let (mut buf, mut cursor) = loaded(b"GET / HTTP/1.1\n");
        assert_eq!(find_next_line(&mut buf, &mut cursor), LineStatus::Malformed);

        let (mut buf, mut cursor) = loaded(b"GET / HTTP/1.1\rX");
        assert_eq!(find_next_line(&mut buf, &mut cursor), LineStatus::Malformed);
    }

    #[test]
    fn test_parse_request_line() {
        let line = parse_request_line(b"POST /form.html HTTP/1.1").unwrap();
        assert_eq!(line.method, Method::Post);
        assert_eq!(line.url, "/form.html");
        assert_eq!(line.version, "HTTP/1.1");
    }

    #[test]
    fn test_parse_request_line_rejections() {
        assert_eq!(
            parse_request_line(b"GET /"),
            Err(ParseError::TokenCount(2))
        );
        assert_eq!(
            parse_request_line(b"GET / HTTP/1.1 extra"),
            Err(ParseError::TokenCount(4))
        );
        assert_eq!(
            parse_request_line(b"GET  / HTTP/1.1"),
            Err(ParseError::TokenCount(4))
        );
        assert_eq!(parse_request_line(b""), Err(ParseError::TokenCount(1)));
        assert_eq!(
            parse_request_line(b"PUT / HTTP/1.1"),
            Err(ParseError::UnsupportedMethod)
        );
        assert_eq!(
            parse_request_line(b"GET / HTTP/1.0"),
            Err(ParseError::UnsupportedVersion)
        );
        assert_eq!(
            parse_request_line(b"GET /\xff HTTP/1.1"),
            Err(ParseError::InvalidTarget)
        );
    }

    #[test]
    fn test_parse_headers() {
        assert_eq!(parse_header(b""), Ok(Header::End));
        assert_eq!(
            parse_header(b"Connection: keep-alive"),
            Ok(Header::Connection { keep_alive: true })
        );
        assert_eq!(
            parse_header(b"connection: close"),
            Ok(Header::Connection { keep_alive: false })
        );
        assert_eq!(
            parse_header(b"Content-Length: 42"),
            Ok(Header::ContentLength(42))
        );
        assert_eq!(parse_header(b"Host: localhost:8080"), Ok(Header::Other));
        assert_eq!(parse_header(b"X-Flag"), Ok(Header::Other));
        assert_eq!(
            parse_header(b"Content-Length: -1"),
            Err(ParseError::InvalidContentLength)
        );
    }
}
