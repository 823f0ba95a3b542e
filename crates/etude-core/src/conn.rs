// src/conn.rs
//
// One connection's buffers, parser state and response assembly. Nothing in
// here touches a socket; see `transport.rs` for the I/O side.

use crate::cursor::ReadCursor;
use crate::error::{EtudeError, EtudeResult};
use crate::http::{EMPTY_DOCUMENT, HTTP_VERSION, Method, Outcome, Status};
use crate::parser::{self, Header, LineStatus, ParseState};
use crate::resource::{DocumentRoot, ResolveError, Resource};
use arrayvec::ArrayVec;
use std::fmt;
use std::io::Write;
use std::net::SocketAddr;
use std::os::fd::RawFd;

pub const READ_BUFFER_SIZE: usize = 2048;
pub const WRITE_BUFFER_SIZE: usize = 1024;

/// Where a scatter/gather segment points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Region {
    Header,
    File,
}

/// One entry of the descriptor list: `len` bytes starting at `offset` into `region`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Segment {
    pub region: Region,
    pub offset: usize,
    pub len: usize,
}

impl Segment {
    const EMPTY: Segment = Segment {
        region: Region::Header,
        offset: 0,
        len: 0,
    };
}

pub struct Connection {
    pub(crate) fd: RawFd,
    pub(crate) peer: Option<SocketAddr>,
    pub(crate) edge_triggered: bool,

    pub(crate) read_buf: Box<[u8; READ_BUFFER_SIZE]>,
    pub(crate) cursor: ReadCursor,

    pub(crate) state: ParseState,
    pub(crate) method: Method,
    pub(crate) url: String,
    pub(crate) version: String,
    pub(crate) keep_alive: bool,
    pub(crate) body_len: usize,
    pub(crate) body_start: usize,

    pub(crate) resource: Option<Resource>,
    pub(crate) iov: [Segment; 2],
    pub(crate) iov_count: usize,

    pub(crate) write_buf: ArrayVec<u8, WRITE_BUFFER_SIZE>,
    pub(crate) bytes_pending: usize,
    pub(crate) bytes_sent: usize,
}

impl Connection {
    /// A fresh unused connection slot
    pub fn empty() -> Self {
        Self {
            fd: -1,
            peer: None,
            edge_triggered: false,
            read_buf: Box::new([0; READ_BUFFER_SIZE]),
            cursor: ReadCursor::new(READ_BUFFER_SIZE),
            state: ParseState::AwaitingRequestLine,
            method: Method::Get,
            url: String::new(),
            version: String::new(),
            keep_alive: false,
            body_len: 0,
            body_start: 0,
            resource: None,
            iov: [Segment::EMPTY; 2],
            iov_count: 0,
            write_buf: ArrayVec::new(),
            bytes_pending: 0,
            bytes_sent: 0,
        }
    }

    /// Bind the slot to a freshly accepted socket.
    pub fn init(&mut self, fd: RawFd, peer: Option<SocketAddr>, edge_triggered: bool) {
        self.fd = fd;
        self.peer = peer;
        self.edge_triggered = edge_triggered;
        self.reset();
    }

    /// Return to the freshly accepted state, keeping the socket identity.
    pub fn reset(&mut self) {
        self.read_buf[..self.cursor.fill()].fill(0);
        self.cursor.reset();
        self.state = ParseState::AwaitingRequestLine;
        self.method = Method::Get;
        self.url.clear();
        self.version.clear();
        self.keep_alive = false;
        self.body_len = 0;
        self.body_start = 0;
        self.release_resource();
        self.iov = [Segment::EMPTY; 2];
        self.iov_count = 0;
        self.write_buf.clear();
        self.bytes_pending = 0;
        self.bytes_sent = 0;
    }

    /// Drop the file mapping, if any.
    pub fn release_resource(&mut self) {
        self.resource = None;
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn edge_triggered(&self) -> bool {
        self.edge_triggered
    }

    pub fn state(&self) -> ParseState {
        self.state
    }

    pub fn cursor(&self) -> &ReadCursor {
        &self.cursor
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn keep_alive(&self) -> bool {
        self.keep_alive
    }

    pub fn body_len(&self) -> usize {
        self.body_len
    }

    /// Response head assembled so far.
    pub fn header_bytes(&self) -> &[u8] {
        &self.write_buf
    }

    pub fn bytes_pending(&self) -> usize {
        self.bytes_pending
    }

    pub fn bytes_sent(&self) -> usize {
        self.bytes_sent
    }

    pub fn has_mapping(&self) -> bool {
        self.resource.as_ref().is_some_and(|r| !r.is_empty())
    }

    /// Drive the state machine over everything received so far.
    pub fn process_read(&mut self, docs: &DocumentRoot) -> Outcome {
        loop {
            if self.state == ParseState::AwaitingBody {
                if self.cursor.fill() - self.body_start >= self.body_len {
                    return self.do_request(docs);
                }
                return Outcome::NeedMoreData;
            }

            match parser::find_next_line(&mut self.read_buf[..], &mut self.cursor) {
                LineStatus::Complete => {}
                LineStatus::Incomplete => return Outcome::NeedMoreData,
                LineStatus::Malformed => return Outcome::Malformed,
            }

            let done = match self.state {
                ParseState::AwaitingRequestLine => self.parse_request_line(),
                ParseState::AwaitingHeaders => self.parse_header(),
                ParseState::AwaitingBody => unreachable!("body state handled above"),
            };
            self.cursor.commit_line();

            match done {
                Err(outcome) => return outcome,
                Ok(true) => return self.do_request(docs),
                Ok(false) => {}
            }
        }
    }

    fn parse_request_line(&mut self) -> Result<bool, Outcome> {
        let line = parser::current_line(&self.read_buf[..], &self.cursor);
        match parser::parse_request_line(line) {
            Ok(req) => {
                self.method = req.method;
                self.url.push_str(req.url);
                self.version.push_str(req.version);
                self.state = ParseState::AwaitingHeaders;
                Ok(false)
            }
            Err(e) => {
                tracing::debug!(fd = self.fd, "malformed request line: {}", e);
                Err(Outcome::Malformed)
            }
        }
    }

    /// `Ok(true)` once the request (without body) is complete.
    fn parse_header(&mut self) -> Result<bool, Outcome> {
        let line = parser::current_line(&self.read_buf[..], &self.cursor);
        match parser::parse_header(line) {
            Ok(Header::End) => {
                if self.body_len != 0 {
                    self.state = ParseState::AwaitingBody;
                    self.body_start = self.cursor.check();
                    return Ok(false);
                }
                Ok(true)
            }
            Ok(Header::Connection { keep_alive }) => {
                self.keep_alive = keep_alive;
                Ok(false)
            }
            Ok(Header::ContentLength(len)) => {
                self.body_len = len;
                Ok(false)
            }
            Ok(Header::Other) => Ok(false),
            Err(e) => {
                tracing::debug!(fd = self.fd, "malformed header: {}", e);
                Err(Outcome::Malformed)
            }
        }
    }

    fn do_request(&mut self, docs: &DocumentRoot) -> Outcome {
        tracing::trace!(
            fd = self.fd,
            method = self.method.as_str(),
            url = %self.url,
            keep_alive = self.keep_alive,
            "request complete"
        );
        match docs.resolve(&self.url) {
            Ok(resource) => {
                self.resource = Some(resource);
                Outcome::ResourceReady
            }
            Err(ResolveError::Missing) => Outcome::ResourceMissing,
            Err(ResolveError::Forbidden) => Outcome::ResourceForbidden,
            Err(ResolveError::NotAFile) => Outcome::Malformed,
            Err(ResolveError::Io(e)) => {
                tracing::warn!(fd = self.fd, url = %self.url, "failed to map resource: {}", e);
                Outcome::InternalFault
            }
        }
    }

    /// Format the response for a classified request and set up the descriptor list.
    pub fn assemble(&mut self, outcome: Outcome) -> EtudeResult<()> {
        let Some(status) = outcome.status() else {
            return Err(EtudeError::Incomplete);
        };

        self.add_status_line(status)?;

        if let Some(body) = status.error_body() {
            self.add_headers(body.len())?;
            self.add_content(body)?;
            self.inline_only();
            return Ok(());
        }

        let file_len = self.resource.as_ref().map_or(0, Resource::len);
        if file_len == 0 {
            self.release_resource();
            self.add_headers(EMPTY_DOCUMENT.len())?;
            self.add_content(EMPTY_DOCUMENT)?;
            self.inline_only();
            return Ok(());
        }

        self.add_headers(file_len)?;
        self.iov[0] = Segment {
            region: Region::Header,
            offset: 0,
            len: self.write_buf.len(),
        };
        self.iov[1] = Segment {
            region: Region::File,
            offset: 0,
            len: file_len,
        };
        self.iov_count = 2;
        self.bytes_pending = self.write_buf.len() + file_len;
        Ok(())
    }

    fn inline_only(&mut self) {
        self.iov[0] = Segment {
            region: Region::Header,
            offset: 0,
            len: self.write_buf.len(),
        };
        self.iov[1] = Segment::EMPTY;
        self.iov_count = 1;
        self.bytes_pending = self.write_buf.len();
    }

    fn append(&mut self, args: fmt::Arguments<'_>) -> EtudeResult<()> {
        self.write_buf
            .write_fmt(args)
            .map_err(|_| EtudeError::ResponseOverflow)
    }

    fn add_status_line(&mut self, status: Status) -> EtudeResult<()> {
        self.append(format_args!(
            "{} {} {}\r\n",
            HTTP_VERSION,
            status.code(),
            status.reason()
        ))
    }

    fn add_headers(&mut self, content_len: usize) -> EtudeResult<()> {
        self.append(format_args!("Content-Type: text/html\r\n"))?;
        self.append(format_args!("Content-Length: {}\r\n", content_len))?;
        let connection = if self.keep_alive { "keep-alive" } else { "close" };
        self.append(format_args!("Connection: {}\r\n", connection))?;
        self.append(format_args!("\r\n"))
    }

    fn add_content(&mut self, body: &str) -> EtudeResult<()> {
        self.append(format_args!("{}", body))
    }

    /// Active scatter/gather segments, resolved to byte slices.
    pub(crate) fn segments(&self) -> ArrayVec<&[u8], 2> {
        let mut out = ArrayVec::new();
        for seg in &self.iov[..self.iov_count] {
            let base: &[u8] = match seg.region {
                Region::Header => &self.write_buf,
                Region::File => self.resource.as_ref().map_or(&[][..], Resource::bytes),
            };
            out.push(&base[seg.offset..seg.offset + seg.len]);
        }
        out
    }

    /// Account for `n` bytes accepted by the kernel and advance the segments.
    pub(crate) fn advance_written(&mut self, n: usize) {
        self.bytes_sent += n;
        self.bytes_pending -= n;

        let header_len = self.write_buf.len();
        if self.bytes_sent >= header_len {
            self.iov[0].len = 0;
            self.iov[0].offset = header_len;
            if self.iov_count == 2 {
                self.iov[1].offset = self.bytes_sent - header_len;
                self.iov[1].len = self.bytes_pending;
            }
        } else {
            self.iov[0].offset = self.bytes_sent;
            self.iov[0].len = header_len - self.bytes_sent;
        }
    }

    #[cfg(test)]
    pub(crate) fn ingest(&mut self, bytes: &[u8]) -> EtudeResult<()> {
        let start = self.cursor.fill();
        if bytes.len() > self.cursor.spare() {
            return Err(EtudeError::ReadBufferFull);
        }
        self.read_buf[start..start + bytes.len()].copy_from_slice(bytes);
        self.cursor.record_read(bytes.len())
    }
}

impl Default for Connection {
    fn default() -> Self {
        Self::empty()
    }
}
