// src/http.rs

pub const HTTP_VERSION: &str = "HTTP/1.1";

/// Inline body for a successful request on an empty file.
pub const EMPTY_DOCUMENT: &str = "<html><body></body></html>";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Method {
    #[default]
    Get,
    Post,
}

impl Method {
    pub fn from_bytes(b: &[u8]) -> Option<Self> {
        match b {
            b"GET" => Some(Method::Get),
            b"POST" => Some(Method::Post),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
        }
    }
}

/// Result of driving the parser over the bytes received so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Nothing resolvable yet; wait for the next readiness event.
    NeedMoreData,
    Malformed,
    ResourceReady,
    ResourceMissing,
    ResourceForbidden,
    InternalFault,
}

impl Outcome {
    /// Response template for a classified request. `None` while data is still needed.
    pub fn status(&self) -> Option<Status> {
        match self {
            Outcome::NeedMoreData => None,
            Outcome::Malformed => Some(Status::BadRequest),
            Outcome::ResourceReady => Some(Status::Ok),
            Outcome::ResourceMissing => Some(Status::NotFound),
            Outcome::ResourceForbidden => Some(Status::Forbidden),
            Outcome::InternalFault => Some(Status::InternalError),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    BadRequest,
    Forbidden,
    NotFound,
    InternalError,
}

impl Status {
    pub fn code(&self) -> u16 {
        match self {
            Status::Ok => 200,
            Status::BadRequest => 400,
            Status::Forbidden => 403,
            Status::NotFound => 404,
            Status::InternalError => 500,
        }
    }

    pub fn reason(&self) -> &'static str {
        match self {
            Status::Ok => "OK",
            Status::BadRequest => "Bad Request",
            Status::Forbidden => "Forbidden",
            Status::NotFound => "Not Found",
            Status::InternalError => "Internal Error",
        }
    }

    /// Fixed explanatory body sent with error responses.
    pub fn error_body(&self) -> Option<&'static str> {
        match self {
            Status::Ok => None,
            Status::BadRequest => {
                Some("Your request has bad syntax or is inherently impossible to satisfy.\n")
            }
            Status::Forbidden => Some("You do not have permission to get file from this server.\n"),
            Status::NotFound => Some("The requested file was not found on this server.\n"),
            Status::InternalError => {
                Some("There was an unusual problem serving the requested file.\n")
            }
        }
    }
}
