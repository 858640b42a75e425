//! Minimal HTTP/1.1 message types.
//!
//! Just enough of the protocol for the middleware pipeline to run: a parsed
//! [`Request`] head, a [`Response`] builder, a case-insensitive [`Headers`]
//! map, and the status codes the throttling layer produces.

use std::fmt;

pub mod headers;
pub mod request;
pub mod response;

pub use headers::Headers;
pub use request::{Request, RequestError};
pub use response::Response;

/// Response status codes used by this crate.
///
/// # Examples
///
/// ```
/// use hitgate::http::StatusCode;
///
/// assert_eq!(StatusCode::TooManyRequests.as_u16(), 429);
/// assert_eq!(StatusCode::TooManyRequests.to_string(), "429 Too Many Requests");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum StatusCode {
    /// 200: the request succeeded.
    Ok = 200,
    /// 204: the request succeeded and there is no body.
    NoContent = 204,
    /// 400: the request was malformed.
    BadRequest = 400,
    /// 404: nothing is served at the target.
    NotFound = 404,
    /// 429: the client used up its rate limit quota.
    TooManyRequests = 429,
    /// 500: the server failed to produce a response.
    InternalServerError = 500,
    /// 503: the server is temporarily unable to answer.
    ServiceUnavailable = 503,
}

impl StatusCode {
    /// Returns the numeric status code.
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    /// Returns the reason phrase registered for this code.
    pub fn canonical_reason(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::NoContent => "No Content",
            Self::BadRequest => "Bad Request",
            Self::NotFound => "Not Found",
            Self::TooManyRequests => "Too Many Requests",
            Self::InternalServerError => "Internal Server Error",
            Self::ServiceUnavailable => "Service Unavailable",
        }
    }

    /// Returns `true` for 2xx codes.
    pub fn is_success(self) -> bool {
        (200..300).contains(&self.as_u16())
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.as_u16(), self.canonical_reason())
    }
}

/// Request method.
///
/// Standard methods are unit variants. Extension methods are kept verbatim
/// in `Other`, and names are case-sensitive as on the wire.
///
/// # Examples
///
/// ```
/// use hitgate::http::Method;
///
/// assert_eq!(Method::from("GET"), Method::Get);
/// assert_eq!(Method::from("get").as_str(), "get");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    /// GET: retrieve the target resource.
    Get,
    /// HEAD: GET without a response body.
    Head,
    /// POST: process the request payload.
    Post,
    /// PUT: replace the target resource.
    Put,
    /// PATCH: apply a partial modification.
    Patch,
    /// DELETE: remove the target resource.
    Delete,
    /// OPTIONS: describe the communication options.
    Options,
    /// Any other method token.
    Other(String),
}

impl Method {
    /// Returns the method token as sent on the wire.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Get => "GET",
            Self::Head => "HEAD",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
            Self::Options => "OPTIONS",
            Self::Other(s) => s.as_str(),
        }
    }
}

impl From<&str> for Method {
    fn from(s: &str) -> Self {
        match s {
            "GET" => Self::Get,
            "HEAD" => Self::Head,
            "POST" => Self::Post,
            "PUT" => Self::Put,
            "PATCH" => Self::Patch,
            "DELETE" => Self::Delete,
            "OPTIONS" => Self::Options,
            other => Self::Other(other.to_owned()),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_render_reason() {
        assert_eq!(StatusCode::Ok.to_string(), "200 OK");
        assert!(StatusCode::NoContent.is_success());
        assert!(!StatusCode::TooManyRequests.is_success());
    }

    #[test]
    fn methods_round_trip_through_str() {
        assert_eq!(Method::from("GET"), Method::Get);
        assert_eq!(Method::from("PURGE"), Method::Other("PURGE".to_owned()));
        assert_eq!(Method::from("PURGE").as_str(), "PURGE");
    }
}
