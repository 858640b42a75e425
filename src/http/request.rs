//! Request head parsing with [`httparse`].

use thiserror::Error;

use super::{Headers, Method};

const MAX_HEADERS: usize = 64;

/// Errors raised while parsing a request.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("request head is incomplete")]
    Incomplete,

    #[error("malformed request: {0}")]
    Parse(#[from] httparse::Error),

    #[error("request is missing its {0}")]
    Missing(&'static str),
}

/// A parsed HTTP/1.x request head.
///
/// Only the parts the pipeline routes and throttles on are kept: method,
/// path and headers. The query string is split off the path and dropped.
///
/// # Examples
///
/// ```
/// use hitgate::http::Request;
///
/// let raw = b"GET /orders?page=2 HTTP/1.1\r\nHost: api.example.com\r\n\r\n";
/// let (request, _) = Request::parse(raw).unwrap();
///
/// assert_eq!(request.path(), "/orders");
/// assert_eq!(request.host(), Some("api.example.com"));
/// ```
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    path: String,
    headers: Headers,
}

impl Request {
    /// Parses the request head in `buf` and returns it with the offset
    /// where the body starts.
    ///
    /// # Errors
    ///
    /// - [`RequestError::Incomplete`] when the head is not fully buffered.
    /// - [`RequestError::Parse`] for malformed input.
    pub fn parse(buf: &[u8]) -> Result<(Self, usize), RequestError> {
        let mut slots = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut raw = httparse::Request::new(&mut slots);

        let offset = match raw.parse(buf)? {
            httparse::Status::Complete(offset) => offset,
            httparse::Status::Partial => return Err(RequestError::Incomplete),
        };

        let method = Method::from(raw.method.ok_or(RequestError::Missing("method"))?);
        let target = raw.path.ok_or(RequestError::Missing("path"))?;
        raw.version.ok_or(RequestError::Missing("version"))?;
        let path = target.split_once('?').map_or(target, |(path, _)| path).to_owned();

        let mut headers = Headers::with_capacity(raw.headers.len());
        for field in raw.headers.iter() {
            if let Ok(value) = std::str::from_utf8(field.value) {
                headers.insert(field.name, value.trim());
            }
        }

        Ok((
            Self {
                method,
                path,
                headers,
            },
            offset,
        ))
    }

    /// Request method as sent by the client.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Path without the query string.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Header fields in arrival order.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Value of the `Host` header.
    pub fn host(&self) -> Option<&str> {
        self.headers.get("host")
    }
}
