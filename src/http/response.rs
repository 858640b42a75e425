//! Response builder.

use bytes::Bytes;

use super::{Headers, StatusCode};

/// An outgoing response.
///
/// Built with chained calls by the handler that answers the request, then
/// decorated on the way back out by the middleware that wrapped it.
///
/// # Examples
///
/// ```
/// use hitgate::http::{Response, StatusCode};
///
/// let response = Response::new(StatusCode::TooManyRequests)
///     .header("X-RateLimit-Limit", "60")
///     .body("Too many requests.");
///
/// assert_eq!(response.status().as_u16(), 429);
/// assert_eq!(response.headers().get("x-ratelimit-limit"), Some("60"));
/// assert_eq!(response.body_bytes(), b"Too many requests.");
/// ```
#[derive(Debug, Clone)]
pub struct Response {
    status: StatusCode,
    headers: Headers,
    body: Bytes,
}

impl Response {
    /// Creates a response with no headers and an empty body.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }

    /// Appends a header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Sets `name` on a response produced further down the pipeline,
    /// replacing any value it already carried.
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.set(name, value);
    }

    /// Replaces the body. Static strings and byte slices are not copied.
    #[must_use]
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// The body as raw bytes.
    pub fn body_bytes(&self) -> &[u8] {
        &self.body
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::new(StatusCode::Ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_sets_status_headers_and_body() {
        let response = Response::new(StatusCode::Ok)
            .header("X-Id", "7")
            .body(String::from("hi"));
        assert_eq!(response.status(), StatusCode::Ok);
        assert_eq!(response.headers().get("x-id"), Some("7"));
        assert_eq!(response.body_bytes(), b"hi");
    }

    #[test]
    fn new_response_is_empty() {
        let response = Response::new(StatusCode::NoContent);
        assert!(response.headers().is_empty());
        assert!(response.body_bytes().is_empty());
    }

    #[test]
    fn set_header_overrides_downstream_value() {
        let mut response = Response::new(StatusCode::Ok).header("X-RateLimit-Limit", "1");
        response.set_header("x-ratelimit-limit", "10");
        assert_eq!(response.headers().get("X-RateLimit-Limit"), Some("10"));
        assert_eq!(response.headers().len(), 1);
    }
}
