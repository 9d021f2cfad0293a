//! Websocket endpoint resolution.
//!
//! Sessions never read ambient page or process state to find their server.
//! The caller injects an [`Origin`] and the session derives the socket URL
//! from it and the configured path.

use tokio_tungstenite::tungstenite::http::Uri;

use crate::stream::StreamError;

/// Route served by the adaptation service.
pub const DEFAULT_ENDPOINT_PATH: &str = "/ws/adapt";

/// Transport security and authority of the page hosting the session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Origin {
    secure: bool,
    host: String,
}

impl Origin {
    /// Creates an origin from an explicit security flag and `host[:port]`.
    pub fn new(secure: bool, host: impl Into<String>) -> Self {
        Self {
            secure,
            host: host.into().trim().trim_end_matches('/').to_string(),
        }
    }

    /// Derives an origin from the URL of the page that opens the session.
    ///
    /// `https` pages map to secure sockets, `http` pages to plain ones.
    pub fn from_page_url(page_url: &str) -> Result<Self, StreamError> {
        let uri: Uri = page_url
            .trim()
            .parse()
            .map_err(|_| StreamError::InvalidEndpoint(format!("unparseable page url: {page_url}")))?;

        let secure = match uri.scheme_str() {
            Some("https") => true,
            Some("http") => false,
            Some(other) => {
                return Err(StreamError::InvalidEndpoint(format!(
                    "unsupported page scheme: {other}"
                )))
            }
            None => {
                return Err(StreamError::InvalidEndpoint(format!(
                    "page url has no scheme: {page_url}"
                )))
            }
        };
        let host = uri
            .authority()
            .map(|authority| authority.as_str().to_string())
            .ok_or_else(|| StreamError::InvalidEndpoint(format!("page url has no host: {page_url}")))?;

        Ok(Self::new(secure, host))
    }

    pub fn is_secure(&self) -> bool {
        self.secure
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Builds the socket URL for `path` on this origin.
    pub fn resolve(&self, path: &str) -> Result<String, StreamError> {
        if self.host.is_empty() {
            return Err(StreamError::InvalidEndpoint("origin host is empty".to_string()));
        }
        let scheme = if self.secure { "wss" } else { "ws" };
        let path = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{path}")
        };
        Ok(format!("{scheme}://{}{path}", self.host))
    }
}

#[cfg(test)]
mod tests {
    use super::{Origin, DEFAULT_ENDPOINT_PATH};

    #[test]
    fn secure_page_resolves_to_secure_socket() {
        let origin = Origin::from_page_url("https://adapt.example.org/webapp/").expect("origin");
        assert!(origin.is_secure());
        assert_eq!(
            origin.resolve(DEFAULT_ENDPOINT_PATH).expect("url"),
            "wss://adapt.example.org/ws/adapt"
        );
    }

    #[test]
    fn plain_page_keeps_port_and_uses_plain_socket() {
        let origin = Origin::from_page_url("http://localhost:8000/webapp").expect("origin");
        assert!(!origin.is_secure());
        assert_eq!(origin.host(), "localhost:8000");
        assert_eq!(origin.resolve("ws/adapt").expect("url"), "ws://localhost:8000/ws/adapt");
    }

    #[test]
    fn non_http_page_scheme_is_rejected() {
        assert!(Origin::from_page_url("file:///tmp/index.html").is_err());
        assert!(Origin::from_page_url("localhost:8000").is_err());
    }

    #[test]
    fn empty_host_is_rejected() {
        assert!(Origin::new(false, "  ").resolve("/ws/adapt").is_err());
    }
}
