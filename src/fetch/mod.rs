//! Upstream retrieval of static archives and realtime protobuf payloads.
//!
//! Fetching never retries; a failed cycle waits for the scheduler's next tick.

mod archive;
mod basic;
mod client;

pub use archive::{ScratchDir, extract_archive};
pub use basic::BasicClient;
pub use client::HttpClient;

use bytes::Bytes;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue};
use tracing::debug;

use crate::error::{IngestError, Result};

/// Headers sent with the static feed request.
pub fn static_feed_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("application/octet-stream"));
    headers
}

/// GETs `url` with the given extra headers and returns the raw body.
///
/// # Errors
///
/// [`IngestError::Network`] on an invalid URL, a transport failure, a
/// non-success status, or an interrupted body.
pub async fn fetch_bytes<C: HttpClient + ?Sized>(
    client: &C,
    url: &str,
    headers: &HeaderMap,
) -> Result<Bytes> {
    let parsed = url.parse().map_err(|e| IngestError::network(url, e))?;
    let mut req = reqwest::Request::new(reqwest::Method::GET, parsed);
    req.headers_mut().extend(headers.clone());

    let resp = client
        .execute(req)
        .await
        .map_err(|e| IngestError::network(url, e))?;

    let status = resp.status();
    if !status.is_success() {
        return Err(IngestError::network(url, format!("HTTP {status}")));
    }

    let body = resp.bytes().await.map_err(|e| IngestError::network(url, e))?;
    debug!(url, bytes = body.len(), "Fetched upstream resource");
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct Canned {
        status: u16,
        body: &'static [u8],
        seen_accept: Mutex<Option<String>>,
    }

    #[async_trait]
    impl HttpClient for Canned {
        async fn execute(&self, req: reqwest::Request) -> reqwest::Result<reqwest::Response> {
            *self.seen_accept.lock().unwrap() = req
                .headers()
                .get(ACCEPT)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let resp = http::Response::builder()
                .status(self.status)
                .body(self.body)
                .unwrap();
            Ok(reqwest::Response::from(resp))
        }
    }

    fn canned(status: u16, body: &'static [u8]) -> Canned {
        Canned {
            status,
            body,
            seen_accept: Mutex::new(None),
        }
    }

    #[tokio::test]
    async fn test_fetch_returns_body_and_sends_headers() {
        let client = canned(200, b"payload");
        let bytes = fetch_bytes(&client, "http://feeds.test/gtfs.zip", &static_feed_headers())
            .await
            .unwrap();
        assert_eq!(&bytes[..], b"payload");
        assert_eq!(
            client.seen_accept.lock().unwrap().as_deref(),
            Some("application/octet-stream")
        );
    }

    #[tokio::test]
    async fn test_non_success_status_is_network_error() {
        let client = canned(503, b"");
        let err = fetch_bytes(&client, "http://feeds.test/tu.pb", &HeaderMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::Network { .. }));
        assert!(err.to_string().contains("503"));
    }

    #[tokio::test]
    async fn test_invalid_url_is_network_error() {
        let client = canned(200, b"");
        let err = fetch_bytes(&client, "not a url", &HeaderMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::Network { .. }));
    }
}
