//! reqwest-backed [`Fetcher`].

use std::time::Duration;

use reqwest::{Client, StatusCode, header};
use tracing::debug;

use super::{FetchFuture, Fetcher, parse_retry_after};
use crate::error::FetchError;

const USER_AGENT: &str = concat!("coingate/", env!("CARGO_PKG_VERSION"));

/// Issues upstream GETs with a shared connection pool.
///
/// Responses are requested gzip-compressed and decompressed transparently.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    /// Builds the client. `connect_timeout` bounds connection setup only; the
    /// gateway bounds each whole attempt separately.
    pub fn new(connect_timeout: Duration) -> Result<Self, reqwest::Error> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            header::HeaderValue::from_static("application/json"),
        );

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .gzip(true)
            .connect_timeout(connect_timeout)
            .build()?;

        Ok(Self { client })
    }

    async fn get(&self, url: &str) -> Result<bytes::Bytes, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;

        let status = response.status();
        debug!(url, status = status.as_u16(), "upstream responded");

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after);
            return Err(FetchError::RateLimited { retry_after });
        }

        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
            });
        }

        response
            .bytes()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))
    }
}

impl Fetcher for HttpFetcher {
    fn fetch<'a>(&'a self, url: &'a str) -> FetchFuture<'a> {
        Box::pin(self.get(url))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    // Serves a single canned HTTP response to the first connection.
    async fn one_shot_upstream(response: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let _ = stream.read(&mut buf).await;
            stream.write_all(response.as_bytes()).await.unwrap();
            let _ = stream.shutdown().await;
        });
        format!("http://{addr}/api/v3/global")
    }

    fn fetcher() -> HttpFetcher {
        HttpFetcher::new(Duration::from_secs(2)).unwrap()
    }

    #[tokio::test]
    async fn ok_body_is_returned_verbatim() {
        let url = one_shot_upstream(
            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: 11\r\nConnection: close\r\n\r\n{\"data\":{}}",
        )
        .await;
        let body = fetcher().fetch(&url).await.unwrap();
        assert_eq!(body.as_ref(), br#"{"data":{}}"#);
    }

    #[tokio::test]
    async fn too_many_requests_carries_retry_after() {
        let url = one_shot_upstream(
            "HTTP/1.1 429 Too Many Requests\r\nRetry-After: 2\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        )
        .await;
        assert_eq!(
            fetcher().fetch(&url).await,
            Err(FetchError::RateLimited {
                retry_after: Some(Duration::from_secs(2))
            })
        );
    }

    #[tokio::test]
    async fn other_status_is_reported() {
        let url = one_shot_upstream(
            "HTTP/1.1 503 Service Unavailable\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        )
        .await;
        assert_eq!(
            fetcher().fetch(&url).await,
            Err(FetchError::Status { status: 503 })
        );
    }

    #[tokio::test]
    async fn refused_connection_is_network_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let url = format!("http://{addr}/global");
        assert!(matches!(
            fetcher().fetch(&url).await,
            Err(FetchError::Network(_))
        ));
    }
}
