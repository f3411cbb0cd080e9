use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::oneshot;

use coingate::api::{self, CoinApi, Freshness};
use coingate::upstream::{Endpoints, FetchFuture, Fetcher};
use coingate::{FetchError, Gateway, Request, RetryPolicy, Server};

const BASE: &str = "http://upstream.test/api/v3";
const GLOBAL: &str = r#"{"data":{"active_cryptocurrencies":13000,"market_cap_percentage":{"btc":52.1}}}"#;

/// Fake upstream keyed by URL path suffix. Unknown paths answer 404.
struct FakeUpstream {
    routes: HashMap<&'static str, &'static str>,
    delay: Duration,
    calls: AtomicUsize,
}

impl FakeUpstream {
    fn new(routes: &[(&'static str, &'static str)], delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            routes: routes.iter().copied().collect(),
            delay,
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Fetcher for FakeUpstream {
    fn fetch<'a>(&'a self, url: &'a str) -> FetchFuture<'a> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let path = url.strip_prefix(BASE).unwrap_or(url);
        let path = path.split('?').next().unwrap_or(path);
        let body = self.routes.get(path).copied();
        Box::pin(async move {
            tokio::time::sleep(self.delay).await;
            body.map(|b| Bytes::from_static(b.as_bytes()))
                .ok_or(FetchError::Status { status: 404 })
        })
    }
}

async fn start(upstream: Arc<FakeUpstream>) -> (SocketAddr, Arc<CoinApi>, oneshot::Sender<()>) {
    let gateway = Gateway::new(
        RetryPolicy::default().with_max_attempts(1),
        Duration::from_secs(2),
    );
    let api = Arc::new(CoinApi::new(
        gateway,
        Endpoints::new(BASE).unwrap(),
        upstream,
        Freshness::default(),
    ));
    let pipeline = Arc::new(api::pipeline(&api));

    let server = Server::bind("127.0.0.1:0").await.unwrap();
    let addr = server.local_addr();
    let (tx, rx) = oneshot::channel::<()>();
    tokio::spawn(server.run_until(
        move |req: Request| {
            let pipeline = Arc::clone(&pipeline);
            async move { pipeline.handle(req).await }
        },
        async move {
            let _ = rx.await;
        },
    ));
    (addr, api, tx)
}

async fn send(addr: SocketAddr, method: &str, path: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!("{method} {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut out = Vec::new();
    stream.read_to_end(&mut out).await.unwrap();
    String::from_utf8(out).unwrap()
}

fn body(response: &str) -> &str {
    response.split_once("\r\n\r\n").map(|(_, b)| b).unwrap_or("")
}

#[tokio::test]
async fn global_is_served_verbatim_and_cached() {
    let upstream = FakeUpstream::new(&[("/global", GLOBAL)], Duration::ZERO);
    let (addr, api, _shutdown) = start(Arc::clone(&upstream)).await;

    let first = send(addr, "GET", "/global").await;
    let second = send(addr, "GET", "/global").await;

    assert!(first.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(first.contains("Content-Type: application/json\r\n"));
    assert_eq!(body(&first), GLOBAL);
    assert_eq!(body(&second), GLOBAL);
    assert_eq!(upstream.calls(), 1);
    assert!(api.gateway().entry(&format!("{BASE}/global")).is_some());
}

#[tokio::test]
async fn concurrent_clients_share_one_upstream_fetch() {
    let upstream = FakeUpstream::new(
        &[("/coins/markets", r#"[{"id":"bitcoin"}]"#)],
        Duration::from_millis(150),
    );
    let (addr, api, _shutdown) = start(Arc::clone(&upstream)).await;

    let responses = futures::future::join_all(
        (0..5).map(|_| send(addr, "GET", "/coins?ids=bitcoin")),
    )
    .await;

    assert_eq!(upstream.calls(), 1);
    for response in &responses {
        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
        assert_eq!(body(response), r#"[{"id":"bitcoin"}]"#);
    }
    assert_eq!(api.gateway().in_flight(), 0);
    assert_eq!(api.gateway().stats().misses, 1);
}

#[tokio::test]
async fn upstream_failure_is_a_json_500() {
    let upstream = FakeUpstream::new(&[], Duration::ZERO);
    let (addr, _api, _shutdown) = start(upstream).await;

    let response = send(addr, "GET", "/coin/not-a-coin").await;

    assert!(response.starts_with("HTTP/1.1 500 Internal Server Error\r\n"));
    let json: serde_json::Value = serde_json::from_str(body(&response)).unwrap();
    assert_eq!(json["error"], "Failed to fetch coin details");
    assert_eq!(json["details"], "upstream returned HTTP 404 after 1 attempt(s)");
}

#[tokio::test]
async fn head_omits_body() {
    let upstream = FakeUpstream::new(&[("/global", GLOBAL)], Duration::ZERO);
    let (addr, _api, _shutdown) = start(upstream).await;

    let response = send(addr, "HEAD", "/global").await;

    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(response.contains(&format!("Content-Length: {}\r\n", GLOBAL.len())));
    assert_eq!(body(&response), "");
}

#[tokio::test]
async fn unknown_route_and_method() {
    let upstream = FakeUpstream::new(&[], Duration::ZERO);
    let (addr, _api, _shutdown) = start(Arc::clone(&upstream)).await;

    let missing = send(addr, "GET", "/portfolio").await;
    assert!(missing.starts_with("HTTP/1.1 404 Not Found\r\n"));

    let post = send(addr, "POST", "/global").await;
    assert!(post.starts_with("HTTP/1.1 405 Method Not Allowed\r\n"));
    assert!(post.contains("Allow: GET, HEAD\r\n"));

    assert_eq!(upstream.calls(), 0);
}
