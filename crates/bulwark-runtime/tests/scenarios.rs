//! End-to-end behaviour of `HttpClient` against scripted transports.
//!
//! All tests run on paused tokio time, so breaker timeouts, attempt
//! deadlines and backoff sleeps advance deterministically.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bulwark_core::{
    CallDescriptor, CircuitBreakerConfig, CircuitState, ErrorKind, Method, OperationCategory,
    TransportError,
};
use bulwark_runtime::{HttpClient, Transport, TransportRequest, TransportResponse};

#[derive(Clone, Copy)]
enum Reply {
    Status(u16),
    Hang,
}

/// Replies from a queue, then 200 forever.
struct Scripted {
    replies: Mutex<VecDeque<Reply>>,
    calls: AtomicUsize,
}

impl Scripted {
    fn new(replies: &[Reply]) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.iter().copied().collect()),
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for Scripted {
    async fn send(&self, _request: TransportRequest) -> Result<TransportResponse, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let reply = self.replies.lock().pop_front().unwrap_or(Reply::Status(200));
        match reply {
            Reply::Status(status) => Ok(TransportResponse::new(status, "")),
            Reply::Hang => std::future::pending().await,
        }
    }
}

/// Holds every request for a fixed time and records the peak overlap.
struct Slow {
    hold: Duration,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

#[async_trait]
impl Transport for Slow {
    async fn send(&self, _request: TransportRequest) -> Result<TransportResponse, TransportError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.hold).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(TransportResponse::new(200, "ok"))
    }
}

fn breaker_client(transport: Arc<dyn Transport>) -> HttpClient {
    HttpClient::builder("inventory")
        .transport(transport)
        .base_url("http://inventory.test")
        .circuit_breaker(CircuitBreakerConfig {
            failure_threshold: 3,
            reset_timeout: Duration::from_secs(30),
            monitoring_period: Duration::from_secs(10),
        })
        .build()
        .unwrap()
}

async fn open_breaker(client: &HttpClient) {
    // 404 is not retried, so each call is exactly one breaker failure
    for _ in 0..3 {
        let err = client.get("/items").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        tokio::time::advance(Duration::from_secs(2)).await;
    }
}

#[tokio::test(start_paused = true)]
async fn three_failures_inside_window_open_the_circuit() {
    let transport = Scripted::new(&[Reply::Status(404); 3]);
    let client = breaker_client(transport.clone());

    open_breaker(&client).await;

    assert_eq!(client.breaker().state(), CircuitState::Open);
    assert!(!client.breaker().can_request());

    let err = client.get("/items").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CircuitOpen);
    assert_eq!(transport.calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn failures_spread_beyond_window_keep_circuit_closed() {
    let transport = Scripted::new(&[Reply::Status(404); 3]);
    let client = breaker_client(transport);

    for _ in 0..3 {
        let _ = client.get("/items").await;
        tokio::time::advance(Duration::from_secs(6)).await;
    }

    assert_eq!(client.breaker().state(), CircuitState::Closed);
    assert!(client.breaker().failure_count() < 3);
}

#[tokio::test(start_paused = true)]
async fn open_circuit_half_opens_after_reset_timeout() {
    let transport = Scripted::new(&[Reply::Status(404); 3]);
    let client = breaker_client(transport);

    open_breaker(&client).await;
    // the last failure was recorded 2s ago
    tokio::time::advance(Duration::from_millis(28_001)).await;

    assert!(client.breaker().can_request());
    assert_eq!(client.breaker().state(), CircuitState::HalfOpen);
}

#[tokio::test(start_paused = true)]
async fn successful_probe_closes_circuit() {
    let transport = Scripted::new(&[Reply::Status(404); 3]);
    let client = breaker_client(transport.clone());

    open_breaker(&client).await;
    tokio::time::advance(Duration::from_secs(30)).await;

    let response = client.get("/items").await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(client.breaker().state(), CircuitState::Closed);
    assert_eq!(client.breaker().failure_count(), 0);
    assert_eq!(transport.calls(), 4);
}

#[tokio::test(start_paused = true)]
async fn failed_probe_reopens_circuit() {
    let transport = Scripted::new(&[Reply::Status(404); 4]);
    let client = breaker_client(transport.clone());

    open_breaker(&client).await;
    tokio::time::advance(Duration::from_secs(30)).await;

    let err = client.get("/items").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(client.breaker().state(), CircuitState::Open);
    assert_eq!(client.breaker().times_opened(), 2);

    let err = client.get("/items").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CircuitOpen);
    assert_eq!(transport.calls(), 4);
}

#[tokio::test(start_paused = true)]
async fn concurrency_is_bounded_by_gate() {
    let transport = Arc::new(Slow {
        hold: Duration::from_millis(100),
        in_flight: AtomicUsize::new(0),
        peak: AtomicUsize::new(0),
    });
    let client = HttpClient::builder("inventory")
        .transport(transport.clone())
        .base_url("http://inventory.test")
        .max_concurrent(2)
        .build()
        .unwrap();

    let started = tokio::time::Instant::now();
    let calls = (0..5).map(|i| {
        let client = &client;
        async move { client.get(&format!("/items/{}", i)).await }
    });
    let results = futures::future::join_all(calls).await;

    assert!(results.iter().all(|r| r.is_ok()));
    assert_eq!(transport.peak.load(Ordering::SeqCst), 2);
    // five calls through two slots take three rounds
    assert!(started.elapsed() >= Duration::from_millis(300));
    assert_eq!(client.gate().in_flight(), 0);
    assert_eq!(client.stats().successes(), 5);
}

#[tokio::test(start_paused = true)]
async fn health_check_survives_two_timeouts() {
    let transport = Scripted::new(&[Reply::Hang, Reply::Hang]);
    let client = breaker_client(transport.clone());

    let started = tokio::time::Instant::now();
    assert!(client.health().await);

    assert_eq!(transport.calls(), 3);
    assert_eq!(client.stats().retries(), 2);
    assert_eq!(client.stats().successes(), 1);
    assert_eq!(client.breaker().failure_count(), 0);

    // two 5s attempt timeouts plus backoff of ~100ms and ~200ms
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(10_300), "{:?}", elapsed);
    assert!(elapsed <= Duration::from_millis(10_340), "{:?}", elapsed);
}

#[tokio::test(start_paused = true)]
async fn rate_limit_honours_retry_after() {
    struct RateLimited {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Transport for RateLimited {
        async fn send(
            &self,
            _request: TransportRequest,
        ) -> Result<TransportResponse, TransportError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                let mut response = TransportResponse::new(429, "slow down");
                response.headers.insert("Retry-After", "2");
                Ok(response)
            } else {
                Ok(TransportResponse::new(200, "ok"))
            }
        }
    }

    let client = breaker_client(Arc::new(RateLimited {
        calls: AtomicUsize::new(0),
    }));

    let started = tokio::time::Instant::now();
    client.get("/items").await.unwrap();
    assert!(started.elapsed() >= Duration::from_secs(2));
    assert_eq!(client.stats().retries(), 1);
}

#[tokio::test(start_paused = true)]
async fn bulk_transfer_is_not_retried_past_budget() {
    let transport = Scripted::new(&[Reply::Status(503), Reply::Status(503), Reply::Status(503)]);
    let client = breaker_client(transport.clone());

    let call = CallDescriptor::builder(Method::Put, "/archive")
        .category(OperationCategory::BulkTransfer)
        .body(vec![0u8; 16])
        .build();
    let err = client.request(call).await.unwrap_err();

    // BulkTransfer allows one retry
    assert_eq!(err.kind(), ErrorKind::ServerError);
    assert!(err.is_retryable());
    assert_eq!(transport.calls(), 2);
    assert_eq!(client.breaker().failure_count(), 1);
    assert_eq!(client.gate().in_flight(), 0);
}
