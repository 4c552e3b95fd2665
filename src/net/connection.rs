//! Per-connection serving, timeout policy and lifecycle tracking.
//!
//! # Responsibilities
//! - Generate unique connection IDs for tracing
//! - Track open connections for drain reporting
//! - Enforce the idle, read and write timeouts of a single connection
//! - Finish the in-flight request and close when shutdown is signalled
//!
//! # Connection Phases
//! ```text
//! accepted ──▶ reading request ──▶ in flight ──▶ idle ──▶ reading request ...
//!               (read deadline)    (handler,     (idle
//!                                  write limit)  deadline)
//! ```

use std::convert::Infallible;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{header, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use hyper::body::Incoming;
use hyper_util::rt::{TokioIo, TokioTimer};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio::sync::Notify;
use tokio::time::Sleep;
use tower::ServiceExt;

use crate::lifecycle::shutdown::ShutdownSignal;

/// Global atomic counter for connection IDs.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Counts open connections.
#[derive(Debug, Clone, Default)]
pub struct ConnectionTracker {
    active_count: Arc<AtomicU64>,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new open connection. Returns a guard that decrements on drop.
    pub fn track(&self) -> ConnectionGuard {
        self.active_count.fetch_add(1, Ordering::SeqCst);
        ConnectionGuard {
            active_count: Arc::clone(&self.active_count),
            id: ConnectionId::new(),
        }
    }

    /// Get current open connection count.
    pub fn active_count(&self) -> u64 {
        self.active_count.load(Ordering::SeqCst)
    }
}

/// Guard that tracks a connection's lifetime.
#[derive(Debug)]
pub struct ConnectionGuard {
    active_count: Arc<AtomicU64>,
    id: ConnectionId,
}

impl ConnectionGuard {
    /// Get this connection's ID.
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.active_count.fetch_sub(1, Ordering::SeqCst);
        tracing::trace!(connection_id = %self.id, "Connection closed");
    }
}

/// Transport-level limits applied to every connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionPolicy {
    /// Close a connection with no request in flight after this long.
    pub idle: Duration,
    /// Headers and body of a request must arrive within this long.
    pub read: Duration,
    /// A stalled socket write fails after this long.
    pub write: Duration,
    /// Largest request body accepted, in bytes.
    pub max_body_bytes: usize,
}

impl ConnectionPolicy {
    pub fn new(idle: Duration, read: Duration, write: Duration, max_body_bytes: usize) -> Self {
        Self {
            idle,
            read,
            write,
            max_body_bytes,
        }
    }
}

/// Why a connection was closed by its own watchdog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Expiry {
    Idle,
    Read,
}

const NO_REQUEST: u64 = u64::MAX;

/// I/O and request bookkeeping shared by a connection's stream, its request
/// handler and its watchdog. Times are milliseconds since accept. Every phase
/// change wakes the watchdog so it recomputes its deadline.
#[derive(Debug, Clone)]
struct Activity {
    inner: Arc<ActivityInner>,
}

#[derive(Debug)]
struct ActivityInner {
    epoch: Instant,
    last_io: AtomicU64,
    request_started: AtomicU64,
    in_flight: AtomicUsize,
    changed: Notify,
}

impl Activity {
    /// A fresh connection is already reading its first request.
    fn new() -> Self {
        Self {
            inner: Arc::new(ActivityInner {
                epoch: Instant::now(),
                last_io: AtomicU64::new(0),
                request_started: AtomicU64::new(0),
                in_flight: AtomicUsize::new(0),
                changed: Notify::new(),
            }),
        }
    }

    fn now_ms(&self) -> u64 {
        self.inner.epoch.elapsed().as_millis() as u64
    }

    fn record_read(&self) {
        let now = self.now_ms();
        self.inner.last_io.store(now, Ordering::Release);
        if self.inner.in_flight.load(Ordering::Acquire) == 0
            && self
                .inner
                .request_started
                .compare_exchange(NO_REQUEST, now, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            self.inner.changed.notify_one();
        }
    }

    fn record_write(&self) {
        self.inner.last_io.store(self.now_ms(), Ordering::Release);
    }

    /// Mark a request as handed to the application.
    fn begin(&self) -> InFlight {
        self.inner.in_flight.fetch_add(1, Ordering::AcqRel);
        let now = self.now_ms();
        let started = match self.inner.request_started.swap(NO_REQUEST, Ordering::AcqRel) {
            NO_REQUEST => now,
            started => started,
        };
        self.inner.changed.notify_one();
        InFlight {
            activity: self.clone(),
            started,
        }
    }

    /// Resolve when the connection has been idle or reading for too long.
    async fn expired(&self, idle: Duration, read: Duration) -> Expiry {
        let idle_ms = idle.as_millis() as u64;
        let read_ms = read.as_millis() as u64;

        loop {
            let now = self.now_ms();
            let deadline = if self.inner.in_flight.load(Ordering::Acquire) > 0 {
                None
            } else {
                let idle_at = self.inner.last_io.load(Ordering::Acquire).saturating_add(idle_ms);
                match self.inner.request_started.load(Ordering::Acquire) {
                    NO_REQUEST => Some((idle_at, Expiry::Idle)),
                    started => {
                        let read_at = started.saturating_add(read_ms);
                        if read_at <= idle_at {
                            Some((read_at, Expiry::Read))
                        } else {
                            Some((idle_at, Expiry::Idle))
                        }
                    }
                }
            };

            match deadline {
                Some((at, reason)) if now >= at => return reason,
                Some((at, _)) => {
                    let wait = Duration::from_millis(at - now);
                    tokio::select! {
                        _ = tokio::time::sleep(wait) => {}
                        _ = self.inner.changed.notified() => {}
                    }
                }
                // In flight: the handler and the read budget own the clock.
                None => self.inner.changed.notified().await,
            }
        }
    }
}

/// A request currently owned by the application.
#[derive(Debug)]
struct InFlight {
    activity: Activity,
    started: u64,
}

impl InFlight {
    /// Time left for reading the rest of this request.
    fn read_budget(&self, read: Duration) -> Duration {
        let elapsed = self.activity.now_ms().saturating_sub(self.started);
        read.saturating_sub(Duration::from_millis(elapsed))
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        let inner = &self.activity.inner;
        inner.last_io.store(self.activity.now_ms(), Ordering::Release);
        inner.in_flight.fetch_sub(1, Ordering::AcqRel);
        inner.changed.notify_one();
    }
}

/// Stream wrapper recording activity and failing writes stalled past the
/// write timeout.
#[derive(Debug)]
pub struct TimedStream<S> {
    inner: S,
    write_timeout: Duration,
    write_deadline: Option<Pin<Box<Sleep>>>,
    activity: Activity,
}

impl<S> TimedStream<S> {
    fn new(inner: S, write_timeout: Duration, activity: Activity) -> Self {
        Self {
            inner,
            write_timeout,
            write_deadline: None,
            activity,
        }
    }

    fn poll_write_deadline<T>(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<T>> {
        let timeout = self.write_timeout;
        let deadline = self
            .write_deadline
            .get_or_insert_with(|| Box::pin(tokio::time::sleep(timeout)));
        match deadline.as_mut().poll(cx) {
            Poll::Ready(()) => {
                self.write_deadline = None;
                Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "response write timed out",
                )))
            }
            Poll::Pending => Poll::Pending,
        }
    }

    fn finish_write<T>(&mut self, result: io::Result<T>, wrote: bool) -> Poll<io::Result<T>> {
        self.write_deadline = None;
        if wrote {
            self.activity.record_write();
        }
        Poll::Ready(result)
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for TimedStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        let poll = Pin::new(&mut this.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = &poll {
            if buf.filled().len() > before {
                this.activity.record_read();
            }
        }
        poll
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for TimedStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        match Pin::new(&mut this.inner).poll_write(cx, buf) {
            Poll::Ready(result) => {
                let wrote = matches!(result, Ok(n) if n > 0);
                this.finish_write(result, wrote)
            }
            Poll::Pending => this.poll_write_deadline(cx),
        }
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        match Pin::new(&mut this.inner).poll_write_vectored(cx, bufs) {
            Poll::Ready(result) => {
                let wrote = matches!(result, Ok(n) if n > 0);
                this.finish_write(result, wrote)
            }
            Poll::Pending => this.poll_write_deadline(cx),
        }
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        match Pin::new(&mut this.inner).poll_flush(cx) {
            Poll::Ready(result) => this.finish_write(result, false),
            Poll::Pending => this.poll_write_deadline(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

/// Serve one accepted connection until it closes, times out, or finishes its
/// in-flight request after shutdown.
pub(crate) async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    app: axum::Router,
    policy: ConnectionPolicy,
    guard: ConnectionGuard,
    mut shutdown: ShutdownSignal,
) {
    let connection_id = guard.id();
    let activity = Activity::new();
    let io = TokioIo::new(TimedStream::new(stream, policy.write, activity.clone()));

    let service = {
        let activity = activity.clone();
        let policy = policy.clone();
        hyper::service::service_fn(move |request: Request<Incoming>| {
            let in_flight = activity.begin();
            let app = app.clone();
            let policy = policy.clone();
            async move {
                let response = handle_request(request, peer, app, &policy, &in_flight).await;
                drop(in_flight);
                Ok::<_, Infallible>(response)
            }
        })
    };

    let conn = hyper::server::conn::http1::Builder::new()
        .timer(TokioTimer::new())
        .keep_alive(true)
        .serve_connection(io, service);
    tokio::pin!(conn);

    let mut draining = false;
    loop {
        tokio::select! {
            result = conn.as_mut() => {
                if let Err(e) = result {
                    tracing::debug!(connection_id = %connection_id, error = %e, "Connection error");
                }
                break;
            }
            _ = shutdown.recv(), if !draining => {
                draining = true;
                tracing::trace!(connection_id = %connection_id, "Graceful close requested");
                conn.as_mut().graceful_shutdown();
            }
            expiry = activity.expired(policy.idle, policy.read) => {
                tracing::debug!(
                    connection_id = %connection_id,
                    reason = ?expiry,
                    "Connection timed out"
                );
                break;
            }
        }
    }

    drop(guard);
}

/// Buffer the request body within the remaining read budget, then hand the
/// request to the application.
async fn handle_request(
    request: Request<Incoming>,
    peer: SocketAddr,
    app: axum::Router,
    policy: &ConnectionPolicy,
    in_flight: &InFlight,
) -> Response {
    let (parts, body) = request.into_parts();

    let declared = parts
        .headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    if declared.is_some_and(|len| len > policy.max_body_bytes as u64) {
        return closing(StatusCode::PAYLOAD_TOO_LARGE);
    }

    let budget = in_flight.read_budget(policy.read);
    let bytes = match tokio::time::timeout(
        budget,
        axum::body::to_bytes(Body::new(body), policy.max_body_bytes),
    )
    .await
    {
        Ok(Ok(bytes)) => bytes,
        Ok(Err(e)) => {
            tracing::debug!(peer_addr = %peer, error = %e, "Rejected request body");
            return closing(StatusCode::BAD_REQUEST);
        }
        Err(_) => {
            tracing::debug!(peer_addr = %peer, budget = ?budget, "Request read timed out");
            return closing(StatusCode::REQUEST_TIMEOUT);
        }
    };

    let mut request = Request::from_parts(parts, Body::from(bytes));
    request.extensions_mut().insert(ConnectInfo(peer));

    match app.oneshot(request).await {
        Ok(response) => response,
        Err(never) => match never {},
    }
}

fn closing(status: StatusCode) -> Response {
    (status, [(header::CONNECTION, "close")]).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[test]
    fn connection_id_unique() {
        let id1 = ConnectionId::new();
        let id2 = ConnectionId::new();
        assert_ne!(id1, id2);
        assert!(id1.to_string().starts_with("conn-"));
    }

    #[test]
    fn connection_tracker_counts() {
        let tracker = ConnectionTracker::new();
        assert_eq!(tracker.active_count(), 0);

        let guard1 = tracker.track();
        assert_eq!(tracker.active_count(), 1);

        let guard2 = tracker.track();
        assert_eq!(tracker.active_count(), 2);

        drop(guard1);
        assert_eq!(tracker.active_count(), 1);

        drop(guard2);
        assert_eq!(tracker.active_count(), 0);
    }

    #[tokio::test]
    async fn fresh_connection_expires_on_read_deadline() {
        let activity = Activity::new();
        let expiry = tokio::time::timeout(
            Duration::from_secs(2),
            activity.expired(Duration::from_secs(30), Duration::from_millis(50)),
        )
        .await
        .expect("watchdog never fired");
        assert_eq!(expiry, Expiry::Read);
    }

    #[tokio::test]
    async fn finished_request_switches_to_idle_deadline() {
        let activity = Activity::new();
        drop(activity.begin());
        let expiry = tokio::time::timeout(
            Duration::from_secs(2),
            activity.expired(Duration::from_millis(50), Duration::from_secs(30)),
        )
        .await
        .expect("watchdog never fired");
        assert_eq!(expiry, Expiry::Idle);
    }

    #[tokio::test]
    async fn in_flight_request_suspends_the_watchdog() {
        let activity = Activity::new();
        let in_flight = activity.begin();
        let fired = tokio::time::timeout(
            Duration::from_millis(200),
            activity.expired(Duration::from_millis(20), Duration::from_millis(20)),
        )
        .await;
        assert!(fired.is_err(), "watchdog fired during an in-flight request");
        drop(in_flight);
    }

    #[tokio::test]
    async fn fresh_connection_honors_a_shorter_idle_timeout() {
        let activity = Activity::new();
        let expiry = tokio::time::timeout(
            Duration::from_secs(2),
            activity.expired(Duration::from_millis(50), Duration::from_secs(30)),
        )
        .await
        .expect("watchdog never fired");
        assert_eq!(expiry, Expiry::Idle);
    }

    #[tokio::test]
    async fn bytes_after_idle_switch_to_the_read_deadline() {
        let activity = Activity::new();
        drop(activity.begin());

        let watchdog = activity.clone();
        let expired = tokio::spawn(async move {
            watchdog
                .expired(Duration::from_secs(30), Duration::from_millis(100))
                .await
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        activity.record_read();

        let expiry = tokio::time::timeout(Duration::from_secs(1), expired)
            .await
            .expect("watchdog slept through the new request")
            .unwrap();
        assert_eq!(expiry, Expiry::Read);
    }

    #[tokio::test]
    async fn finished_request_wakes_the_watchdog() {
        let activity = Activity::new();
        let in_flight = activity.begin();

        let watchdog = activity.clone();
        let expired = tokio::spawn(async move {
            watchdog
                .expired(Duration::from_millis(100), Duration::from_secs(30))
                .await
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(in_flight);

        let expiry = tokio::time::timeout(Duration::from_secs(1), expired)
            .await
            .expect("watchdog missed the end of the request")
            .unwrap();
        assert_eq!(expiry, Expiry::Idle);
    }

    #[test]
    fn read_budget_shrinks_from_request_start() {
        let activity = Activity::new();
        let in_flight = activity.begin();
        let budget = in_flight.read_budget(Duration::from_secs(15));
        assert!(budget <= Duration::from_secs(15));
        assert!(budget > Duration::from_secs(14));
    }

    #[tokio::test]
    async fn timed_stream_passes_data_through() {
        let (client, server) = tokio::io::duplex(64);
        let activity = Activity::new();
        let mut timed = TimedStream::new(server, Duration::from_secs(1), activity.clone());
        let mut client = client;

        client.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        timed.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        timed.write_all(b"pong").await.unwrap();
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong");
    }

    #[tokio::test]
    async fn stalled_write_times_out() {
        // The peer never reads, so the 8-byte pipe fills and the write stalls.
        let (_client, server) = tokio::io::duplex(8);
        let mut timed = TimedStream::new(server, Duration::from_millis(50), Activity::new());

        let err = tokio::time::timeout(Duration::from_secs(2), timed.write_all(&[0u8; 64]))
            .await
            .expect("write never gave up")
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }
}
