#![cfg(test)]

/// Common test utilities
pub mod common {
    use std::future::Future;
    use std::time::Duration;
    use tokio::time::sleep;

    /// Wait for an async condition to become true
    pub async fn wait_for_async<F, Fut>(mut condition: F, max_wait: Duration) -> bool
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bool>,
    {
        let start = std::time::Instant::now();

        while start.elapsed() < max_wait {
            if condition().await {
                return true;
            }
            sleep(Duration::from_millis(10)).await;
        }

        false
    }
}

/// In-process HTTP server that serves one deterministic resource with
/// configurable range behavior.
pub mod range_server {
    use anyhow::Result;
    use bytes::Bytes;
    use axum::{
        Router,
        body::Body,
        extract::State,
        http::{HeaderMap, StatusCode, header},
        response::{IntoResponse, Response},
        routing::get,
    };
    use std::sync::{Arc, Mutex};
    use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU64, Ordering};
    use std::time::Duration;
    use tokio::net::TcpListener;

    /// Mock HTTP server state
    pub struct MockServerState {
        /// Resource served at `/media/{name}`
        pub content: Vec<u8>,
        /// Status returned for every ranged GET instead of 206 (0 = honour ranges)
        refuse_ranges_with: AtomicU16,
        /// Answer ranged GETs with the whole body and 200
        ignore_ranges: AtomicBool,
        /// HEAD returns 500
        fail_head: AtomicBool,
        /// Every GET returns 500
        fail_get: AtomicBool,
        /// Delay before answering any request
        delay_ms: AtomicU64,
        /// Stream 200 bodies without a Content-Length
        chunked_full: AtomicBool,
        /// Send `Content-Range: bytes a-b/*` and no length on HEAD
        hide_total: AtomicBool,
        /// Every satisfied range, in arrival order
        pub ranges: Mutex<Vec<(u64, u64)>>,
        pub head_requests: AtomicU64,
        pub range_requests: AtomicU64,
        pub full_requests: AtomicU64,
    }

    impl MockServerState {
        pub fn new(size: usize) -> Self {
            Self {
                content: pattern(0, size as u64),
                refuse_ranges_with: AtomicU16::new(0),
                ignore_ranges: AtomicBool::new(false),
                fail_head: AtomicBool::new(false),
                fail_get: AtomicBool::new(false),
                delay_ms: AtomicU64::new(0),
                chunked_full: AtomicBool::new(false),
                hide_total: AtomicBool::new(false),
                ranges: Mutex::new(Vec::new()),
                head_requests: AtomicU64::new(0),
                range_requests: AtomicU64::new(0),
                full_requests: AtomicU64::new(0),
            }
        }

        pub fn refuse_ranges_with(&self, status: u16) {
            self.refuse_ranges_with.store(status, Ordering::SeqCst);
        }

        pub fn set_ignore_ranges(&self, ignore: bool) {
            self.ignore_ranges.store(ignore, Ordering::SeqCst);
        }

        pub fn set_fail_head(&self, fail: bool) {
            self.fail_head.store(fail, Ordering::SeqCst);
        }

        pub fn set_fail_get(&self, fail: bool) {
            self.fail_get.store(fail, Ordering::SeqCst);
        }

        pub fn set_delay(&self, delay: Duration) {
            self.delay_ms
                .store(delay.as_millis() as u64, Ordering::SeqCst);
        }

        pub fn set_chunked_full(&self, chunked: bool) {
            self.chunked_full.store(chunked, Ordering::SeqCst);
        }

        pub fn set_hide_total(&self, hide: bool) {
            self.hide_total.store(hide, Ordering::SeqCst);
        }

        pub fn served_ranges(&self) -> Vec<(u64, u64)> {
            self.ranges.lock().unwrap().clone()
        }

        pub fn head_count(&self) -> u64 {
            self.head_requests.load(Ordering::SeqCst)
        }

        pub fn range_count(&self) -> u64 {
            self.range_requests.load(Ordering::SeqCst)
        }

        pub fn full_count(&self) -> u64 {
            self.full_requests.load(Ordering::SeqCst)
        }

        pub fn request_count(&self) -> u64 {
            self.head_count() + self.range_count() + self.full_count()
        }
    }

    /// Bytes `start..start+len` of the served resource
    pub fn pattern(start: u64, len: u64) -> Vec<u8> {
        (start..start + len).map(|i| (i % 251) as u8).collect()
    }

    fn parse_range_header(value: &str, total: u64) -> Option<(u64, u64)> {
        let spec = value.strip_prefix("bytes=")?;
        let (start, end) = spec.split_once('-')?;
        let start: u64 = start.parse().ok()?;
        let end = if end.is_empty() {
            total.checked_sub(1)?
        } else {
            end.parse::<u64>().ok()?.min(total.checked_sub(1)?)
        };
        (start <= end).then_some((start, end))
    }

    async fn serve_head(State(state): State<Arc<MockServerState>>) -> Response {
        state.head_requests.fetch_add(1, Ordering::SeqCst);
        let delay = state.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if state.fail_head.load(Ordering::SeqCst) {
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
        if state.hide_total.load(Ordering::SeqCst) {
            return StatusCode::METHOD_NOT_ALLOWED.into_response();
        }

        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_LENGTH, state.content.len().into());
        headers.insert(header::ACCEPT_RANGES, "bytes".parse().unwrap());
        (StatusCode::OK, headers).into_response()
    }

    async fn serve_media(
        State(state): State<Arc<MockServerState>>,
        request_headers: HeaderMap,
    ) -> Response {
        let range = request_headers
            .get(header::RANGE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        if range.is_some() {
            state.range_requests.fetch_add(1, Ordering::SeqCst);
        } else {
            state.full_requests.fetch_add(1, Ordering::SeqCst);
        }

        let delay = state.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        if state.fail_get.load(Ordering::SeqCst) {
            return (StatusCode::INTERNAL_SERVER_ERROR, "Mock failure").into_response();
        }

        let total = state.content.len() as u64;

        if let Some(range) = range
            && !state.ignore_ranges.load(Ordering::SeqCst)
        {
            let refused = state.refuse_ranges_with.load(Ordering::SeqCst);
            if refused != 0 {
                return StatusCode::from_u16(refused)
                    .unwrap_or(StatusCode::FORBIDDEN)
                    .into_response();
            }

            let Some((start, end)) = parse_range_header(&range, total) else {
                return Response::builder()
                    .status(StatusCode::RANGE_NOT_SATISFIABLE)
                    .header(header::CONTENT_RANGE, format!("bytes */{}", total))
                    .body(Body::empty())
                    .unwrap();
            };

            state.ranges.lock().unwrap().push((start, end));
            let body = state.content[start as usize..=end as usize].to_vec();
            let total = if state.hide_total.load(Ordering::SeqCst) {
                "*".to_string()
            } else {
                total.to_string()
            };
            return Response::builder()
                .status(StatusCode::PARTIAL_CONTENT)
                .header(header::CONTENT_LENGTH, body.len())
                .header(
                    header::CONTENT_RANGE,
                    format!("bytes {}-{}/{}", start, end, total),
                )
                .header(header::ACCEPT_RANGES, "bytes")
                .body(Body::from(body))
                .unwrap();
        }

        if state.chunked_full.load(Ordering::SeqCst) {
            let pieces: Vec<std::io::Result<Bytes>> = state
                .content
                .chunks(8_192)
                .map(|piece| Ok(Bytes::copy_from_slice(piece)))
                .collect();
            return Response::builder()
                .status(StatusCode::OK)
                .body(Body::from_stream(futures::stream::iter(pieces)))
                .unwrap();
        }

        Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_LENGTH, total)
            .body(Body::from(state.content.clone()))
            .unwrap()
    }

    /// Running mock server
    pub struct RangeServer {
        pub state: Arc<MockServerState>,
        pub base_url: String,
    }

    impl RangeServer {
        pub async fn start(size: usize) -> Result<Self> {
            let state = Arc::new(MockServerState::new(size));
            let app = Router::new()
                .route("/media/{name}", get(serve_media).head(serve_head))
                .with_state(state.clone());

            let listener = TcpListener::bind("127.0.0.1:0").await?;
            let addr = listener.local_addr()?;

            tokio::spawn(async move {
                axum::serve(listener, app).await.expect("Mock server failed");
            });

            Ok(Self {
                state,
                base_url: format!("http://{}", addr),
            })
        }

        pub fn url(&self, name: &str) -> String {
            format!("{}/media/{}", self.base_url, name)
        }
    }
}
