//! Readable byte sources over a remote resource, with and without the
//! byte-range cache in front.

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use futures::stream::BoxStream;
use std::sync::Arc;
use tracing::{debug, warn};

use super::chunk_downloader::ChunkDownloader;
use super::file_cache::StreamCache;
use crate::utils::errors::{StreamError, StreamResult};

/// How a cached source treats the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheMode {
    /// Best effort: commits happen in the background and cache failures fall
    /// through to the network.
    #[default]
    Normal,
    /// Every fetched byte is committed before the read returns; cache
    /// failures are errors.
    Preload,
}

/// What to read: `length` bytes of `uri` starting at `position`, cached
/// under `key`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataSpec {
    pub uri: String,
    pub key: String,
    pub position: u64,
    /// `None` reads to the end of the resource
    pub length: Option<u64>,
}

impl DataSpec {
    pub fn new(uri: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            key: key.into(),
            position: 0,
            length: None,
        }
    }

    pub fn with_range(mut self, position: u64, length: Option<u64>) -> Self {
        self.position = position;
        self.length = length;
        self
    }
}

#[async_trait]
pub trait DataSource: Send {
    /// Prepare to read `spec`. Returns the number of readable bytes when known.
    async fn open(&mut self, spec: DataSpec) -> StreamResult<Option<u64>>;

    /// Up to `max_len` bytes from the current position; `None` at end of data.
    async fn read(&mut self, max_len: usize) -> StreamResult<Option<Bytes>>;

    async fn close(&mut self);
}

/// Plain ranged HTTP reads.
pub struct HttpDataSource {
    downloader: ChunkDownloader,
    body: Option<BoxStream<'static, reqwest::Result<Bytes>>>,
    leftover: Bytes,
    remaining: Option<u64>,
    /// Whether `remaining` came from the response rather than the request
    length_advertised: bool,
    /// Full resource length from the last response, when advertised
    resource_length: Option<u64>,
}

impl HttpDataSource {
    pub fn new(downloader: ChunkDownloader) -> Self {
        Self {
            downloader,
            body: None,
            leftover: Bytes::new(),
            remaining: None,
            length_advertised: false,
            resource_length: None,
        }
    }

    pub fn resource_length(&self) -> Option<u64> {
        self.resource_length
    }

    /// Read everything still open into one buffer
    pub async fn read_to_end(&mut self) -> StreamResult<Bytes> {
        let mut collected = Vec::new();
        while let Some(piece) = self.read(usize::MAX).await? {
            collected.extend_from_slice(&piece);
        }
        Ok(Bytes::from(collected))
    }
}

#[async_trait]
impl DataSource for HttpDataSource {
    async fn open(&mut self, spec: DataSpec) -> StreamResult<Option<u64>> {
        self.close().await;

        if spec.length == Some(0) {
            self.remaining = Some(0);
            return Ok(Some(0));
        }

        let end = spec.length.map(|len| spec.position + len - 1);
        let response = match self
            .downloader
            .fetch_range(&spec.uri, spec.position, end)
            .await
        {
            Ok(response) => response,
            Err(StreamError::RangeUnsupported { status: 416 }) if spec.position > 0 => {
                debug!("Range at {} is past the end of {}", spec.position, spec.uri);
                self.remaining = Some(0);
                return Ok(Some(0));
            }
            Err(e) => return Err(e),
        };

        let advertised = response
            .body_length
            .or_else(|| {
                response
                    .total_length
                    .map(|total| total.saturating_sub(spec.position))
            })
            .map(|len| match spec.length {
                Some(asked) => len.min(asked),
                None => len,
            });

        // a chunked 200 from a server ignoring Range still stops at the asked length
        self.length_advertised = advertised.is_some();
        self.remaining = advertised.or(spec.length);
        self.resource_length = response.total_length;
        self.body = Some(response.into_response().bytes_stream().boxed());
        Ok(advertised)
    }

    async fn read(&mut self, max_len: usize) -> StreamResult<Option<Bytes>> {
        if self.remaining == Some(0) {
            return Ok(None);
        }

        if self.leftover.is_empty() {
            let Some(body) = self.body.as_mut() else {
                return Ok(None);
            };
            match body.next().await {
                Some(piece) => self.leftover = piece?,
                None => {
                    if let Some(remaining) = self.remaining
                        && self.length_advertised
                    {
                        return Err(StreamError::InvalidResponse(format!(
                            "body ended {} bytes early",
                            remaining
                        )));
                    }
                    return Ok(None);
                }
            }
        }

        let mut take = self.leftover.len().min(max_len);
        if let Some(remaining) = self.remaining {
            take = take.min(remaining as usize);
        }
        let piece = self.leftover.split_to(take);
        if let Some(remaining) = self.remaining.as_mut() {
            *remaining -= piece.len() as u64;
        }
        Ok(Some(piece))
    }

    async fn close(&mut self) {
        self.body = None;
        self.leftover = Bytes::new();
        self.remaining = None;
        self.length_advertised = false;
        self.resource_length = None;
    }
}

/// Builds [`CacheDataSource`]s bound to one cache and mode.
#[derive(Debug, Clone)]
pub struct DataSourceFactory {
    cache: Arc<StreamCache>,
    mode: CacheMode,
}

impl DataSourceFactory {
    pub fn new(cache: Arc<StreamCache>, mode: CacheMode) -> Self {
        Self { cache, mode }
    }

    pub fn mode(&self) -> CacheMode {
        self.mode
    }

    pub fn create(&self) -> CacheDataSource {
        CacheDataSource::new(self.cache.clone(), self.mode)
    }

    /// Read `spec` to the end through a fresh source. In preload mode every
    /// byte is committed by the time this returns.
    pub async fn preload(&self, spec: DataSpec) -> StreamResult<u64> {
        let mut source = self.create();
        let fragment = self.cache.config().fragment_size_bytes() as usize;
        source.open(spec).await?;

        let mut total = 0u64;
        while let Some(piece) = source.read(fragment).await? {
            total += piece.len() as u64;
        }
        source.close().await;
        Ok(total)
    }
}

/// Serves reads from cached spans and fills the gaps from the network,
/// one fragment at a time, storing what it fetched.
pub struct CacheDataSource {
    cache: Arc<StreamCache>,
    upstream: HttpDataSource,
    mode: CacheMode,
    spec: Option<DataSpec>,
    position: u64,
    remaining: Option<u64>,
    /// Last network fragment and its start offset
    fragment: Option<(u64, Bytes)>,
    /// Set after a cache failure in normal mode
    bypass_cache: bool,
}

impl CacheDataSource {
    fn new(cache: Arc<StreamCache>, mode: CacheMode) -> Self {
        let upstream = HttpDataSource::new(cache.downloader().clone());
        Self {
            cache,
            upstream,
            mode,
            spec: None,
            position: 0,
            remaining: None,
            fragment: None,
            bypass_cache: false,
        }
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    fn advance(&mut self, data: Bytes) -> Option<Bytes> {
        self.position += data.len() as u64;
        if let Some(remaining) = self.remaining.as_mut() {
            *remaining -= data.len() as u64;
        }
        Some(data)
    }

    fn take_from_fragment(&mut self, want: u64) -> Option<Bytes> {
        let (start, data) = self.fragment.as_ref()?;
        let end = start + data.len() as u64;
        if self.position < *start || self.position >= end {
            return None;
        }
        let from = (self.position - start) as usize;
        let to = from + want.min(end - self.position) as usize;
        Some(data.slice(from..to))
    }

    async fn cached(&mut self, key: &str, want: u64) -> StreamResult<Option<Bytes>> {
        if self.bypass_cache {
            return Ok(None);
        }
        match self.cache.read_cached(key, self.position, want).await {
            Ok(data) => Ok(data),
            Err(e) if self.mode == CacheMode::Normal => {
                warn!("Cache read failed for {}, using network only: {}", key, e);
                self.bypass_cache = true;
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Fetch the gap at the current position, up to the next cached span or
    /// one fragment, and commit it.
    async fn fill(&mut self, spec: &DataSpec, want: u64) -> StreamResult<Option<Bytes>> {
        let mut length = self.cache.config().fragment_size_bytes();
        if let Some(remaining) = self.remaining {
            length = length.min(remaining);
        }
        if !self.bypass_cache
            && let Some(next) = self.cache.next_cached_start(&spec.key, self.position).await
        {
            length = length.min(next - self.position);
        }
        if length == 0 {
            // a background commit landed here after the cache was checked
            return self.cached(&spec.key, want).await;
        }

        let fragment_spec = spec.clone().with_range(self.position, Some(length));
        self.upstream.open(fragment_spec).await?;
        if self.remaining.is_none()
            && let Some(total) = self.upstream.resource_length()
        {
            self.remaining = Some(total.saturating_sub(self.position));
        }
        let data = self.upstream.read_to_end().await?;
        self.upstream.close().await;

        if data.is_empty() {
            return Ok(None);
        }
        self.cache.record_network_fill(data.len() as u64);

        if !self.bypass_cache {
            match self.mode {
                CacheMode::Preload => {
                    self.cache
                        .store_span(&spec.key, self.position, data.clone())
                        .await?;
                }
                CacheMode::Normal => {
                    let cache = self.cache.clone();
                    let key = spec.key.clone();
                    let position = self.position;
                    let data = data.clone();
                    tokio::spawn(async move {
                        if let Err(e) = cache.store_span(&key, position, data).await {
                            warn!("Failed to cache {}@{}: {}", key, position, e);
                        }
                    });
                }
            }
        }

        Ok(Some(data))
    }
}

#[async_trait]
impl DataSource for CacheDataSource {
    async fn open(&mut self, spec: DataSpec) -> StreamResult<Option<u64>> {
        self.position = spec.position;
        self.remaining = spec.length;
        self.fragment = None;
        self.spec = Some(spec);
        Ok(self.remaining)
    }

    async fn read(&mut self, max_len: usize) -> StreamResult<Option<Bytes>> {
        let Some(spec) = self.spec.clone() else {
            return Err(StreamError::InvalidResponse("read before open".to_string()));
        };
        if self.remaining == Some(0) {
            return Ok(None);
        }
        let mut want = max_len as u64;
        if let Some(remaining) = self.remaining {
            want = want.min(remaining);
        }
        if want == 0 {
            return Ok(Some(Bytes::new()));
        }

        if let Some(data) = self.take_from_fragment(want) {
            return Ok(self.advance(data));
        }
        if let Some(data) = self.cached(&spec.key, want).await? {
            return Ok(self.advance(data));
        }

        match self.fill(&spec, want).await? {
            Some(data) => {
                self.fragment = Some((self.position, data));
                let data = self.take_from_fragment(want).unwrap_or_default();
                Ok(self.advance(data))
            }
            None => {
                self.remaining = Some(0);
                Ok(None)
            }
        }
    }

    async fn close(&mut self) {
        self.upstream.close().await;
        self.spec = None;
        self.fragment = None;
    }
}
