use reqwest::{Client, StatusCode, header};
use std::time::Duration;
use tracing::{debug, warn};

use super::config::StreamConfig;
use crate::utils::errors::{StreamError, StreamResult};

/// A successful answer to a ranged or full GET.
#[derive(Debug)]
pub struct RangeResponse {
    pub status: StatusCode,
    /// Full resource length, from `Content-Range` or (for 200) `Content-Length`
    pub total_length: Option<u64>,
    /// Length of this body, if advertised
    pub body_length: Option<u64>,
    response: reqwest::Response,
}

impl RangeResponse {
    pub fn is_partial(&self) -> bool {
        self.status == StatusCode::PARTIAL_CONTENT
    }

    pub fn into_response(self) -> reqwest::Response {
        self.response
    }
}

/// Issues HEAD probes and byte-range GETs against a remote URL. Holds no
/// per-stream state.
#[derive(Debug, Clone)]
pub struct ChunkDownloader {
    client: Client,
}

impl ChunkDownloader {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Client with per-request connect/read timeouts and no overall deadline
    pub fn from_config(config: &StreamConfig) -> StreamResult<Self> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout())
            .read_timeout(config.read_timeout())
            .build()?;
        Ok(Self::new(client))
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Best-effort length probe. Any failure, including the timeout, yields `None`.
    pub async fn probe_length(&self, url: &str, timeout: Duration) -> Option<u64> {
        match self.try_probe_length(url, timeout).await {
            Ok(len) => len,
            Err(e) => {
                debug!("HEAD probe for {} failed: {}", url, e);
                None
            }
        }
    }

    /// HEAD request bounded by `timeout`. `Ok(None)` when the server answers
    /// without a usable Content-Length.
    pub async fn try_probe_length(&self, url: &str, timeout: Duration) -> StreamResult<Option<u64>> {
        let response = tokio::time::timeout(timeout, self.client.head(url).send()).await??;

        if !response.status().is_success() {
            debug!("HEAD probe for {} returned {}", url, response.status());
            return Ok(None);
        }

        Ok(header_u64(response.headers(), header::CONTENT_LENGTH).filter(|len| *len > 0))
    }

    /// GET `bytes=start-end` (inclusive). `end = None` asks for everything
    /// from `start` on.
    pub async fn fetch_range(
        &self,
        url: &str,
        start: u64,
        end: Option<u64>,
    ) -> StreamResult<RangeResponse> {
        let range = match end {
            Some(end) => format!("bytes={}-{}", start, end),
            None => format!("bytes={}-", start),
        };

        let response = self
            .client
            .get(url)
            .header(header::RANGE, &range)
            .send()
            .await?;

        let status = response.status();
        match status {
            StatusCode::PARTIAL_CONTENT => {
                let content_range = response
                    .headers()
                    .get(header::CONTENT_RANGE)
                    .and_then(|v| v.to_str().ok())
                    .and_then(parse_content_range);

                if let Some(ref parsed) = content_range {
                    if parsed.start != start {
                        return Err(StreamError::InvalidResponse(format!(
                            "asked for byte {} but server answered from {}",
                            start, parsed.start
                        )));
                    }
                }

                Ok(RangeResponse {
                    status,
                    total_length: content_range.and_then(|r| r.total),
                    body_length: header_u64(response.headers(), header::CONTENT_LENGTH),
                    response,
                })
            }
            StatusCode::OK if start == 0 => Ok(Self::full_response(response)),
            StatusCode::OK => {
                // body starts at byte 0, not where we asked
                warn!("Server ignored range {} for {}", range, url);
                Err(StreamError::RangeUnsupported {
                    status: status.as_u16(),
                })
            }
            _ => {
                debug!("Range {} for {} failed with {}", range, url, status);
                Err(StreamError::from_range_status(status.as_u16()))
            }
        }
    }

    /// Plain GET for the whole resource
    pub async fn fetch_full(&self, url: &str) -> StreamResult<RangeResponse> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(StreamError::Http {
                status: status.as_u16(),
            });
        }
        Ok(Self::full_response(response))
    }

    fn full_response(response: reqwest::Response) -> RangeResponse {
        let length = header_u64(response.headers(), header::CONTENT_LENGTH);
        RangeResponse {
            status: response.status(),
            total_length: length,
            body_length: length,
            response,
        }
    }
}

/// Parsed `Content-Range: bytes start-end/total` (total may be `*`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentRange {
    pub start: u64,
    pub end: u64,
    pub total: Option<u64>,
}

pub fn parse_content_range(value: &str) -> Option<ContentRange> {
    let rest = value.trim().strip_prefix("bytes")?.trim_start();
    let (range, total) = rest.split_once('/')?;
    let (start, end) = range.split_once('-')?;

    let start = start.trim().parse().ok()?;
    let end = end.trim().parse().ok()?;
    if end < start {
        return None;
    }
    let total = match total.trim() {
        "*" => None,
        t => Some(t.parse().ok()?),
    };

    Some(ContentRange { start, end, total })
}

fn header_u64(headers: &header::HeaderMap, name: header::HeaderName) -> Option<u64> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}
