use anyhow::{Context, Result};
use lru::LruCache;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use tokio::fs as tokio_fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, SeekFrom};
use tracing::{debug, info, warn};

use super::metadata::{CacheSpan, INDEX_VERSION, SpanIndex};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SpanId {
    key: String,
    position: u64,
}

/// Result of offering a span to the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Stored { evicted: usize },
    /// Part of the range is already cached for this key
    Overlapping,
    /// Larger than the whole budget
    TooLarge,
    Empty,
}

/// Disk-backed span store with least-recently-used eviction.
///
/// Every span lives in its own file under the cache directory; `index.json`
/// records them in recency order so a new instance picks up where the last
/// one stopped.
#[derive(Debug)]
pub struct SpanStorage {
    cache_dir: PathBuf,
    index_file: PathBuf,
    max_size: u64,
    spans: HashMap<String, BTreeMap<u64, CacheSpan>>,
    /// Recency order over every span; values unused
    lru: LruCache<SpanId, ()>,
    total_size: u64,
    next_file_id: u64,
}

impl SpanStorage {
    pub async fn open(cache_dir: PathBuf, max_size: u64) -> Result<Self> {
        let index_file = cache_dir.join("index.json");

        tokio_fs::create_dir_all(&cache_dir)
            .await
            .with_context(|| format!("Failed to create cache directory {:?}", cache_dir))?;

        let index = if tokio_fs::try_exists(&index_file).await.unwrap_or(false) {
            Self::load_index(&index_file).await.unwrap_or_else(|e| {
                warn!("Failed to load span index: {:#}, starting with empty cache", e);
                SpanIndex::default()
            })
        } else {
            SpanIndex::default()
        };

        let mut storage = Self {
            cache_dir,
            index_file,
            max_size,
            spans: HashMap::new(),
            lru: LruCache::unbounded(),
            total_size: 0,
            next_file_id: index.next_file_id,
        };

        storage.restore(index).await;
        storage.remove_orphans().await;
        storage.evict_until_under_budget().await;
        storage.save().await?;

        info!(
            "Span storage initialized at {:?} with {} spans ({} MB of {} MB)",
            storage.cache_dir,
            storage.lru.len(),
            storage.total_size / 1024 / 1024,
            storage.max_size / 1024 / 1024
        );

        Ok(storage)
    }

    async fn load_index(index_file: &Path) -> Result<SpanIndex> {
        let contents = tokio_fs::read_to_string(index_file)
            .await
            .with_context(|| format!("Failed to read span index {:?}", index_file))?;

        let index: SpanIndex = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse span index {:?}", index_file))?;

        if index.version != INDEX_VERSION {
            anyhow::bail!("Unsupported span index version {}", index.version);
        }
        Ok(index)
    }

    /// Re-admit indexed spans whose files are intact, oldest first so the
    /// recency order survives.
    async fn restore(&mut self, index: SpanIndex) {
        let mut spans = index.spans;
        spans.sort_by_key(|s| s.last_accessed);

        for span in spans {
            let path = self.cache_dir.join(&span.file_name);
            let valid = match tokio_fs::metadata(&path).await {
                Ok(meta) if meta.len() == span.length && span.length > 0 => {
                    !self.overlaps_existing(&span.key, span.position, span.length)
                }
                Ok(meta) => {
                    warn!(
                        "Span file size mismatch for {:?}: expected {}, actual {}",
                        path,
                        span.length,
                        meta.len()
                    );
                    false
                }
                Err(_) => {
                    warn!("Span file missing for key {}: {:?}", span.key, path);
                    false
                }
            };

            if valid {
                self.admit(span);
            } else {
                let _ = tokio_fs::remove_file(&path).await;
            }
        }
    }

    /// Delete span files nothing in the index refers to
    async fn remove_orphans(&mut self) {
        let known: HashSet<String> = self
            .spans
            .values()
            .flat_map(|m| m.values().map(|s| s.file_name.clone()))
            .collect();

        let Ok(mut entries) = tokio_fs::read_dir(&self.cache_dir).await else {
            return;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with("span_") && name.ends_with(".bin") && !known.contains(&name) {
                debug!("Removing orphaned span file {}", name);
                let _ = tokio_fs::remove_file(entry.path()).await;
            }
        }
    }

    pub async fn save(&self) -> Result<()> {
        let index = SpanIndex {
            version: INDEX_VERSION,
            next_file_id: self.next_file_id,
            spans: self
                .lru
                .iter()
                .rev()
                .filter_map(|(id, _)| self.span(id).cloned())
                .collect(),
            last_updated: chrono::Utc::now(),
        };

        let contents =
            serde_json::to_string_pretty(&index).context("Failed to serialize span index")?;

        tokio_fs::write(&self.index_file, contents)
            .await
            .with_context(|| format!("Failed to write span index {:?}", self.index_file))
    }

    fn span(&self, id: &SpanId) -> Option<&CacheSpan> {
        self.spans.get(&id.key)?.get(&id.position)
    }

    fn admit(&mut self, span: CacheSpan) {
        self.total_size += span.length;
        self.lru.push(
            SpanId {
                key: span.key.clone(),
                position: span.position,
            },
            (),
        );
        self.spans
            .entry(span.key.clone())
            .or_default()
            .insert(span.position, span);
    }

    fn overlaps_existing(&self, key: &str, position: u64, length: u64) -> bool {
        let Some(spans) = self.spans.get(key) else {
            return false;
        };
        // the only candidates are the last span starting before the end
        spans
            .range(..position + length)
            .next_back()
            .is_some_and(|(_, span)| span.overlaps(position, length))
    }

    /// Span of `key` containing `offset`, without touching recency
    pub fn find_span(&self, key: &str, offset: u64) -> Option<&CacheSpan> {
        self.spans
            .get(key)?
            .range(..=offset)
            .next_back()
            .map(|(_, span)| span)
            .filter(|span| span.contains(offset))
    }

    /// Start of the first cached span of `key` after `offset`
    pub fn next_span_start(&self, key: &str, offset: u64) -> Option<u64> {
        self.spans
            .get(key)?
            .range(offset..)
            .next()
            .map(|(position, _)| *position)
    }

    /// Read up to `max_len` bytes at `offset` if a span covers it. Marks the
    /// span as most recently used.
    pub async fn read_span(
        &mut self,
        key: &str,
        offset: u64,
        max_len: u64,
    ) -> Result<Option<Vec<u8>>> {
        let Some(span) = self.find_span(key, offset) else {
            return Ok(None);
        };
        let path = self.cache_dir.join(&span.file_name);
        let position = span.position;
        let len = max_len.min(span.end() - offset);

        let mut file = tokio_fs::File::open(&path)
            .await
            .with_context(|| format!("Failed to open span file {:?}", path))?;
        file.seek(SeekFrom::Start(offset - position))
            .await
            .with_context(|| format!("Failed to seek in span file {:?}", path))?;
        let mut buffer = vec![0u8; len as usize];
        file.read_exact(&mut buffer)
            .await
            .with_context(|| format!("Failed to read {} bytes from {:?}", len, path))?;

        let id = SpanId {
            key: key.to_string(),
            position,
        };
        self.lru.promote(&id);
        if let Some(span) = self.spans.get_mut(key).and_then(|m| m.get_mut(&position)) {
            span.mark_accessed();
        }

        Ok(Some(buffer))
    }

    /// Write `data` as a new span of `key` at `position` and evict older spans
    /// until the store fits its budget again.
    pub async fn insert_span(
        &mut self,
        key: &str,
        position: u64,
        data: &[u8],
    ) -> Result<InsertOutcome> {
        let length = data.len() as u64;
        if length == 0 {
            return Ok(InsertOutcome::Empty);
        }
        if length > self.max_size {
            debug!("Span of {} bytes exceeds cache budget, not storing", length);
            return Ok(InsertOutcome::TooLarge);
        }
        if self.overlaps_existing(key, position, length) {
            debug!("Span {}@{}+{} overlaps cached data, skipping", key, position, length);
            return Ok(InsertOutcome::Overlapping);
        }

        let span = CacheSpan::new(key, position, length, self.next_file_id);
        self.next_file_id += 1;
        let path = self.cache_dir.join(&span.file_name);

        if let Err(e) = tokio_fs::write(&path, data).await {
            let _ = tokio_fs::remove_file(&path).await;
            return Err(e).with_context(|| format!("Failed to write span file {:?}", path));
        }

        self.admit(span);
        debug!("Stored span {}@{}+{}", key, position, length);

        let evicted = self.evict_until_under_budget().await;
        self.save().await?;

        Ok(InsertOutcome::Stored {
            evicted: evicted.len(),
        })
    }

    /// Drop least-recently-used spans while over budget
    pub async fn evict_until_under_budget(&mut self) -> Vec<CacheSpan> {
        let mut evicted = Vec::new();

        while self.total_size > self.max_size {
            let Some((id, ())) = self.lru.pop_lru() else {
                break;
            };
            if let Some(span) = self.detach(&id) {
                self.delete_file(&span).await;
                debug!("Evicted span {}@{}+{}", span.key, span.position, span.length);
                evicted.push(span);
            }
        }

        if !evicted.is_empty() {
            info!(
                "Evicted {} spans, cache now {} MB",
                evicted.len(),
                self.total_size / 1024 / 1024
            );
        }
        evicted
    }

    fn detach(&mut self, id: &SpanId) -> Option<CacheSpan> {
        let spans = self.spans.get_mut(&id.key)?;
        let span = spans.remove(&id.position)?;
        if spans.is_empty() {
            self.spans.remove(&id.key);
        }
        self.total_size -= span.length;
        Some(span)
    }

    async fn delete_file(&self, span: &CacheSpan) {
        let path = self.cache_dir.join(&span.file_name);
        if let Err(e) = tokio_fs::remove_file(&path).await
            && e.kind() != std::io::ErrorKind::NotFound
        {
            warn!("Failed to remove span file {:?}: {}", path, e);
        }
    }

    pub fn is_cached(&self, key: &str) -> bool {
        self.spans.contains_key(key)
    }

    pub fn cached_bytes(&self, key: &str) -> u64 {
        self.spans
            .get(key)
            .map(|spans| spans.values().map(|s| s.length).sum())
            .unwrap_or(0)
    }

    /// Spans of `key` in offset order
    pub fn spans_for(&self, key: &str) -> Vec<CacheSpan> {
        self.spans
            .get(key)
            .map(|spans| spans.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Returns the number of bytes freed
    pub async fn remove_key(&mut self, key: &str) -> Result<u64> {
        let Some(spans) = self.spans.get(key) else {
            return Ok(0);
        };
        let ids: Vec<SpanId> = spans
            .keys()
            .map(|position| SpanId {
                key: key.to_string(),
                position: *position,
            })
            .collect();

        let mut freed = 0;
        for id in ids {
            self.lru.pop(&id);
            if let Some(span) = self.detach(&id) {
                self.delete_file(&span).await;
                freed += span.length;
            }
        }

        self.save().await?;
        debug!("Removed {} bytes cached for key {}", freed, key);
        Ok(freed)
    }

    pub async fn clear(&mut self) -> Result<()> {
        while let Some((id, ())) = self.lru.pop_lru() {
            if let Some(span) = self.detach(&id) {
                self.delete_file(&span).await;
            }
        }
        self.spans.clear();
        self.total_size = 0;
        self.save().await?;
        info!("Cleared span cache at {:?}", self.cache_dir);
        Ok(())
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn max_size(&self) -> u64 {
        self.max_size
    }

    pub fn span_count(&self) -> usize {
        self.lru.len()
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }
}
