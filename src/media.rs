use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, SystemTime};

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use crossbeam_channel::{unbounded, Receiver, Sender};
use image::ImageFormat;
use parking_lot::Mutex;
use reqwest::blocking::Client;
use sha1::{Digest, Sha1};
use tracing::{debug, warn};
use url::Url;

use crate::data::ImageLoader;
use crate::storage::{self, MediaEntry};

#[derive(Debug, Clone)]
pub struct Config {
    pub cache_dir: Option<PathBuf>,
    pub max_size_bytes: i64,
    pub default_ttl: Duration,
    pub workers: usize,
    /// Thumbnail urls in listings are relative to the server.
    pub base_url: Option<Url>,
    pub http_client: Option<Client>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_dir: None,
            max_size_bytes: 200 * 1024 * 1024,
            default_ttl: Duration::from_secs(24 * 60 * 60),
            workers: 4,
            base_url: None,
            http_client: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Request {
    pub url: String,
    pub ttl: Option<Duration>,
    pub force: bool,
}

struct Job {
    request: Request,
    tx: Sender<Result<MediaEntry>>,
}

struct Inner {
    store: Arc<storage::Store>,
    cfg: Config,
    cache_dir: PathBuf,
    client: Client,
    jobs: Sender<Job>,
    stop: Sender<()>,
    pruning: Mutex<()>,
}

/// Downloads thumbnails on a small worker pool into a size-bounded disk
/// cache indexed in the store.
pub struct ThumbnailCache {
    inner: Arc<Inner>,
    handles: Vec<thread::JoinHandle<()>>,
}

impl ThumbnailCache {
    pub fn new(store: Arc<storage::Store>, cfg: Config) -> Result<Self> {
        let mut cfg = cfg;
        if cfg.workers == 0 {
            cfg.workers = 1;
        }
        let cache_dir = cfg
            .cache_dir
            .clone()
            .or_else(default_cache_dir)
            .context("media: cache dir not configured")?;
        fs::create_dir_all(&cache_dir)
            .with_context(|| format!("media: create cache dir {}", cache_dir.display()))?;

        let client = match cfg.http_client.clone() {
            Some(client) => client,
            None => Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .context("media: build http client")?,
        };

        let (job_tx, job_rx) = unbounded();
        let (stop_tx, stop_rx) = unbounded();

        let inner = Arc::new(Inner {
            store,
            cfg,
            cache_dir,
            client,
            jobs: job_tx,
            stop: stop_tx,
            pruning: Mutex::new(()),
        });

        let handles = (0..inner.cfg.workers)
            .map(|_| {
                let rx_jobs = job_rx.clone();
                let rx_stop = stop_rx.clone();
                let worker_inner = inner.clone();
                thread::spawn(move || worker_inner.worker(rx_jobs, rx_stop))
            })
            .collect();

        Ok(Self { inner, handles })
    }

    pub fn enqueue(&self, request: Request) -> Receiver<Result<MediaEntry>> {
        let (tx, rx) = unbounded();
        let _ = self.inner.jobs.send(Job { request, tx });
        rx
    }

    /// Cached entry for a thumbnail, if it has been downloaded.
    pub fn lookup(&self, url: &str) -> Option<MediaEntry> {
        let resolved = self.inner.resolve(url).ok()?;
        self.inner
            .store
            .get_media_entry_by_url(resolved.as_str())
            .ok()
            .flatten()
    }

    fn shutdown(&mut self) {
        for _ in &self.handles {
            let _ = self.inner.stop.send(());
        }
        while let Some(handle) = self.handles.pop() {
            let _ = handle.join();
        }
    }
}

impl ImageLoader for ThumbnailCache {
    /// Waits for each thumbnail to land in the cache or fail; a broken
    /// image settles just like a loaded one.
    fn settle(&self, urls: &[String]) {
        let pending: Vec<_> = urls
            .iter()
            .map(|url| {
                let rx = self.enqueue(Request {
                    url: url.clone(),
                    ..Default::default()
                });
                (url, rx)
            })
            .collect();
        for (url, rx) in pending {
            match rx.recv() {
                Ok(Ok(entry)) => debug!(url = %url, width = entry.width, height = entry.height, "media: thumbnail ready"),
                Ok(Err(err)) => warn!(url = %url, error = %format!("{err:#}"), "media: thumbnail failed"),
                Err(_) => warn!(url = %url, "media: worker pool gone"),
            }
        }
    }
}

impl Drop for ThumbnailCache {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Inner {
    fn worker(&self, jobs: Receiver<Job>, stop: Receiver<()>) {
        loop {
            crossbeam_channel::select! {
                recv(stop) -> _ => break,
                recv(jobs) -> msg => {
                    match msg {
                        Ok(job) => {
                            let _ = job.tx.send(self.fetch(job.request));
                        }
                        Err(_) => break,
                    }
                }
            }
        }
    }

    fn resolve(&self, raw: &str) -> Result<Url> {
        resolve_url(self.cfg.base_url.as_ref(), raw)
    }

    fn fetch(&self, request: Request) -> Result<MediaEntry> {
        if request.url.is_empty() {
            return Err(anyhow!("media: url required"));
        }
        let url = self.resolve(&request.url)?;

        if let Some(entry) = self.store.get_media_entry_by_url(url.as_str())? {
            if !request.force
                && self.is_fresh(&entry, request.ttl)
                && Path::new(&entry.file_path).exists()
            {
                return Ok(entry);
            }
        }

        let response = self
            .client
            .get(url.clone())
            .send()
            .context("media: download")?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(anyhow!("media: request for {url} failed: {status}"));
        }

        let headers = response.headers().clone();
        let bytes = response.bytes().context("media: body")?.to_vec();
        let content_type = headers
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|val| val.to_str().ok())
            .map(|s| s.to_string())
            .unwrap_or_else(|| detect_mime(&bytes));
        let (width, height) = image::load_from_memory(&bytes)
            .map(|img| (img.width() as i64, img.height() as i64))
            .unwrap_or((0, 0));

        let file_path = self.write_file(&bytes)?;
        let ttl = request.ttl.unwrap_or(self.cfg.default_ttl);
        let expires_at = SystemTime::now().checked_add(ttl);

        let media_entry = MediaEntry {
            id: 0,
            url: url.to_string(),
            media_type: content_type,
            file_path,
            width,
            height,
            size_bytes: bytes.len() as i64,
            fetched_at: Utc::now(),
            expires_at: expires_at.map(DateTime::<Utc>::from),
            checksum: sha1_hex(&bytes),
        };

        self.prune_if_needed(media_entry.size_bytes)?;
        let id = self.store.upsert_media_entry(media_entry.clone())?;
        Ok(MediaEntry { id, ..media_entry })
    }

    fn is_fresh(&self, entry: &MediaEntry, ttl: Option<Duration>) -> bool {
        let ttl = ttl.unwrap_or(self.cfg.default_ttl);
        if ttl.is_zero() {
            return false;
        }
        let expiry = entry.fetched_at.checked_add_signed(
            chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::seconds(0)),
        );
        match expiry {
            Some(expiry) => Utc::now() < expiry,
            None => false,
        }
    }

    fn write_file(&self, data: &[u8]) -> Result<String> {
        let path = self.cache_dir.join(format!("{}.bin", sha1_hex(data)));
        fs::write(&path, data).context("media: write")?;
        Ok(path.to_string_lossy().to_string())
    }

    fn prune_if_needed(&self, new_bytes: i64) -> Result<()> {
        let _guard = self.pruning.lock();
        let expired = self.store.list_expired_media(Utc::now(), 100)?;
        self.evict(expired)?;

        let mut total = self.store.total_media_size()? + new_bytes;
        if total <= self.cfg.max_size_bytes {
            return Ok(());
        }
        let mut victims = Vec::new();
        for entry in self.store.list_oldest_media(100)? {
            total -= entry.size_bytes;
            victims.push(entry);
            if total <= self.cfg.max_size_bytes {
                break;
            }
        }
        self.evict(victims)
    }

    fn evict(&self, entries: Vec<MediaEntry>) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let ids: Vec<i64> = entries.iter().map(|entry| entry.id).collect();
        self.store.delete_media_entries(&ids)?;
        for entry in entries {
            let _ = fs::remove_file(entry.file_path);
        }
        Ok(())
    }
}

pub fn resolve_url(base: Option<&Url>, raw: &str) -> Result<Url> {
    match Url::parse(raw) {
        Ok(url) => Ok(url),
        Err(url::ParseError::RelativeUrlWithoutBase) => base
            .context("media: relative url without a server base")?
            .join(raw)
            .with_context(|| format!("media: join {raw}")),
        Err(err) => Err(anyhow!("media: invalid url {raw}: {err}")),
    }
}

fn default_cache_dir() -> Option<PathBuf> {
    dirs::cache_dir().map(|dir| dir.join("imgflow").join("thumbnails"))
}

fn sha1_hex(data: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

fn detect_mime(bytes: &[u8]) -> String {
    match image::guess_format(bytes) {
        Ok(ImageFormat::Jpeg) => "image/jpeg".into(),
        Ok(ImageFormat::Png) => "image/png".into(),
        Ok(ImageFormat::Gif) => "image/gif".into(),
        Ok(ImageFormat::WebP) => "image/webp".into(),
        _ => {
            let mut buffer = [0u8; 512];
            let mut cursor = std::io::Cursor::new(bytes);
            let read = cursor.read(&mut buffer).unwrap_or(0);
            tree_magic_mini::from_u8(&buffer[..read]).to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{Options, Store};
    use chrono::TimeZone;
    use tempfile::tempdir;

    #[test]
    fn relative_thumbnails_resolve_against_server() {
        let base = Url::parse("https://imgflow.example/").unwrap();
        assert_eq!(
            resolve_url(Some(&base), "/static/thumbs/1.webp").unwrap().as_str(),
            "https://imgflow.example/static/thumbs/1.webp"
        );
        assert_eq!(
            resolve_url(None, "https://cdn.example/a.png").unwrap().as_str(),
            "https://cdn.example/a.png"
        );
        assert!(resolve_url(None, "/static/a.png").is_err());
    }

    #[test]
    fn detects_png_bytes() {
        let png = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];
        assert_eq!(detect_mime(&png), "image/png");
    }

    #[test]
    fn pruning_evicts_oldest_over_budget() {
        let dir = tempdir().unwrap();
        let store = Arc::new(
            Store::open(Options {
                in_memory: true,
                ..Default::default()
            })
            .unwrap(),
        );
        for (n, size) in [(1, 60), (2, 30)] {
            store
                .upsert_media_entry(MediaEntry {
                    id: 0,
                    url: format!("https://imgflow.example/{n}.webp"),
                    media_type: "image/webp".into(),
                    file_path: dir.path().join(format!("{n}.bin")).display().to_string(),
                    width: 1,
                    height: 1,
                    size_bytes: size,
                    fetched_at: Utc.timestamp_opt(1_000 * n, 0).single().unwrap(),
                    expires_at: None,
                    checksum: String::new(),
                })
                .unwrap();
        }
        let cache = ThumbnailCache::new(
            store.clone(),
            Config {
                cache_dir: Some(dir.path().to_path_buf()),
                max_size_bytes: 100,
                workers: 1,
                ..Default::default()
            },
        )
        .unwrap();
        cache.inner.prune_if_needed(20).unwrap();
        assert!(store
            .get_media_entry_by_url("https://imgflow.example/1.webp")
            .unwrap()
            .is_none());
        assert_eq!(store.total_media_size().unwrap(), 30);
    }
}
