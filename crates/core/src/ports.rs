//! Collaborators the lookup is handed by its host: HTTP access, the result
//! sink, the identifier cache, and cancellation. Each has a default
//! in-process implementation here.

use std::collections::HashMap;
use std::sync::mpsc::Sender;
use std::sync::{Mutex, RwLock};
use std::time::Duration;

pub use tokio_util::sync::CancellationToken;

use crate::error::LookupError;
use crate::record::MetadataRecord;

/// Blocking HTTP GET. Implementations map a 404 to `LookupError::NotFound`
/// and an expired timeout to `LookupError::Timeout`.
pub trait Fetcher: Send + Sync {
    fn get(&self, url: &str, timeout: Duration) -> Result<Vec<u8>, LookupError>;
}

/// `Fetcher` over a shared `reqwest` blocking client.
///
/// The blocking client owns its own runtime; do not create or drop it from
/// inside an async context.
#[derive(Clone)]
pub struct HttpFetcher {
    client: reqwest::blocking::Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self, LookupError> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(concat!("audible-metadata/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| LookupError::Transport {
                url: String::new(),
                message: e.to_string(),
            })?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::blocking::Client) -> Self {
        Self { client }
    }
}

fn map_reqwest_error(url: &str, e: reqwest::Error) -> LookupError {
    if e.is_timeout() {
        LookupError::Timeout { url: url.to_string() }
    } else {
        LookupError::Transport {
            url: url.to_string(),
            message: e.to_string(),
        }
    }
}

impl Fetcher for HttpFetcher {
    fn get(&self, url: &str, timeout: Duration) -> Result<Vec<u8>, LookupError> {
        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .map_err(|e| map_reqwest_error(url, e))?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(LookupError::NotFound { url: url.to_string() });
        }
        if !status.is_success() {
            return Err(LookupError::Transport {
                url: url.to_string(),
                message: format!("HTTP {}", status),
            });
        }
        let body = response.bytes().map_err(|e| map_reqwest_error(url, e))?;
        Ok(body.to_vec())
    }
}

/// Receives completed records. Called concurrently from lookup workers, in
/// no particular order.
pub trait ResultSink: Send + Sync {
    fn put(&self, record: MetadataRecord);
}

/// Collects records in arrival order.
#[derive(Debug, Default)]
pub struct VecSink {
    records: Mutex<Vec<MetadataRecord>>,
}

impl VecSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drain everything collected so far.
    pub fn take(&self) -> Vec<MetadataRecord> {
        let mut guard = self.records.lock().unwrap_or_else(|e| e.into_inner());
        std::mem::take(&mut *guard)
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ResultSink for VecSink {
    fn put(&self, record: MetadataRecord) {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(record);
    }
}

impl ResultSink for Sender<MetadataRecord> {
    fn put(&self, record: MetadataRecord) {
        if self.send(record).is_err() {
            tracing::debug!("Result receiver dropped; discarding record");
        }
    }
}

/// Host-side associations learned during lookups. Implementations must be
/// safe to call from several workers at once.
pub trait IdentifierCache: Send + Sync {
    fn cache_cover_url(&self, asin: &str, url: &str);
    fn cached_cover_url(&self, asin: &str) -> Option<String>;
    fn cache_isbn_to_identifier(&self, isbn: &str, asin: &str);
    fn cached_isbn_to_identifier(&self, isbn: &str) -> Option<String>;
}

#[derive(Debug, Default)]
pub struct MemoryCache {
    cover_urls: RwLock<HashMap<String, String>>,
    isbns: RwLock<HashMap<String, String>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdentifierCache for MemoryCache {
    fn cache_cover_url(&self, asin: &str, url: &str) {
        self.cover_urls
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(asin.to_string(), url.to_string());
    }

    fn cached_cover_url(&self, asin: &str) -> Option<String> {
        self.cover_urls
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(asin)
            .cloned()
    }

    fn cache_isbn_to_identifier(&self, isbn: &str, asin: &str) {
        self.isbns
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(isbn.to_string(), asin.to_string());
    }

    fn cached_isbn_to_identifier(&self, isbn: &str) -> Option<String> {
        self.isbns
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(isbn)
            .cloned()
    }
}
