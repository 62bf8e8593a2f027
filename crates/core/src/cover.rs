//! Cover image download.

use std::borrow::Cow;
use std::sync::Arc;

use crate::identify::AudibleSource;
use crate::ports::{CancellationToken, MemoryCache, VecSink};
use crate::query::LookupQuery;
use crate::record::sort_results;

impl AudibleSource {
    /// Download the cover for `query`.
    ///
    /// Uses the cached cover URL for a known id; otherwise runs identify and
    /// takes the cover of the best-ranked result. Every failure, including an
    /// abort, ends in `None`.
    pub fn download_cover(&self, query: &LookupQuery, abort: &CancellationToken) -> Option<Vec<u8>> {
        let mut cover_url = self.cached_cover_url(&query.identifiers);

        if cover_url.is_none() {
            tracing::info!("No cached cover found, running identify");
            // Identify only reports cover URLs through the cache.
            let source: Cow<'_, AudibleSource> = if self.has_cache() {
                Cow::Borrowed(self)
            } else {
                Cow::Owned(self.clone().with_cache(Arc::new(MemoryCache::new())))
            };
            let sink = Arc::new(VecSink::new());
            if let Err(e) = source.identify(query, sink.clone(), abort) {
                tracing::info!("Identify for cover failed: {}", e);
            }
            if abort.is_cancelled() {
                return None;
            }
            let mut results = sink.take();
            sort_results(query.title.as_deref(), &mut results);
            cover_url = results
                .iter()
                .find_map(|mi| source.cached_cover_url(&mi.identifiers));
        }

        let Some(cover_url) = cover_url else {
            tracing::info!("No cover found");
            return None;
        };
        if abort.is_cancelled() {
            return None;
        }

        tracing::info!("Downloading cover from: {}", cover_url);
        match self.fetcher().get(&cover_url, self.options().search_timeout) {
            Ok(data) if !data.is_empty() => Some(data),
            Ok(_) => {
                tracing::error!("Empty cover image from: {}", cover_url);
                None
            }
            Err(e) => {
                tracing::error!("Failed to download cover from {}: {}", cover_url, e);
                None
            }
        }
    }
}
