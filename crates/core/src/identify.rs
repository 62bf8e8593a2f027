//! Identify flow: search the catalog (unless the id is already known), then
//! fetch every candidate's detail document concurrently.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::config::{endpoints_from_config, genre_map_from_config, lookup_options_from_config, AppConfig, GenreConfig};
use crate::detail::DetailFetcher;
use crate::error::LookupError;
use crate::genres::GenreTagMap;
use crate::ports::{CancellationToken, Fetcher, IdentifierCache, ResultSink};
use crate::query::{self, Endpoints, LookupQuery, QueryUrl};
use crate::record::{Identifiers, ID_NAME};
use crate::tasks::{TaskGroup, WaitStatus};

#[derive(Debug, Clone)]
pub struct LookupOptions {
    pub search_timeout: Duration,
    pub detail_timeout: Duration,
    /// Delay between starting successive detail requests.
    pub stagger: Duration,
    /// Upper bound on how long the dispatcher waits before rechecking abort.
    pub poll_interval: Duration,
}

impl Default for LookupOptions {
    fn default() -> Self {
        Self {
            search_timeout: Duration::from_secs(30),
            detail_timeout: Duration::from_secs(20),
            stagger: Duration::from_millis(100),
            poll_interval: Duration::from_millis(200),
        }
    }
}

/// Summary of one identify run. Records themselves go to the sink.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentifyReport {
    /// Detail lookups started.
    pub candidates: usize,
    /// Detail lookups that ran to completion (emitted or abandoned).
    pub finished: usize,
    pub aborted: bool,
}

/// Metadata source backed by the Audible catalog search and Audnexus detail
/// documents.
#[derive(Clone)]
pub struct AudibleSource {
    endpoints: Endpoints,
    fetcher: Arc<dyn Fetcher>,
    cache: Option<Arc<dyn IdentifierCache>>,
    genres: Arc<GenreTagMap>,
    options: LookupOptions,
}

impl AudibleSource {
    pub const NAME: &'static str = "Audible";

    pub fn new(fetcher: Arc<dyn Fetcher>) -> Self {
        Self {
            endpoints: Endpoints::default(),
            fetcher,
            cache: None,
            genres: Arc::new(genre_map_from_config(&GenreConfig::default())),
            options: LookupOptions::default(),
        }
    }

    pub fn from_config(cfg: &AppConfig, fetcher: Arc<dyn Fetcher>) -> Self {
        Self::new(fetcher)
            .with_endpoints(endpoints_from_config(&cfg.lookup))
            .with_options(lookup_options_from_config(&cfg.lookup))
            .with_genres(genre_map_from_config(&cfg.genres))
    }

    pub fn with_endpoints(mut self, endpoints: Endpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    pub fn with_cache(mut self, cache: Arc<dyn IdentifierCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_genres(mut self, genres: GenreTagMap) -> Self {
        self.genres = Arc::new(genres);
        self
    }

    pub fn with_options(mut self, options: LookupOptions) -> Self {
        self.options = options;
        self
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    pub fn options(&self) -> &LookupOptions {
        &self.options
    }

    pub(crate) fn fetcher(&self) -> &dyn Fetcher {
        self.fetcher.as_ref()
    }

    pub(crate) fn has_cache(&self) -> bool {
        self.cache.is_some()
    }

    pub fn create_query(&self, query: &LookupQuery) -> Option<QueryUrl> {
        query::build_query(&self.endpoints, query)
    }

    /// Storefront link for an item the host already identified.
    pub fn book_url(&self, identifiers: &Identifiers) -> Option<(&'static str, String, String)> {
        query::book_url(&self.endpoints, identifiers)
    }

    pub fn cached_cover_url(&self, identifiers: &Identifiers) -> Option<String> {
        let asin = identifiers.get(ID_NAME)?;
        self.cache.as_ref()?.cached_cover_url(asin)
    }

    fn detail_fetcher(&self) -> DetailFetcher {
        DetailFetcher::new(
            self.fetcher.clone(),
            self.cache.clone(),
            self.genres.clone(),
            self.options.detail_timeout,
        )
    }

    /// Look up `query` and push every matching record into `sink`.
    ///
    /// A search that fails or finds nothing returns an error and emits
    /// nothing; a failing candidate only drops that candidate. Returns once
    /// every candidate finished or `abort` was cancelled.
    ///
    /// Blocking; runs its own runtime for the detail workers, so it must not
    /// be called from inside an async context.
    pub fn identify(
        &self,
        query: &LookupQuery,
        sink: Arc<dyn ResultSink>,
        abort: &CancellationToken,
    ) -> Result<IdentifyReport, LookupError> {
        tracing::info!("Title: {:?} Authors: {:?}", query.title, query.authors);

        let matches = match self.create_query(query) {
            Some(QueryUrl::Detail { url, .. }) => vec![url],
            Some(QueryUrl::Search { url }) => self.search(&url)?,
            None => {
                tracing::error!("Insufficient metadata to construct query");
                return Err(LookupError::InsufficientQuery);
            }
        };

        if abort.is_cancelled() {
            return Ok(IdentifyReport {
                aborted: true,
                ..Default::default()
            });
        }
        self.dispatch(matches, sink, abort)
    }

    /// Run the catalog search and turn each product into a detail URL.
    fn search(&self, url: &str) -> Result<Vec<String>, LookupError> {
        tracing::info!("Query: {}", url);
        let raw = match self.fetcher.get(url, self.options.search_timeout) {
            Ok(raw) => raw,
            Err(e) if e.is_not_found() => {
                tracing::error!("No matches for identify query");
                return Err(e);
            }
            Err(e) => {
                tracing::error!("Search request failed: {}", e);
                return Err(e);
            }
        };
        let asins = parse_search_response(&raw).map_err(|e| {
            tracing::error!("Failed to get Audible results for query: {}", e);
            e
        })?;
        tracing::info!("Search returned {} candidate(s)", asins.len());
        Ok(asins
            .iter()
            .filter_map(|asin| query::detail_query(&self.endpoints, asin))
            .map(|q| q.url().to_string())
            .collect())
    }

    /// One worker per candidate, started `stagger` apart; relevance is the
    /// dispatch position.
    fn dispatch(
        &self,
        urls: Vec<String>,
        sink: Arc<dyn ResultSink>,
        abort: &CancellationToken,
    ) -> Result<IdentifyReport, LookupError> {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .thread_name("audible-detail")
            .build()
            .map_err(LookupError::Workers)?;
        let report = rt.block_on(self.run_workers(urls, sink, abort));
        // Workers left running after an abort must not hold up the return.
        rt.shutdown_background();
        tracing::debug!(?report, "Identify finished");
        Ok(report)
    }

    async fn run_workers(
        &self,
        urls: Vec<String>,
        sink: Arc<dyn ResultSink>,
        abort: &CancellationToken,
    ) -> IdentifyReport {
        let worker = self.detail_fetcher();
        let mut group = TaskGroup::new("audible-detail");
        let total = urls.len();

        for (relevance, url) in urls.into_iter().enumerate() {
            if abort.is_cancelled() {
                break;
            }
            let worker = worker.clone();
            let sink = sink.clone();
            let abort = abort.clone();
            group.spawn_blocking(move || {
                worker.run(&url, relevance, sink.as_ref(), &abort);
            });
            if relevance + 1 < total && !self.options.stagger.is_zero() {
                tokio::time::sleep(self.options.stagger).await;
            }
        }

        let status = group.wait(abort, self.options.poll_interval).await;
        IdentifyReport {
            candidates: group.spawned(),
            finished: group.finished(),
            aborted: status == WaitStatus::Aborted || abort.is_cancelled(),
        }
    }
}

/// Extract the product ids from a catalog search response. Products without
/// an id are skipped.
pub fn parse_search_response(raw: &[u8]) -> Result<Vec<String>, LookupError> {
    let root: Value = serde_json::from_slice(raw).map_err(|e| LookupError::Parse(e.to_string()))?;
    let products = root
        .get("products")
        .and_then(Value::as_array)
        .ok_or_else(|| LookupError::Parse("no products list".to_string()))?;
    Ok(products
        .iter()
        .filter_map(|p| match p.get("asin").and_then(Value::as_str).map(str::trim) {
            Some(asin) if !asin.is_empty() => Some(asin.to_string()),
            _ => {
                tracing::warn!("Skipping product without asin");
                None
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{MemoryCache, VecSink};
    use crate::test_support::{orwell_detail, ScriptedFetcher};
    use serde_json::json;
    use std::time::Instant;

    const SEARCH_1984: &str = "https://api.audible.com/1.0/catalog/products?num_results=25&products_sort_by=Relevance&title=1984&author=George+Orwell";

    fn fast() -> LookupOptions {
        LookupOptions {
            stagger: Duration::from_millis(1),
            poll_interval: Duration::from_millis(5),
            ..Default::default()
        }
    }

    fn source(fetcher: ScriptedFetcher) -> (AudibleSource, Arc<ScriptedFetcher>) {
        let fetcher = Arc::new(fetcher);
        let src = AudibleSource::new(fetcher.clone()).with_options(fast());
        (src, fetcher)
    }

    fn detail(asin: &str, title: &str) -> serde_json::Value {
        json!({ "asin": asin, "title": title, "authors": [{ "name": "Someone" }] })
    }

    fn orwell_query() -> LookupQuery {
        LookupQuery::new().with_title("1984").with_author("George Orwell")
    }

    #[test]
    fn search_then_detail_emits_record() {
        let (src, _) = source(
            ScriptedFetcher::new()
                .json(SEARCH_1984, json!({ "products": [{ "asin": "B002V19RO6" }] }))
                .json("https://api.audnex.us/books/B002V19RO6", orwell_detail()),
        );
        let sink = Arc::new(VecSink::new());
        let report = src.identify(&orwell_query(), sink.clone(), &CancellationToken::new()).unwrap();
        assert_eq!(
            report,
            IdentifyReport {
                candidates: 1,
                finished: 1,
                aborted: false
            }
        );
        let records = sink.take();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].title, "1984");
        assert_eq!(records[0].authors, vec!["George Orwell"]);
        assert_eq!(records[0].identifier(ID_NAME), Some("B002V19RO6"));
    }

    #[test]
    fn known_identifier_skips_search() {
        let (src, fetcher) = source(
            ScriptedFetcher::new().json("https://api.audnex.us/books/B002V19RO6", orwell_detail()),
        );
        let query = orwell_query().with_identifier(ID_NAME, "B002V19RO6");
        let sink = Arc::new(VecSink::new());
        src.identify(&query, sink.clone(), &CancellationToken::new()).unwrap();
        assert_eq!(fetcher.calls(), vec!["https://api.audnex.us/books/B002V19RO6"]);
        assert_eq!(sink.len(), 1);
    }

    #[test]
    fn relevance_follows_dispatch_order_and_bad_candidates_are_dropped() {
        let (src, _) = source(
            ScriptedFetcher::new()
                .json(
                    SEARCH_1984,
                    json!({ "products": [
                        { "asin": "A1" }, { "asin": "A2" }, { "title": "no id" }, { "asin": "A3" }, { "asin": "A4" }
                    ]}),
                )
                .json("https://api.audnex.us/books/A1", detail("A1", "First"))
                .not_found("https://api.audnex.us/books/A2")
                .json("https://api.audnex.us/books/A3", json!({ "asin": "A3", "title": "No authors" }))
                .json("https://api.audnex.us/books/A4", detail("A4", "Fourth")),
        );
        let sink = Arc::new(VecSink::new());
        let report = src.identify(&orwell_query(), sink.clone(), &CancellationToken::new()).unwrap();
        assert_eq!(report.candidates, 4);
        assert_eq!(report.finished, 4);

        let mut records = sink.take();
        records.sort_by_key(|r| r.source_relevance);
        let got: Vec<(&str, usize)> = records.iter().map(|r| (r.title.as_str(), r.source_relevance)).collect();
        assert_eq!(got, vec![("First", 0), ("Fourth", 3)]);
    }

    #[test]
    fn insufficient_query() {
        let (src, fetcher) = source(ScriptedFetcher::new());
        let err = src
            .identify(&LookupQuery::new(), Arc::new(VecSink::new()), &CancellationToken::new())
            .unwrap_err();
        assert!(matches!(err, LookupError::InsufficientQuery));
        assert!(fetcher.calls().is_empty());
    }

    #[test]
    fn search_404_is_no_match() {
        let (src, fetcher) = source(ScriptedFetcher::new().not_found(SEARCH_1984));
        let sink = Arc::new(VecSink::new());
        let err = src.identify(&orwell_query(), sink.clone(), &CancellationToken::new()).unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(fetcher.calls().len(), 1);
        assert!(sink.is_empty());
    }

    #[test]
    fn search_transport_failure_stops() {
        let (src, _) = source(ScriptedFetcher::new().failing(SEARCH_1984, "connection refused"));
        let err = src
            .identify(&orwell_query(), Arc::new(VecSink::new()), &CancellationToken::new())
            .unwrap_err();
        assert!(matches!(err, LookupError::Transport { .. }));
    }

    #[test]
    fn malformed_search_response() {
        let (src, _) = source(ScriptedFetcher::new().json(SEARCH_1984, json!({ "items": [] })));
        let err = src
            .identify(&orwell_query(), Arc::new(VecSink::new()), &CancellationToken::new())
            .unwrap_err();
        assert!(matches!(err, LookupError::Parse(_)));
    }

    #[test]
    fn empty_product_list_dispatches_nothing() {
        let (src, _) = source(ScriptedFetcher::new().json(SEARCH_1984, json!({ "products": [] })));
        let report = src
            .identify(&orwell_query(), Arc::new(VecSink::new()), &CancellationToken::new())
            .unwrap();
        assert_eq!(report, IdentifyReport::default());
    }

    #[test]
    fn abort_before_dispatch() {
        let (src, fetcher) = source(
            ScriptedFetcher::new().json(SEARCH_1984, json!({ "products": [{ "asin": "A1" }] })),
        );
        let abort = CancellationToken::new();
        abort.cancel();
        let report = src.identify(&orwell_query(), Arc::new(VecSink::new()), &abort).unwrap();
        assert!(report.aborted);
        assert_eq!(report.candidates, 0);
        assert_eq!(fetcher.calls().len(), 1);
    }

    /// Cancels the lookup as soon as the first record arrives.
    struct AbortOnFirst {
        abort: CancellationToken,
        inner: VecSink,
    }

    impl ResultSink for AbortOnFirst {
        fn put(&self, record: crate::record::MetadataRecord) {
            self.inner.put(record);
            self.abort.cancel();
        }
    }

    #[test]
    fn abort_mid_flight_stops_polling_without_waiting() {
        let (src, _) = source(
            ScriptedFetcher::new()
                .json(SEARCH_1984, json!({ "products": [{ "asin": "A1" }, { "asin": "A2" }] }))
                .json("https://api.audnex.us/books/A1", detail("A1", "Quick"))
                .json_after(
                    "https://api.audnex.us/books/A2",
                    detail("A2", "Slow"),
                    Duration::from_secs(3),
                ),
        );
        let abort = CancellationToken::new();
        let sink = Arc::new(AbortOnFirst {
            abort: abort.clone(),
            inner: VecSink::new(),
        });

        let start = Instant::now();
        let report = src.identify(&orwell_query(), sink.clone(), &abort).unwrap();
        assert!(start.elapsed() < Duration::from_secs(2));
        assert!(report.aborted);
        assert_eq!(sink.inner.take().len(), 1);
    }

    #[test]
    fn cached_cover_url_uses_cache() {
        let cache = Arc::new(MemoryCache::new());
        cache.cache_cover_url("B1", "https://img/b1.jpg");
        let src = AudibleSource::new(Arc::new(ScriptedFetcher::new())).with_cache(cache);
        let mut ids = Identifiers::new();
        assert_eq!(src.cached_cover_url(&ids), None);
        ids.insert(ID_NAME.to_string(), "B1".to_string());
        assert_eq!(src.cached_cover_url(&ids).as_deref(), Some("https://img/b1.jpg"));
    }

    #[test]
    fn parse_search_response_variants() {
        assert_eq!(
            parse_search_response(br#"{"products":[{"asin":"B002V19RO6"},{"asin":""}]}"#).unwrap(),
            vec!["B002V19RO6"]
        );
        assert!(parse_search_response(b"null").is_err());
        assert!(parse_search_response(b"not json").is_err());
    }
}
