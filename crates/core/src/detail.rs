//! Detail document fetch and field mapping for a single candidate.
//!
//! Every field is extracted on its own. A field that is missing or malformed
//! is logged and left out of the record; only the id, title and authors are
//! required for a record to be emitted.

use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, NaiveDateTime};
use serde_json::Value;

use crate::error::{FieldError, LookupError};
use crate::genres::GenreTagMap;
use crate::ports::{CancellationToken, Fetcher, IdentifierCache, ResultSink};
use crate::record::{MetadataRecord, ID_NAME, ISBN_NAME};

const RELEASE_DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.fZ";

/// Fields pulled out of one detail document. `None` means the field was
/// absent or failed to parse.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetailFields {
    pub asin: Option<String>,
    pub title: Option<String>,
    pub authors: Option<Vec<String>>,
    pub narrators: Option<Vec<String>>,
    pub series: Option<(String, f64)>,
    pub rating: Option<f64>,
    pub summary: Option<String>,
    pub cover_url: Option<String>,
    pub tags: Option<Vec<String>>,
    pub publisher: Option<String>,
    pub pubdate: Option<NaiveDate>,
    pub language: Option<String>,
    pub isbn: Option<String>,
}

impl DetailFields {
    /// Extract all fields from a detail document, logging each failure
    /// against `url`.
    pub fn parse(root: &Value, genres: &GenreTagMap, url: &str) -> Self {
        Self {
            asin: keep(url, parse_string(root, "asin")),
            title: keep(url, parse_string(root, "title")),
            authors: keep(url, parse_names(root, "authors")),
            narrators: keep(url, parse_names(root, "narrators")),
            series: keep(url, parse_series(root)).flatten(),
            rating: keep(url, parse_rating(root)),
            summary: keep(url, parse_string(root, "summary")),
            cover_url: keep(url, parse_string(root, "image")),
            tags: keep(url, parse_tags(root, genres)),
            publisher: keep(url, parse_string(root, "publisherName")),
            pubdate: keep(url, parse_string(root, "releaseDate").and_then(|s| parse_release_date(&s))),
            language: keep(url, parse_string(root, "language").map(|s| capitalize(&s))),
            isbn: keep(url, parse_optional_string(root, "isbn")).flatten(),
        }
    }

    /// Names of the required fields that are missing.
    pub fn missing_required(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.asin.is_none() {
            missing.push("asin");
        }
        if self.title.is_none() {
            missing.push("title");
        }
        if self.authors.as_ref().map_or(true, |a| a.is_empty()) {
            missing.push("authors");
        }
        missing
    }

    /// Assemble the host record, or fail validation if a required field is
    /// missing.
    pub fn into_record(self, relevance: usize) -> Result<MetadataRecord, LookupError> {
        let missing = self.missing_required();
        let (Some(asin), Some(title), Some(authors)) = (self.asin, self.title, self.authors) else {
            return Err(LookupError::Validation { missing });
        };
        if !missing.is_empty() {
            return Err(LookupError::Validation { missing });
        }

        let mut mi = MetadataRecord::new(title, authors);
        mi.set_identifier(ID_NAME, asin);
        if let Some(isbn) = &self.isbn {
            mi.set_identifier(ISBN_NAME, isbn.clone());
        }
        if let Some((series, index)) = self.series {
            mi.series = Some(series);
            mi.series_index = Some(index);
        }
        mi.rating = self.rating;
        mi.comments = build_comments(self.narrators.as_deref(), self.summary.as_deref());
        mi.has_cover = self.cover_url.as_deref().is_some_and(|u| !u.is_empty());
        mi.tags = self.tags.unwrap_or_default();
        mi.publisher = self.publisher;
        mi.pubdate = self.pubdate;
        mi.language = self.language;
        mi.source_relevance = relevance;
        Ok(mi)
    }
}

fn keep<T>(url: &str, r: Result<T, FieldError>) -> Option<T> {
    match r {
        Ok(v) => Some(v),
        Err(e) => {
            tracing::warn!("Error parsing {} for url {}: {}", e.field, url, e.detail);
            None
        }
    }
}

fn parse_string(root: &Value, field: &'static str) -> Result<String, FieldError> {
    match root.get(field) {
        None | Some(Value::Null) => Err(FieldError::missing(field)),
        Some(Value::String(s)) if s.trim().is_empty() => Err(FieldError::new(field, "empty")),
        Some(Value::String(s)) => Ok(s.trim().to_string()),
        Some(other) => Err(FieldError::new(field, format!("expected string, got {}", other))),
    }
}

/// Like `parse_string`, but absence is not an error.
fn parse_optional_string(root: &Value, field: &'static str) -> Result<Option<String>, FieldError> {
    match root.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(_) => parse_string(root, field).map(Some),
    }
}

/// `[{"name": ...}, ...]` → names. One entry without a name string fails
/// the field; blank names are skipped.
fn parse_names(root: &Value, field: &'static str) -> Result<Vec<String>, FieldError> {
    let items = root
        .get(field)
        .ok_or_else(|| FieldError::missing(field))?
        .as_array()
        .ok_or_else(|| FieldError::new(field, "expected array"))?;
    let mut names = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        let name = item
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| FieldError::new(field, format!("entry {} has no name", i)))?;
        let name = name.trim();
        if !name.is_empty() {
            names.push(name.to_string());
        }
    }
    Ok(names)
}

fn parse_series(root: &Value) -> Result<Option<(String, f64)>, FieldError> {
    let node = match root.get("seriesPrimary").or_else(|| root.get("series")) {
        None | Some(Value::Null) => return Ok(None),
        Some(node) => node,
    };
    let name = node
        .get("name")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .ok_or_else(|| FieldError::new("series", "missing name"))?;
    let position = node
        .get("position")
        .and_then(Value::as_str)
        .ok_or_else(|| FieldError::new("series", "missing position"))?;
    let index = parse_series_index(position)?;
    Ok(Some((name.to_string(), index)))
}

/// Parse a `"<label> <number>"` position such as `"Book 3"`. Anything else,
/// including a bare number, is a parse failure.
pub fn parse_series_index(position: &str) -> Result<f64, FieldError> {
    let token = position
        .split_whitespace()
        .nth(1)
        .ok_or_else(|| FieldError::new("series", format!("no index in position '{}'", position)))?;
    match token.parse::<f64>() {
        Ok(n) if n.is_finite() => Ok(n),
        _ => Err(FieldError::new(
            "series",
            format!("index '{}' is not a number", token),
        )),
    }
}

fn parse_rating(root: &Value) -> Result<f64, FieldError> {
    let rating = match root.get("rating") {
        None | Some(Value::Null) => return Err(FieldError::missing("rating")),
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        Some(_) => None,
    };
    rating
        .filter(|r| r.is_finite())
        .ok_or_else(|| FieldError::new("rating", "not a number"))
}

fn parse_tags(root: &Value, genres: &GenreTagMap) -> Result<Vec<String>, FieldError> {
    let names = parse_names(root, "genres")?;
    Ok(genres.map_genres(&names))
}

pub fn parse_release_date(text: &str) -> Result<NaiveDate, FieldError> {
    NaiveDateTime::parse_from_str(text, RELEASE_DATE_FORMAT)
        .map(|dt| dt.date())
        .or_else(|_| NaiveDate::parse_from_str(text, "%Y-%m-%d"))
        .map_err(|e| FieldError::new("releaseDate", format!("'{}': {}", text, e)))
}

/// First character upper-cased, the rest lower-cased.
fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

/// Narrators paragraph followed by the summary HTML.
pub fn build_comments(narrators: Option<&[String]>, summary: Option<&str>) -> Option<String> {
    let mut comments = String::new();
    if let Some(narrators) = narrators.filter(|n| !n.is_empty()) {
        let names: Vec<String> = narrators.iter().map(|n| escape_html(n)).collect();
        comments.push_str(&format!("<p id=\"narrators\">Narrators: {}</p>", names.join(", ")));
    }
    if let Some(summary) = summary {
        comments.push_str(summary);
    }
    if comments.is_empty() {
        None
    } else {
        Some(comments)
    }
}

/// How a detail task ended.
#[derive(Debug)]
pub enum DetailOutcome {
    Emitted,
    Abandoned(LookupError),
    Aborted,
}

/// Fetches one detail document and maps it to a record. Cheap to clone; one
/// clone runs per candidate.
#[derive(Clone)]
pub struct DetailFetcher {
    fetcher: Arc<dyn Fetcher>,
    cache: Option<Arc<dyn IdentifierCache>>,
    genres: Arc<GenreTagMap>,
    timeout: Duration,
}

impl DetailFetcher {
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        cache: Option<Arc<dyn IdentifierCache>>,
        genres: Arc<GenreTagMap>,
        timeout: Duration,
    ) -> Self {
        Self {
            fetcher,
            cache,
            genres,
            timeout,
        }
    }

    /// Fetch and parse `url` into a record ranked at `relevance`. Records the
    /// cover URL and ISBN in the host cache on success.
    pub fn fetch(&self, url: &str, relevance: usize) -> Result<MetadataRecord, LookupError> {
        tracing::info!("Detail url: {}", url);
        let raw = self.fetcher.get(url, self.timeout)?;
        let root: Value =
            serde_json::from_slice(&raw).map_err(|e| LookupError::Parse(e.to_string()))?;
        if is_empty_document(&root) {
            return Err(LookupError::Parse("empty detail document".to_string()));
        }

        let fields = DetailFields::parse(&root, &self.genres, url);
        let cover_url = fields.cover_url.clone();
        let isbn = fields.isbn.clone();
        let mut mi = fields.into_record(relevance)?;
        tracing::debug!(asin = ?mi.identifier(ID_NAME), title = %mi.title, "Parsed detail");

        if let (Some(cache), Some(asin)) = (&self.cache, mi.identifier(ID_NAME)) {
            if let Some(isbn) = &isbn {
                cache.cache_isbn_to_identifier(isbn, asin);
            }
            if let Some(cover) = cover_url.as_deref().filter(|c| !c.is_empty()) {
                cache.cache_cover_url(asin, cover);
            }
        }

        mi.clean();
        Ok(mi)
    }

    /// Run one candidate to completion: fetch, parse, and push the record
    /// into `sink` unless `abort` was cancelled meanwhile. Failures are
    /// logged and only affect this candidate.
    pub fn run(
        &self,
        url: &str,
        relevance: usize,
        sink: &dyn ResultSink,
        abort: &CancellationToken,
    ) -> DetailOutcome {
        if abort.is_cancelled() {
            return DetailOutcome::Aborted;
        }
        match self.fetch(url, relevance) {
            Ok(mi) => {
                if abort.is_cancelled() {
                    return DetailOutcome::Aborted;
                }
                sink.put(mi);
                DetailOutcome::Emitted
            }
            Err(e) => {
                match &e {
                    LookupError::NotFound { .. } => tracing::error!("No detail document at {}", url),
                    LookupError::Timeout { .. } => {
                        tracing::error!("Detail request timed out, try again later: {}", url)
                    }
                    LookupError::Validation { missing } => tracing::error!(
                        "Could not find {} for {}",
                        missing.join("/"),
                        url
                    ),
                    _ => tracing::error!("Failed to make details query {}: {}", url, e),
                }
                DetailOutcome::Abandoned(e)
            }
        }
    }
}

fn is_empty_document(root: &Value) -> bool {
    match root {
        Value::Null => true,
        Value::Object(m) => m.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}
