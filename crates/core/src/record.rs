//! The host-facing metadata record produced by a successful lookup.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use unicode_normalization::UnicodeNormalization;

/// Identifier namespace for catalog ids (ASINs).
pub const ID_NAME: &str = "audible";
/// Identifier namespace for ISBNs reported by the detail document.
pub const ISBN_NAME: &str = "isbn";

/// Identifier namespace → value, e.g. `{"audible": "B002V19RO6"}`.
pub type Identifiers = BTreeMap<String, String>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataRecord {
    pub title: String,
    pub authors: Vec<String>,
    pub identifiers: Identifiers,
    pub rating: Option<f64>,
    /// HTML: narrators paragraph followed by the summary.
    pub comments: Option<String>,
    pub publisher: Option<String>,
    pub pubdate: Option<NaiveDate>,
    pub series: Option<String>,
    pub series_index: Option<f64>,
    pub language: Option<String>,
    pub tags: Vec<String>,
    pub has_cover: bool,
    /// Dispatch position of the candidate; lower is more relevant.
    pub source_relevance: usize,
}

impl MetadataRecord {
    pub fn new(title: impl Into<String>, authors: Vec<String>) -> Self {
        Self {
            title: title.into(),
            authors,
            ..Default::default()
        }
    }

    pub fn identifier(&self, namespace: &str) -> Option<&str> {
        self.identifiers.get(namespace).map(String::as_str)
    }

    pub fn set_identifier(&mut self, namespace: &str, value: impl Into<String>) {
        self.identifiers.insert(namespace.to_string(), value.into());
    }

    /// Tidy text fields before the record is handed to the host.
    pub fn clean(&mut self) {
        self.title = tidy(&self.title);
        self.authors = self
            .authors
            .iter()
            .map(|a| tidy(a))
            .filter(|a| !a.is_empty())
            .collect();
        self.tags.retain(|t| !t.trim().is_empty());
        if let Some(p) = &self.publisher {
            self.publisher = Some(tidy(p)).filter(|p| !p.is_empty());
        }
        if let Some(s) = &self.series {
            self.series = Some(tidy(s)).filter(|s| !s.is_empty());
            if self.series.is_none() {
                self.series_index = None;
            }
        }
    }
}

fn tidy(s: &str) -> String {
    s.nfc()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Orders results for a query: an exact title match first, then results
/// that have a cover, then closer titles, then dispatch order.
pub fn compare_results(title: Option<&str>, a: &MetadataRecord, b: &MetadataRecord) -> Ordering {
    let wanted = title.map(|t| t.trim().to_lowercase());
    let score = |r: &MetadataRecord| -> (bool, f64) {
        match &wanted {
            Some(w) => {
                let have = r.title.to_lowercase();
                (have == *w, strsim::normalized_levenshtein(w, &have))
            }
            None => (false, 0.0),
        }
    };
    let (a_exact, a_sim) = score(a);
    let (b_exact, b_sim) = score(b);
    b_exact
        .cmp(&a_exact)
        .then_with(|| b.has_cover.cmp(&a.has_cover))
        .then_with(|| b_sim.partial_cmp(&a_sim).unwrap_or(Ordering::Equal))
        .then_with(|| a.source_relevance.cmp(&b.source_relevance))
}

pub fn sort_results(title: Option<&str>, results: &mut [MetadataRecord]) {
    results.sort_by(|a, b| compare_results(title, a, b));
}
