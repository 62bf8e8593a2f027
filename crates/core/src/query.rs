//! Query construction for the catalog search and detail endpoints.

use reqwest::Url;

use crate::record::{Identifiers, ID_NAME};

/// Hosts the lookup talks to. Tests point these at a local mock server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    /// Catalog search API, e.g. `https://api.audible.com`.
    pub api_host: String,
    /// Detail document API, e.g. `https://api.audnex.us`.
    pub detail_host: String,
    /// Public storefront, used for view-item links.
    pub site_host: String,
    pub max_results: u32,
}

impl Endpoints {
    pub const AUDIBLE_URL: &'static str = "https://www.audible.com";
    pub const AUDIBLE_API_URL: &'static str = "https://api.audible.com";
    pub const AUDNEXUS_URL: &'static str = "https://api.audnex.us";

    const SEARCH_SEGMENTS: [&'static str; 3] = ["1.0", "catalog", "products"];
    const DETAIL_SEGMENT: &'static str = "books";
    const VIEW_SEGMENT: &'static str = "pd";
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            api_host: Self::AUDIBLE_API_URL.to_string(),
            detail_host: Self::AUDNEXUS_URL.to_string(),
            site_host: Self::AUDIBLE_URL.to_string(),
            max_results: 25,
        }
    }
}

/// What the host knows about the title being looked up.
#[derive(Debug, Clone, Default)]
pub struct LookupQuery {
    pub title: Option<String>,
    pub authors: Vec<String>,
    pub identifiers: Identifiers,
}

impl LookupQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.authors.push(author.into());
        self
    }

    pub fn with_identifier(mut self, namespace: &str, value: impl Into<String>) -> Self {
        self.identifiers.insert(namespace.to_string(), value.into());
        self
    }

    /// The known catalog id, if any. Blank values count as absent.
    pub fn asin(&self) -> Option<&str> {
        non_blank(self.identifiers.get(ID_NAME).map(String::as_str))
    }

    fn title_term(&self) -> Option<&str> {
        non_blank(self.title.as_deref())
    }

    fn author_term(&self) -> Option<&str> {
        non_blank(self.authors.first().map(String::as_str))
    }
}

fn non_blank(s: Option<&str>) -> Option<&str> {
    s.map(str::trim).filter(|s| !s.is_empty())
}

/// A built request URL and the kind of document it returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryUrl {
    /// Detail document for one known id.
    Detail { asin: String, url: String },
    /// Catalog search returning a `products` list.
    Search { url: String },
}

impl QueryUrl {
    pub fn url(&self) -> &str {
        match self {
            QueryUrl::Detail { url, .. } | QueryUrl::Search { url } => url,
        }
    }
}

/// Build the request for a query. A known id always wins and yields the
/// detail form; otherwise title and/or first author produce a search.
/// `None` means there is not enough to go on.
pub fn build_query(endpoints: &Endpoints, query: &LookupQuery) -> Option<QueryUrl> {
    if let Some(asin) = query.asin() {
        return detail_query(endpoints, asin);
    }
    let title = query.title_term();
    let author = query.author_term();
    if title.is_none() && author.is_none() {
        return None;
    }

    let mut url = with_segments(&endpoints.api_host, &Endpoints::SEARCH_SEGMENTS)?;
    {
        let mut pairs = url.query_pairs_mut();
        pairs
            .append_pair("num_results", &endpoints.max_results.to_string())
            .append_pair("products_sort_by", "Relevance");
        if let Some(t) = title {
            pairs.append_pair("title", t);
        }
        if let Some(a) = author {
            pairs.append_pair("author", a);
        }
    }
    Some(QueryUrl::Search { url: url.into() })
}

/// Detail document URL for a catalog id: `{detail_host}/books/{id}`.
pub fn detail_query(endpoints: &Endpoints, asin: &str) -> Option<QueryUrl> {
    let asin = asin.trim();
    if asin.is_empty() {
        return None;
    }
    let url = with_segments(&endpoints.detail_host, &[Endpoints::DETAIL_SEGMENT, asin])?;
    Some(QueryUrl::Detail {
        asin: asin.to_string(),
        url: url.into(),
    })
}

/// Storefront link for displaying an item: `(namespace, id, url)`.
pub fn book_url(endpoints: &Endpoints, identifiers: &Identifiers) -> Option<(&'static str, String, String)> {
    let asin = non_blank(identifiers.get(ID_NAME).map(String::as_str))?;
    let mut url = with_segments(&endpoints.site_host, &[Endpoints::VIEW_SEGMENT, asin])?;
    url.set_query(Some("ipRedirectOverride=true"));
    Some((ID_NAME, asin.to_string(), url.into()))
}

fn parse_host(host: &str) -> Option<Url> {
    match Url::parse(host) {
        Ok(u) if !u.cannot_be_a_base() => Some(u),
        Ok(_) | Err(_) => {
            tracing::error!("Invalid endpoint host: {}", host);
            None
        }
    }
}

fn with_segments(host: &str, segments: &[&str]) -> Option<Url> {
    let mut url = parse_host(host)?;
    url.path_segments_mut().ok()?.pop_if_empty().extend(segments);
    Some(url)
}
