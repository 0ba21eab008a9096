//! Server prefetch and client hydration
//!
//! The server derives `(search, page)` from the request, prefetches that page
//! into a short-lived cache and ships the dehydrated snapshot together with
//! the initial inputs. The client seeds its cache from the snapshot before
//! its first subscription, so the first render is served without a fetch.
//! Both sides build the fingerprint with [`Fingerprint::list`] from the same
//! normalized inputs.

use crate::backend::{list_fetch, NotesBackend};
use crate::cache::{normalize_page, normalize_search, Fingerprint, QueryCache, QueryResult};
use crate::config::AppConfig;
use crate::error::{NotesError, Result};
use crate::schema::{ListNotesQuery, NoteSummary};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use url::{form_urlencoded, Url};

/// Navigation inputs of the notes page, as received
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestParams {
    pub page: Option<String>,
    pub search: Option<String>,
}

impl RequestParams {
    pub fn new(page: Option<&str>, search: Option<&str>) -> Self {
        Self {
            page: page.map(str::to_string),
            search: search.map(str::to_string),
        }
    }

    /// Parse `page` and `search` from a query string
    ///
    /// A leading `?` is ignored. For a repeated key the first value wins.
    pub fn from_query(query: &str) -> Self {
        let query = query.strip_prefix('?').unwrap_or(query);
        let mut params = Self::default();

        for (key, value) in form_urlencoded::parse(query.as_bytes()) {
            match key.as_ref() {
                "page" if params.page.is_none() => params.page = Some(value.into_owned()),
                "search" if params.search.is_none() => params.search = Some(value.into_owned()),
                _ => {}
            }
        }

        params
    }

    /// Parse the query string of a full URL
    pub fn from_url(url: &Url) -> Self {
        Self::from_query(url.query().unwrap_or_default())
    }

    /// Normalized page number
    pub fn page(&self) -> u32 {
        normalize_page(self.page.as_deref())
    }

    /// Normalized search text
    pub fn search(&self) -> String {
        normalize_search(self.search.as_deref())
    }

    pub fn fingerprint(&self, namespace: &str) -> Fingerprint {
        Fingerprint::list(namespace, Some(self.search().as_str()), self.page())
    }

    pub fn list_query(&self, per_page: u32) -> ListNotesQuery {
        ListNotesQuery::new(&self.search(), self.page(), per_page)
    }
}

/// One prefetched query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DehydratedQuery<T> {
    /// Stable string form of `fingerprint`
    pub key: String,
    pub fingerprint: Fingerprint,
    pub data: QueryResult<T>,
}

/// Transport form of the successful entries of a cache
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DehydratedState<T> {
    pub queries: Vec<DehydratedQuery<T>>,
}

impl<T> Default for DehydratedState<T> {
    fn default() -> Self {
        Self {
            queries: Vec::new(),
        }
    }
}

impl<T> DehydratedState<T> {
    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queries.len()
    }

    /// Find the snapshot of `fingerprint`
    pub fn get(&self, fingerprint: &Fingerprint) -> Option<&QueryResult<T>> {
        self.queries
            .iter()
            .find(|q| &q.fingerprint == fingerprint)
            .map(|q| &q.data)
    }
}

impl<T: Serialize> DehydratedState<T> {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

impl<T: DeserializeOwned> DehydratedState<T> {
    pub fn from_json(payload: &str) -> Result<Self> {
        serde_json::from_str(payload)
            .map_err(|e| NotesError::InvalidPayload(format!("malformed dehydrated state: {}", e)))
    }
}

/// Everything the client needs to render its first frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientBootstrap {
    pub initial_page: u32,
    pub initial_search: String,
    pub state: DehydratedState<NoteSummary>,
}

impl ClientBootstrap {
    /// Fingerprint the client will compute for its first render
    pub fn fingerprint(&self, namespace: &str) -> Fingerprint {
        Fingerprint::list(namespace, Some(self.initial_search.as_str()), self.initial_page)
    }
}

/// Prefetch the page a request asks for
///
/// A failed fetch does not fail the request: the state is shipped empty and
/// the client fetches on its own.
pub async fn prefetch_notes(
    backend: Arc<dyn NotesBackend>,
    params: &RequestParams,
    config: &AppConfig,
) -> ClientBootstrap {
    let fingerprint = params.fingerprint(&config.namespace);
    let query = params.list_query(config.per_page);

    let cache: QueryCache<NoteSummary> = QueryCache::new(config.cache.clone());
    let mut subscription = cache
        .get_or_fetch(fingerprint.clone(), list_fetch(backend, query))
        .await;
    let entry = subscription.settled().await;

    if let Some(error) = &entry.error {
        warn!("Prefetch of {} failed, client will fetch: {}", fingerprint, error);
    }

    let state = cache.dehydrate().await;
    cache.clear().await;
    info!("Prefetched {} ({} queries dehydrated)", fingerprint, state.len());

    ClientBootstrap {
        initial_page: params.page(),
        initial_search: params.search(),
        state,
    }
}
