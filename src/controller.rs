//! Pagination and search controller
//!
//! [`NotesController`] owns the user-facing `(page, search)` state of the
//! notes list and keeps exactly one "current" subscription on the query
//! cache. When the inputs change it subscribes to the new fingerprint first
//! and keeps the previous subscription as a placeholder until the new one has
//! data, so paging and searching never flash an empty list.

use crate::backend::{list_fetch, NotesBackend};
use crate::cache::{CacheEntry, Fingerprint, QueryCache, QueryResult, Subscription};
use crate::config::AppConfig;
use crate::debounce::Debouncer;
use crate::error::ErrorKind;
use crate::hydration::ClientBootstrap;
use crate::mutation::{MutationCoordinator, NoteForm};
use crate::notify::{Notification, Notifier};
use crate::schema::{ListNotesQuery, NoteSummary};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

pub const LOAD_FAILURE_MESSAGE: &str = "Failed to load notes";

/// What the notes list should render
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotesView {
    pub items: Vec<NoteSummary>,
    pub page: u32,
    /// Text in the search box
    pub search: String,
    /// Search the items were queried with
    pub committed_search: String,
    pub total_pages: u32,
    pub total_items: u64,
    /// Nothing to show yet
    pub is_loading: bool,
    pub is_fetching: bool,
    /// Items belong to an older result than the current inputs
    pub is_placeholder: bool,
    pub error: Option<ErrorKind>,
    pub show_pagination: bool,
}

impl NotesView {
    /// Loaded, and nothing matched
    pub fn is_empty(&self) -> bool {
        !self.is_loading && self.items.is_empty()
    }
}

/// Controller of one mounted notes list
pub struct NotesController {
    config: AppConfig,
    cache: QueryCache<NoteSummary>,
    backend: Arc<dyn NotesBackend>,
    notifier: Arc<dyn Notifier>,
    coordinator: MutationCoordinator,

    debouncer: Debouncer<String>,
    committed: watch::Receiver<String>,

    page: u32,
    committed_search: String,

    current: Option<Subscription<NoteSummary>>,
    placeholder: Option<Subscription<NoteSummary>>,

    /// `(fingerprint key, error count)` of the last failure reported
    reported_failure: Option<(String, u64)>,
}

impl NotesController {
    /// Mount the list at `initial_page` / `initial_search`
    pub async fn mount(
        cache: QueryCache<NoteSummary>,
        backend: Arc<dyn NotesBackend>,
        notifier: Arc<dyn Notifier>,
        config: AppConfig,
        initial_page: u32,
        initial_search: &str,
    ) -> Self {
        let debouncer = Debouncer::new(initial_search.to_string(), config.debounce);
        let committed = debouncer.subscribe();
        let coordinator =
            MutationCoordinator::new(Arc::clone(&backend), cache.clone(), Arc::clone(&notifier))
                .with_namespace(config.namespace.clone());

        let mut controller = Self {
            config,
            cache,
            backend,
            notifier,
            coordinator,
            debouncer,
            committed,
            page: initial_page.max(1),
            committed_search: initial_search.to_string(),
            current: None,
            placeholder: None,
            reported_failure: None,
        };
        controller.subscribe_current().await;
        info!("Mounted notes list at {}", controller.fingerprint());

        controller
    }

    /// Hydrate the cache from a server snapshot, then mount at its inputs
    pub async fn bootstrap(
        cache: QueryCache<NoteSummary>,
        backend: Arc<dyn NotesBackend>,
        notifier: Arc<dyn Notifier>,
        config: AppConfig,
        bootstrap: ClientBootstrap,
    ) -> Self {
        let ClientBootstrap {
            initial_page,
            initial_search,
            state,
        } = bootstrap;
        cache.hydrate(state).await;

        Self::mount(cache, backend, notifier, config, initial_page, &initial_search).await
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn raw_search(&self) -> &str {
        self.debouncer.raw()
    }

    pub fn committed_search(&self) -> &str {
        &self.committed_search
    }

    /// Fingerprint of the current inputs
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::list(&self.config.namespace, Some(self.committed_search.as_str()), self.page)
    }

    /// Record a keystroke in the search box
    pub fn input_search(&mut self, raw: impl Into<String>) {
        self.debouncer.update(raw.into());
    }

    /// Wait for the pending search input to be committed and apply it
    ///
    /// Returns `false` without waiting when no input is pending, or when the
    /// commit did not change the search.
    pub async fn wait_for_search_commit(&mut self) -> bool {
        loop {
            let committed = self.committed.borrow_and_update().clone();
            if committed != self.committed_search {
                return self.apply_committed(committed).await;
            }
            if !self.debouncer.is_pending() {
                self.retry().await;
                return false;
            }
            // An unchanged commit is not published; re-check once the
            // quiet period has passed
            let _ = tokio::time::timeout(self.debouncer.delay(), self.committed.changed()).await;
        }
    }

    /// Switch to a committed search; a changed search restarts at page 1
    ///
    /// An unchanged search re-attempts a failed load.
    pub async fn apply_committed(&mut self, search: String) -> bool {
        if search == self.committed_search {
            self.retry().await;
            return false;
        }

        debug!("Search committed: {:?} (was {:?})", search, self.committed_search);
        self.committed_search = search;
        self.page = 1;
        self.subscribe_current().await;
        true
    }

    /// Go to `page`, keeping the search
    ///
    /// Staying on the same page re-attempts a failed load.
    pub async fn set_page(&mut self, page: u32) {
        let page = page.max(1);
        if page == self.page {
            self.retry().await;
            return;
        }

        debug!("Page change: {} -> {}", self.page, page);
        self.page = page;
        self.subscribe_current().await;
    }

    /// Retry the current query after a failure
    pub async fn retry(&mut self) -> bool {
        let Some(current) = &self.current else {
            return false;
        };
        if !current.snapshot().is_error() {
            return false;
        }

        self.cache.refetch(current.fingerprint()).await
    }

    /// Wait for the current query to finish loading, then update the view
    pub async fn settle(&mut self) -> NotesView {
        if let Some(current) = self.current.as_mut() {
            current.settled().await;
        }
        self.sync().await;
        self.view()
    }

    /// Wait for the next change of the current query, then update the view
    ///
    /// Returns `None` once the current entry is gone.
    pub async fn next_view(&mut self) -> Option<NotesView> {
        let current = self.current.as_mut()?;
        current.changed().await?;
        self.sync().await;
        Some(self.view())
    }

    /// Render state from the current and placeholder subscriptions
    pub fn view(&self) -> NotesView {
        let current = self.current.as_ref().map(Subscription::snapshot);
        let placeholder = self.placeholder.as_ref().map(Subscription::snapshot);

        let own = current.as_ref().and_then(CacheEntry::visible_data);
        let shown: Option<&QueryResult<NoteSummary>> =
            own.or_else(|| placeholder.as_ref().and_then(CacheEntry::visible_data));

        let has_current_data = current.as_ref().map(|e| e.data.is_some()).unwrap_or(false);
        let error = current.as_ref().and_then(|e| e.error.clone());
        let total_pages = shown.map(|d| d.total_pages).unwrap_or(1);

        NotesView {
            items: shown.map(|d| d.items.clone()).unwrap_or_default(),
            page: self.page,
            search: self.debouncer.raw().clone(),
            committed_search: self.committed_search.clone(),
            total_pages,
            total_items: shown.map(|d| d.total_items).unwrap_or(0),
            is_loading: shown.is_none() && error.is_none(),
            is_fetching: current.as_ref().map(CacheEntry::is_fetching).unwrap_or(false),
            is_placeholder: shown.is_some() && !has_current_data,
            error,
            show_pagination: shown.is_some() && total_pages > 1,
        }
    }

    /// A creation dialog bound to this list's cache
    pub fn open_form(&self) -> NoteForm {
        NoteForm::new(self.coordinator.clone())
    }

    /// Unmount: cancel pending input and release every subscription
    pub async fn teardown(&mut self) {
        self.debouncer.cancel();
        for subscription in [self.current.take(), self.placeholder.take()].into_iter().flatten() {
            self.cache.release(subscription.fingerprint()).await;
        }
        info!("Unmounted notes list");
    }

    /// Subscribe to the fingerprint of the current inputs
    async fn subscribe_current(&mut self) {
        let fingerprint = self.fingerprint();
        if self.current.as_ref().map(|s| s.fingerprint() == &fingerprint).unwrap_or(false) {
            return;
        }

        let query = ListNotesQuery::new(&self.committed_search, self.page, self.config.per_page);
        let fetch = list_fetch(Arc::clone(&self.backend), query);
        let next = self.cache.get_or_fetch(fingerprint, fetch).await;

        if let Some(previous) = self.current.replace(next) {
            let previous_has_data = previous.snapshot().visible_data().is_some();
            if previous_has_data {
                // The newer result becomes the placeholder
                if let Some(stale) = self.placeholder.replace(previous) {
                    self.cache.release(stale.fingerprint()).await;
                }
            } else {
                self.cache.release(previous.fingerprint()).await;
            }
        }
        self.sync().await;
    }

    /// Drop the placeholder once current data exists; report new failures
    async fn sync(&mut self) {
        let Some(current) = self.current.as_ref().map(Subscription::snapshot) else {
            return;
        };

        if current.data.is_some() {
            if let Some(placeholder) = self.placeholder.take() {
                debug!("Releasing placeholder {}", placeholder.fingerprint());
                self.cache.release(placeholder.fingerprint()).await;
            }
        }

        if current.is_error() {
            let failure = (current.fingerprint.stable_key(), current.metadata.error_count);
            if self.reported_failure.as_ref() != Some(&failure) {
                self.notifier.notify(Notification::error(LOAD_FAILURE_MESSAGE));
                self.reported_failure = Some(failure);
            }
        }
    }
}

/// Releases whatever a list dropped without [`NotesController::teardown`]
/// still holds, so its entries can be evicted
impl Drop for NotesController {
    fn drop(&mut self) {
        let held: Vec<Fingerprint> = [self.current.take(), self.placeholder.take()]
            .into_iter()
            .flatten()
            .map(|subscription| subscription.fingerprint().clone())
            .collect();
        if held.is_empty() {
            return;
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("Notes list dropped outside a runtime, {} subscriptions leaked", held.len());
            return;
        };
        let cache = self.cache.clone();
        runtime.spawn(async move {
            for fingerprint in &held {
                cache.release(fingerprint).await;
            }
            debug!("Released {} subscriptions of a dropped notes list", held.len());
        });
    }
}
