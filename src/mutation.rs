//! Note creation
//!
//! [`MutationCoordinator`] performs a create, invalidates every list view it
//! may have changed and reports the outcome. [`NoteForm`] adds the state of
//! the creation dialog on top of it.

use crate::backend::NotesBackend;
use crate::cache::{InvalidationReason, NamespaceInvalidation, QueryCache, NOTES_NAMESPACE};
use crate::error::{NotesError, Result};
use crate::notify::{Notification, Notifier};
use crate::schema::{NoteDraft, NoteSummary, NoteTag};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const CREATE_SUCCESS_MESSAGE: &str = "Note created successfully";
pub const CREATE_FAILURE_MESSAGE: &str = "Failed to create note";

/// Operation name recorded on the invalidation
pub const CREATE_OPERATION: &str = "create_note";

/// Runs note creations against the backend and the cache
#[derive(Clone)]
pub struct MutationCoordinator {
    backend: Arc<dyn NotesBackend>,
    cache: QueryCache<NoteSummary>,
    notifier: Arc<dyn Notifier>,
    namespace: String,
    in_flight: Arc<AtomicBool>,
}

/// Clears the in-flight flag when the submission ends, however it ends
struct InFlightGuard<'a>(&'a AtomicBool);

impl<'a> InFlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl MutationCoordinator {
    pub fn new(
        backend: Arc<dyn NotesBackend>,
        cache: QueryCache<NoteSummary>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            backend,
            cache,
            notifier,
            namespace: NOTES_NAMESPACE.to_string(),
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Invalidate `namespace` instead of the notes namespace
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// A coordinator on the same backend and cache with its own in-flight
    /// flag
    pub fn detached(&self) -> Self {
        Self {
            in_flight: Arc::new(AtomicBool::new(false)),
            ..self.clone()
        }
    }

    /// Whether a create is pending
    pub fn is_submitting(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Create a note
    ///
    /// Fails with [`NotesError::SubmissionInFlight`] while another create is
    /// pending. A failed create leaves the cache untouched.
    pub async fn submit(&self, draft: &NoteDraft) -> Result<NoteSummary> {
        let Some(_guard) = InFlightGuard::acquire(&self.in_flight) else {
            debug!("Rejected submission: another create is in flight");
            return Err(NotesError::SubmissionInFlight);
        };

        match self.backend.create_note(draft).await {
            Ok(note) => {
                info!("Note created: {}", note.id);
                let report = self
                    .cache
                    .invalidate(
                        NamespaceInvalidation::new(self.namespace.as_str()),
                        InvalidationReason::Mutation {
                            operation: CREATE_OPERATION.to_string(),
                        },
                    )
                    .await;
                debug!(
                    "Create invalidated {} views ({} refetching)",
                    report.matched(),
                    report.refetched.len() + report.deferred.len()
                );
                self.notifier.notify(Notification::success(CREATE_SUCCESS_MESSAGE));
                Ok(note)
            }
            Err(e) => {
                warn!("Note creation failed: {}", e);
                self.notifier.notify(Notification::error(CREATE_FAILURE_MESSAGE));
                Err(e)
            }
        }
    }
}

/// State of the note creation dialog
pub struct NoteForm {
    coordinator: MutationCoordinator,
    values: NoteDraft,
    open: bool,
}

impl NoteForm {
    /// An open form with default values
    ///
    /// Each form limits its own submissions to one at a time; forms sharing
    /// a coordinator do not block each other.
    pub fn new(coordinator: MutationCoordinator) -> Self {
        Self {
            coordinator: coordinator.detached(),
            values: NoteDraft::default(),
            open: true,
        }
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn is_submitting(&self) -> bool {
        self.coordinator.is_submitting()
    }

    pub fn values(&self) -> &NoteDraft {
        &self.values
    }

    pub fn set_title(&mut self, title: impl Into<String>) {
        self.values.title = title.into();
    }

    pub fn set_content(&mut self, content: impl Into<String>) {
        self.values.content = content.into();
    }

    pub fn set_tag(&mut self, tag: NoteTag) {
        self.values.tag = tag;
    }

    /// Submit the current values
    ///
    /// On success the form closes and resets; on failure it stays open with
    /// the values intact so the user can resubmit.
    pub async fn submit(&mut self) -> Result<NoteSummary> {
        if !self.open {
            return Err(NotesError::Validation("form is closed".to_string()));
        }

        let note = self.coordinator.submit(&self.values).await?;
        self.reset();
        self.open = false;
        Ok(note)
    }

    /// Close without submitting
    pub fn cancel(&mut self) {
        self.reset();
        self.open = false;
    }

    fn reset(&mut self) {
        self.values = NoteDraft::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{list_fetch, InMemoryNotesBackend};
    use crate::cache::{Fingerprint, QueryCacheConfig, QueryStatus};
    use crate::notify::{ChannelNotifier, NotificationLevel};
    use crate::schema::ListNotesQuery;
    use std::time::Duration;

    struct Fixture {
        backend: Arc<InMemoryNotesBackend>,
        cache: QueryCache<NoteSummary>,
        coordinator: MutationCoordinator,
        notifications: tokio::sync::mpsc::UnboundedReceiver<Notification>,
    }

    fn fixture(backend: InMemoryNotesBackend) -> Fixture {
        let backend = Arc::new(backend);
        let cache = QueryCache::new(QueryCacheConfig::testing());
        let (notifier, notifications) = ChannelNotifier::new();
        let coordinator = MutationCoordinator::new(backend.clone(), cache.clone(), Arc::new(notifier));
        Fixture {
            backend,
            cache,
            coordinator,
            notifications,
        }
    }

    async fn warm_first_page(fx: &Fixture) -> Fingerprint {
        let fingerprint = Fingerprint::notes(None, 1);
        let fetch = list_fetch(fx.backend.clone(), ListNotesQuery::new("", 1, 12));
        let mut sub = fx.cache.get_or_fetch(fingerprint.clone(), fetch).await;
        sub.settled().await;
        fingerprint
    }

    #[tokio::test]
    async fn test_successful_create_invalidates_and_closes() {
        let mut fx = fixture(InMemoryNotesBackend::seeded(3));
        let fingerprint = warm_first_page(&fx).await;

        let mut form = NoteForm::new(fx.coordinator.clone());
        form.set_title("Standup");
        form.set_content("10:00");
        form.set_tag(NoteTag::Meeting);

        let note = form.submit().await.unwrap();
        assert_eq!(note.title, "Standup");
        assert!(!form.is_open());
        assert_eq!(form.values(), &NoteDraft::default());
        assert_eq!(form.values().tag, NoteTag::Todo);

        let toast = fx.notifications.recv().await.unwrap();
        assert_eq!(toast.level, NotificationLevel::Success);
        assert_eq!(toast.message, CREATE_SUCCESS_MESSAGE);

        let stats = fx.cache.stats().await;
        assert_eq!(stats.invalidations, 1);
        assert_eq!(stats.refetches, 1);

        let mut sub = fx
            .cache
            .get_or_fetch(
                fingerprint.clone(),
                list_fetch(fx.backend.clone(), ListNotesQuery::new("", 1, 12)),
            )
            .await;
        let entry = sub.settled().await;
        assert_eq!(entry.data.map(|d| d.items[0].title.clone()), Some("Standup".to_string()));
    }

    #[tokio::test]
    async fn test_failed_create_keeps_form_and_cache() {
        let mut fx = fixture(InMemoryNotesBackend::seeded(3));
        let fingerprint = warm_first_page(&fx).await;
        fx.backend.set_fail_creates(true).await;

        let mut form = NoteForm::new(fx.coordinator.clone());
        form.set_title("Draft");

        let err = form.submit().await.unwrap_err();
        assert!(matches!(err, NotesError::Network(_)));
        assert!(form.is_open());
        assert_eq!(form.values().title, "Draft");
        assert!(!form.is_submitting());

        let toast = fx.notifications.recv().await.unwrap();
        assert_eq!(toast.level, NotificationLevel::Error);
        assert_eq!(toast.message, CREATE_FAILURE_MESSAGE);

        let entry = fx.cache.entry(&fingerprint).await.unwrap();
        assert_eq!(entry.status, QueryStatus::Success);
        assert!(!entry.invalidated);
        assert_eq!(fx.cache.stats().await.invalidations, 0);

        // Resubmittable once the backend recovers
        fx.backend.set_fail_creates(false).await;
        assert!(form.submit().await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_submission_rejected_while_pending() {
        let fx = fixture(InMemoryNotesBackend::seeded(1).with_latency(Duration::from_millis(200)));
        let draft = NoteDraft::new("Once", "", NoteTag::Todo);

        let (first, second) = tokio::join!(fx.coordinator.submit(&draft), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            assert!(fx.coordinator.is_submitting());
            fx.coordinator.submit(&draft).await
        });

        assert!(first.is_ok());
        assert!(matches!(second, Err(NotesError::SubmissionInFlight)));
        assert_eq!(fx.backend.create_count().await, 1);
        assert!(!fx.coordinator.is_submitting());
    }

    #[tokio::test(start_paused = true)]
    async fn test_forms_submit_independently() {
        let fx = fixture(InMemoryNotesBackend::new().with_latency(Duration::from_millis(200)));
        let mut first = NoteForm::new(fx.coordinator.clone());
        let mut second = NoteForm::new(fx.coordinator.clone());
        first.set_title("First");
        second.set_title("Second");

        let (a, b) = tokio::join!(first.submit(), second.submit());
        assert!(a.is_ok());
        assert!(b.is_ok());
        assert_eq!(fx.backend.create_count().await, 2);
        assert!(!fx.coordinator.is_submitting());
    }

    #[tokio::test]
    async fn test_closed_form_does_not_submit() {
        let fx = fixture(InMemoryNotesBackend::new());
        let mut form = NoteForm::new(fx.coordinator.clone());
        form.set_title("Discard me");
        form.cancel();

        assert!(!form.is_open());
        assert_eq!(form.values().title, "");
        assert!(form.submit().await.is_err());
        assert_eq!(fx.backend.create_count().await, 0);
    }
}
