//! Input debouncing
//!
//! [`Debouncer`] separates the value a user is typing (`raw`) from the value
//! queries are built from (`committed`). Every update restarts a quiet-period
//! timer; only when the timer fires is the latest raw value published, so a
//! burst of keystrokes results in a single commit.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

/// Quiet period used for search input
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

/// Trailing-edge debouncer publishing committed values on a `watch` channel
pub struct Debouncer<T> {
    delay: Duration,
    raw: T,
    sender: Arc<watch::Sender<T>>,
    timer: Option<JoinHandle<()>>,
}

impl<T> Debouncer<T>
where
    T: Clone + PartialEq + std::fmt::Debug + Send + Sync + 'static,
{
    /// Create a debouncer whose raw and committed values start at `initial`
    pub fn new(initial: T, delay: Duration) -> Self {
        let (sender, _) = watch::channel(initial.clone());
        Self {
            delay,
            raw: initial,
            sender: Arc::new(sender),
            timer: None,
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Latest input, committed or not
    pub fn raw(&self) -> &T {
        &self.raw
    }

    /// Last committed value
    pub fn committed(&self) -> T {
        self.sender.borrow().clone()
    }

    /// Receive every change of the committed value
    pub fn subscribe(&self) -> watch::Receiver<T> {
        self.sender.subscribe()
    }

    /// Whether a commit is scheduled
    pub fn is_pending(&self) -> bool {
        self.timer.as_ref().map(|t| !t.is_finished()).unwrap_or(false)
    }

    /// Record new input and restart the quiet period
    pub fn update(&mut self, raw: T) {
        self.cancel();
        self.raw = raw.clone();

        let delay = self.delay;
        let sender = Arc::clone(&self.sender);
        self.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            commit(&sender, raw);
        }));
    }

    /// Commit the raw value now; returns whether the committed value changed
    pub fn flush(&mut self) -> bool {
        self.cancel();
        commit(&self.sender, self.raw.clone())
    }

    /// Drop the scheduled commit, if any
    pub fn cancel(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

fn commit<T: PartialEq + std::fmt::Debug>(sender: &watch::Sender<T>, value: T) -> bool {
    sender.send_if_modified(|current| {
        if *current == value {
            return false;
        }
        debug!("Committed input: {:?}", value);
        *current = value;
        true
    })
}

impl<T> Drop for Debouncer<T> {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}
