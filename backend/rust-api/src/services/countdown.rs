use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

struct CountdownHandle {
    generation: u64,
    cancel: watch::Sender<bool>,
}

/// One countdown task per active session, keyed by session id.
///
/// A countdown wakes every tick to compare the clock with the deadline.
/// Cancelling it tears the task down without running the expiry callback.
#[derive(Clone, Default)]
pub struct CountdownRegistry {
    handles: Arc<DashMap<String, CountdownHandle>>,
    generations: Arc<AtomicU64>,
}

impl CountdownRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts the countdown for `session_id`. Starting one that is already
    /// running replaces it.
    pub fn start<F, Fut>(
        &self,
        session_id: &str,
        expires_at: DateTime<Utc>,
        tick: Duration,
        on_expire: F,
    ) where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let generation = self.generations.fetch_add(1, Ordering::Relaxed);
        let (cancel, mut cancel_rx) = watch::channel(false);
        let previous = self.handles.insert(
            session_id.to_string(),
            CountdownHandle { generation, cancel },
        );
        if let Some(previous) = previous {
            let _ = previous.cancel.send(true);
        }

        let handles = Arc::clone(&self.handles);
        let session_id = session_id.to_string();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if Utc::now() >= expires_at {
                            break;
                        }
                    }
                    changed = cancel_rx.changed() => {
                        let cancelled = changed.is_err() || *cancel_rx.borrow();
                        if cancelled {
                            tracing::debug!("Countdown cancelled: session={}", session_id);
                            return;
                        }
                    }
                }
            }

            // Only the countdown that still owns the slot may fire.
            let owned = handles
                .remove_if(&session_id, |_, handle| handle.generation == generation)
                .is_some();
            if !owned {
                return;
            }

            tracing::info!("Countdown reached zero: session={}", session_id);
            on_expire().await;
        });
    }

    /// Returns `true` if a countdown was running.
    pub fn cancel(&self, session_id: &str) -> bool {
        match self.handles.remove(session_id) {
            Some((_, handle)) => {
                let _ = handle.cancel.send(true);
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self, session_id: &str) -> bool {
        self.handles.contains_key(session_id)
    }

    pub fn active_count(&self) -> usize {
        self.handles.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    const TICK: Duration = Duration::from_millis(10);

    fn counter_callback(counter: &Arc<AtomicUsize>) -> impl FnOnce() -> futures::future::Ready<()> {
        let counter = Arc::clone(counter);
        move || {
            counter.fetch_add(1, Ordering::SeqCst);
            futures::future::ready(())
        }
    }

    #[tokio::test]
    async fn fires_once_after_deadline() {
        let registry = CountdownRegistry::new();
        let fired = Arc::new(AtomicUsize::new(0));

        registry.start(
            "s-1",
            Utc::now() + chrono::Duration::milliseconds(50),
            TICK,
            counter_callback(&fired),
        );
        assert!(registry.is_running("s-1"));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!registry.is_running("s-1"));
    }

    #[tokio::test]
    async fn cancelled_countdown_never_fires() {
        let registry = CountdownRegistry::new();
        let fired = Arc::new(AtomicUsize::new(0));

        registry.start(
            "s-2",
            Utc::now() + chrono::Duration::milliseconds(50),
            TICK,
            counter_callback(&fired),
        );
        assert!(registry.cancel("s-2"));
        assert!(!registry.cancel("s-2"));

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(registry.active_count(), 0);
    }

    #[tokio::test]
    async fn restarting_replaces_the_previous_countdown() {
        let registry = CountdownRegistry::new();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        registry.start(
            "s-3",
            Utc::now() + chrono::Duration::milliseconds(40),
            TICK,
            counter_callback(&first),
        );
        registry.start(
            "s-3",
            Utc::now() + chrono::Duration::milliseconds(40),
            TICK,
            counter_callback(&second),
        );

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }
}
