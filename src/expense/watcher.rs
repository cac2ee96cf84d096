//! Route watching and single-flight guarding for the expense workflow.
//!
//! The expense tool is a single-page application: the transaction composer
//! can appear without a full navigation. A polling route watcher emits a
//! route-became-relevant event whenever the app transitions into the
//! composer route; the autofill loop subscribes and re-arms itself. The
//! guard object guarantees at most one active autofill attempt per document
//! generation — a route transition resets it, and a superseded attempt
//! observes the flipped flags instead of being forcibly killed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::config::SelectorConfig;
use crate::expense::{self, is_transaction_form_path};
use crate::page::PageDriver;

/// Single-flight state for one document generation.
#[derive(Debug, Default)]
pub struct AutofillGuard {
    running: AtomicBool,
    done: AtomicBool,
}

impl AutofillGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the attempt slot. Fails when an attempt already ran to
    /// completion or is currently active.
    pub fn try_start(&self) -> bool {
        if self.done.load(Ordering::SeqCst) {
            return false;
        }
        !self.running.swap(true, Ordering::SeqCst)
    }

    /// The attempt finished successfully; no further attempts this
    /// generation.
    pub fn mark_done(&self) {
        self.done.store(true, Ordering::SeqCst);
        self.running.store(false, Ordering::SeqCst);
    }

    /// The attempt gave up without success; a later trigger may retry.
    pub fn finish_attempt(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// New document generation: forget everything.
    pub fn reset(&self) {
        self.done.store(false, Ordering::SeqCst);
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }
}

/// Emitted when the app routes into the transaction composer.
#[derive(Debug, Clone)]
pub enum RouteEvent {
    TransactionFormEntered { path: String },
}

fn path_of(url: &str) -> String {
    url::Url::parse(url)
        .map(|u| u.path().to_string())
        .unwrap_or_else(|_| url.to_string())
}

/// Polls the page URL and broadcasts route transitions into the composer.
pub struct RouteWatcher {
    tx: broadcast::Sender<RouteEvent>,
    handle: JoinHandle<()>,
}

impl RouteWatcher {
    pub fn spawn(page: Arc<dyn PageDriver>, poll: Duration) -> Self {
        let (tx, _) = broadcast::channel(16);
        let sender = tx.clone();
        let handle = tokio::spawn(async move {
            let mut last_path = String::new();
            loop {
                if let Ok(url) = page.current_url().await {
                    let path = path_of(&url);
                    if path != last_path {
                        let entered = is_transaction_form_path(&path);
                        last_path = path.clone();
                        if entered {
                            tracing::debug!(%path, "transaction composer route entered");
                            let _ = sender.send(RouteEvent::TransactionFormEntered { path });
                        }
                    }
                }
                tokio::time::sleep(poll).await;
            }
        });
        Self { tx, handle }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RouteEvent> {
        self.tx.subscribe()
    }

    pub fn shutdown(&self) {
        self.handle.abort();
    }
}

impl Drop for RouteWatcher {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// One bounded autofill attempt: keep trying the category-then-description
/// pass until it lands, the route leaves the composer, or the budget runs
/// out.
async fn run_scheduled_autofill(
    page: &dyn PageDriver,
    config: &SelectorConfig,
    guard: &AutofillGuard,
) -> bool {
    let deadline = std::time::Instant::now() + Duration::from_secs(60);
    while std::time::Instant::now() < deadline {
        if guard.is_done() {
            return true;
        }
        if let Ok(url) = page.current_url().await {
            if !is_transaction_form_path(&path_of(&url)) {
                return false;
            }
        }
        match expense::try_autofill_pass(page, config).await {
            Ok(true) => return true,
            Ok(false) => {}
            Err(error) => {
                tracing::debug!("autofill pass failed, retrying: {error}");
            }
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
    false
}

/// Subscribe to route events and run guarded autofill attempts. Events are
/// handled sequentially; the guard additionally protects against concurrent
/// manual invocations of the same workflow.
pub async fn run_autofill_watch(
    page: Arc<dyn PageDriver>,
    config: SelectorConfig,
    guard: Arc<AutofillGuard>,
    mut events: broadcast::Receiver<RouteEvent>,
) {
    loop {
        match events.recv().await {
            Ok(RouteEvent::TransactionFormEntered { path }) => {
                tracing::info!(%path, "re-arming autofill for new composer route");
                guard.reset();
                if !guard.try_start() {
                    continue;
                }
                if run_scheduled_autofill(page.as_ref(), &config, &guard).await {
                    guard.mark_done();
                    tracing::info!("autofill completed");
                } else {
                    guard.finish_attempt();
                    tracing::info!("autofill attempt ended without success");
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "route watcher lagged; continuing");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    #[test]
    fn test_guard_allows_exactly_one_active_attempt() {
        let guard = AutofillGuard::new();
        assert!(guard.try_start());
        assert!(!guard.try_start());
        guard.finish_attempt();
        assert!(guard.try_start());
    }

    #[test]
    fn test_done_blocks_until_reset() {
        let guard = AutofillGuard::new();
        assert!(guard.try_start());
        guard.mark_done();
        assert!(guard.is_done());
        assert!(!guard.try_start());

        guard.reset();
        assert!(!guard.is_done());
        assert!(guard.try_start());
    }

    struct ScriptedUrls {
        urls: Mutex<VecDeque<String>>,
        last: Mutex<String>,
    }

    impl ScriptedUrls {
        fn new(urls: &[&str]) -> Self {
            Self {
                urls: Mutex::new(urls.iter().map(|u| u.to_string()).collect()),
                last: Mutex::new("https://app.navan.com/home".to_string()),
            }
        }
    }

    #[async_trait::async_trait]
    impl PageDriver for ScriptedUrls {
        async fn navigate(
            &self,
            _url: &str,
            _timeout_ms: u64,
        ) -> anyhow::Result<crate::page::NavigationResult> {
            anyhow::bail!("not navigable")
        }
        async fn execute_js(&self, _script: &str) -> anyhow::Result<serde_json::Value> {
            anyhow::bail!("no js in this fake")
        }
        async fn current_url(&self) -> anyhow::Result<String> {
            let mut urls = self.urls.lock().unwrap();
            if let Some(next) = urls.pop_front() {
                *self.last.lock().unwrap() = next.clone();
                return Ok(next);
            }
            Ok(self.last.lock().unwrap().clone())
        }
        async fn html(&self) -> anyhow::Result<String> {
            Ok(String::new())
        }
    }

    #[tokio::test]
    async fn test_watcher_emits_on_composer_route_entry() {
        let page: Arc<dyn PageDriver> = Arc::new(ScriptedUrls::new(&[
            "https://app.navan.com/home",
            "https://app.navan.com/transactions/new-redesign/42",
        ]));
        let watcher = RouteWatcher::spawn(page, Duration::from_millis(10));
        let mut events = watcher.subscribe();

        let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .expect("watcher should emit before the timeout")
            .expect("channel open");
        let RouteEvent::TransactionFormEntered { path } = event;
        assert_eq!(path, "/transactions/new-redesign/42");

        watcher.shutdown();
    }

    #[tokio::test]
    async fn test_watcher_ignores_non_composer_routes() {
        let page: Arc<dyn PageDriver> = Arc::new(ScriptedUrls::new(&[
            "https://app.navan.com/home",
            "https://app.navan.com/trips",
            "https://app.navan.com/transactions/upload-receipts",
        ]));
        let watcher = RouteWatcher::spawn(page, Duration::from_millis(10));
        let mut events = watcher.subscribe();

        let outcome = tokio::time::timeout(Duration::from_millis(200), events.recv()).await;
        assert!(outcome.is_err(), "no event expected for non-composer routes");

        watcher.shutdown();
    }
}
