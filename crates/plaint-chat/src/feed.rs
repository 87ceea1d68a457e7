//! Chat delivery with a realtime/polling fallback.
//!
//! A feed starts by probing the ordered query the realtime path depends on.
//! While the backing index is missing the feed is *degraded*: it fetches the
//! thread unordered, sorts it locally and re-probes on a fixed interval.
//! The first successful probe stops the timer for good and the feed goes
//! *live* on a gateway subscription.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use plaint_types::models::ChatMessage;

use crate::backend::{ChatBackend, FeedQuery, FeedTarget};
use crate::error::FeedError;

#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// How often a degraded feed re-probes for the index.
    pub probe_interval: Duration,
    /// Base of the index console. Fallback banner link when the server's
    /// error text carries none.
    pub console_url: String,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            probe_interval: Duration::from_secs(10),
            console_url: "http://localhost:3000/console".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedMode {
    Loading,
    /// Unordered fetch + local sort, no push updates.
    Degraded,
    /// Gateway subscription.
    Live,
}

/// What an observer renders.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedView {
    pub mode: FeedMode,
    /// Always in non-decreasing timestamp order.
    pub messages: Vec<ChatMessage>,
    /// Where an operator creates the missing index. Shown as a banner.
    pub index_link: Option<String>,
    pub loading: bool,
}

impl Default for FeedView {
    fn default() -> Self {
        Self {
            mode: FeedMode::Loading,
            messages: Vec::new(),
            index_link: None,
            loading: true,
        }
    }
}

/// Pull the index console link out of a missing-index error message: the
/// first whitespace-separated token that starts with `console_url`, or
/// `console_url` itself.
pub fn extract_index_link(message: &str, console_url: &str) -> String {
    message
        .split_whitespace()
        .find(|token| token.starts_with(console_url))
        .unwrap_or(console_url)
        .to_string()
}

/// Result of checking whether ordered queries work.
enum Probe {
    Ready,
    /// The index is missing; carries the banner link.
    MissingIndex(String),
    /// Some other failure. Treated as "no index" without touching the banner.
    Failed,
}

struct FeedInner<B> {
    backend: Arc<B>,
    target: FeedTarget,
    config: FeedConfig,
    mode: Mutex<FeedMode>,
    view_tx: watch::Sender<FeedView>,
}

/// A chat thread kept up to date for one user. Dropping the feed stops its
/// subscription and probe timer.
pub struct ChatFeed<B: ChatBackend> {
    inner: Arc<FeedInner<B>>,
    driver: JoinHandle<()>,
}

impl<B: ChatBackend> ChatFeed<B> {
    /// Start a feed. Must be called inside a tokio runtime.
    pub fn start(backend: Arc<B>, target: FeedTarget, config: FeedConfig) -> Self {
        let (view_tx, _) = watch::channel(FeedView::default());
        let inner = Arc::new(FeedInner {
            backend,
            target,
            config,
            mode: Mutex::new(FeedMode::Loading),
            view_tx,
        });
        let driver = tokio::spawn(drive(inner.clone()));
        Self { inner, driver }
    }

    pub fn target(&self) -> FeedTarget {
        self.inner.target
    }

    pub fn mode(&self) -> FeedMode {
        self.inner.mode()
    }

    /// Observe the view. The receiver sees every later publication.
    pub fn watch(&self) -> watch::Receiver<FeedView> {
        self.inner.view_tx.subscribe()
    }

    pub fn view(&self) -> FeedView {
        self.inner.view_tx.borrow().clone()
    }

    /// Re-run the unordered fetch and publish it.
    pub async fn refresh(&self) -> Result<(), FeedError> {
        self.inner.refresh().await
    }

    /// Post a message. Outside live mode the thread is re-fetched afterwards
    /// so the sender sees it right away.
    pub async fn send(&self, text: &str) -> Result<ChatMessage, FeedError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(FeedError::EmptyMessage);
        }

        let message = self
            .inner
            .backend
            .send(self.inner.target, text)
            .await
            .map_err(|e| {
                warn!("Sending to {:?} failed: {}", self.inner.target, e);
                FeedError::Backend(e)
            })?;

        if self.mode() != FeedMode::Live {
            if let Err(e) = self.inner.refresh().await {
                warn!("Re-fetch after send failed: {}", e);
            }
        }
        Ok(message)
    }
}

impl<B: ChatBackend> Drop for ChatFeed<B> {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

impl<B: ChatBackend> FeedInner<B> {
    fn mode(&self) -> FeedMode {
        *self.mode.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_mode(&self, mode: FeedMode, index_link: Option<String>) {
        *self.mode.lock().unwrap_or_else(|e| e.into_inner()) = mode;
        self.view_tx.send_modify(|view| {
            view.mode = mode;
            view.index_link = index_link;
        });
    }

    fn publish(&self, mut messages: Vec<ChatMessage>) {
        // Stable: equal timestamps keep server order
        messages.sort_by_key(|m| m.timestamp);
        self.view_tx.send_modify(|view| {
            view.messages = messages;
            view.loading = false;
        });
    }

    async fn refresh(&self) -> Result<(), FeedError> {
        let messages = self.backend.fetch(self.target, FeedQuery::unordered()).await?;
        self.publish(messages);
        Ok(())
    }

    async fn probe(&self) -> Probe {
        match self.backend.fetch(self.target, FeedQuery::probe()).await {
            Ok(_) => Probe::Ready,
            Err(e) if e.is_failed_precondition() => {
                debug!("Index for {:?} still missing", self.target);
                Probe::MissingIndex(extract_index_link(&e.message(), &self.config.console_url))
            }
            Err(e) => {
                warn!("Index probe for {:?} failed, assuming no index: {}", self.target, e);
                Probe::Failed
            }
        }
    }

    async fn degraded_fetch(&self) {
        if let Err(e) = self.refresh().await {
            warn!("Fetching {:?} failed: {}", self.target, e);
            self.view_tx.send_modify(|view| view.loading = false);
        }
    }

    /// Follow the subscription until it ends. Returns once the feed has
    /// fallen back to degraded mode.
    async fn run_live(&self) {
        let mut snapshots = match self.backend.subscribe(self.target).await {
            Ok(rx) => rx,
            Err(e) => {
                warn!("Subscribing to {:?} failed: {}", self.target, e);
                self.fall_back().await;
                return;
            }
        };

        self.set_mode(FeedMode::Live, None);
        info!("Feed {:?} is live", self.target);

        let user_id = self.backend.user_id();
        loop {
            match snapshots.recv().await {
                Some(Ok(messages)) => {
                    let unread: Vec<_> = messages
                        .iter()
                        .filter(|m| !m.is_read_by(user_id))
                        .map(|m| m.id)
                        .collect();
                    self.publish(messages);
                    if !unread.is_empty() {
                        if let Err(e) = self.backend.mark_read(self.target, &unread).await {
                            warn!("Marking {} message(s) read failed: {}", unread.len(), e);
                        }
                    }
                }
                Some(Err(e)) => {
                    warn!("Live feed {:?} ended: {}", self.target, e);
                    break;
                }
                None => {
                    warn!("Live feed {:?} closed", self.target);
                    break;
                }
            }
        }
        self.fall_back().await;
    }

    /// One unordered fetch, then stay degraded. The probe timer is not restarted.
    async fn fall_back(&self) {
        let link = self.view_tx.borrow().index_link.clone();
        self.set_mode(FeedMode::Degraded, link);
        info!("Feed {:?} fell back to degraded mode", self.target);
        self.degraded_fetch().await;
    }
}

async fn drive<B: ChatBackend>(inner: Arc<FeedInner<B>>) {
    let link = match inner.probe().await {
        Probe::Ready => {
            inner.run_live().await;
            return;
        }
        Probe::MissingIndex(link) => Some(link),
        Probe::Failed => None,
    };

    inner.set_mode(FeedMode::Degraded, link);
    info!("Feed {:?} is degraded until the index exists", inner.target);
    inner.degraded_fetch().await;

    let mut timer = tokio::time::interval(inner.config.probe_interval);
    timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    timer.tick().await;
    loop {
        timer.tick().await;
        match inner.probe().await {
            Probe::Ready => break,
            Probe::MissingIndex(link) => {
                inner.view_tx.send_modify(|view| view.index_link = Some(link));
            }
            Probe::Failed => {}
        }
    }
    drop(timer);

    info!("Index for {:?} is ready, upgrading", inner.target);
    inner.run_live().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    use chrono::{DateTime, TimeZone, Utc};
    use tokio::sync::mpsc;
    use uuid::Uuid;

    use plaint_types::api::ErrorCode;

    use crate::backend::Snapshots;
    use crate::error::BackendError;

    const CONSOLE: &str = "http://console.test";
    const LINK: &str = "http://console.test/indexes/create?collection=chats&fields=complaintId,timestamp";

    #[derive(Default)]
    struct MockState {
        index_ready: bool,
        probe_error: Option<BackendError>,
        messages: Vec<ChatMessage>,
        probes: usize,
        unordered_fetches: usize,
        subscribers: Vec<mpsc::UnboundedSender<Result<Vec<ChatMessage>, BackendError>>>,
        marked: Vec<Uuid>,
        clock: i64,
    }

    struct MockBackend {
        me: Uuid,
        state: StdMutex<MockState>,
    }

    impl MockBackend {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                me: Uuid::new_v4(),
                state: StdMutex::new(MockState::default()),
            })
        }

        fn with<T>(&self, f: impl FnOnce(&mut MockState) -> T) -> T {
            f(&mut self.state.lock().unwrap())
        }

        /// Add a message from someone else at second `at`.
        fn seed(&self, text: &str, at: i64) {
            let msg = message(text, Uuid::new_v4(), ts(at));
            self.with(|s| s.messages.push(msg));
        }

        fn sorted(state: &MockState) -> Vec<ChatMessage> {
            let mut messages = state.messages.clone();
            messages.sort_by_key(|m| m.timestamp);
            messages
        }
    }

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn message(text: &str, sender: Uuid, at: DateTime<Utc>) -> ChatMessage {
        ChatMessage {
            id: Uuid::new_v4(),
            thread_id: Uuid::nil(),
            text: text.into(),
            sender_id: sender,
            sender_name: "someone".into(),
            sender_role: "faculty".into(),
            timestamp: at,
            attachments: vec![],
            read_by: vec![],
        }
    }

    fn missing_index() -> BackendError {
        BackendError::server(
            ErrorCode::FailedPrecondition,
            format!("The query requires an index. You can create it here: {}", LINK),
        )
    }

    impl ChatBackend for MockBackend {
        fn user_id(&self) -> Uuid {
            self.me
        }

        async fn fetch(&self, _target: FeedTarget, query: FeedQuery) -> Result<Vec<ChatMessage>, BackendError> {
            self.with(|s| {
                if query.ordered {
                    s.probes += 1;
                    if let Some(e) = s.probe_error.clone() {
                        return Err(e);
                    }
                    if !s.index_ready {
                        return Err(missing_index());
                    }
                    let mut sorted = Self::sorted(s);
                    sorted.truncate(query.limit.unwrap_or(u32::MAX) as usize);
                    Ok(sorted)
                } else {
                    s.unordered_fetches += 1;
                    Ok(s.messages.clone())
                }
            })
        }

        async fn send(&self, _target: FeedTarget, text: &str) -> Result<ChatMessage, BackendError> {
            let me = self.me;
            self.with(|s| {
                s.clock += 1;
                // Far in the past so insertion order differs from time order
                let msg = message(text, me, ts(-s.clock));
                s.messages.push(msg.clone());
                let snapshot = Self::sorted(s);
                s.subscribers.retain(|tx| tx.send(Ok(snapshot.clone())).is_ok());
                Ok(msg)
            })
        }

        async fn subscribe(&self, _target: FeedTarget) -> Result<Snapshots, BackendError> {
            let (tx, rx) = mpsc::unbounded_channel();
            self.with(|s| {
                if s.index_ready {
                    let _ = tx.send(Ok(Self::sorted(s)));
                    s.subscribers.push(tx);
                } else {
                    let _ = tx.send(Err(missing_index()));
                }
            });
            Ok(rx)
        }

        async fn mark_read(&self, _target: FeedTarget, message_ids: &[Uuid]) -> Result<(), BackendError> {
            let me = self.me;
            self.with(|s| {
                s.marked.extend_from_slice(message_ids);
                for m in s.messages.iter_mut().filter(|m| message_ids.contains(&m.id)) {
                    m.read_by.push(me);
                }
            });
            Ok(())
        }
    }

    fn config() -> FeedConfig {
        FeedConfig {
            probe_interval: Duration::from_secs(10),
            console_url: CONSOLE.into(),
        }
    }

    async fn settle(feed: &ChatFeed<MockBackend>, mode: FeedMode) -> FeedView {
        let mut rx = feed.watch();
        let view = rx
            .wait_for(|v| v.mode == mode && !v.loading)
            .await
            .expect("feed dropped");
        view.clone()
    }

    fn texts(view: &FeedView) -> Vec<&str> {
        view.messages.iter().map(|m| m.text.as_str()).collect()
    }

    fn is_sorted(view: &FeedView) -> bool {
        view.messages.windows(2).all(|w| w[0].timestamp <= w[1].timestamp)
    }

    #[test]
    fn index_link_comes_from_error_text_or_falls_back() {
        let message = format!("The query requires an index. You can create it here: {}", LINK);
        assert_eq!(extract_index_link(&message, CONSOLE), LINK);
        assert_eq!(extract_index_link("permission denied", CONSOLE), CONSOLE);
        assert_eq!(extract_index_link("", CONSOLE), CONSOLE);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_index_degrades_and_sorts_locally() {
        let backend = MockBackend::new();
        backend.seed("second", 20);
        backend.seed("first", 10);
        backend.seed("third", 30);

        let feed = ChatFeed::start(backend.clone(), FeedTarget::Complaint(Uuid::new_v4()), config());
        let view = settle(&feed, FeedMode::Degraded).await;

        assert_eq!(view.index_link.as_deref(), Some(LINK));
        assert_eq!(texts(&view), ["first", "second", "third"]);
    }

    #[tokio::test(start_paused = true)]
    async fn other_probe_errors_fail_open_to_degraded() {
        let backend = MockBackend::new();
        backend.with(|s| s.probe_error = Some(BackendError::Transport("connection refused".into())));

        let feed = ChatFeed::start(backend.clone(), FeedTarget::Room(Uuid::new_v4()), config());
        let view = settle(&feed, FeedMode::Degraded).await;

        assert_eq!(view.index_link, None);
        assert_eq!(feed.mode(), FeedMode::Degraded);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_query_errors_keep_the_index_link() {
        let backend = MockBackend::new();
        let feed = ChatFeed::start(backend.clone(), FeedTarget::Complaint(Uuid::new_v4()), config());
        settle(&feed, FeedMode::Degraded).await;
        assert_eq!(feed.view().index_link.as_deref(), Some(LINK));

        backend.with(|s| s.probe_error = Some(BackendError::Transport("connection reset".into())));
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(backend.with(|s| s.probes), 2);
        assert_eq!(feed.view().index_link.as_deref(), Some(LINK));
        assert_eq!(feed.mode(), FeedMode::Degraded);
    }

    #[tokio::test(start_paused = true)]
    async fn degraded_send_is_visible_after_refetch() {
        let backend = MockBackend::new();
        backend.seed("hello", 10);
        let feed = ChatFeed::start(backend.clone(), FeedTarget::Complaint(Uuid::new_v4()), config());
        settle(&feed, FeedMode::Degraded).await;

        feed.send("  new one ").await.unwrap();
        let view = feed.view();
        assert_eq!(texts(&view), ["new one", "hello"]);
        assert!(is_sorted(&view));
    }

    #[tokio::test(start_paused = true)]
    async fn empty_messages_are_rejected_locally() {
        let backend = MockBackend::new();
        let feed = ChatFeed::start(backend.clone(), FeedTarget::Complaint(Uuid::new_v4()), config());
        assert_eq!(feed.send("   ").await.unwrap_err(), FeedError::EmptyMessage);
        assert!(backend.with(|s| s.messages.is_empty()));
    }

    #[tokio::test(start_paused = true)]
    async fn upgrades_once_and_stops_probing() {
        let backend = MockBackend::new();
        backend.seed("before", 10);
        let feed = ChatFeed::start(backend.clone(), FeedTarget::Complaint(Uuid::new_v4()), config());
        settle(&feed, FeedMode::Degraded).await;

        // Still missing after one interval.
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(feed.mode(), FeedMode::Degraded);
        assert_eq!(backend.with(|s| s.probes), 2);

        backend.with(|s| s.index_ready = true);
        let view = settle(&feed, FeedMode::Live).await;
        assert_eq!(view.index_link, None);
        let probes = backend.with(|s| s.probes);

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(backend.with(|s| s.probes), probes);
        assert_eq!(feed.mode(), FeedMode::Live);
    }

    #[tokio::test(start_paused = true)]
    async fn live_snapshots_replace_the_list_and_mark_read() {
        let backend = MockBackend::new();
        backend.with(|s| s.index_ready = true);
        backend.seed("from faculty", 5);

        let feed = ChatFeed::start(backend.clone(), FeedTarget::Room(Uuid::new_v4()), config());
        let mut rx = feed.watch();
        rx.wait_for(|v| v.mode == FeedMode::Live && v.messages.len() == 1)
            .await
            .unwrap();

        let seeded = backend.with(|s| s.messages[0].id);
        tokio::task::yield_now().await;
        assert!(backend.with(|s| s.marked.contains(&seeded)));

        // Sending in live mode relies on the snapshot, not a re-fetch.
        let fetches = backend.with(|s| s.unordered_fetches);
        feed.send("reply").await.unwrap();
        let view = rx.wait_for(|v| v.messages.len() == 2).await.unwrap().clone();
        assert!(is_sorted(&view));
        assert_eq!(backend.with(|s| s.unordered_fetches), fetches);
        // Own messages are never marked.
        assert_eq!(backend.with(|s| s.marked.len()), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn live_error_falls_back_without_restarting_timer() {
        let backend = MockBackend::new();
        backend.with(|s| s.index_ready = true);
        backend.seed("hi", 1);

        let feed = ChatFeed::start(backend.clone(), FeedTarget::Complaint(Uuid::new_v4()), config());
        settle(&feed, FeedMode::Live).await;
        let probes = backend.with(|s| s.probes);

        let subscriber = backend.with(|s| s.subscribers.remove(0));
        subscriber
            .send(Err(BackendError::server(ErrorCode::Internal, "boom")))
            .unwrap();

        let view = settle(&feed, FeedMode::Degraded).await;
        assert_eq!(texts(&view), ["hi"]);
        assert_eq!(backend.with(|s| s.unordered_fetches), 1);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(backend.with(|s| s.probes), probes);
        assert_eq!(feed.mode(), FeedMode::Degraded);
    }
}
