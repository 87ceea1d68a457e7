use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{RwLock, broadcast};
use uuid::Uuid;

use plaint_types::events::Topic;

/// Tracks connected clients and fans out feed change notifications.
///
/// The session table is the only record of which feeds a connection
/// watches; connections consult it before re-reading a feed.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    /// Every connection receives every change; each filters by its own watch set
    changes_tx: broadcast::Sender<Topic>,

    /// conn_id -> watched topics
    sessions: RwLock<HashMap<Uuid, HashSet<Topic>>>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        let (changes_tx, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(DispatcherInner {
                changes_tx,
                sessions: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Subscribe to feed change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<Topic> {
        self.inner.changes_tx.subscribe()
    }

    /// Announce that a feed's contents changed. Watchers re-read it.
    pub fn notify(&self, topic: Topic) {
        let _ = self.inner.changes_tx.send(topic);
    }

    /// Register a connection. Returns its conn_id and the number of open
    /// connections including it.
    pub async fn register(&self) -> (Uuid, usize) {
        let conn_id = Uuid::new_v4();
        let mut sessions = self.inner.sessions.write().await;
        sessions.insert(conn_id, HashSet::new());
        (conn_id, sessions.len())
    }

    pub async fn unregister(&self, conn_id: Uuid) {
        self.inner.sessions.write().await.remove(&conn_id);
    }

    pub async fn watch(&self, conn_id: Uuid, topic: Topic) {
        if let Some(watching) = self.inner.sessions.write().await.get_mut(&conn_id) {
            watching.insert(topic);
        }
    }

    pub async fn unwatch(&self, conn_id: Uuid, topic: Topic) {
        if let Some(watching) = self.inner.sessions.write().await.get_mut(&conn_id) {
            watching.remove(&topic);
        }
    }

    pub async fn is_watching(&self, conn_id: Uuid, topic: Topic) -> bool {
        self.inner
            .sessions
            .read()
            .await
            .get(&conn_id)
            .is_some_and(|watching| watching.contains(&topic))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn watches_are_per_connection() {
        let dispatcher = Dispatcher::new();
        let topic = Topic::ComplaintChat(Uuid::new_v4());

        let (a, _) = dispatcher.register().await;
        let (b, open) = dispatcher.register().await;
        assert_eq!(open, 2);

        dispatcher.watch(a, topic).await;
        dispatcher.watch(b, topic).await;
        assert!(dispatcher.is_watching(a, topic).await);

        dispatcher.unwatch(a, topic).await;
        assert!(!dispatcher.is_watching(a, topic).await);
        assert!(dispatcher.is_watching(b, topic).await);

        dispatcher.unregister(b).await;
        assert!(!dispatcher.is_watching(b, topic).await);
    }

    #[tokio::test]
    async fn watch_on_unknown_connection_is_ignored() {
        let dispatcher = Dispatcher::new();
        let topic = Topic::Room(Uuid::new_v4());
        let stranger = Uuid::new_v4();
        dispatcher.watch(stranger, topic).await;
        assert!(!dispatcher.is_watching(stranger, topic).await);
    }

    #[tokio::test]
    async fn notifications_reach_every_subscriber() {
        let dispatcher = Dispatcher::new();
        let mut rx1 = dispatcher.subscribe();
        let mut rx2 = dispatcher.subscribe();
        let topic = Topic::Room(Uuid::new_v4());

        dispatcher.notify(topic);
        assert_eq!(rx1.recv().await.unwrap(), topic);
        assert_eq!(rx2.recv().await.unwrap(), topic);
    }
}
