use std::future::Future;

use tokio::sync::mpsc;
use uuid::Uuid;

use plaint_types::api::ChatQuery;
use plaint_types::events::Topic;
use plaint_types::models::ChatMessage;

use crate::error::BackendError;

/// The thread a feed shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeedTarget {
    /// A complaint's chat thread (`chats` collection).
    Complaint(Uuid),
    /// A chat room (`chatMessages` collection).
    Room(Uuid),
}

impl FeedTarget {
    pub fn topic(self) -> Topic {
        match self {
            Self::Complaint(id) => Topic::ComplaintChat(id),
            Self::Room(id) => Topic::Room(id),
        }
    }
}

/// Shape of a fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedQuery {
    /// Ordered by timestamp on the server. Needs the compound index.
    pub ordered: bool,
    pub limit: Option<u32>,
}

impl FeedQuery {
    /// One ordered row: succeeds exactly when the index is usable.
    pub fn probe() -> Self {
        Self {
            ordered: true,
            limit: Some(1),
        }
    }

    /// Filter-only query. Never needs an index.
    pub fn unordered() -> Self {
        Self {
            ordered: false,
            limit: None,
        }
    }

    pub fn to_chat_query(self) -> ChatQuery {
        ChatQuery {
            order_by: self.ordered.then(|| "timestamp".to_string()),
            limit: self.limit,
        }
    }
}

/// Snapshots of a live feed. Each item is the full ordered message list.
/// An `Err` item or a closed channel ends the subscription.
pub type Snapshots = mpsc::UnboundedReceiver<Result<Vec<ChatMessage>, BackendError>>;

/// What a chat feed needs from the backend.
pub trait ChatBackend: Send + Sync + 'static {
    /// The signed-in user.
    fn user_id(&self) -> Uuid;

    fn fetch(
        &self,
        target: FeedTarget,
        query: FeedQuery,
    ) -> impl Future<Output = Result<Vec<ChatMessage>, BackendError>> + Send;

    fn send(&self, target: FeedTarget, text: &str) -> impl Future<Output = Result<ChatMessage, BackendError>> + Send;

    fn subscribe(&self, target: FeedTarget) -> impl Future<Output = Result<Snapshots, BackendError>> + Send;

    fn mark_read(&self, target: FeedTarget, message_ids: &[Uuid]) -> impl Future<Output = Result<(), BackendError>> + Send;
}
