pub mod connection;
pub mod dispatcher;

use plaint_types::api::{Claims, ErrorCode};
use plaint_types::events::Topic;
use plaint_types::models::ChatMessage;

pub use connection::handle_connection;
pub use dispatcher::Dispatcher;

/// A watch request or snapshot the feed source refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedRefusal {
    pub code: ErrorCode,
    pub message: String,
}

impl FeedRefusal {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Produces the current contents of a feed on behalf of a connected user.
///
/// Implementations decide visibility and return messages in timestamp
/// order. Called from a blocking thread.
pub trait FeedSource: Send + Sync + 'static {
    fn snapshot(&self, claims: &Claims, topic: Topic) -> Result<Vec<ChatMessage>, FeedRefusal>;
}
