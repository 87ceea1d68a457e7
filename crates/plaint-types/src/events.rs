use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::ErrorCode;
use crate::models::{ChatMessage, Role};

/// A realtime feed a client can watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Topic {
    /// Messages of a complaint's chat thread.
    ComplaintChat(Uuid),
    /// Messages of a chat room.
    Room(Uuid),
}

impl Topic {
    pub fn thread_id(self) -> Uuid {
        match self {
            Self::ComplaintChat(id) | Self::Room(id) => id,
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ComplaintChat(id) => write!(f, "complaint-chat:{}", id),
            Self::Room(id) => write!(f, "room:{}", id),
        }
    }
}

/// Events sent over the WebSocket gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayEvent {
    /// Server confirms successful authentication
    Ready { user_id: Uuid, username: String, role: Role },

    /// Complete, timestamp-ordered contents of a watched feed.
    ChatSnapshot { topic: Topic, messages: Vec<ChatMessage> },

    /// A watch request was refused.
    SubscriptionError { topic: Topic, code: ErrorCode, message: String },
}

impl GatewayEvent {
    /// Returns the topic if this event is scoped to one feed.
    /// Events that return `None` are delivered to the connection directly.
    pub fn topic(&self) -> Option<Topic> {
        match self {
            Self::ChatSnapshot { topic, .. } => Some(*topic),
            _ => None,
        }
    }
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayCommand {
    /// Authenticate the WebSocket connection
    Identify { token: String },

    /// Start receiving snapshots for a feed.
    Watch { topic: Topic },

    /// Stop receiving snapshots for a feed.
    Unwatch { topic: Topic },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_wire_format() {
        let id = Uuid::nil();
        let json = serde_json::to_string(&GatewayCommand::Watch { topic: Topic::Room(id) }).unwrap();
        assert_eq!(
            json,
            r#"{"type":"Watch","data":{"topic":{"kind":"room","id":"00000000-0000-0000-0000-000000000000"}}}"#
        );
    }

    #[test]
    fn only_snapshots_are_topic_scoped() {
        let topic = Topic::ComplaintChat(Uuid::new_v4());
        let snapshot = GatewayEvent::ChatSnapshot { topic, messages: vec![] };
        assert_eq!(snapshot.topic(), Some(topic));

        let refused = GatewayEvent::SubscriptionError {
            topic,
            code: ErrorCode::FailedPrecondition,
            message: "index".into(),
        };
        assert_eq!(refused.topic(), None);
    }
}
