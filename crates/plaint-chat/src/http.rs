use futures_util::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};
use uuid::Uuid;

use plaint_types::api::{ErrorBody, ErrorCode, MessagesResponse};
use plaint_types::events::{GatewayCommand, GatewayEvent};
use plaint_types::models::ChatMessage;

use crate::backend::{ChatBackend, FeedQuery, FeedTarget, Snapshots};
use crate::error::BackendError;

/// `ChatBackend` over the server's REST API and WebSocket gateway.
#[derive(Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
    token: String,
    user_id: Uuid,
}

impl HttpBackend {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>, token: impl Into<String>, user_id: Uuid) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            user_id,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn gateway_url(&self) -> String {
        let ws_base = if let Some(rest) = self.base_url.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = self.base_url.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            self.base_url.clone()
        };
        format!("{}/gateway", ws_base)
    }

    fn messages_path(target: FeedTarget) -> String {
        match target {
            FeedTarget::Complaint(id) => format!("/complaints/{}/chat", id),
            FeedTarget::Room(id) => format!("/rooms/{}/messages", id),
        }
    }
}

impl ChatBackend for HttpBackend {
    fn user_id(&self) -> Uuid {
        self.user_id
    }

    async fn fetch(&self, target: FeedTarget, query: FeedQuery) -> Result<Vec<ChatMessage>, BackendError> {
        let response = self
            .client
            .get(self.url(&Self::messages_path(target)))
            .bearer_auth(&self.token)
            .query(&query.to_chat_query())
            .send()
            .await?;
        let body: MessagesResponse = read_json(response).await?;
        Ok(body.messages)
    }

    async fn send(&self, target: FeedTarget, text: &str) -> Result<ChatMessage, BackendError> {
        let body = match target {
            FeedTarget::Complaint(_) => json!({ "text": text }),
            FeedTarget::Room(_) => json!({ "content": text, "attachments": [] }),
        };
        let response = self
            .client
            .post(self.url(&Self::messages_path(target)))
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await?;
        read_json(response).await
    }

    async fn mark_read(&self, target: FeedTarget, message_ids: &[Uuid]) -> Result<(), BackendError> {
        let request = match target {
            FeedTarget::Complaint(id) => self
                .client
                .post(self.url(&format!("/complaints/{}/chat/read", id)))
                .json(&json!({ "message_ids": message_ids })),
            FeedTarget::Room(id) => self.client.post(self.url(&format!("/rooms/{}/read", id))),
        };
        let response = request.bearer_auth(&self.token).send().await?;
        read_json::<serde_json::Value>(response).await?;
        Ok(())
    }

    /// Open a gateway connection, identify, watch the target's topic and
    /// forward its snapshots until the receiver is dropped.
    async fn subscribe(&self, target: FeedTarget) -> Result<Snapshots, BackendError> {
        let (socket, _) = connect_async(self.gateway_url()).await?;
        let (mut write, mut read) = socket.split();

        let identify = GatewayCommand::Identify {
            token: self.token.clone(),
        };
        write.send(Message::Text(serde_json::to_string(&identify)?.into())).await?;

        // Wait for Ready before watching
        loop {
            match read.next().await {
                Some(Ok(Message::Text(text))) => {
                    if let GatewayEvent::Ready { .. } = serde_json::from_str::<GatewayEvent>(&text)? {
                        break;
                    }
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e.into()),
                None => return Err(BackendError::Closed),
            }
        }

        let topic = target.topic();
        write
            .send(Message::Text(serde_json::to_string(&GatewayCommand::Watch { topic })?.into()))
            .await?;

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tx.closed() => {
                        debug!("Snapshot receiver for {} dropped, leaving gateway", topic);
                        let _ = write.send(Message::Close(None)).await;
                        break;
                    }
                    msg = read.next() => {
                        let item = match msg {
                            Some(Ok(Message::Text(text))) => match serde_json::from_str::<GatewayEvent>(&text) {
                                Ok(GatewayEvent::ChatSnapshot { topic: t, messages }) if t == topic => Ok(messages),
                                Ok(GatewayEvent::SubscriptionError { topic: t, code, message }) if t == topic => {
                                    Err(BackendError::server(code, message))
                                }
                                Ok(_) => continue,
                                Err(e) => {
                                    warn!("Ignoring malformed gateway event: {}", e);
                                    continue;
                                }
                            },
                            Some(Ok(Message::Close(_))) | None => Err(BackendError::Closed),
                            Some(Ok(_)) => continue,
                            Some(Err(e)) => Err(e.into()),
                        };
                        let done = item.is_err();
                        if tx.send(item).is_err() || done {
                            break;
                        }
                    }
                }
            }
        });

        Ok(rx)
    }
}

/// Decode a success body, or turn an error body into `BackendError::Server`.
pub(crate) async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, BackendError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json::<T>().await?);
    }

    let text = response.text().await.unwrap_or_default();
    match serde_json::from_str::<ErrorBody>(&text) {
        Ok(body) => Err(body.into()),
        Err(_) => Err(BackendError::server(
            ErrorCode::Internal,
            format!("HTTP {}: {}", status, text),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_url_follows_http_scheme() {
        let backend = HttpBackend::new(reqwest::Client::new(), "https://plaint.example.edu/", "t", Uuid::nil());
        assert_eq!(backend.gateway_url(), "wss://plaint.example.edu/gateway");

        let backend = HttpBackend::new(reqwest::Client::new(), "http://localhost:3000", "t", Uuid::nil());
        assert_eq!(backend.gateway_url(), "ws://localhost:3000/gateway");
    }

    #[test]
    fn paths_follow_target_kind() {
        let id = Uuid::nil();
        assert_eq!(
            HttpBackend::messages_path(FeedTarget::Complaint(id)),
            format!("/complaints/{}/chat", id)
        );
        assert_eq!(
            HttpBackend::messages_path(FeedTarget::Room(id)),
            format!("/rooms/{}/messages", id)
        );
    }
}
