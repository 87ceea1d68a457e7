use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde_json::json;
use tracing::debug;
use uuid::Uuid;

use plaint_db::now;
use plaint_types::api::{ChatQuery, Claims, MarkReadRequest, MessagesResponse, SendChatRequest};
use plaint_types::events::Topic;
use plaint_types::models::ChatMessage;

use crate::auth::{AppState, with_db};
use crate::complaints::visible_complaint;
use crate::error::ApiError;

/// Parse the ordering of a chat query. Only `timestamp` is orderable.
pub(crate) fn is_ordered(query: &ChatQuery) -> Result<bool, ApiError> {
    match query.order_by.as_deref() {
        None => Ok(false),
        Some("timestamp") => Ok(true),
        Some(other) => Err(ApiError::InvalidArgument(format!(
            "Cannot order chat messages by '{}'",
            other
        ))),
    }
}

/// GET /complaints/{id}/chat
///
/// With `order_by=timestamp` this is the filtered + ordered query that needs
/// the `chats` compound index; without it messages come back in insertion
/// order and the caller sorts them.
pub async fn get_chat(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(complaint_id): Path<Uuid>,
    Query(query): Query<ChatQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let ordered = is_ordered(&query)?;
    let limit = query.limit;

    let messages = with_db(&state, move |db| {
        visible_complaint(db, &claims, complaint_id)?;
        Ok(db.query_chats(complaint_id, ordered, limit)?)
    })
    .await?;

    Ok(Json(MessagesResponse { messages }))
}

/// POST /complaints/{id}/chat
pub async fn send_chat(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(complaint_id): Path<Uuid>,
    Json(req): Json<SendChatRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let text = req.text.trim().to_string();
    if text.is_empty() {
        return Err(ApiError::InvalidArgument("Message text must not be empty".into()));
    }

    let message = ChatMessage {
        id: Uuid::new_v4(),
        thread_id: complaint_id,
        text,
        sender_id: claims.sub,
        sender_name: claims.username.clone(),
        sender_role: claims.role.as_str().to_string(),
        timestamp: now(),
        attachments: Vec::new(),
        read_by: Vec::new(),
    };

    let message = with_db(&state, move |db| {
        let complaint = visible_complaint(db, &claims, complaint_id)?;
        if complaint.status.clears_chat() {
            return Err(ApiError::FailedPrecondition(
                "Chat is closed for this complaint".into(),
            ));
        }
        db.insert_chat(&message)?;
        Ok(message)
    })
    .await?;

    debug!("{} posted to complaint chat {}", message.sender_name, complaint_id);
    state.dispatcher.notify(Topic::ComplaintChat(complaint_id));
    Ok((StatusCode::CREATED, Json(message)))
}

/// POST /complaints/{id}/chat/read
pub async fn mark_read(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(complaint_id): Path<Uuid>,
    Json(req): Json<MarkReadRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = claims.sub;
    let marked = with_db(&state, move |db| {
        visible_complaint(db, &claims, complaint_id)?;
        Ok(db.mark_chats_read(complaint_id, user_id, &req.message_ids)?)
    })
    .await?;

    if marked > 0 {
        state.dispatcher.notify(Topic::ComplaintChat(complaint_id));
    }
    Ok(Json(json!({ "marked": marked })))
}
