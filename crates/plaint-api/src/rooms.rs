use std::collections::HashMap;

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;
use serde_json::json;
use tracing::{error, info};
use uuid::Uuid;

use plaint_db::queries::attachment_url;
use plaint_db::{AttachmentRow, Database, now};
use plaint_types::api::{
    ChatQuery, Claims, CreateRoomRequest, MessagesResponse, RoomSummary, SendRoomMessageRequest,
};
use plaint_types::events::Topic;
use plaint_types::models::{Attachment, ChatMessage, ChatRoom, Role};

use crate::auth::{AppState, with_db};
use crate::chat::is_ordered;
use crate::complaints::find_complaint;
use crate::error::ApiError;

/// 10 MB per attachment
const MAX_ATTACHMENT_SIZE: usize = 10 * 1024 * 1024;

/// POST /rooms: open the chat room of a complaint. Idempotent per complaint.
pub async fn create_room(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateRoomRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let complaint_id = req.complaint_id;
    let (room, created) = with_db(&state, move |db| {
        let complaint = find_complaint(db, complaint_id)?;
        let assignee = complaint.assigned_to.ok_or_else(|| {
            ApiError::FailedPrecondition("Complaint has not been assigned yet".into())
        })?;
        let allowed = claims.role == Role::Admin || (claims.role == Role::Faculty && claims.sub == assignee);
        if !allowed {
            return Err(ApiError::denied());
        }

        if let Some(room) = db.get_room_by_complaint(complaint_id)? {
            return Ok((room, false));
        }

        let room = ChatRoom {
            id: Uuid::new_v4(),
            complaint_id,
            complaint_title: complaint.title,
            participants: vec![complaint.student_id, assignee],
            created_at: now(),
            last_message: None,
            unread_count: HashMap::new(),
        };
        db.create_room(&room)?;
        let room = db
            .get_room(room.id)?
            .ok_or_else(|| ApiError::Internal(anyhow::anyhow!("room vanished after insert")))?;
        Ok((room, true))
    })
    .await?;

    if created {
        info!("Opened chat room {} for complaint {}", room.id, room.complaint_id);
        Ok((StatusCode::CREATED, Json(room)))
    } else {
        Ok((StatusCode::OK, Json(room)))
    }
}

/// GET /rooms: the caller's rooms with their unread counters.
pub async fn list_rooms(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = claims.sub;
    let rooms = with_db(&state, move |db| Ok(db.list_rooms_for_user(user_id)?)).await?;

    let summaries: Vec<RoomSummary> = rooms
        .into_iter()
        .map(|room| RoomSummary {
            unread: room.unread_count.get(&user_id).copied().unwrap_or(0),
            room,
        })
        .collect();
    Ok(Json(summaries))
}

pub async fn get_room(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(room_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let room = with_db(&state, move |db| participant_room(db, claims.sub, room_id)).await?;
    Ok(Json(room))
}

/// GET /rooms/{id}/messages. Same ordering rule as the complaint chat.
pub async fn get_messages(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(room_id): Path<Uuid>,
    Query(query): Query<ChatQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let ordered = is_ordered(&query)?;
    let limit = query.limit;

    let messages = with_db(&state, move |db| {
        participant_room(db, claims.sub, room_id)?;
        Ok(db.query_room_messages(room_id, ordered, limit)?)
    })
    .await?;

    Ok(Json(MessagesResponse { messages }))
}

/// POST /rooms/{id}/messages: text and/or base64 attachments.
pub async fn send_message(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(room_id): Path<Uuid>,
    Json(req): Json<SendRoomMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let content = req.content.trim().to_string();
    if content.is_empty() && req.attachments.is_empty() {
        return Err(ApiError::InvalidArgument(
            "A message needs text or at least one attachment".into(),
        ));
    }

    // Decode everything up front so a bad upload stores nothing
    let mut decoded = Vec::with_capacity(req.attachments.len());
    for upload in &req.attachments {
        if upload.name.trim().is_empty() {
            return Err(ApiError::InvalidArgument("Attachment name must not be empty".into()));
        }
        let bytes = B64
            .decode(&upload.data)
            .map_err(|_| ApiError::InvalidArgument(format!("Attachment '{}' is not valid base64", upload.name)))?;
        if bytes.len() > MAX_ATTACHMENT_SIZE {
            return Err(ApiError::InvalidArgument(format!(
                "Attachment '{}' exceeds 10 MB",
                upload.name
            )));
        }
        decoded.push((upload, bytes));
    }

    let sender_id = claims.sub;
    with_db(&state, move |db| participant_room(db, sender_id, room_id)).await?;

    let mut rows = Vec::with_capacity(decoded.len());
    for (upload, bytes) in decoded {
        let id = Uuid::new_v4();
        let sha256 = state.storage.save(id, &bytes).await.map_err(|e| {
            error!("Failed to store attachment {}: {}", id, e);
            ApiError::Internal(e)
        })?;
        rows.push(AttachmentRow {
            attachment: Attachment {
                id,
                name: upload.name.trim().to_string(),
                content_type: upload.content_type.clone(),
                size: bytes.len() as u64,
                url: attachment_url(id),
            },
            room_id,
            uploader_id: sender_id,
            sha256,
        });
    }

    let message = ChatMessage {
        id: Uuid::new_v4(),
        thread_id: room_id,
        text: content,
        sender_id,
        sender_name: claims.username.clone(),
        sender_role: claims.role.as_str().to_string(),
        timestamp: now(),
        attachments: rows.iter().map(|r| r.attachment.clone()).collect(),
        read_by: Vec::new(),
    };

    let stored_ids: Vec<Uuid> = rows.iter().map(|r| r.attachment.id).collect();
    let insert = {
        let message = message.clone();
        with_db(&state, move |db| Ok(db.insert_room_message(&message, &rows)?)).await
    };
    if let Err(e) = insert {
        for id in stored_ids {
            if let Err(cleanup) = state.storage.delete(id).await {
                error!("Failed to remove orphaned attachment {}: {}", id, cleanup);
            }
        }
        return Err(e);
    }

    info!(
        "{} posted to room {} ({} attachment(s))",
        claims.username,
        room_id,
        message.attachments.len()
    );
    state.dispatcher.notify(Topic::Room(room_id));
    Ok((StatusCode::CREATED, Json(message)))
}

/// POST /rooms/{id}/read: mark everything read and zero the caller's counter.
pub async fn mark_read(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(room_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = claims.sub;
    let unread = with_db(&state, move |db| {
        participant_room(db, user_id, room_id)?;
        Ok(db.mark_room_read(room_id, user_id)?)
    })
    .await?;

    state.dispatcher.notify(Topic::Room(room_id));
    Ok(Json(json!({ "unread": unread })))
}

/// Load a room the user takes part in.
pub(crate) fn participant_room(db: &Database, user_id: Uuid, room_id: Uuid) -> Result<ChatRoom, ApiError> {
    let room = db
        .get_room(room_id)?
        .ok_or_else(|| ApiError::NotFound("Chat room not found".into()))?;
    if !room.participants.contains(&user_id) {
        return Err(ApiError::denied());
    }
    Ok(room)
}
