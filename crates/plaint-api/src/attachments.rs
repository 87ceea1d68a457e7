use axum::{
    Extension,
    extract::{Path, State},
    http::header,
    response::IntoResponse,
};
use tracing::error;
use uuid::Uuid;

use plaint_types::api::Claims;

use crate::auth::{AppState, with_db};
use crate::error::ApiError;
use crate::rooms::participant_room;

/// GET /attachments/{id}: stored bytes, for participants of the owning room.
pub async fn download_attachment(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(attachment_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = claims.sub;
    let row = with_db(&state, move |db| {
        let row = db
            .get_attachment(attachment_id)?
            .ok_or_else(|| ApiError::NotFound("Attachment not found".into()))?;
        participant_room(db, user_id, row.room_id)?;
        Ok(row)
    })
    .await?;

    let bytes = state.storage.read(attachment_id).await.map_err(|e| {
        error!("Failed to read attachment {} ({}): {}", attachment_id, row.sha256, e);
        ApiError::NotFound("Attachment not found".into())
    })?;

    Ok(([(header::CONTENT_TYPE, row.attachment.content_type)], bytes))
}
