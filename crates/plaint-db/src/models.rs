//! Rows that carry data the API models must not expose.

use plaint_types::models::{Attachment, User};
use uuid::Uuid;

/// A user together with the stored Argon2 password hash.
pub struct UserRow {
    pub user: User,
    pub password: String,
}

/// Attachment metadata plus the storage bookkeeping behind it.
#[derive(Debug, Clone)]
pub struct AttachmentRow {
    pub attachment: Attachment,
    pub room_id: Uuid,
    pub uploader_id: Uuid,
    pub sha256: String,
}
