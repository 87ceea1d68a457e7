use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{AcademicYears, ChatMessage, ChatRoom, Complaint, ComplaintStatus, Role, User};

// -- JWT Claims --

/// JWT claims shared by the REST middleware and the WebSocket gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub username: String,
    pub role: Role,
    pub exp: usize,
}

// -- Errors --

/// Error codes, named after the hosted backend's status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCode {
    Unauthenticated,
    PermissionDenied,
    NotFound,
    InvalidArgument,
    AlreadyExists,
    FailedPrecondition,
    Internal,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unauthenticated => "unauthenticated",
            Self::PermissionDenied => "permission-denied",
            Self::NotFound => "not-found",
            Self::InvalidArgument => "invalid-argument",
            Self::AlreadyExists => "already-exists",
            Self::FailedPrecondition => "failed-precondition",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: ErrorCode,
    pub message: String,
}

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SetupRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
    /// Role of the login page used. A mismatch is refused.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    pub user_id: Uuid,
    pub username: String,
    pub role: Role,
    pub token: String,
    pub redirect: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MeResponse {
    pub user: User,
    pub redirect: String,
}

// -- Users --

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateUserRequest {
    pub username: String,
    pub password: String,
    pub role: Role,
    pub first_name: String,
    pub last_name: String,
    pub unique_id: String,
    pub department: String,
    #[serde(default)]
    pub program: Option<String>,
    #[serde(default)]
    pub batch: Option<String>,
    #[serde(default)]
    pub attending: Option<String>,
    #[serde(default)]
    pub academic_years: Option<AcademicYears>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UserQuery {
    pub role: Option<Role>,
    pub q: Option<String>,
}

// -- Complaints --

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateComplaintRequest {
    pub title: String,
    pub category: String,
    pub subcategory: String,
    pub description: String,
    pub semester: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ComplaintQuery {
    #[serde(default)]
    pub resolved: bool,
    pub q: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ForwardRequest {
    pub faculty_id: Uuid,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StatusUpdateRequest {
    pub status: ComplaintStatus,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResolutionRequest {
    pub confirmed: bool,
}

/// Role-dependent `GET /complaints` view.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "view", rename_all = "lowercase")]
pub enum ComplaintsView {
    Student {
        complaints: Vec<Complaint>,
        awaiting_confirmation: Vec<Complaint>,
    },
    Faculty {
        received: Vec<Complaint>,
        active: Vec<Complaint>,
        awaiting_confirmation: Vec<Complaint>,
        resolved: Vec<Complaint>,
    },
    Admin {
        complaints: Vec<Complaint>,
    },
}

// -- Chat --

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct ChatQuery {
    /// Only `timestamp` is supported. Ordered queries need a compound index.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendChatRequest {
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AttachmentUpload {
    pub name: String,
    pub content_type: String,
    /// Base64 (standard alphabet) file contents.
    pub data: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendRoomMessageRequest {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub attachments: Vec<AttachmentUpload>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MarkReadRequest {
    pub message_ids: Vec<Uuid>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateRoomRequest {
    pub complaint_id: Uuid,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RoomSummary {
    #[serde(flatten)]
    pub room: ChatRoom,
    pub unread: u32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessagesResponse {
    pub messages: Vec<ChatMessage>,
}

// -- Indexes --

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateIndexRequest {
    pub collection: String,
    pub fields: Vec<String>,
}

/// Query form of `CreateIndexRequest`, used by console links.
#[derive(Debug, Deserialize)]
pub struct ConsoleIndexQuery {
    pub collection: String,
    /// Comma separated.
    pub fields: String,
}
