use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Student,
    Faculty,
    Admin,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Student => "student",
            Self::Faculty => "faculty",
            Self::Admin => "admin",
        }
    }

    /// Landing page for a signed-in user of this role.
    pub fn dashboard_path(self) -> String {
        format!("/dashboard/{}", self.as_str())
    }

    pub fn login_path(self) -> String {
        format!("/login/{}", self.as_str())
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "student" => Ok(Self::Student),
            "faculty" => Ok(Self::Faculty),
            "admin" => Ok(Self::Admin),
            other => Err(UnknownValue(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown value '{0}'")]
pub struct UnknownValue(pub String);

/// Workflow state of a complaint. Serialized with the spaced lowercase names
/// stored in the `complaints` collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComplaintStatus {
    #[serde(rename = "pending")]
    Pending,
    #[serde(rename = "under review")]
    UnderReview,
    #[serde(rename = "active")]
    Active,
    #[serde(rename = "awaiting confirmation")]
    AwaitingConfirmation,
    #[serde(rename = "resolved")]
    Resolved,
    #[serde(rename = "rejected")]
    Rejected,
}

impl ComplaintStatus {
    pub const ALL: [ComplaintStatus; 6] = [
        Self::Pending,
        Self::UnderReview,
        Self::Active,
        Self::AwaitingConfirmation,
        Self::Resolved,
        Self::Rejected,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::UnderReview => "under review",
            Self::Active => "active",
            Self::AwaitingConfirmation => "awaiting confirmation",
            Self::Resolved => "resolved",
            Self::Rejected => "rejected",
        }
    }

    /// Human label, e.g. "Under review" / "Awaiting Confirmation".
    pub fn label(self) -> String {
        match self {
            Self::AwaitingConfirmation => "Awaiting Confirmation".to_string(),
            other => {
                let s = other.as_str();
                let mut chars = s.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().chain(chars).collect(),
                    None => String::new(),
                }
            }
        }
    }

    /// Badge variant used by dashboards.
    pub fn badge(self) -> &'static str {
        match self {
            Self::Pending => "secondary",
            Self::UnderReview => "warning",
            Self::Active => "default",
            Self::AwaitingConfirmation => "info",
            Self::Resolved => "success",
            Self::Rejected => "destructive",
        }
    }

    /// Closed complaints no longer take part in the workflow.
    pub fn is_closed(self) -> bool {
        matches!(self, Self::Resolved | Self::Rejected)
    }

    /// Whether `actor` may move a complaint from `self` to `next`.
    ///
    /// The only edges are pending -> under review (admin), under review ->
    /// active -> awaiting confirmation (faculty) and awaiting confirmation ->
    /// resolved | active (student).
    pub fn allows(self, next: ComplaintStatus, actor: Role) -> bool {
        use ComplaintStatus::*;
        matches!(
            (self, next, actor),
            (Pending, UnderReview, Role::Admin)
                | (UnderReview, Active, Role::Faculty)
                | (Active, AwaitingConfirmation, Role::Faculty)
                | (AwaitingConfirmation, Resolved, Role::Student)
                | (AwaitingConfirmation, Active, Role::Student)
        )
    }

    /// Reaching one of these states wipes the complaint's chat thread.
    pub fn clears_chat(self) -> bool {
        matches!(self, Self::AwaitingConfirmation | Self::Resolved)
    }
}

impl fmt::Display for ComplaintStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ComplaintStatus {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| UnknownValue(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionResponse {
    Confirmed,
    Rejected,
}

impl ResolutionResponse {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Confirmed => "confirmed",
            Self::Rejected => "rejected",
        }
    }
}

impl FromStr for ResolutionResponse {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "confirmed" => Ok(Self::Confirmed),
            "rejected" => Ok(Self::Rejected),
            other => Err(UnknownValue(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcademicYears {
    pub start: i32,
    pub end: i32,
}

/// Fields only students carry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudentProfile {
    pub program: String,
    pub batch: String,
    pub attending: String,
    pub academic_years: AcademicYears,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub role: Role,
    pub first_name: String,
    pub last_name: String,
    pub unique_id: String,
    pub department: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub student: Option<StudentProfile>,
    pub created_at: DateTime<Utc>,
    pub created_by: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Complaint {
    pub id: Uuid,
    pub title: String,
    pub category: String,
    pub subcategory: String,
    pub description: String,
    pub student_id: Uuid,
    pub username: String,
    pub department: String,
    pub semester: String,
    pub status: ComplaintStatus,
    pub assigned_to: Option<Uuid>,
    pub student_confirmed: bool,
    pub resolution_response: Option<ResolutionResponse>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Complaint {
    /// Owner, assignee and admins may see the complaint and its chat.
    pub fn is_visible_to(&self, user_id: Uuid, role: Role) -> bool {
        role == Role::Admin || self.student_id == user_id || self.assigned_to == Some(user_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub id: Uuid,
    pub name: String,
    pub content_type: String,
    pub size: u64,
    pub url: String,
}

/// A chat message in either a complaint thread or a chat room.
/// `thread_id` is the complaint id or the room id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: Uuid,
    pub thread_id: Uuid,
    pub text: String,
    pub sender_id: Uuid,
    pub sender_name: String,
    pub sender_role: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub read_by: Vec<Uuid>,
}

impl ChatMessage {
    pub fn is_read_by(&self, user_id: Uuid) -> bool {
        self.sender_id == user_id || self.read_by.contains(&user_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastMessage {
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub sender_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRoom {
    pub id: Uuid,
    pub complaint_id: Uuid,
    pub complaint_title: String,
    pub participants: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
    pub last_message: Option<LastMessage>,
    #[serde(default)]
    pub unread_count: HashMap<Uuid, u32>,
}

/// A provisioned compound index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexInfo {
    pub collection: String,
    pub fields: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub ready_at: DateTime<Utc>,
    pub ready: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workflow_edges_are_actor_bound() {
        use ComplaintStatus::*;
        assert!(Pending.allows(UnderReview, Role::Admin));
        assert!(!Pending.allows(UnderReview, Role::Faculty));
        assert!(UnderReview.allows(Active, Role::Faculty));
        assert!(Active.allows(AwaitingConfirmation, Role::Faculty));
        assert!(AwaitingConfirmation.allows(Resolved, Role::Student));
        assert!(AwaitingConfirmation.allows(Active, Role::Student));
        assert!(!AwaitingConfirmation.allows(Resolved, Role::Faculty));
    }

    #[test]
    fn no_other_edges_exist() {
        let allowed = [
            (ComplaintStatus::Pending, ComplaintStatus::UnderReview),
            (ComplaintStatus::UnderReview, ComplaintStatus::Active),
            (ComplaintStatus::Active, ComplaintStatus::AwaitingConfirmation),
            (ComplaintStatus::AwaitingConfirmation, ComplaintStatus::Resolved),
            (ComplaintStatus::AwaitingConfirmation, ComplaintStatus::Active),
        ];
        for from in ComplaintStatus::ALL {
            for to in ComplaintStatus::ALL {
                let any_actor = [Role::Student, Role::Faculty, Role::Admin]
                    .into_iter()
                    .any(|role| from.allows(to, role));
                assert_eq!(any_actor, allowed.contains(&(from, to)), "{} -> {}", from, to);
            }
        }
    }

    #[test]
    fn status_names_round_trip_through_str() {
        for status in ComplaintStatus::ALL {
            assert_eq!(status.as_str().parse::<ComplaintStatus>().unwrap(), status);
        }
        let json = serde_json::to_string(&ComplaintStatus::AwaitingConfirmation).unwrap();
        assert_eq!(json, "\"awaiting confirmation\"");
        let err = "in-progress".parse::<ComplaintStatus>().unwrap_err();
        assert_eq!(err.to_string(), "unknown value 'in-progress'");
        let _: &dyn std::error::Error = &err;
    }

    #[test]
    fn only_terminal_statuses_are_closed() {
        let closed: Vec<_> = ComplaintStatus::ALL.into_iter().filter(|s| s.is_closed()).collect();
        assert_eq!(closed, [ComplaintStatus::Resolved, ComplaintStatus::Rejected]);
    }

    #[test]
    fn labels_and_badges() {
        assert_eq!(ComplaintStatus::UnderReview.label(), "Under review");
        assert_eq!(ComplaintStatus::AwaitingConfirmation.label(), "Awaiting Confirmation");
        assert_eq!(ComplaintStatus::Resolved.badge(), "success");
    }

    #[test]
    fn complaint_visibility() {
        let student = Uuid::new_v4();
        let faculty = Uuid::new_v4();
        let now = Utc::now();
        let complaint = Complaint {
            id: Uuid::new_v4(),
            title: "Wi-Fi".into(),
            category: "Technology and Digital".into(),
            subcategory: "Wi-Fi connectivity".into(),
            description: "Drops every hour".into(),
            student_id: student,
            username: "ali".into(),
            department: "Computer Science".into(),
            semester: "3".into(),
            status: ComplaintStatus::UnderReview,
            assigned_to: Some(faculty),
            student_confirmed: false,
            resolution_response: None,
            created_at: now,
            updated_at: now,
        };
        assert!(complaint.is_visible_to(student, Role::Student));
        assert!(complaint.is_visible_to(faculty, Role::Faculty));
        assert!(complaint.is_visible_to(Uuid::new_v4(), Role::Admin));
        assert!(!complaint.is_visible_to(Uuid::new_v4(), Role::Faculty));
    }
}
