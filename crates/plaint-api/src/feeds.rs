use plaint_gateway::{FeedRefusal, FeedSource};
use plaint_types::api::Claims;
use plaint_types::events::Topic;
use plaint_types::models::ChatMessage;

use crate::auth::AppStateInner;
use crate::complaints::visible_complaint;
use crate::error::ApiError;
use crate::rooms::participant_room;

/// Gateway snapshots are ordered queries, so a live feed needs the same
/// compound index as `?order_by=timestamp`.
impl FeedSource for AppStateInner {
    fn snapshot(&self, claims: &Claims, topic: Topic) -> Result<Vec<ChatMessage>, FeedRefusal> {
        let result = match topic {
            Topic::ComplaintChat(complaint_id) => visible_complaint(&self.db, claims, complaint_id)
                .and_then(|_| Ok(self.db.query_chats(complaint_id, true, None)?)),
            Topic::Room(room_id) => participant_room(&self.db, claims.sub, room_id)
                .and_then(|_| Ok(self.db.query_room_messages(room_id, true, None)?)),
        };

        result.map_err(|e| {
            let e = e.with_console(&self.console_url);
            let message = match &e {
                ApiError::Internal(_) => "Internal error".to_string(),
                other => other.to_string(),
            };
            if let ApiError::Internal(inner) = &e {
                tracing::error!("Snapshot of {} failed: {:#}", topic, inner);
            }
            FeedRefusal::new(e.code(), message)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use plaint_db::{Database, now};
    use plaint_gateway::Dispatcher;
    use plaint_types::api::ErrorCode;
    use plaint_types::models::{Complaint, ComplaintStatus, Role, User};
    use uuid::Uuid;

    use crate::storage::Storage;

    async fn state() -> AppStateInner {
        let dir = std::env::temp_dir().join(format!("plaint-feeds-{}", Uuid::new_v4()));
        AppStateInner {
            db: Database::open_in_memory().unwrap(),
            jwt_secret: "test-secret".into(),
            dispatcher: Dispatcher::new(),
            storage: Storage::new(dir).await.unwrap(),
            email_domain: "university.edu".into(),
            console_url: "http://console".into(),
            index_build_secs: 0,
        }
    }

    fn student(db: &Database) -> User {
        let user = User {
            id: Uuid::new_v4(),
            username: "sara".into(),
            email: "sara@university.edu".into(),
            role: Role::Student,
            first_name: "Sara".into(),
            last_name: "Khan".into(),
            unique_id: "S-1".into(),
            department: "Computer Science".into(),
            student: None,
            created_at: now(),
            created_by: None,
        };
        db.create_user(&user, "hash").unwrap();
        user
    }

    fn claims_for(user: &User) -> Claims {
        Claims {
            sub: user.id,
            username: user.username.clone(),
            role: user.role,
            exp: usize::MAX,
        }
    }

    #[tokio::test]
    async fn refuses_without_index_then_serves_snapshot() {
        let state = Arc::new(state().await);
        let owner = student(&state.db);
        let at = now();
        let complaint = Complaint {
            id: Uuid::new_v4(),
            title: "Noise".into(),
            category: "Facilities and Infrastructure".into(),
            subcategory: "Dormitory issues".into(),
            description: "Loud music at night".into(),
            student_id: owner.id,
            username: owner.username.clone(),
            department: owner.department.clone(),
            semester: "1".into(),
            status: ComplaintStatus::Pending,
            assigned_to: None,
            student_confirmed: false,
            resolution_response: None,
            created_at: at,
            updated_at: at,
        };
        state.db.insert_complaint(&complaint).unwrap();
        let topic = Topic::ComplaintChat(complaint.id);

        let refusal = state.snapshot(&claims_for(&owner), topic).unwrap_err();
        assert_eq!(refusal.code, ErrorCode::FailedPrecondition);
        assert!(refusal.message.contains("http://console/indexes/create?collection=chats"));

        crate::indexes::provision_required(&state.db, 0).unwrap();
        assert!(state.snapshot(&claims_for(&owner), topic).unwrap().is_empty());

        let mut stranger = owner.clone();
        stranger.id = Uuid::new_v4();
        let refusal = state.snapshot(&claims_for(&stranger), topic).unwrap_err();
        assert_eq!(refusal.code, ErrorCode::PermissionDenied);
    }
}
