use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::info;
use uuid::Uuid;

use plaint_db::{ComplaintFilter, Database, now};
use plaint_types::api::{
    Claims, ComplaintQuery, ComplaintsView, CreateComplaintRequest, ForwardRequest, ResolutionRequest,
    StatusUpdateRequest,
};
use plaint_types::catalog::canonical_category;
use plaint_types::events::Topic;
use plaint_types::models::{Complaint, ComplaintStatus, ResolutionResponse, Role};

use crate::auth::{AppState, with_db};
use crate::error::ApiError;
use crate::middleware::require_role;

/// POST /complaints: a student files a complaint.
pub async fn create_complaint(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateComplaintRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require_role(&claims, Role::Student)?;

    let title = req.title.trim().to_string();
    let description = req.description.trim().to_string();
    let semester = req.semester.trim().to_string();
    if title.is_empty() || description.is_empty() || semester.is_empty() {
        return Err(ApiError::InvalidArgument(
            "Title, description and semester are required".into(),
        ));
    }
    let (category, subcategory) = canonical_category(&req.category, &req.subcategory).ok_or_else(|| {
        ApiError::InvalidArgument(format!(
            "Unknown category '{}' / '{}'",
            req.category, req.subcategory
        ))
    })?;

    let student_id = claims.sub;
    let complaint = with_db(&state, move |db| {
        let student = db
            .get_user(student_id)?
            .ok_or_else(|| ApiError::NotFound("Profile not found".into()))?;
        let at = now();
        let complaint = Complaint {
            id: Uuid::new_v4(),
            title,
            category: category.to_string(),
            subcategory: subcategory.to_string(),
            description,
            student_id,
            username: student.username,
            department: student.department,
            semester,
            status: ComplaintStatus::Pending,
            assigned_to: None,
            student_confirmed: false,
            resolution_response: None,
            created_at: at,
            updated_at: at,
        };
        db.insert_complaint(&complaint)?;
        Ok(complaint)
    })
    .await?;

    info!("{} filed complaint {} ({})", claims.username, complaint.id, complaint.category);
    Ok((StatusCode::CREATED, Json(complaint)))
}

/// GET /complaints: the caller's dashboard view.
pub async fn list_complaints(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<ComplaintQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = claims.sub;
    let view = match claims.role {
        Role::Student => {
            let complaints = with_db(&state, move |db| {
                Ok(db.list_complaints(&ComplaintFilter {
                    student_id: Some(user_id),
                    ..Default::default()
                })?)
            })
            .await?;
            let awaiting_confirmation = complaints
                .iter()
                .filter(|c| c.status == ComplaintStatus::AwaitingConfirmation)
                .cloned()
                .collect();
            ComplaintsView::Student {
                complaints,
                awaiting_confirmation,
            }
        }
        Role::Faculty => {
            let mut assigned = with_db(&state, move |db| {
                Ok(db.list_complaints(&ComplaintFilter {
                    assigned_to: Some(user_id),
                    ..Default::default()
                })?)
            })
            .await?;
            sort_by_updated(&mut assigned);
            let bucket = |status: ComplaintStatus| -> Vec<Complaint> {
                assigned.iter().filter(|c| c.status == status).cloned().collect()
            };
            ComplaintsView::Faculty {
                received: bucket(ComplaintStatus::UnderReview),
                active: bucket(ComplaintStatus::Active),
                awaiting_confirmation: bucket(ComplaintStatus::AwaitingConfirmation),
                resolved: bucket(ComplaintStatus::Resolved),
            }
        }
        Role::Admin => {
            let resolved = query.resolved;
            let mut complaints = with_db(&state, move |db| {
                let filter = if resolved {
                    ComplaintFilter {
                        statuses: vec![ComplaintStatus::Resolved],
                        ..Default::default()
                    }
                } else {
                    ComplaintFilter {
                        exclude_statuses: vec![ComplaintStatus::Resolved],
                        ..Default::default()
                    }
                };
                Ok(db.list_complaints(&filter)?)
            })
            .await?;
            if resolved {
                sort_by_updated(&mut complaints);
            }
            if let Some(q) = query.q.as_deref() {
                complaints.retain(|c| matches_search(c, q));
            }
            ComplaintsView::Admin { complaints }
        }
    };
    Ok(Json(view))
}

/// GET /complaints/previous: the student's closed complaints.
pub async fn previous_complaints(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    require_role(&claims, Role::Student)?;
    let student_id = claims.sub;
    let mut complaints = with_db(&state, move |db| {
        Ok(db.list_complaints(&ComplaintFilter {
            student_id: Some(student_id),
            statuses: ComplaintStatus::ALL.into_iter().filter(|s| s.is_closed()).collect(),
            ..Default::default()
        })?)
    })
    .await?;
    sort_by_updated(&mut complaints);
    Ok(Json(complaints))
}

pub async fn get_complaint(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(complaint_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let complaint = with_db(&state, move |db| visible_complaint(db, &claims, complaint_id)).await?;
    Ok(Json(complaint))
}

/// POST /complaints/{id}/forward: admin hands a pending complaint to faculty.
pub async fn forward_complaint(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(complaint_id): Path<Uuid>,
    Json(req): Json<ForwardRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require_role(&claims, Role::Admin)?;

    let complaint = with_db(&state, move |db| {
        let complaint = find_complaint(db, complaint_id)?;
        ensure_transition(&complaint, ComplaintStatus::UnderReview, Role::Admin)?;

        let faculty = db
            .get_user(req.faculty_id)?
            .filter(|u| u.role == Role::Faculty)
            .ok_or_else(|| ApiError::InvalidArgument("Complaints can only be forwarded to faculty".into()))?;

        db.assign_complaint(complaint_id, faculty.id, now())?;
        find_complaint(db, complaint_id)
    })
    .await?;

    info!("{} forwarded complaint {} to {:?}", claims.username, complaint.id, complaint.assigned_to);
    Ok(Json(complaint))
}

/// POST /complaints/{id}/status: the assigned faculty member advances the workflow.
pub async fn update_status(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(complaint_id): Path<Uuid>,
    Json(req): Json<StatusUpdateRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require_role(&claims, Role::Faculty)?;

    let faculty_id = claims.sub;
    let next = req.status;
    let (complaint, cleared) = with_db(&state, move |db| {
        let complaint = find_complaint(db, complaint_id)?;
        if complaint.assigned_to != Some(faculty_id) {
            return Err(ApiError::denied());
        }
        ensure_transition(&complaint, next, Role::Faculty)?;

        db.update_complaint_status(complaint_id, next, now())?;
        let cleared = if next.clears_chat() {
            Some(db.delete_chats(complaint_id)?)
        } else {
            None
        };
        Ok((find_complaint(db, complaint_id)?, cleared))
    })
    .await?;

    info!("{} moved complaint {} to {}", claims.username, complaint.id, complaint.status);
    if let Some(deleted) = cleared {
        info!("Cleared {} chat messages of complaint {}", deleted, complaint.id);
        state.dispatcher.notify(Topic::ComplaintChat(complaint.id));
    }
    Ok(Json(complaint))
}

/// POST /complaints/{id}/resolution: the owning student confirms or rejects.
pub async fn respond_to_resolution(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(complaint_id): Path<Uuid>,
    Json(req): Json<ResolutionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require_role(&claims, Role::Student)?;

    let student_id = claims.sub;
    let (response, next) = if req.confirmed {
        (ResolutionResponse::Confirmed, ComplaintStatus::Resolved)
    } else {
        (ResolutionResponse::Rejected, ComplaintStatus::Active)
    };

    let complaint = with_db(&state, move |db| {
        let complaint = find_complaint(db, complaint_id)?;
        if complaint.student_id != student_id {
            return Err(ApiError::denied());
        }
        ensure_transition(&complaint, next, Role::Student)?;

        db.record_resolution(complaint_id, response, next, now())?;
        if next.clears_chat() {
            db.delete_chats(complaint_id)?;
        }
        find_complaint(db, complaint_id)
    })
    .await?;

    info!(
        "{} answered resolution of complaint {}: {}",
        claims.username,
        complaint.id,
        response.as_str()
    );
    if next.clears_chat() {
        state.dispatcher.notify(Topic::ComplaintChat(complaint.id));
    }
    Ok(Json(complaint))
}

pub(crate) fn find_complaint(db: &Database, complaint_id: Uuid) -> Result<Complaint, ApiError> {
    db.get_complaint(complaint_id)?
        .ok_or_else(|| ApiError::NotFound("Complaint not found".into()))
}

/// Load a complaint the caller may see: its student, its assignee, or an admin.
pub(crate) fn visible_complaint(db: &Database, claims: &Claims, complaint_id: Uuid) -> Result<Complaint, ApiError> {
    let complaint = find_complaint(db, complaint_id)?;
    if !complaint.is_visible_to(claims.sub, claims.role) {
        return Err(ApiError::denied());
    }
    Ok(complaint)
}

fn ensure_transition(complaint: &Complaint, next: ComplaintStatus, actor: Role) -> Result<(), ApiError> {
    if complaint.status.allows(next, actor) {
        Ok(())
    } else {
        Err(ApiError::FailedPrecondition(format!(
            "Cannot move complaint from '{}' to '{}'",
            complaint.status, next
        )))
    }
}

fn sort_by_updated(complaints: &mut [Complaint]) {
    complaints.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
}

/// Case-insensitive match over the fields the admin search box covers.
fn matches_search(complaint: &Complaint, query: &str) -> bool {
    let query = query.trim().to_lowercase();
    if query.is_empty() {
        return true;
    }
    [
        &complaint.category,
        &complaint.subcategory,
        &complaint.title,
        &complaint.description,
        &complaint.username,
    ]
    .iter()
    .any(|field| field.to_lowercase().contains(&query))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complaint(status: ComplaintStatus) -> Complaint {
        let at = now();
        Complaint {
            id: Uuid::new_v4(),
            title: "Wifi drops in library".into(),
            category: "Technology and Digital".into(),
            subcategory: "Wi-Fi connectivity".into(),
            description: "Every afternoon".into(),
            student_id: Uuid::new_v4(),
            username: "sara".into(),
            department: "Computer Science".into(),
            semester: "3".into(),
            status,
            assigned_to: None,
            student_confirmed: false,
            resolution_response: None,
            created_at: at,
            updated_at: at,
        }
    }

    #[test]
    fn search_covers_text_fields_case_insensitively() {
        let c = complaint(ComplaintStatus::Pending);
        assert!(matches_search(&c, "LIBRARY"));
        assert!(matches_search(&c, "wi-fi"));
        assert!(matches_search(&c, "SARA"));
        assert!(matches_search(&c, "  "));
        assert!(!matches_search(&c, "parking"));
    }

    #[test]
    fn transitions_outside_the_workflow_are_refused() {
        let c = complaint(ComplaintStatus::Pending);
        assert!(ensure_transition(&c, ComplaintStatus::UnderReview, Role::Admin).is_ok());
        let err = ensure_transition(&c, ComplaintStatus::Resolved, Role::Faculty).unwrap_err();
        assert!(matches!(err, ApiError::FailedPrecondition(_)));
    }
}
