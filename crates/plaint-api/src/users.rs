use axum::{
    Extension, Json,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::info;
use uuid::Uuid;

use plaint_db::now;
use plaint_types::api::{Claims, CreateUserRequest, UserQuery};
use plaint_types::catalog::{canonical_department, canonical_program};
use plaint_types::models::{AcademicYears, Role, StudentProfile, User};

use crate::auth::{AppState, hash_password, validate_password, validate_username, with_db};
use crate::error::ApiError;
use crate::middleware::require_role;

/// POST /users: admin creates a student or faculty account.
pub async fn create_user(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateUserRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require_role(&claims, Role::Admin)?;

    let username = req.username.trim().to_lowercase();
    validate_username(&username)?;
    validate_password(&req.password)?;

    if req.role == Role::Admin {
        return Err(ApiError::InvalidArgument(
            "Only student and faculty accounts can be created".into(),
        ));
    }
    if req.first_name.trim().is_empty() || req.last_name.trim().is_empty() {
        return Err(ApiError::InvalidArgument("First and last name are required".into()));
    }
    if req.unique_id.trim().is_empty() {
        return Err(ApiError::InvalidArgument("Unique ID is required".into()));
    }
    let department = canonical_department(&req.department)
        .ok_or_else(|| ApiError::InvalidArgument(format!("Unknown department '{}'", req.department)))?;

    let student = match req.role {
        Role::Student => Some(student_profile(&req)?),
        _ => None,
    };

    let password_hash = hash_password(&req.password)?;
    let user = User {
        id: Uuid::new_v4(),
        email: format!("{}@{}", username, state.email_domain),
        username,
        role: req.role,
        first_name: req.first_name.trim().to_string(),
        last_name: req.last_name.trim().to_string(),
        unique_id: req.unique_id.trim().to_string(),
        department: department.to_string(),
        student,
        created_at: now(),
        created_by: Some(claims.sub),
    };

    let user = with_db(&state, move |db| {
        if !db.create_user(&user, &password_hash)? {
            return Err(ApiError::AlreadyExists(format!(
                "Username '{}' is already taken",
                user.username
            )));
        }
        Ok(user)
    })
    .await?;

    info!("{} created {} account {}", claims.username, user.role, user.username);
    Ok((StatusCode::CREATED, Json(user)))
}

fn student_profile(req: &CreateUserRequest) -> Result<StudentProfile, ApiError> {
    let program = req
        .program
        .as_deref()
        .and_then(canonical_program)
        .ok_or_else(|| ApiError::InvalidArgument("Students need a valid program".into()))?;

    let academic_years = req
        .academic_years
        .clone()
        .ok_or_else(|| ApiError::InvalidArgument("Students need academic years".into()))?;
    if academic_years.start > academic_years.end {
        return Err(ApiError::InvalidArgument(
            "Academic years must not end before they start".into(),
        ));
    }

    Ok(StudentProfile {
        program: program.to_string(),
        batch: req.batch.clone().unwrap_or_default(),
        attending: req.attending.clone().unwrap_or_default(),
        academic_years: AcademicYears {
            start: academic_years.start,
            end: academic_years.end,
        },
    })
}

/// GET /users?role=&q=
pub async fn list_users(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<UserQuery>,
) -> Result<impl IntoResponse, ApiError> {
    require_role(&claims, Role::Admin)?;

    let role = query.role;
    let mut users = with_db(&state, move |db| Ok(db.list_users(role)?)).await?;

    if let Some(q) = query.q.map(|q| q.trim().to_lowercase()).filter(|q| !q.is_empty()) {
        users.retain(|u| u.username.to_lowercase().contains(&q));
    }
    Ok(Json(users))
}

/// GET /users/faculty: candidates for the forward dialog.
pub async fn list_faculty(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    require_role(&claims, Role::Admin)?;
    let users = with_db(&state, |db| Ok(db.list_users(Some(Role::Faculty))?)).await?;
    Ok(Json(users))
}
