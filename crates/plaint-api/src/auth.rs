use std::sync::Arc;

use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};
use jsonwebtoken::{EncodingKey, Header, encode};
use tracing::{error, info};
use uuid::Uuid;

use plaint_db::{Database, now};
use plaint_gateway::Dispatcher;
use plaint_types::api::{Claims, LoginRequest, LoginResponse, MeResponse, SetupRequest};
use plaint_types::models::{Role, User};

use crate::error::ApiError;
use crate::storage::Storage;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Database,
    pub jwt_secret: String,
    pub dispatcher: Dispatcher,
    pub storage: Storage,
    /// Accounts get `{username}@{email_domain}`.
    pub email_domain: String,
    /// Base of the index console links handed out in missing-index errors.
    pub console_url: String,
    /// Seconds a newly created index takes to become ready.
    pub index_build_secs: u64,
}

/// Run blocking DB work off the async runtime.
pub(crate) async fn with_db<T, F>(state: &AppState, f: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&Database) -> Result<T, ApiError> + Send + 'static,
{
    let inner = state.clone();
    tokio::task::spawn_blocking(move || f(&inner.db))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ApiError::Internal(anyhow::anyhow!("blocking task failed"))
        })?
        .map_err(|e| e.with_console(&state.console_url))
}

pub(crate) fn validate_username(username: &str) -> Result<(), ApiError> {
    let valid_chars = username
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '_' | '-'));
    if !(3..=32).contains(&username.len()) || !valid_chars {
        return Err(ApiError::InvalidArgument(
            "Username must be 3-32 characters of a-z, 0-9, '.', '_' or '-'".into(),
        ));
    }
    Ok(())
}

pub(crate) fn validate_password(password: &str) -> Result<(), ApiError> {
    if password.chars().count() < 6 {
        return Err(ApiError::InvalidArgument(
            "Password must be at least 6 characters".into(),
        ));
    }
    Ok(())
}

/// Hash password with Argon2id
pub(crate) fn hash_password(password: &str) -> Result<String, ApiError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("password hashing failed: {}", e)))
}

/// POST /setup: create the first admin account.
pub async fn setup(
    State(state): State<AppState>,
    Json(req): Json<SetupRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_username(&req.username)?;
    validate_password(&req.password)?;

    let password_hash = hash_password(&req.password)?;
    let user = User {
        id: Uuid::new_v4(),
        email: format!("{}@{}", req.username, state.email_domain),
        username: req.username,
        role: Role::Admin,
        first_name: String::new(),
        last_name: String::new(),
        unique_id: String::new(),
        department: String::new(),
        student: None,
        created_at: now(),
        created_by: None,
    };

    let user = with_db(&state, move |db| {
        if !db.create_first_admin(&user, &password_hash)? {
            return Err(ApiError::AlreadyExists("An admin account already exists".into()));
        }
        Ok(user)
    })
    .await?;

    info!("Admin account {} created", user.username);
    Ok((StatusCode::CREATED, Json(user)))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let username = req.username.trim().to_lowercase();
    let email = format!("{}@{}", username, state.email_domain);

    let row = with_db(&state, move |db| Ok(db.get_user_by_username(&username)?)).await?;
    let row = row
        .filter(|row| row.user.email == email)
        .ok_or_else(|| ApiError::Unauthenticated("Invalid username or password".into()))?;

    // Verify password
    let parsed_hash = PasswordHash::new(&row.password)
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("stored hash unreadable: {}", e)))?;
    Argon2::default()
        .verify_password(req.password.as_bytes(), &parsed_hash)
        .map_err(|_| ApiError::Unauthenticated("Invalid username or password".into()))?;

    let user = row.user;
    if req.role.is_some_and(|expected| expected != user.role) {
        return Err(ApiError::denied());
    }

    let token = create_token(&state.jwt_secret, &user).map_err(ApiError::Internal)?;
    info!("{} ({}) logged in as {}", user.username, user.id, user.role);

    Ok(Json(LoginResponse {
        user_id: user.id,
        username: user.username,
        role: user.role,
        token,
        redirect: user.role.dashboard_path(),
    }))
}

/// GET /me: the caller's profile and the dashboard they belong on.
pub async fn me(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = claims.sub;
    let user = with_db(&state, move |db| Ok(db.get_user(user_id)?))
        .await?
        .ok_or_else(|| ApiError::NotFound("Profile not found".into()))?;

    Ok(Json(MeResponse {
        redirect: user.role.dashboard_path(),
        user,
    }))
}

pub fn create_token(secret: &str, user: &User) -> anyhow::Result<String> {
    let claims = Claims {
        sub: user.id,
        username: user.username.clone(),
        role: user.role,
        exp: (chrono::Utc::now() + chrono::Duration::days(30)).timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usernames_are_restricted() {
        assert!(validate_username("ali.khan_2").is_ok());
        assert!(validate_username("ab").is_err());
        assert!(validate_username("Ali").is_err());
        assert!(validate_username("has space").is_err());
        assert!(validate_username(&"a".repeat(33)).is_err());
    }

    #[test]
    fn passwords_need_six_chars() {
        assert!(validate_password("12345").is_err());
        assert!(validate_password("123456").is_ok());
    }

    #[test]
    fn hashes_verify() {
        let hash = hash_password("secret1").unwrap();
        let parsed = PasswordHash::new(&hash).unwrap();
        assert!(Argon2::default().verify_password(b"secret1", &parsed).is_ok());
        assert!(Argon2::default().verify_password(b"secret2", &parsed).is_err());
    }
}
