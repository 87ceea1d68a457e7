use axum::{
    extract::{FromRequestParts, Query, Request, State},
    middleware::Next,
    response::Response,
};
use axum_extra::{
    TypedHeader,
    headers::{Authorization, authorization::Bearer},
};
use jsonwebtoken::{DecodingKey, Validation, decode};
use serde::Deserialize;

use plaint_types::api::Claims;
use plaint_types::models::Role;

use crate::auth::AppState;
use crate::error::ApiError;

/// Extract and validate the Bearer JWT, then expose its `Claims` to handlers.
pub async fn require_auth(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let (mut parts, body) = req.into_parts();
    let token = bearer_token(&mut parts, &state)
        .await
        .ok_or_else(|| ApiError::Unauthenticated("Missing bearer token".into()))?;
    let claims = decode_claims(&state, &token)?;

    let mut req = Request::from_parts(parts, body);
    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}

#[derive(Deserialize)]
struct TokenParam {
    token: Option<String>,
}

/// Like `require_auth`, but also accepts the JWT as a `?token=` query
/// parameter so console links work when opened in a browser.
pub async fn require_console_auth(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let (mut parts, body) = req.into_parts();
    let token = match bearer_token(&mut parts, &state).await {
        Some(token) => token,
        None => Query::<TokenParam>::try_from_uri(&parts.uri)
            .ok()
            .and_then(|Query(param)| param.token)
            .ok_or_else(|| ApiError::Unauthenticated("Missing bearer token".into()))?,
    };
    let claims = decode_claims(&state, &token)?;

    let mut req = Request::from_parts(parts, body);
    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}

async fn bearer_token(parts: &mut axum::http::request::Parts, state: &AppState) -> Option<String> {
    TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
        .await
        .ok()
        .map(|TypedHeader(Authorization(bearer))| bearer.token().to_string())
}

fn decode_claims(state: &AppState, token: &str) -> Result<Claims, ApiError> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(state.jwt_secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|_| ApiError::Unauthenticated("Invalid or expired token".into()))
}

/// Refuse callers whose role is not `role`.
pub fn require_role(claims: &Claims, role: Role) -> Result<(), ApiError> {
    if claims.role == role {
        Ok(())
    } else {
        Err(ApiError::denied())
    }
}
