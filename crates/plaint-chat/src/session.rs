use reqwest::StatusCode;
use tracing::info;

use plaint_types::api::{LoginRequest, LoginResponse, MeResponse};
use plaint_types::models::{Role, User};

use crate::error::BackendError;
use crate::http::{HttpBackend, read_json};

/// Outcome of checking a page's required role against the signed-in user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Gate {
    Allow,
    Redirect(String),
}

/// Role gate of a dashboard page.
///
/// No profile means "not signed in": send the user to that page's login.
/// A profile with another role is sent to its own dashboard.
pub fn gate(profile: Option<&User>, expected: Role) -> Gate {
    match profile {
        None => Gate::Redirect(expected.login_path()),
        Some(user) if user.role == expected => Gate::Allow,
        Some(user) => Gate::Redirect(user.role.dashboard_path()),
    }
}

/// A signed-in user and the token that proves it.
#[derive(Clone)]
pub struct Session {
    client: reqwest::Client,
    base_url: String,
    token: String,
    user: User,
}

impl Session {
    /// Sign in through the login page for `expected_role` (if any) and load
    /// the profile.
    pub async fn login(
        base_url: &str,
        username: &str,
        password: &str,
        expected_role: Option<Role>,
    ) -> Result<Self, BackendError> {
        let client = reqwest::Client::new();
        let base_url = base_url.trim_end_matches('/').to_string();

        let response = client
            .post(format!("{}/auth/login", base_url))
            .json(&LoginRequest {
                username: username.to_string(),
                password: password.to_string(),
                role: expected_role,
            })
            .send()
            .await?;
        let login: LoginResponse = read_json(response).await?;

        let session = Self::resume(&base_url, &login.token)
            .await?
            .ok_or_else(|| BackendError::Transport("profile missing after login".into()))?;
        info!("Signed in as {} ({})", session.user.username, session.user.role);
        Ok(session)
    }

    /// Rebuild a session from a stored token. `None` when the token is no
    /// longer valid or the profile is gone.
    pub async fn resume(base_url: &str, token: &str) -> Result<Option<Self>, BackendError> {
        let client = reqwest::Client::new();
        let base_url = base_url.trim_end_matches('/').to_string();

        let response = client
            .get(format!("{}/me", base_url))
            .bearer_auth(token)
            .send()
            .await?;
        if matches!(response.status(), StatusCode::UNAUTHORIZED | StatusCode::NOT_FOUND) {
            return Ok(None);
        }
        let me: MeResponse = read_json(response).await?;

        Ok(Some(Self {
            client,
            base_url,
            token: token.to_string(),
            user: me.user,
        }))
    }

    pub fn user(&self) -> &User {
        &self.user
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn gate(&self, expected: Role) -> Gate {
        gate(Some(&self.user), expected)
    }

    /// Chat backend acting as this user.
    pub fn backend(&self) -> HttpBackend {
        HttpBackend::new(self.client.clone(), self.base_url.clone(), self.token.clone(), self.user.id)
    }
}
