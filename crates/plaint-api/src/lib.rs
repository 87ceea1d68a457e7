pub mod attachments;
pub mod auth;
pub mod catalog;
pub mod chat;
pub mod complaints;
pub mod error;
pub mod feeds;
pub mod indexes;
pub mod middleware;
pub mod rooms;
pub mod storage;
pub mod users;

use std::sync::Arc;

use axum::{
    Router,
    extract::{DefaultBodyLimit, State, WebSocketUpgrade},
    response::IntoResponse,
    routing::{get, post},
};

use plaint_gateway::{FeedSource, handle_connection};

pub use auth::{AppState, AppStateInner};
pub use error::ApiError;

/// Room messages carry base64 attachments of up to 10 MB each.
const MAX_BODY_SIZE: usize = 64 * 1024 * 1024;

/// All HTTP and WebSocket routes. Cross-cutting layers (CORS, tracing) are
/// added by the binary.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/health", get(catalog::health))
        .route("/catalog", get(catalog::get_catalog))
        .route("/setup", post(auth::setup))
        .route("/auth/login", post(auth::login))
        .route("/gateway", get(ws_upgrade));

    let protected_routes = Router::new()
        .route("/me", get(auth::me))
        .route("/users", get(users::list_users).post(users::create_user))
        .route("/users/faculty", get(users::list_faculty))
        .route(
            "/complaints",
            get(complaints::list_complaints).post(complaints::create_complaint),
        )
        .route("/complaints/previous", get(complaints::previous_complaints))
        .route("/complaints/{complaint_id}", get(complaints::get_complaint))
        .route("/complaints/{complaint_id}/forward", post(complaints::forward_complaint))
        .route("/complaints/{complaint_id}/status", post(complaints::update_status))
        .route(
            "/complaints/{complaint_id}/resolution",
            post(complaints::respond_to_resolution),
        )
        .route("/complaints/{complaint_id}/chat", get(chat::get_chat).post(chat::send_chat))
        .route("/complaints/{complaint_id}/chat/read", post(chat::mark_read))
        .route("/rooms", get(rooms::list_rooms).post(rooms::create_room))
        .route("/rooms/{room_id}", get(rooms::get_room))
        .route(
            "/rooms/{room_id}/messages",
            get(rooms::get_messages).post(rooms::send_message),
        )
        .route("/rooms/{room_id}/read", post(rooms::mark_read))
        .route("/attachments/{attachment_id}", get(attachments::download_attachment))
        .route("/indexes", get(indexes::list_indexes).post(indexes::create_index))
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::require_auth,
        ));

    // Opened from banner links, so the token may ride in the query string
    let console_routes = Router::new()
        .route("/console/indexes/create", get(indexes::console_create))
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::require_console_auth,
        ));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(console_routes)
        .layer(DefaultBodyLimit::max(MAX_BODY_SIZE))
        .with_state(state)
}

async fn ws_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    let dispatcher = state.dispatcher.clone();
    let jwt_secret = state.jwt_secret.clone();
    let source: Arc<dyn FeedSource> = state;
    ws.on_upgrade(move |socket| handle_connection(socket, dispatcher, source, jwt_secret))
}
