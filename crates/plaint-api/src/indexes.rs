use axum::{
    Extension, Json,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{DateTime, TimeDelta, Utc};
use tracing::info;

use plaint_db::{Database, REQUIRED_INDEXES, now};
use plaint_types::api::{Claims, ConsoleIndexQuery, CreateIndexRequest};
use plaint_types::models::{IndexInfo, Role};

use crate::auth::{AppState, with_db};
use crate::error::ApiError;
use crate::middleware::require_role;

/// Longest simulated index build accepted from configuration (one week).
pub const MAX_INDEX_BUILD_SECS: u64 = 7 * 24 * 60 * 60;

/// When an index created now with the given build time becomes ready.
pub fn ready_at(build_secs: u64) -> anyhow::Result<DateTime<Utc>> {
    if build_secs > MAX_INDEX_BUILD_SECS {
        anyhow::bail!(
            "index build time of {}s exceeds the {}s limit",
            build_secs,
            MAX_INDEX_BUILD_SECS
        );
    }
    i64::try_from(build_secs)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .and_then(|build| now().checked_add_signed(build))
        .ok_or_else(|| anyhow::anyhow!("index build time of {}s is out of range", build_secs))
}

pub async fn list_indexes(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    require_role(&claims, Role::Admin)?;
    let indexes = with_db(&state, |db| Ok(db.list_indexes()?)).await?;
    Ok(Json(indexes))
}

/// POST /indexes
pub async fn create_index(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateIndexRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require_role(&claims, Role::Admin)?;
    let info = provision(&state, req.collection, req.fields).await?;
    Ok((StatusCode::CREATED, Json(info)))
}

/// GET /console/indexes/create?collection=..&fields=a,b
///
/// Target of the link carried by missing-index errors.
pub async fn console_create(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<ConsoleIndexQuery>,
) -> Result<impl IntoResponse, ApiError> {
    require_role(&claims, Role::Admin)?;
    let fields = query.fields.split(',').map(|f| f.trim().to_string()).collect();
    let info = provision(&state, query.collection, fields).await?;
    Ok(Json(info))
}

async fn provision(state: &AppState, collection: String, fields: Vec<String>) -> Result<IndexInfo, ApiError> {
    let collection = collection.trim().to_string();
    if collection.is_empty() || fields.is_empty() || fields.iter().any(|f| f.is_empty()) {
        return Err(ApiError::InvalidArgument(
            "An index needs a collection and at least one field".into(),
        ));
    }

    let ready_at = ready_at(state.index_build_secs)?;
    let info = with_db(state, move |db| {
        Ok(db.create_index(&collection, &fields, ready_at)?)
    })
    .await?;

    info!(
        "Index {} ({}) ready at {}",
        info.collection,
        info.fields.join(","),
        info.ready_at
    );
    Ok(info)
}

/// Provision every index the chat queries rely on. Used at startup.
pub fn provision_required(db: &Database, build_secs: u64) -> anyhow::Result<Vec<IndexInfo>> {
    let ready_at = ready_at(build_secs)?;
    REQUIRED_INDEXES
        .iter()
        .map(|spec| {
            let fields: Vec<String> = spec.fields.iter().map(|f| f.to_string()).collect();
            db.create_index(spec.collection, &fields, ready_at)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_time_delays_readiness() {
        let db = Database::open_in_memory().unwrap();
        let created = provision_required(&db, 30).unwrap();
        assert_eq!(created.len(), REQUIRED_INDEXES.len());
        assert!(created.iter().all(|info| !info.ready));

        let db = Database::open_in_memory().unwrap();
        assert!(provision_required(&db, 0).unwrap().iter().all(|info| info.ready));
    }

    #[test]
    fn oversized_build_time_is_refused() {
        let db = Database::open_in_memory().unwrap();
        assert!(provision_required(&db, 10_000_000_000_000).is_err());
        assert!(provision_required(&db, u64::MAX).is_err());
        assert!(db.list_indexes().unwrap().is_empty());

        assert!(ready_at(MAX_INDEX_BUILD_SECS).is_ok());
        assert!(ready_at(MAX_INDEX_BUILD_SECS + 1).is_err());
    }
}
