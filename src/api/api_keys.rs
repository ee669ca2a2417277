use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    api::{message, AppState, OptionalApiKey, RequiredApiKey},
    error::Result,
    models::ApiKey,
};

#[derive(Debug, Deserialize)]
pub struct CreateApiKeyRequest {
    pub name: String,
    pub description: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Returned once, at creation; the only response that carries the plaintext
#[derive(Debug, Serialize)]
pub struct CreatedApiKey {
    pub api_key: ApiKey,
    pub key: String,
}

#[derive(Debug, Deserialize)]
pub struct ListKeysQuery {
    #[serde(default)]
    pub include_inactive: bool,
}

#[derive(Debug, Serialize)]
pub struct ApiKeyList {
    pub keys: Vec<ApiKey>,
}

/// Open to anonymous callers unless keys are required, so the first key can be issued
pub async fn create_api_key(
    State(state): State<AppState>,
    OptionalApiKey(_caller): OptionalApiKey,
    Json(request): Json<CreateApiKeyRequest>,
) -> Result<(StatusCode, Json<CreatedApiKey>)> {
    let (api_key, key) = state
        .keys
        .generate(&request.name, request.description.as_deref(), request.expires_at)
        .await?;

    Ok((StatusCode::CREATED, Json(CreatedApiKey { api_key, key })))
}

pub async fn list_api_keys(
    State(state): State<AppState>,
    RequiredApiKey(_caller): RequiredApiKey,
    Query(query): Query<ListKeysQuery>,
) -> Result<Json<ApiKeyList>> {
    let keys = state.keys.list(query.include_inactive).await?;
    Ok(Json(ApiKeyList { keys }))
}

pub async fn get_api_key(
    State(state): State<AppState>,
    RequiredApiKey(_caller): RequiredApiKey,
    Path(id): Path<i64>,
) -> Result<Json<ApiKey>> {
    Ok(Json(state.keys.get(id).await?))
}

pub async fn revoke_api_key(
    State(state): State<AppState>,
    RequiredApiKey(_caller): RequiredApiKey,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>> {
    state.keys.revoke(id).await?;
    Ok(message("API key revoked successfully"))
}

pub async fn reactivate_api_key(
    State(state): State<AppState>,
    RequiredApiKey(_caller): RequiredApiKey,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>> {
    state.keys.reactivate(id).await?;
    Ok(message("API key reactivated successfully"))
}
