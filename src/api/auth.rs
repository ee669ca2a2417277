use axum::{async_trait, extract::FromRequestParts, http::request::Parts};

use crate::{
    api::AppState,
    auth::Credential,
    error::{AppError, Result},
    models::ApiKey,
};

async fn credential(parts: &Parts, state: &AppState) -> Result<Credential> {
    let presented = parts
        .headers
        .get(state.keys.header_name())
        .map(|value| {
            value
                .to_str()
                .map_err(|_| AppError::Auth("API key header is not valid text".to_string()))
        })
        .transpose()?;

    state.keys.authenticate(presented).await
}

/// The caller's key, if one was presented
///
/// A presented key must be valid. Anonymous calls are rejected as well when
/// `auth.require_api_key` is set.
#[derive(Debug, Clone)]
pub struct OptionalApiKey(pub Option<ApiKey>);

#[async_trait]
impl FromRequestParts<AppState> for OptionalApiKey {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        let credential = credential(parts, state).await?;
        let key = if state.config.auth.require_api_key {
            Some(credential.required()?)
        } else {
            credential.optional()?
        };
        Ok(OptionalApiKey(key))
    }
}

/// A valid key is mandatory
#[derive(Debug, Clone)]
pub struct RequiredApiKey(pub ApiKey);

#[async_trait]
impl FromRequestParts<AppState> for RequiredApiKey {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        let key = credential(parts, state).await?.required()?;
        Ok(RequiredApiKey(key))
    }
}
