use axum::{
    extract::{Path, Query, State},
    response::Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    api::{message, AppState, OptionalApiKey},
    config::CaptureOptions,
    error::{AppError, Result},
    models::{CaptureResult, ScreenshotFilter, Statistics},
    screenshot_service::BatchOutcome,
    utils::normalize_url,
};

#[derive(Debug, Deserialize)]
pub struct SingleScreenshotRequest {
    pub url: String,
    #[serde(default)]
    pub options: CaptureOptions,
}

#[derive(Debug, Deserialize)]
pub struct BatchScreenshotRequest {
    pub urls: Vec<String>,
    #[serde(default)]
    pub options: CaptureOptions,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default = "default_list_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
    pub url: Option<String>,
    pub success: Option<bool>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
}

fn default_list_limit() -> i64 {
    100
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_history_limit")]
    pub limit: i64,
}

fn default_history_limit() -> i64 {
    10
}

#[derive(Debug, Serialize)]
pub struct ScreenshotList {
    pub screenshots: Vec<CaptureResult>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

fn check_range(name: &str, value: i64, min: i64, max: i64) -> Result<()> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(AppError::Validation(format!(
            "{name} must be within {min}..={max}"
        )))
    }
}

pub async fn capture_screenshot(
    State(state): State<AppState>,
    OptionalApiKey(_caller): OptionalApiKey,
    Json(request): Json<SingleScreenshotRequest>,
) -> Result<Json<CaptureResult>> {
    let record = state.service.capture(&request.url, &request.options).await?;
    Ok(Json(record))
}

pub async fn capture_batch(
    State(state): State<AppState>,
    OptionalApiKey(_caller): OptionalApiKey,
    Json(request): Json<BatchScreenshotRequest>,
) -> Result<Json<BatchOutcome>> {
    let outcome = state
        .service
        .capture_batch(&request.urls, &request.options)
        .await?;
    Ok(Json(outcome))
}

pub async fn list_screenshots(
    State(state): State<AppState>,
    OptionalApiKey(_caller): OptionalApiKey,
    Query(query): Query<ListQuery>,
) -> Result<Json<ScreenshotList>> {
    check_range("limit", query.limit, 1, 1000)?;
    check_range("offset", query.offset, 0, i64::MAX)?;
    if let (Some(start), Some(end)) = (query.start_date, query.end_date) {
        if start > end {
            return Err(AppError::Validation(
                "start_date must not be after end_date".to_string(),
            ));
        }
    }

    let filter = ScreenshotFilter {
        url_contains: query.url,
        success: query.success,
        start: query.start_date,
        end: query.end_date,
    };

    let store = state.service.store();
    let screenshots = store
        .list_screenshots(&filter, query.limit, query.offset)
        .await?;
    let total = store.count_screenshots(&filter).await?;

    Ok(Json(ScreenshotList {
        screenshots,
        total,
        limit: query.limit,
        offset: query.offset,
    }))
}

pub async fn get_screenshot(
    State(state): State<AppState>,
    OptionalApiKey(_caller): OptionalApiKey,
    Path(id): Path<i64>,
) -> Result<Json<CaptureResult>> {
    let record = state
        .service
        .store()
        .get_screenshot(id)
        .await?
        .ok_or_else(|| AppError::NotFound("Screenshot".to_string()))?;
    Ok(Json(record))
}

pub async fn screenshots_for_url(
    State(state): State<AppState>,
    OptionalApiKey(_caller): OptionalApiKey,
    Path(url): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<ScreenshotList>> {
    check_range("limit", query.limit, 1, 100)?;
    let url = normalize_url(&url).unwrap_or(url);

    let screenshots = state
        .service
        .store()
        .screenshots_for_url(&url, query.limit)
        .await?;

    Ok(Json(ScreenshotList {
        total: screenshots.len() as i64,
        screenshots,
        limit: query.limit,
        offset: 0,
    }))
}

pub async fn statistics(
    State(state): State<AppState>,
    OptionalApiKey(_caller): OptionalApiKey,
) -> Result<Json<Statistics>> {
    let stats = state.service.store().statistics().await?;
    Ok(Json(stats))
}

pub async fn delete_screenshot(
    State(state): State<AppState>,
    OptionalApiKey(_caller): OptionalApiKey,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>> {
    state.service.delete(id).await?;
    Ok(message("Screenshot deleted successfully"))
}
