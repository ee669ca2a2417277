//! Persisted records and the values used to create and query them

use crate::config::{CaptureRequest, RenderMode};
use crate::error::CaptureError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::time::Duration;

/// A stored capture attempt, successful or not
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct CaptureResult {
    pub id: i64,
    pub url: String,
    pub timestamp: DateTime<Utc>,
    pub viewport_width: i64,
    pub viewport_height: i64,
    pub file_path: Option<String>,
    pub base64_data: Option<String>,
    pub http_status_code: Option<i64>,
    pub page_load_time_ms: Option<f64>,
    pub full_page: bool,
    pub wait_strategy: String,
    pub error_message: Option<String>,
    pub success: bool,
}

/// Where a successful capture's image bytes ended up
#[derive(Debug, Clone, PartialEq)]
pub struct StoredImage {
    pub file_path: Option<String>,
    pub base64_data: Option<String>,
}

/// Outcome of one capture attempt, before it is assigned an id
///
/// Only [`NewCapture::succeeded`] and [`NewCapture::failed`] build one, so a
/// record is successful exactly when it has an image and no error.
#[derive(Debug, Clone, PartialEq)]
pub struct NewCapture {
    pub url: String,
    pub timestamp: DateTime<Utc>,
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub full_page: bool,
    pub wait_strategy: &'static str,
    pub http_status_code: Option<u16>,
    pub page_load_time_ms: Option<f64>,
    outcome: Outcome,
}

#[derive(Debug, Clone, PartialEq)]
enum Outcome {
    Captured(StoredImage),
    Failed(String),
}

impl NewCapture {
    pub fn succeeded(
        request: &CaptureRequest,
        timestamp: DateTime<Utc>,
        image: StoredImage,
        http_status_code: Option<u16>,
        load_time: Duration,
    ) -> Self {
        Self {
            http_status_code,
            page_load_time_ms: Some(load_time.as_secs_f64() * 1000.0),
            outcome: Outcome::Captured(image),
            ..Self::base(request, timestamp)
        }
    }

    pub fn failed(
        request: &CaptureRequest,
        timestamp: DateTime<Utc>,
        error: &CaptureError,
        elapsed: Duration,
    ) -> Self {
        Self {
            page_load_time_ms: Some(elapsed.as_secs_f64() * 1000.0),
            outcome: Outcome::Failed(error.record_message()),
            ..Self::base(request, timestamp)
        }
    }

    fn base(request: &CaptureRequest, timestamp: DateTime<Utc>) -> Self {
        Self {
            url: request.url.clone(),
            timestamp,
            viewport_width: request.viewport.width,
            viewport_height: request.viewport.height,
            full_page: request.render_mode == RenderMode::FullPage,
            wait_strategy: request.wait_policy.as_str(),
            http_status_code: None,
            page_load_time_ms: None,
            outcome: Outcome::Failed(String::new()),
        }
    }

    pub fn success(&self) -> bool {
        matches!(self.outcome, Outcome::Captured(_))
    }

    pub fn image(&self) -> Option<&StoredImage> {
        match &self.outcome {
            Outcome::Captured(image) => Some(image),
            Outcome::Failed(_) => None,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match &self.outcome {
            Outcome::Captured(_) => None,
            Outcome::Failed(message) => Some(message),
        }
    }
}

/// Filters shared by the list and count queries
#[derive(Debug, Clone, Default)]
pub struct ScreenshotFilter {
    /// Case-insensitive substring match on the URL
    pub url_contains: Option<String>,
    pub success: Option<bool>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Statistics {
    pub total_screenshots: i64,
    pub successful_screenshots: i64,
    pub failed_screenshots: i64,
    /// Percentage of successful captures, 0 when nothing has been captured
    pub success_rate: f64,
}

impl Statistics {
    pub fn from_counts(total: i64, successful: i64) -> Self {
        let success_rate = if total > 0 {
            successful as f64 / total as f64 * 100.0
        } else {
            0.0
        };
        Self {
            total_screenshots: total,
            successful_screenshots: successful,
            failed_screenshots: total - successful,
            success_rate,
        }
    }
}

/// An issued API key; the hash never leaves the process
#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
pub struct ApiKey {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    #[serde(skip_serializing)]
    pub key_hash: String,
    pub key_prefix: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub request_count: i64,
}

impl ApiKey {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(false, |expires| expires <= now)
    }
}

#[derive(Debug, Clone)]
pub struct NewApiKey {
    pub name: String,
    pub description: Option<String>,
    pub key_hash: String,
    pub key_prefix: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CaptureOptions, Config};

    fn request() -> CaptureRequest {
        CaptureOptions {
            full_page: true,
            ..Default::default()
        }
        .resolve("example.com", &Config::default())
        .unwrap()
    }

    #[test]
    fn test_success_has_image_and_no_error() {
        let capture = NewCapture::succeeded(
            &request(),
            Utc::now(),
            StoredImage {
                file_path: Some("screenshots/a.png".to_string()),
                base64_data: None,
            },
            Some(200),
            Duration::from_millis(1250),
        );

        assert!(capture.success());
        assert!(capture.image().is_some());
        assert!(capture.error_message().is_none());
        assert!(capture.full_page);
        assert_eq!(capture.wait_strategy, "networkidle");
        assert_eq!(capture.page_load_time_ms, Some(1250.0));
    }

    #[test]
    fn test_failure_has_error_and_no_image() {
        let capture = NewCapture::failed(
            &request(),
            Utc::now(),
            &CaptureError::Navigation("net::ERR_CONNECTION_REFUSED".to_string()),
            Duration::from_millis(40),
        );

        assert!(!capture.success());
        assert!(capture.image().is_none());
        assert!(capture
            .error_message()
            .unwrap()
            .starts_with("connection-refused: "));
        assert_eq!(capture.http_status_code, None);
    }

    #[test]
    fn test_statistics_invariants() {
        let stats = Statistics::from_counts(8, 6);
        assert_eq!(
            stats.successful_screenshots + stats.failed_screenshots,
            stats.total_screenshots
        );
        assert_eq!(stats.success_rate, 75.0);

        let empty = Statistics::from_counts(0, 0);
        assert_eq!(empty.success_rate, 0.0);
    }

    #[test]
    fn test_api_key_serialization_omits_hash() {
        let key = ApiKey {
            id: 1,
            name: "ci".to_string(),
            description: None,
            key_hash: "$2b$04$secret".to_string(),
            key_prefix: "sk_live_abcdefgh".to_string(),
            is_active: true,
            created_at: Utc::now(),
            last_used_at: None,
            expires_at: None,
            request_count: 0,
        };

        let json = serde_json::to_value(&key).unwrap();
        assert!(json.get("key_hash").is_none());
        assert_eq!(json["key_prefix"], "sk_live_abcdefgh");
    }
}
