use crate::screenshot_service::ScreenshotService;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Instant;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthLevel {
    Healthy,
    /// Records are readable but new captures will fail
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthLevel,
    pub browser: bool,
    pub database: bool,
    pub version: &'static str,
    pub timestamp: DateTime<Utc>,
}

impl HealthReport {
    pub fn from_checks(browser: bool, database: bool) -> Self {
        let status = match (database, browser) {
            (true, true) => HealthLevel::Healthy,
            (true, false) => HealthLevel::Degraded,
            (false, _) => HealthLevel::Unhealthy,
        };

        Self {
            status,
            browser,
            database,
            version: env!("CARGO_PKG_VERSION"),
            timestamp: Utc::now(),
        }
    }
}

pub async fn check_health(service: &ScreenshotService) -> HealthReport {
    let start_time = Instant::now();

    let browser = service.engine_ready().await;
    let database = service.store().ping().await;
    let report = HealthReport::from_checks(browser, database);

    if report.status != HealthLevel::Healthy {
        warn!(
            "Health check: {:?} (browser: {}, database: {})",
            report.status, browser, database
        );
    }
    debug!("Health check completed in {:?}", start_time.elapsed());

    report
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_levels() {
        assert_eq!(HealthReport::from_checks(true, true).status, HealthLevel::Healthy);
        assert_eq!(HealthReport::from_checks(false, true).status, HealthLevel::Degraded);
        assert_eq!(HealthReport::from_checks(true, false).status, HealthLevel::Unhealthy);
        assert_eq!(HealthReport::from_checks(false, false).status, HealthLevel::Unhealthy);
    }

    #[test]
    fn test_report_serializes_lowercase_status() {
        let json = serde_json::to_value(HealthReport::from_checks(false, true)).unwrap();
        assert_eq!(json["status"], "degraded");
        assert_eq!(json["browser"], false);
        assert_eq!(json["database"], true);
    }
}
