use super::Store;
use crate::error::Result;
use crate::models::{CaptureResult, NewCapture, ScreenshotFilter, Statistics};
use crate::utils::escape_like;
use sqlx::{QueryBuilder, Sqlite};

/// Newest first; id breaks ties between captures stamped in the same instant
const NEWEST_FIRST: &str = " ORDER BY timestamp DESC, id DESC";

fn push_filters(builder: &mut QueryBuilder<'_, Sqlite>, filter: &ScreenshotFilter) {
    builder.push(" WHERE 1 = 1");

    if let Some(fragment) = filter.url_contains.as_deref().filter(|f| !f.is_empty()) {
        // SQLite LIKE already ignores ASCII case
        builder
            .push(" AND url LIKE ")
            .push_bind(format!("%{}%", escape_like(fragment)))
            .push(" ESCAPE '\\'");
    }
    if let Some(success) = filter.success {
        builder.push(" AND success = ").push_bind(success);
    }
    if let Some(start) = filter.start {
        builder.push(" AND timestamp >= ").push_bind(start);
    }
    if let Some(end) = filter.end {
        builder.push(" AND timestamp <= ").push_bind(end);
    }
}

impl Store {
    pub async fn save_screenshot(&self, capture: &NewCapture) -> Result<CaptureResult> {
        let image = capture.image();

        let saved = sqlx::query_as::<_, CaptureResult>(
            r#"
            INSERT INTO screenshots (
                url, timestamp, viewport_width, viewport_height, file_path, base64_data,
                http_status_code, page_load_time_ms, full_page, wait_strategy, error_message, success
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(&capture.url)
        .bind(capture.timestamp)
        .bind(i64::from(capture.viewport_width))
        .bind(i64::from(capture.viewport_height))
        .bind(image.and_then(|i| i.file_path.as_deref()))
        .bind(image.and_then(|i| i.base64_data.as_deref()))
        .bind(capture.http_status_code.map(i64::from))
        .bind(capture.page_load_time_ms)
        .bind(capture.full_page)
        .bind(capture.wait_strategy)
        .bind(capture.error_message())
        .bind(capture.success())
        .fetch_one(&self.pool)
        .await?;

        Ok(saved)
    }

    pub async fn get_screenshot(&self, id: i64) -> Result<Option<CaptureResult>> {
        let record = sqlx::query_as::<_, CaptureResult>("SELECT * FROM screenshots WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(record)
    }

    /// One page of matching records, newest first
    pub async fn list_screenshots(
        &self,
        filter: &ScreenshotFilter,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<CaptureResult>> {
        let mut builder = QueryBuilder::<Sqlite>::new("SELECT * FROM screenshots");
        push_filters(&mut builder, filter);
        builder
            .push(NEWEST_FIRST)
            .push(" LIMIT ")
            .push_bind(limit)
            .push(" OFFSET ")
            .push_bind(offset);

        let records = builder
            .build_query_as::<CaptureResult>()
            .fetch_all(&self.pool)
            .await?;

        Ok(records)
    }

    /// Number of records matching the filter, ignoring pagination
    pub async fn count_screenshots(&self, filter: &ScreenshotFilter) -> Result<i64> {
        let mut builder = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM screenshots");
        push_filters(&mut builder, filter);

        let count = builder
            .build_query_scalar::<i64>()
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }

    /// Most recent captures of exactly this URL
    pub async fn screenshots_for_url(&self, url: &str, limit: i64) -> Result<Vec<CaptureResult>> {
        let query = format!("SELECT * FROM screenshots WHERE url = ?{NEWEST_FIRST} LIMIT ?");
        let records = sqlx::query_as::<_, CaptureResult>(&query)
            .bind(url)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        Ok(records)
    }

    pub async fn statistics(&self) -> Result<Statistics> {
        let (total, successful): (i64, i64) = sqlx::query_as(
            "SELECT COUNT(*), COALESCE(SUM(CASE WHEN success THEN 1 ELSE 0 END), 0) FROM screenshots",
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(Statistics::from_counts(total, successful))
    }

    /// Remove a record, returning it so the caller can clean up its image file
    pub async fn delete_screenshot(&self, id: i64) -> Result<Option<CaptureResult>> {
        let deleted =
            sqlx::query_as::<_, CaptureResult>("DELETE FROM screenshots WHERE id = ? RETURNING *")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(deleted)
    }
}
