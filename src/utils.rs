use crate::error::{AppError, Result};
use chrono::{DateTime, Utc};
use std::time::Duration;
use url::Url;

/// Longest URL fragment kept in an image filename
const FILENAME_URL_CHARS: usize = 50;

/// Prepend `https://` to scheme-less input and check the result is an http(s) URL
///
/// Already-schemed input is returned unchanged (apart from surrounding
/// whitespace), so normalizing twice yields the same string.
pub fn normalize_url(input: &str) -> Result<String> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(AppError::Validation("URL must not be empty".to_string()));
    }

    let candidate = if has_scheme(trimmed) {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    };

    validate_url(&candidate)?;
    Ok(candidate)
}

fn has_scheme(input: &str) -> bool {
    match input.find("://") {
        Some(0) | None => false,
        Some(idx) => input[..idx]
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.')),
    }
}

pub fn validate_url(url: &str) -> Result<Url> {
    let parsed =
        Url::parse(url).map_err(|e| AppError::Validation(format!("invalid URL '{url}': {e}")))?;

    match parsed.scheme() {
        "http" | "https" => {}
        other => {
            return Err(AppError::Validation(format!(
                "unsupported URL scheme '{other}' (expected http or https)"
            )))
        }
    }

    if parsed.host_str().map_or(true, str::is_empty) {
        return Err(AppError::Validation(format!("URL '{url}' has no host")));
    }

    Ok(parsed)
}

pub fn sanitize_filename(input: &str) -> String {
    input
        .chars()
        .map(|c| match c {
            c if c.is_ascii_alphanumeric() => c,
            '-' | '.' => c,
            _ => '_',
        })
        .collect::<String>()
        .trim_matches('_')
        .to_string()
}

/// Image filename: capture time, a readable slice of the URL and a short unique suffix
pub fn screenshot_filename(url: &str, taken_at: DateTime<Utc>) -> String {
    let without_scheme = url.split_once("://").map_or(url, |(_, rest)| rest);
    let slug: String = sanitize_filename(without_scheme)
        .chars()
        .take(FILENAME_URL_CHARS)
        .collect();
    let suffix = uuid::Uuid::new_v4().simple().to_string();

    format!(
        "{}_{}_{}.png",
        taken_at.format("%Y%m%d_%H%M%S"),
        slug,
        &suffix[..8]
    )
}

/// Escape `%`, `_` and the escape character itself for a `LIKE ... ESCAPE '\'` pattern
pub fn escape_like(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for c in input.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

pub fn format_duration(duration: Duration) -> String {
    let total_seconds = duration.as_secs();
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;
    let millis = duration.subsec_millis();

    if hours > 0 {
        format!("{hours}h {minutes}m {seconds}s")
    } else if minutes > 0 {
        format!("{minutes}m {seconds}s")
    } else if seconds > 0 {
        format!("{}.{}s", seconds, millis / 100)
    } else {
        format!("{millis}ms")
    }
}

pub fn format_bytes(bytes: usize) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{} {}", bytes, UNITS[unit_index])
    } else {
        format!("{:.2} {}", size, UNITS[unit_index])
    }
}
