use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref FULL_DATE: Regex = Regex::new(r"^(\d{4}-\d{2}-\d{2})").unwrap();
    static ref MONTH_DAY: Regex = Regex::new(r"^(\d{2})-(\d{2})").unwrap();
    static ref DAYS_AGO: Regex = Regex::new(r"(\d+)\s*天前").unwrap();
    static ref HOURS_AGO: Regex = Regex::new(r"(\d+)\s*小时前").unwrap();
    static ref MINUTES_AGO: Regex = Regex::new(r"(\d+)\s*分钟前").unwrap();
    static ref CLOCK: Regex = Regex::new(r"(\d{1,2}):(\d{2})").unwrap();
    static ref HASHTAG: Regex = Regex::new(r"#([^#\s]+?)#").unwrap();
    static ref UNSAFE_FILENAME_CHARS: Regex = Regex::new(r#"[\\/:*?"<>|\s]"#).unwrap();
}

/// Epoch values above this are milliseconds.
const MILLIS_THRESHOLD: f64 = 1e12;

/// Parse counts such as `1234`, `1.2万` or `3亿`. Anything unusable is 0.
pub fn parse_count(text: &str) -> u64 {
    let text = text.trim().replace(',', "");
    if text.is_empty() {
        return 0;
    }

    let (number, multiplier) = if let Some(n) = text.strip_suffix('万') {
        (n, 10_000.0)
    } else if let Some(n) = text.strip_suffix('亿') {
        (n, 100_000_000.0)
    } else {
        (text.as_str(), 1.0)
    };

    match number.trim().parse::<f64>() {
        Ok(value) if value.is_finite() && value > 0.0 => (value * multiplier) as u64,
        _ => 0,
    }
}

/// Epoch seconds or milliseconds to a UTC timestamp.
pub fn parse_epoch(value: f64) -> Option<DateTime<Utc>> {
    if !value.is_finite() || value <= 0.0 {
        return None;
    }
    if value > MILLIS_THRESHOLD {
        DateTime::from_timestamp_millis(value as i64)
    } else {
        DateTime::from_timestamp(value as i64, 0)
    }
}

/// Parse the publish-time strings the site renders. Relative forms resolve
/// against `now`.
pub fn parse_publish_time(text: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    if let Ok(value) = text.parse::<f64>() {
        return parse_epoch(value);
    }

    if let Some(caps) = FULL_DATE.captures(text) {
        let date = NaiveDate::parse_from_str(&caps[1], "%Y-%m-%d").ok()?;
        return Some(Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN)));
    }

    if let Some(caps) = MONTH_DAY.captures(text) {
        let month = caps[1].parse().ok()?;
        let day = caps[2].parse().ok()?;
        let date = NaiveDate::from_ymd_opt(now.year(), month, day)?;
        return Some(Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN)));
    }

    if let Some(caps) = DAYS_AGO.captures(text) {
        return now.checked_sub_signed(Duration::try_days(caps[1].parse().ok()?)?);
    }
    if let Some(caps) = HOURS_AGO.captures(text) {
        return now.checked_sub_signed(Duration::try_hours(caps[1].parse().ok()?)?);
    }
    if let Some(caps) = MINUTES_AGO.captures(text) {
        return now.checked_sub_signed(Duration::try_minutes(caps[1].parse().ok()?)?);
    }

    if text.contains("刚刚") {
        return Some(now);
    }

    if text.contains("昨天") {
        let yesterday = now.checked_sub_signed(Duration::try_days(1)?)?;
        let clock = CLOCK.captures(text).and_then(|caps| {
            NaiveTime::from_hms_opt(caps[1].parse().ok()?, caps[2].parse().ok()?, 0)
        });
        return Some(match clock {
            Some(time) => Utc.from_utc_datetime(&yesterday.date_naive().and_time(time)),
            None => yesterday,
        });
    }

    log::debug!("Unrecognized publish time format: '{text}'");
    None
}

/// Give protocol-relative and scheme-less image URLs an https scheme.
pub fn normalize_image_url(url: &str) -> String {
    let url = url.trim();
    if let Some(rest) = url.strip_prefix("//") {
        format!("https://{rest}")
    } else if url.starts_with("http") {
        url.to_string()
    } else {
        format!("https://{url}")
    }
}

pub fn is_avatar_url(url: &str) -> bool {
    url.contains("/avatar/")
}

/// `#topic[话题]#` style hashtags embedded in a note body.
pub fn extract_hashtags(body: &str) -> Vec<String> {
    HASHTAG
        .captures_iter(body)
        .map(|caps| caps[1].trim_end_matches("[话题]").to_string())
        .filter(|tag| !tag.is_empty())
        .collect()
}

/// Make a keyword safe to embed in a file name.
pub fn sanitize_filename(name: &str, max_chars: usize) -> String {
    let cleaned = UNSAFE_FILENAME_CHARS.replace_all(name.trim(), "_");
    let cleaned: String = cleaned.trim_matches('.').chars().take(max_chars).collect();
    if cleaned.is_empty() {
        "unnamed".to_string()
    } else {
        cleaned
    }
}

/// tokio-cron-scheduler wants a seconds field; classic 5-field crons get one.
pub fn normalize_cron(expression: &str) -> Option<String> {
    let fields: Vec<&str> = expression.split_whitespace().collect();
    match fields.len() {
        5 => Some(format!("0 {}", fields.join(" "))),
        6 => Some(fields.join(" ")),
        _ => None,
    }
}
