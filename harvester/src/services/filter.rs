use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};

use crate::config::FilterConfig;
use crate::errors::ConfigError;
use crate::models::{Record, RecordKind};

/// Publish-time bounds, inclusive on both ends. A missing bound is open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl TimeWindow {
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start.map_or(true, |start| start <= at) && self.end.map_or(true, |end| at <= end)
    }
}

/// Which predicate rejected a record, in evaluation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterVerdict {
    Keep,
    WrongKind,
    BelowMinLikes,
    OutsideWindow,
}

/// Resolved once per run; relative windows are pinned to `now` at resolve time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterCriteria {
    pub kind: Option<RecordKind>,
    pub min_likes: u64,
    pub window: Option<TimeWindow>,
}

impl FilterCriteria {
    /// Criteria that keep everything.
    pub fn permissive() -> Self {
        Self {
            kind: None,
            min_likes: 0,
            window: None,
        }
    }

    pub fn resolve(config: &FilterConfig, now: DateTime<Utc>) -> Result<Self, ConfigError> {
        let window = &config.window;

        let window = match (window.recent_days, window.start, window.end) {
            (Some(_), Some(_), _) | (Some(_), _, Some(_)) => {
                return Err(ConfigError::Invalid(
                    "recentDays cannot be combined with start/end".to_string(),
                ));
            }
            (Some(days), None, None) => {
                let start = Duration::try_days(i64::from(days))
                    .and_then(|span| now.checked_sub_signed(span))
                    .ok_or_else(|| {
                        ConfigError::Invalid(format!("recentDays {days} reaches past the earliest supported date"))
                    })?;
                Some(TimeWindow {
                    start: Some(start),
                    end: Some(now),
                })
            }
            (None, None, None) => None,
            (None, start, end) => {
                if let (Some(s), Some(e)) = (start, end) {
                    if s > e {
                        return Err(ConfigError::Invalid(format!(
                            "window start {s} is after end {e}"
                        )));
                    }
                }
                Some(TimeWindow {
                    start: start.map(start_of_day),
                    end: end.map(end_of_day),
                })
            }
        };

        Ok(Self {
            kind: config.kind,
            min_likes: config.min_likes,
            window,
        })
    }

    pub fn check(&self, record: &Record) -> FilterVerdict {
        if let Some(kind) = self.kind {
            if record.kind != kind {
                return FilterVerdict::WrongKind;
            }
        }

        if record.metrics.likes < self.min_likes {
            return FilterVerdict::BelowMinLikes;
        }

        if let Some(window) = &self.window {
            match record.published_at {
                Some(at) if window.contains(at) => {}
                _ => return FilterVerdict::OutsideWindow,
            }
        }

        FilterVerdict::Keep
    }

    pub fn apply(&self, record: &Record) -> bool {
        self.check(record) == FilterVerdict::Keep
    }
}

fn start_of_day(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN))
}

fn end_of_day(date: NaiveDate) -> DateTime<Utc> {
    let last_second = NaiveTime::from_hms_opt(23, 59, 59).unwrap_or(NaiveTime::MIN);
    Utc.from_utc_datetime(&date.and_time(last_second))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WindowConfig;
    use crate::models::sample_record;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).unwrap()
    }

    fn likes_only(min_likes: u64) -> FilterCriteria {
        FilterCriteria {
            min_likes,
            ..FilterCriteria::permissive()
        }
    }

    #[test]
    fn min_likes_is_inclusive() {
        let criteria = likes_only(10);
        assert!(!criteria.apply(&sample_record("a", 9, 0)));
        assert!(criteria.apply(&sample_record("b", 10, 0)));
        assert!(criteria.apply(&sample_record("c", 50, 0)));
    }

    #[test]
    fn predicates_short_circuit_in_order() {
        let criteria = FilterCriteria {
            kind: Some(RecordKind::Video),
            min_likes: 100,
            window: Some(TimeWindow {
                start: Some(now()),
                end: None,
            }),
        };
        let record = sample_record("a", 1, 0);
        assert_eq!(criteria.check(&record), FilterVerdict::WrongKind);

        let mut video = record.clone();
        video.kind = RecordKind::Video;
        assert_eq!(criteria.check(&video), FilterVerdict::BelowMinLikes);

        video.metrics.likes = 100;
        assert_eq!(criteria.check(&video), FilterVerdict::OutsideWindow);

        video.published_at = Some(now());
        assert_eq!(criteria.check(&video), FilterVerdict::Keep);
    }

    #[test]
    fn window_bounds_are_inclusive() {
        let config = FilterConfig {
            kind: None,
            min_likes: 0,
            window: WindowConfig {
                recent_days: None,
                start: NaiveDate::from_ymd_opt(2024, 1, 1),
                end: NaiveDate::from_ymd_opt(2024, 1, 31),
            },
        };
        let criteria = FilterCriteria::resolve(&config, now()).unwrap();

        let at = |y, m, d, h, mi, s| {
            let mut record = sample_record("x", 0, 0);
            record.published_at = Some(Utc.with_ymd_and_hms(y, m, d, h, mi, s).unwrap());
            record
        };
        assert!(criteria.apply(&at(2024, 1, 1, 0, 0, 0)));
        assert!(criteria.apply(&at(2024, 1, 31, 23, 59, 59)));
        assert!(!criteria.apply(&at(2023, 12, 31, 23, 59, 59)));
        assert!(!criteria.apply(&at(2024, 2, 1, 0, 0, 0)));
    }

    #[test]
    fn unknown_publish_time_never_passes_a_window() {
        let config = FilterConfig {
            kind: None,
            min_likes: 0,
            window: WindowConfig {
                recent_days: Some(30),
                ..WindowConfig::default()
            },
        };
        let criteria = FilterCriteria::resolve(&config, now()).unwrap();
        assert_eq!(
            criteria.check(&sample_record("x", 0, 0)),
            FilterVerdict::OutsideWindow
        );
        assert!(likes_only(0).apply(&sample_record("x", 0, 0)));
    }

    #[test]
    fn recent_days_pins_to_resolve_time() {
        let config = FilterConfig {
            kind: None,
            min_likes: 0,
            window: WindowConfig {
                recent_days: Some(7),
                ..WindowConfig::default()
            },
        };
        let criteria = FilterCriteria::resolve(&config, now()).unwrap();
        assert_eq!(
            criteria.window,
            Some(TimeWindow {
                start: Some(now() - Duration::days(7)),
                end: Some(now()),
            })
        );
    }

    #[test]
    fn half_open_window() {
        let config = FilterConfig {
            kind: None,
            min_likes: 0,
            window: WindowConfig {
                recent_days: None,
                start: NaiveDate::from_ymd_opt(2024, 6, 1),
                end: None,
            },
        };
        let criteria = FilterCriteria::resolve(&config, now()).unwrap();
        let mut record = sample_record("x", 0, 0);
        record.published_at = Some(Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap());
        assert!(criteria.apply(&record));
    }

    #[test]
    fn huge_recent_days_is_a_config_error() {
        let config = FilterConfig {
            kind: None,
            min_likes: 0,
            window: WindowConfig {
                recent_days: Some(200_000_000),
                ..WindowConfig::default()
            },
        };
        assert!(matches!(
            FilterCriteria::resolve(&config, now()),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn conflicting_window_settings_are_rejected() {
        let config = FilterConfig {
            kind: None,
            min_likes: 0,
            window: WindowConfig {
                recent_days: Some(3),
                start: NaiveDate::from_ymd_opt(2024, 6, 1),
                end: None,
            },
        };
        assert!(FilterCriteria::resolve(&config, now()).is_err());
    }
}
