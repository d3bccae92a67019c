//! Cron expressions for recurring tasks.

use chrono::{DateTime, Utc};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid cron expression '{expression}': {reason}")]
pub struct InvalidCron {
    pub expression: String,
    pub reason: String,
}

/// A parsed cron schedule.
///
/// Accepts the classic 5-field form (`min hour dom month dow`, seconds fixed
/// at 0) as well as 6/7-field forms with a leading seconds field.
#[derive(Debug, Clone)]
pub struct CronSchedule {
    expression: String,
    schedule: cron::Schedule,
}

impl CronSchedule {
    pub fn parse(expression: &str) -> Result<Self, InvalidCron> {
        let trimmed = expression.trim();
        let normalized = match trimmed.split_whitespace().count() {
            5 => format!("0 {trimmed}"),
            6 | 7 => trimmed.to_string(),
            n => {
                return Err(InvalidCron {
                    expression: expression.to_string(),
                    reason: format!("expected 5, 6 or 7 fields, got {n}"),
                });
            }
        };
        let schedule = cron::Schedule::from_str(&normalized).map_err(|e| InvalidCron {
            expression: expression.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            expression: trimmed.to_string(),
            schedule,
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// First fire time strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&after).next()
    }
}

impl fmt::Display for CronSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expression)
    }
}

impl FromStr for CronSchedule {
    type Err = InvalidCron;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rstest::rstest;

    #[rstest]
    #[case::five_fields("0 3 * * *")]
    #[case::six_fields("0 0 3 * * *")]
    #[case::seven_fields("0 0 3 * * * *")]
    fn nightly_forms_agree(#[case] expr: &str) {
        let s = CronSchedule::parse(expr).unwrap();
        let base = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        assert_eq!(
            s.next_after(base),
            Some(Utc.with_ymd_and_hms(2024, 5, 2, 3, 0, 0).unwrap())
        );
    }

    #[rstest]
    #[case::too_short("* * *")]
    #[case::garbage("every day at noon ok")]
    fn rejects_bad_expressions(#[case] expr: &str) {
        assert!(CronSchedule::parse(expr).is_err());
    }

    #[test]
    fn every_fifteen_minutes() {
        let s = CronSchedule::parse("*/15 * * * *").unwrap();
        let base = Utc.with_ymd_and_hms(2024, 5, 1, 12, 7, 30).unwrap();
        assert_eq!(
            s.next_after(base),
            Some(Utc.with_ymd_and_hms(2024, 5, 1, 12, 15, 0).unwrap())
        );
    }
}
