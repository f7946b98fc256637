//! Weekly schedule computation for the update loop.

use anyhow::{Context, Result};
use chrono::{DateTime, Datelike, Duration, NaiveTime, Utc, Weekday};

/// When the weekly refresh fires: a weekday plus a time of day, in UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateCadence {
    pub weekday: Weekday,
    pub time: NaiveTime,
}

impl UpdateCadence {
    pub fn new(weekday: Weekday, time: NaiveTime) -> Self {
        Self { weekday, time }
    }

    /// Parse the settings representation, e.g. ("sunday", "03:00").
    /// Weekday names are accepted in English and Portuguese.
    pub fn parse(weekday: &str, time: &str) -> Result<Self> {
        let weekday = match weekday.to_ascii_lowercase().as_str() {
            "sunday" | "domingo" => Weekday::Sun,
            "monday" | "segunda" => Weekday::Mon,
            "tuesday" | "terca" => Weekday::Tue,
            "wednesday" | "quarta" => Weekday::Wed,
            "thursday" | "quinta" => Weekday::Thu,
            "friday" | "sexta" => Weekday::Fri,
            "saturday" | "sabado" => Weekday::Sat,
            other => anyhow::bail!("unknown weekday: {other}"),
        };
        let time = NaiveTime::parse_from_str(time, "%H:%M")
            .with_context(|| format!("invalid time of day: {time}"))?;
        Ok(Self { weekday, time })
    }

    /// Next firing instant strictly after `now`.
    pub fn next_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let days_ahead = (i64::from(self.weekday.num_days_from_monday())
            - i64::from(now.weekday().num_days_from_monday()))
        .rem_euclid(7);
        let mut candidate = (now.date_naive() + Duration::days(days_ahead))
            .and_time(self.time)
            .and_utc();
        if candidate <= now {
            candidate += Duration::days(7);
        }
        candidate
    }
}
