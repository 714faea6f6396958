//! Schedule domain model and next-run computation

use chrono::{DateTime, Datelike, Duration, TimeZone, Timelike, Utc};
use cron::Schedule as CronSchedule;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::str::FromStr;
use tracing::warn;

/// How a schedule's occurrences are derived
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleType {
    Interval,
    Daily,
    Weekly,
    Monthly,
    Cron,
}

/// A named recurring trigger definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schedule {
    /// User-assigned unique id
    pub id: String,

    pub name: String,

    #[serde(rename = "type")]
    pub schedule_type: ScheduleType,

    /// Message type enqueued when the schedule fires
    pub target: String,

    /// Merged into the enqueued message's payload
    #[serde(default)]
    pub parameters: HashMap<String, Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Interval schedules: seconds between runs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_seconds: Option<u64>,

    /// Daily schedules: "HH:MM"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub daily_time: Option<String>,

    /// Weekly schedules: 0-6, Monday is 0
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weekly_day: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weekly_time: Option<String>,

    /// Monthly schedules: day of month, clamped to 28 regardless of the
    /// configured value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monthly_day: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monthly_time: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cron_expression: Option<String>,

    // Runtime counters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_run: Option<DateTime<Utc>>,

    #[serde(default)]
    pub runs: u64,

    #[serde(default)]
    pub failures: u64,
}

fn default_enabled() -> bool {
    true
}

impl Schedule {
    fn base(id: &str, name: &str, schedule_type: ScheduleType, target: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            schedule_type,
            target: target.to_string(),
            parameters: HashMap::new(),
            description: None,
            enabled: true,
            interval_seconds: None,
            daily_time: None,
            weekly_day: None,
            weekly_time: None,
            monthly_day: None,
            monthly_time: None,
            cron_expression: None,
            last_run: None,
            next_run: None,
            runs: 0,
            failures: 0,
        }
    }

    pub fn interval(id: &str, name: &str, target: &str, every_secs: u64) -> Self {
        let mut schedule = Self::base(id, name, ScheduleType::Interval, target);
        schedule.interval_seconds = Some(every_secs);
        schedule
    }

    pub fn daily(id: &str, name: &str, target: &str, time: &str) -> Self {
        let mut schedule = Self::base(id, name, ScheduleType::Daily, target);
        schedule.daily_time = Some(time.to_string());
        schedule
    }

    pub fn weekly(id: &str, name: &str, target: &str, day: u32, time: &str) -> Self {
        let mut schedule = Self::base(id, name, ScheduleType::Weekly, target);
        schedule.weekly_day = Some(day);
        schedule.weekly_time = Some(time.to_string());
        schedule
    }

    pub fn monthly(id: &str, name: &str, target: &str, day: u32, time: &str) -> Self {
        let mut schedule = Self::base(id, name, ScheduleType::Monthly, target);
        schedule.monthly_day = Some(day);
        schedule.monthly_time = Some(time.to_string());
        schedule
    }

    pub fn cron(id: &str, name: &str, target: &str, expression: &str) -> Self {
        let mut schedule = Self::base(id, name, ScheduleType::Cron, target);
        schedule.cron_expression = Some(expression.to_string());
        schedule
    }

    pub fn with_parameters(mut self, parameters: HashMap<String, Value>) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    /// Compute the next occurrence strictly after `now`.
    ///
    /// Pure function of `now` and the schedule's fields. Missing or malformed
    /// configuration yields `None` rather than an error.
    pub fn next_run_after(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self.schedule_type {
            ScheduleType::Interval => {
                let Some(secs) = self.interval_seconds else {
                    warn!("schedule {} is missing interval_seconds", self.id);
                    return None;
                };
                let anchor = self.last_run.unwrap_or(now);
                Some(anchor + Duration::seconds(secs as i64))
            }
            ScheduleType::Daily => {
                let (hour, minute) = parse_hhmm(self.daily_time.as_deref()).or_else(|| {
                    warn!("schedule {} has an invalid daily_time", self.id);
                    None
                })?;
                let today = at_time(now, hour, minute)?;
                if today > now {
                    Some(today)
                } else {
                    Some(today + Duration::days(1))
                }
            }
            ScheduleType::Weekly => {
                let Some(day) = self.weekly_day.filter(|d| *d <= 6) else {
                    warn!("schedule {} has an invalid weekly_day", self.id);
                    return None;
                };
                let (hour, minute) = parse_hhmm(self.weekly_time.as_deref()).or_else(|| {
                    warn!("schedule {} has an invalid weekly_time", self.id);
                    None
                })?;
                let current_day = now.weekday().num_days_from_monday();
                let mut days_ahead = (day + 7 - current_day) % 7;
                let candidate = at_time(now, hour, minute)? + Duration::days(days_ahead as i64);
                if candidate <= now {
                    days_ahead += 7;
                }
                Some(at_time(now, hour, minute)? + Duration::days(days_ahead as i64))
            }
            ScheduleType::Monthly => {
                let Some(day) = self.monthly_day.filter(|d| (1..=31).contains(d)) else {
                    warn!("schedule {} has an invalid monthly_day", self.id);
                    return None;
                };
                let (hour, minute) = parse_hhmm(self.monthly_time.as_deref()).or_else(|| {
                    warn!("schedule {} has an invalid monthly_time", self.id);
                    None
                })?;
                // Day-of-month capped at 28 so every month has the slot
                let day = day.min(28);
                let this_month = Utc
                    .with_ymd_and_hms(now.year(), now.month(), day, hour, minute, 0)
                    .single()?;
                if this_month > now {
                    Some(this_month)
                } else if now.month() == 12 {
                    Utc.with_ymd_and_hms(now.year() + 1, 1, day, hour, minute, 0)
                        .single()
                } else {
                    Utc.with_ymd_and_hms(now.year(), now.month() + 1, day, hour, minute, 0)
                        .single()
                }
            }
            ScheduleType::Cron => {
                let Some(expression) = self.cron_expression.as_deref() else {
                    warn!("schedule {} is missing cron_expression", self.id);
                    return None;
                };
                // Standard 5-field expressions get a seconds field prepended
                let normalized = if expression.split_whitespace().count() == 5 {
                    format!("0 {}", expression)
                } else {
                    expression.to_string()
                };
                match CronSchedule::from_str(&normalized) {
                    Ok(cron) => cron.after(&now).next(),
                    Err(err) => {
                        warn!("schedule {} has an invalid cron expression: {}", self.id, err);
                        None
                    }
                }
            }
        }
    }

    /// Recompute `next_run` from `now`; disabled schedules get `None`.
    pub fn update_next_run(&mut self, now: DateTime<Utc>) {
        self.next_run = if self.enabled {
            self.next_run_after(now)
        } else {
            None
        };
    }

    /// Whether this schedule is due at `now`
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.enabled && self.next_run.is_some_and(|at| at <= now)
    }
}

fn parse_hhmm(value: Option<&str>) -> Option<(u32, u32)> {
    let (hour, minute) = value?.split_once(':')?;
    let hour: u32 = hour.parse().ok()?;
    let minute: u32 = minute.parse().ok()?;
    if hour > 23 || minute > 59 {
        return None;
    }
    Some((hour, minute))
}

fn at_time(now: DateTime<Utc>, hour: u32, minute: u32) -> Option<DateTime<Utc>> {
    now.with_hour(hour)?
        .with_minute(minute)?
        .with_second(0)?
        .with_nanosecond(0)
}

/// Partial update applied by [`crate::scheduler::Scheduler::update_schedule`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScheduleUpdate {
    pub name: Option<String>,
    pub target: Option<String>,
    pub parameters: Option<HashMap<String, Value>>,
    pub description: Option<String>,
    pub enabled: Option<bool>,
    pub interval_seconds: Option<u64>,
    pub daily_time: Option<String>,
    pub weekly_day: Option<u32>,
    pub weekly_time: Option<String>,
    pub monthly_day: Option<u32>,
    pub monthly_time: Option<String>,
    pub cron_expression: Option<String>,
}

impl ScheduleUpdate {
    pub fn apply(&self, schedule: &mut Schedule) {
        if let Some(name) = &self.name {
            schedule.name = name.clone();
        }
        if let Some(target) = &self.target {
            schedule.target = target.clone();
        }
        if let Some(parameters) = &self.parameters {
            schedule.parameters = parameters.clone();
        }
        if let Some(description) = &self.description {
            schedule.description = Some(description.clone());
        }
        if let Some(enabled) = self.enabled {
            schedule.enabled = enabled;
        }
        if let Some(secs) = self.interval_seconds {
            schedule.interval_seconds = Some(secs);
        }
        if let Some(time) = &self.daily_time {
            schedule.daily_time = Some(time.clone());
        }
        if let Some(day) = self.weekly_day {
            schedule.weekly_day = Some(day);
        }
        if let Some(time) = &self.weekly_time {
            schedule.weekly_time = Some(time.clone());
        }
        if let Some(day) = self.monthly_day {
            schedule.monthly_day = Some(day);
        }
        if let Some(time) = &self.monthly_time {
            schedule.monthly_time = Some(time.clone());
        }
        if let Some(expression) = &self.cron_expression {
            schedule.cron_expression = Some(expression.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn test_interval_without_last_run_counts_from_now() {
        let schedule = Schedule::interval("s1", "Every 5", "echo", 5);
        let now = at(2024, 1, 1, 12, 0);
        assert_eq!(
            schedule.next_run_after(now),
            Some(now + Duration::seconds(5))
        );
    }

    #[test]
    fn test_interval_counts_from_last_run() {
        let mut schedule = Schedule::interval("s1", "Every 5", "echo", 300);
        schedule.last_run = Some(at(2024, 1, 1, 12, 0));
        let now = at(2024, 1, 1, 12, 2);
        assert_eq!(schedule.next_run_after(now), Some(at(2024, 1, 1, 12, 5)));
    }

    #[test]
    fn test_daily_before_target_time_runs_today() {
        let schedule = Schedule::daily("d1", "Morning", "summary", "08:00");
        let now = at(2024, 1, 1, 7, 0);
        assert_eq!(schedule.next_run_after(now), Some(at(2024, 1, 1, 8, 0)));
    }

    #[test]
    fn test_daily_after_target_time_rolls_to_tomorrow() {
        let schedule = Schedule::daily("d1", "Morning", "summary", "08:00");
        let now = at(2024, 1, 1, 9, 0);
        assert_eq!(schedule.next_run_after(now), Some(at(2024, 1, 2, 8, 0)));
    }

    #[test]
    fn test_weekly_rolls_a_full_week_when_today_has_passed() {
        // 2024-01-01 is a Monday
        let schedule = Schedule::weekly("w1", "Weekly", "report", 0, "09:00");
        let now = at(2024, 1, 1, 10, 0);
        assert_eq!(schedule.next_run_after(now), Some(at(2024, 1, 8, 9, 0)));

        let before = at(2024, 1, 1, 8, 0);
        assert_eq!(schedule.next_run_after(before), Some(at(2024, 1, 1, 9, 0)));
    }

    #[test]
    fn test_weekly_targets_a_later_weekday() {
        // Wednesday is day 2
        let schedule = Schedule::weekly("w1", "Weekly", "report", 2, "09:00");
        let now = at(2024, 1, 1, 10, 0);
        assert_eq!(schedule.next_run_after(now), Some(at(2024, 1, 3, 9, 0)));
    }

    #[test]
    fn test_monthly_day_clamped_to_28() {
        let schedule = Schedule::monthly("m1", "Monthly", "report", 31, "06:00");
        let now = at(2024, 1, 30, 12, 0);
        // Already past the 28th, so next month - still on the 28th
        assert_eq!(schedule.next_run_after(now), Some(at(2024, 2, 28, 6, 0)));
    }

    #[test]
    fn test_monthly_december_rolls_into_next_year() {
        let schedule = Schedule::monthly("m1", "Monthly", "report", 15, "06:00");
        let now = at(2024, 12, 20, 12, 0);
        assert_eq!(schedule.next_run_after(now), Some(at(2025, 1, 15, 6, 0)));
    }

    #[test]
    fn test_cron_expression() {
        // Standard 5-field expression, hourly on the hour
        let schedule = Schedule::cron("c1", "Hourly", "tick", "0 * * * *");
        let now = at(2024, 1, 1, 12, 30);
        assert_eq!(schedule.next_run_after(now), Some(at(2024, 1, 1, 13, 0)));
    }

    #[test]
    fn test_malformed_fields_yield_none() {
        let mut schedule = Schedule::daily("bad", "Bad", "x", "25:99");
        assert_eq!(schedule.next_run_after(Utc::now()), None);

        schedule = Schedule::cron("bad", "Bad", "x", "not a cron");
        assert_eq!(schedule.next_run_after(Utc::now()), None);

        schedule = Schedule::base("bad", "Bad", ScheduleType::Interval, "x");
        assert_eq!(schedule.next_run_after(Utc::now()), None);
    }

    #[test]
    fn test_disable_clears_next_run() {
        let mut schedule = Schedule::interval("s1", "Every 5", "echo", 5);
        let now = Utc::now();
        schedule.update_next_run(now);
        assert!(schedule.next_run.is_some());

        schedule.enabled = false;
        schedule.update_next_run(now);
        assert!(schedule.next_run.is_none());

        schedule.enabled = true;
        schedule.update_next_run(now);
        let next = schedule.next_run.expect("re-enabled schedule has next_run");
        assert!(next > now);
    }

    #[test]
    fn test_json_round_trip_field_names() {
        let schedule = Schedule::daily("daily-summary", "Daily Summary", "generate_summary", "08:00");
        let json = serde_json::to_value(&schedule).unwrap();
        assert_eq!(json["type"], "daily");
        assert_eq!(json["daily_time"], "08:00");

        let back: Schedule = serde_json::from_value(json).unwrap();
        assert_eq!(back.schedule_type, ScheduleType::Daily);
        assert_eq!(back.target, "generate_summary");
        assert!(back.enabled);
    }
}
