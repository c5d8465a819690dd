//! On-demand aggregation of daily metrics, ad-hoc tasks and focus sessions.
//!
//! Stored scores always win over derived ones. Values stay unrounded; rounding
//! belongs to whoever renders the snapshot.

use crate::models::{
    CalendarPoint, DailyMetric, FocusSession, FocusSessionType, MetricsSnapshot, TaskRecord, TaskStatus,
    WeeklyPoint, CALENDAR_WINDOW_DAYS, WEEKLY_WINDOW_DAYS,
};
use chrono::{Duration, NaiveDate};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RollupOptions {
    /// Focus minutes worth one percentage point when focus is derived from sessions.
    pub focus_minutes_per_point: f64,
}

impl Default for RollupOptions {
    fn default() -> Self {
        Self {
            focus_minutes_per_point: 2.0,
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct TaskTally {
    total: u32,
    completed: u32,
}

struct DayIndex<'a> {
    metrics: HashMap<NaiveDate, &'a DailyMetric>,
    tasks: HashMap<NaiveDate, TaskTally>,
    focus_minutes: HashMap<NaiveDate, u64>,
}

impl<'a> DayIndex<'a> {
    fn build(daily_metrics: &'a [DailyMetric], tasks: &[TaskRecord], focus_sessions: &[FocusSession]) -> Self {
        let mut metrics = HashMap::new();
        for metric in daily_metrics {
            // later rows for the same date win
            metrics.insert(metric.date, metric);
        }

        let mut tallies: HashMap<NaiveDate, TaskTally> = HashMap::new();
        for task in tasks {
            let tally = tallies.entry(task.created_at.date_naive()).or_default();
            tally.total += 1;
            if task.status == TaskStatus::Completed {
                tally.completed += 1;
            }
        }

        let mut focus_minutes: HashMap<NaiveDate, u64> = HashMap::new();
        for session in focus_sessions {
            if session.session_type == FocusSessionType::Break {
                continue;
            }
            *focus_minutes.entry(session.start_time.date_naive()).or_default() +=
                u64::from(session.duration_minutes);
        }

        Self {
            metrics,
            tasks: tallies,
            focus_minutes,
        }
    }

    fn completion(&self, date: NaiveDate) -> f64 {
        match self.tasks.get(&date) {
            Some(tally) if tally.total > 0 => 100.0 * f64::from(tally.completed) / f64::from(tally.total),
            _ => self
                .metrics
                .get(&date)
                .map(|metric| metric.completion_rate)
                .unwrap_or(0.0),
        }
    }

    fn focus(&self, date: NaiveDate, options: &RollupOptions) -> f64 {
        if let Some(metric) = self.metrics.get(&date) {
            return metric.focus_score;
        }
        match self.focus_minutes.get(&date) {
            Some(minutes) if *minutes > 0 => (*minutes as f64 / options.focus_minutes_per_point).min(100.0),
            _ => 0.0,
        }
    }

    fn proactiveness(&self, date: NaiveDate) -> f64 {
        self.metrics
            .get(&date)
            .map(|metric| metric.proactiveness_score)
            .unwrap_or(0.0)
    }
}

/// `days` consecutive dates ending at `as_of`, oldest first.
pub fn window_dates(as_of: NaiveDate, days: usize) -> Vec<NaiveDate> {
    (0..days as i64)
        .rev()
        .map(|offset| as_of - Duration::days(offset))
        .collect()
}

pub fn rollup(
    daily_metrics: &[DailyMetric],
    tasks: &[TaskRecord],
    focus_sessions: &[FocusSession],
    as_of: NaiveDate,
) -> MetricsSnapshot {
    rollup_with_options(daily_metrics, tasks, focus_sessions, as_of, &RollupOptions::default())
}

pub fn rollup_with_options(
    daily_metrics: &[DailyMetric],
    tasks: &[TaskRecord],
    focus_sessions: &[FocusSession],
    as_of: NaiveDate,
    options: &RollupOptions,
) -> MetricsSnapshot {
    let index = DayIndex::build(daily_metrics, tasks, focus_sessions);

    let current = index
        .metrics
        .get(&as_of)
        .map(|metric| (*metric).clone())
        .unwrap_or_else(|| DailyMetric::empty(as_of));

    let weekly = window_dates(as_of, WEEKLY_WINDOW_DAYS)
        .into_iter()
        .map(|date| WeeklyPoint {
            date,
            completion_percentage: index.completion(date),
        })
        .collect();

    let calendar = window_dates(as_of, CALENDAR_WINDOW_DAYS)
        .into_iter()
        .map(|date| CalendarPoint {
            date,
            completion_percentage: index.completion(date),
            focus_percentage: index.focus(date, options),
            proactiveness_percentage: index.proactiveness(date),
        })
        .collect();

    MetricsSnapshot {
        as_of,
        current,
        weekly,
        calendar,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).expect("valid date")
    }

    fn at(d: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, d, hour, 0, 0).single().expect("valid time")
    }

    fn metric(d: u32, focus: f64, completion: f64, proactiveness: f64) -> DailyMetric {
        DailyMetric {
            focus_score: focus,
            completion_rate: completion,
            proactiveness_score: proactiveness,
            ..DailyMetric::empty(day(d))
        }
    }

    fn task(d: u32, status: TaskStatus) -> TaskRecord {
        TaskRecord {
            id: format!("t-{}-{:?}", d, status),
            user_id: "user-1".to_string(),
            title: "task".to_string(),
            description: None,
            priority: crate::models::TaskPriority::Medium,
            estimated_minutes: None,
            actual_minutes: None,
            status,
            due_date: None,
            completed_at: None,
            created_at: at(d, 9),
            updated_at: at(d, 9),
        }
    }

    fn session(d: u32, minutes: u32, session_type: FocusSessionType) -> FocusSession {
        FocusSession {
            id: format!("f-{}-{}", d, minutes),
            user_id: "user-1".to_string(),
            start_time: at(d, 10),
            end_time: Some(at(d, 11)),
            duration_minutes: minutes,
            session_type,
            interruptions_count: 0,
            notes: None,
        }
    }

    #[test]
    fn windows_have_fixed_length_and_end_on_as_of() {
        let snapshot = rollup(&[], &[], &[], day(3));
        assert_eq!(snapshot.weekly.len(), 7);
        assert_eq!(snapshot.calendar.len(), 28);
        assert_eq!(snapshot.weekly.last().map(|p| p.date), Some(day(3)));
        assert_eq!(snapshot.calendar.last().map(|p| p.date), Some(day(3)));
        assert!(snapshot.weekly.windows(2).all(|w| w[0].date < w[1].date));
        assert!(snapshot.calendar.windows(2).all(|w| w[0].date + Duration::days(1) == w[1].date));
    }

    #[test]
    fn current_uses_stored_metric_verbatim() {
        let snapshot = rollup(&[metric(20, 87.0, 40.0, 12.5)], &[], &[], day(20));
        assert_eq!(snapshot.current.focus_score, 87.0);
        assert_eq!(snapshot.current.completion_rate, 40.0);
        assert_eq!(snapshot.current.proactiveness_score, 12.5);
    }

    #[test]
    fn current_defaults_to_zero_without_a_metric() {
        let snapshot = rollup(&[], &[task(20, TaskStatus::Completed)], &[session(20, 120, FocusSessionType::DeepWork)], day(20));
        assert_eq!(snapshot.current, DailyMetric::empty(day(20)));
    }

    #[test]
    fn tasks_take_precedence_over_stored_completion() {
        let tasks = vec![
            task(20, TaskStatus::Completed),
            task(20, TaskStatus::Pending),
            task(20, TaskStatus::Cancelled),
        ];
        let snapshot = rollup(&[metric(20, 0.0, 90.0, 0.0), metric(19, 0.0, 55.0, 0.0)], &tasks, &[], day(20));
        let today = snapshot.weekly.last().expect("today");
        assert!((today.completion_percentage - 100.0 / 3.0).abs() < 1e-9);
        let yesterday = &snapshot.weekly[5];
        assert_eq!(yesterday.completion_percentage, 55.0);
        assert_eq!(snapshot.weekly[0].completion_percentage, 0.0);
    }

    #[test]
    fn focus_falls_back_to_sessions_and_caps_at_hundred() {
        let sessions = vec![
            session(18, 90, FocusSessionType::DeepWork),
            session(18, 30, FocusSessionType::Meetings),
            session(18, 500, FocusSessionType::Break),
            session(19, 400, FocusSessionType::DeepWork),
            session(20, 400, FocusSessionType::DeepWork),
        ];
        let snapshot = rollup(&[metric(20, 33.0, 0.0, 70.0)], &[], &sessions, day(20));
        let calendar = &snapshot.calendar;
        assert_eq!(calendar[25].focus_percentage, 60.0);
        assert_eq!(calendar[26].focus_percentage, 100.0);
        assert_eq!(calendar[27].focus_percentage, 33.0);
        assert_eq!(calendar[27].proactiveness_percentage, 70.0);
        assert_eq!(calendar[26].proactiveness_percentage, 0.0);
    }

    #[test]
    fn records_outside_the_window_are_ignored_and_backfill_is_used() {
        let mut backfilled = task(2, TaskStatus::Completed);
        backfilled.updated_at = at(29, 9);
        let snapshot = rollup(&[], &[backfilled, task(1, TaskStatus::Pending)], &[], day(29));
        let first = snapshot.calendar.first().expect("first");
        assert_eq!(first.date, day(2));
        assert_eq!(first.completion_percentage, 100.0);
    }

    #[test]
    fn duplicate_metric_rows_resolve_to_the_last() {
        let snapshot = rollup(&[metric(20, 10.0, 0.0, 0.0), metric(20, 80.0, 0.0, 0.0)], &[], &[], day(20));
        assert_eq!(snapshot.current.focus_score, 80.0);
    }

    #[test]
    fn options_change_the_derived_focus_scale() {
        let options = RollupOptions {
            focus_minutes_per_point: 1.0,
        };
        let snapshot = rollup_with_options(&[], &[], &[session(20, 45, FocusSessionType::Admin)], day(20), &options);
        assert_eq!(snapshot.calendar[27].focus_percentage, 45.0);
    }
}
