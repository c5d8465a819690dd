use crate::errors::{AppError, AppResult};
use crate::models::{
    ChecklistItem, ChecklistStatus, CreateTaskRequest, DailyMetric, DailyMetricUpdate, EndFocusSessionRequest,
    FocusSession, StartFocusSessionRequest, TaskRecord, TaskStatus, UpdateTaskRequest,
};
use crate::policy::validate_title;
use chrono::{DateTime, Utc};
use uuid::Uuid;

pub fn new_task(user_id: &str, request: CreateTaskRequest, now: DateTime<Utc>) -> AppResult<TaskRecord> {
    validate_title(&request.title)?;
    let created_at = request.created_at.unwrap_or(now);
    Ok(TaskRecord {
        id: Uuid::new_v4().to_string(),
        user_id: user_id.to_string(),
        title: request.title,
        description: request.description,
        priority: request.priority,
        estimated_minutes: request.estimated_minutes,
        actual_minutes: None,
        status: TaskStatus::Pending,
        due_date: request.due_date,
        completed_at: None,
        created_at,
        updated_at: now,
    })
}

/// Applies a partial update. `completed_at` is stamped on the first move into
/// `completed` and kept afterwards, including across reopen.
pub fn apply_task_update(task: &mut TaskRecord, request: UpdateTaskRequest, now: DateTime<Utc>) -> AppResult<()> {
    if let Some(title) = request.title {
        validate_title(&title)?;
        task.title = title;
    }
    if let Some(description) = request.description {
        task.description = Some(description);
    }
    if let Some(priority) = request.priority {
        task.priority = priority;
    }
    if let Some(estimated) = request.estimated_minutes {
        task.estimated_minutes = Some(estimated);
    }
    if let Some(actual) = request.actual_minutes {
        task.actual_minutes = Some(actual);
    }
    if let Some(due_date) = request.due_date {
        task.due_date = Some(due_date);
    }
    if let Some(status) = request.status {
        if status == TaskStatus::Completed && task.completed_at.is_none() {
            task.completed_at = Some(now);
        }
        task.status = status;
    }
    task.updated_at = now;
    Ok(())
}

pub fn new_focus_session(user_id: &str, request: StartFocusSessionRequest, now: DateTime<Utc>) -> FocusSession {
    FocusSession {
        id: Uuid::new_v4().to_string(),
        user_id: user_id.to_string(),
        start_time: request.start_time.unwrap_or(now),
        end_time: None,
        duration_minutes: 0,
        session_type: request.session_type,
        interruptions_count: 0,
        notes: request.notes,
    }
}

pub fn close_focus_session(
    session: &mut FocusSession,
    request: EndFocusSessionRequest,
    now: DateTime<Utc>,
) -> AppResult<()> {
    if !session.is_open() {
        return Err(AppError::InvalidArgument(format!(
            "Focus session {} has already ended",
            session.id
        )));
    }
    let end_time = request.end_time.unwrap_or(now);
    if end_time < session.start_time {
        return Err(AppError::InvalidArgument(
            "Focus session cannot end before it starts".to_string(),
        ));
    }

    let elapsed = (end_time - session.start_time).num_minutes().max(0);
    session.duration_minutes = request
        .duration_minutes
        .unwrap_or_else(|| u32::try_from(elapsed).unwrap_or(u32::MAX));
    session.end_time = Some(end_time);
    if let Some(notes) = request.notes {
        session.notes = Some(notes);
    }
    Ok(())
}

pub fn merge_daily_metric(mut metric: DailyMetric, update: &DailyMetricUpdate) -> DailyMetric {
    macro_rules! merge {
        ($($field:ident),+) => {
            $(if let Some(value) = update.$field {
                metric.$field = value;
            })+
        };
    }
    merge!(
        focus_score,
        completion_rate,
        proactiveness_score,
        alignment_score,
        tasks_planned,
        tasks_completed,
        blockers_encountered,
        blockers_resolved,
        distractions_count,
        focus_time_minutes,
        total_work_minutes
    );
    metric
}

/// Folds one day's checklist items into the checklist-owned metric fields.
pub fn checklist_metric_update(items: &[ChecklistItem]) -> DailyMetricUpdate {
    let planned = items.len() as u32;
    let completed = items
        .iter()
        .filter(|item| item.status == ChecklistStatus::Completed)
        .count() as u32;
    let blocked = items
        .iter()
        .filter(|item| item.status == ChecklistStatus::Blocked)
        .count() as u32;

    DailyMetricUpdate {
        tasks_planned: Some(planned),
        tasks_completed: Some(completed),
        completion_rate: (planned > 0).then(|| 100.0 * f64::from(completed) / f64::from(planned)),
        blockers_encountered: Some(blocked),
        ..DailyMetricUpdate::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FocusSessionType, TaskPriority};
    use chrono::{Duration, NaiveDate};

    fn task() -> TaskRecord {
        new_task(
            "user-1",
            CreateTaskRequest {
                title: "Call vendor".to_string(),
                description: None,
                priority: TaskPriority::High,
                estimated_minutes: Some(15),
                due_date: None,
                created_at: None,
            },
            Utc::now(),
        )
        .expect("task")
    }

    #[test]
    fn completed_at_is_stamped_exactly_once() {
        let mut task = task();
        let first = Utc::now();
        apply_task_update(
            &mut task,
            UpdateTaskRequest {
                status: Some(TaskStatus::Completed),
                ..UpdateTaskRequest::default()
            },
            first,
        )
        .expect("complete");
        assert_eq!(task.completed_at, Some(first));

        for status in [TaskStatus::InProgress, TaskStatus::Completed] {
            apply_task_update(
                &mut task,
                UpdateTaskRequest {
                    status: Some(status),
                    ..UpdateTaskRequest::default()
                },
                first + Duration::hours(1),
            )
            .expect("update");
        }
        assert_eq!(task.completed_at, Some(first));
        assert_eq!(task.status, TaskStatus::Completed);
    }

    #[test]
    fn rejects_blank_titles() {
        let mut task = task();
        let result = apply_task_update(
            &mut task,
            UpdateTaskRequest {
                title: Some("   ".to_string()),
                ..UpdateTaskRequest::default()
            },
            Utc::now(),
        );
        assert!(matches!(result, Err(AppError::InvalidArgument(_))));
        assert_eq!(task.title, "Call vendor");
    }

    #[test]
    fn closing_derives_duration_and_refuses_twice() {
        let start = Utc::now() - Duration::minutes(50);
        let mut session = new_focus_session(
            "user-1",
            StartFocusSessionRequest {
                session_type: FocusSessionType::DeepWork,
                notes: None,
                start_time: Some(start),
            },
            Utc::now(),
        );
        assert!(session.is_open());
        close_focus_session(&mut session, EndFocusSessionRequest::default(), start + Duration::minutes(45))
            .expect("close");
        assert_eq!(session.duration_minutes, 45);
        assert!(!session.is_open());

        let again = close_focus_session(&mut session, EndFocusSessionRequest::default(), Utc::now());
        assert!(matches!(again, Err(AppError::InvalidArgument(_))));
    }

    #[test]
    fn merge_keeps_unspecified_fields() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 20).expect("date");
        let stored = DailyMetric {
            focus_score: 70.0,
            tasks_planned: 4,
            ..DailyMetric::empty(date)
        };
        let merged = merge_daily_metric(
            stored,
            &DailyMetricUpdate {
                proactiveness_score: Some(55.0),
                ..DailyMetricUpdate::default()
            },
        );
        assert_eq!(merged.focus_score, 70.0);
        assert_eq!(merged.tasks_planned, 4);
        assert_eq!(merged.proactiveness_score, 55.0);
    }

    #[test]
    fn empty_checklist_leaves_completion_rate_alone() {
        let update = checklist_metric_update(&[]);
        assert_eq!(update.tasks_planned, Some(0));
        assert_eq!(update.completion_rate, None);
    }
}
