use crate::checklist::{self, StrikeOutcome};
use crate::db::Database;
use crate::errors::{AppError, AppResult};
use crate::generation::{build_prompt, parse_reply, resolve_outcome, ChecklistGenerator, GenerationRequest, ProposalOutcome};
use crate::models::{
    CheckIn, ChecklistItem, CreateTaskRequest, DailyMetric, DailyMetricUpdate, EndFocusSessionRequest,
    EngineSettings, FocusSession, GenerationMode, Goal, MetricsSnapshot, ProposedItem, RecordCheckInRequest,
    SaveGoalPayload, SessionFeedback, StandupAnswers, StandupSession, StartFocusSessionRequest, TaskRecord,
    UpdateTaskRequest, CALENDAR_WINDOW_DAYS,
};
use crate::orchestrator::plan_checklist;
use crate::policy::{validate_goal_payload, validate_metric_update};
use crate::records;
use crate::rollup::{rollup_with_options, window_dates, RollupOptions};
use chrono::{NaiveDate, Utc};
use std::path::Path;
use std::sync::Arc;

/// User-scoped entry point for every engine operation.
///
/// Each call runs to completion on the caller's thread; there are no
/// background jobs. Strike application and metric refreshes are driven by
/// whoever schedules them.
#[derive(Clone)]
pub struct StandupEngine {
    db: Arc<Database>,
}

impl StandupEngine {
    pub fn open(path: &Path) -> AppResult<Self> {
        let db = Database::new(path)?;
        tracing::info!(path = %path.display(), "standup engine database opened");
        Ok(Self::new(Arc::new(db)))
    }

    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn settings(&self) -> AppResult<EngineSettings> {
        self.db.get_settings()
    }

    pub fn update_settings(&self, update: serde_json::Value) -> AppResult<EngineSettings> {
        let settings = self.db.update_settings(update)?;
        tracing::info!(settings = ?settings, "engine settings updated");
        Ok(settings)
    }

    pub fn save_goal(&self, user_id: &str, payload: SaveGoalPayload) -> AppResult<Goal> {
        validate_goal_payload(&payload)?;
        let goal = self.db.save_goal(user_id, payload)?;
        tracing::info!(user_id = %user_id, goal_id = %goal.id, status = goal.status.as_str(), "goal saved");
        Ok(goal)
    }

    pub fn goal(&self, user_id: &str, goal_id: &str) -> AppResult<Goal> {
        self.db
            .get_goal(user_id, goal_id)?
            .ok_or_else(|| AppError::NotFound(format!("Goal {} not found", goal_id)))
    }

    pub fn active_goals(&self, user_id: &str) -> AppResult<Vec<Goal>> {
        self.db.list_active_goals(user_id)
    }

    pub fn archive_goal(&self, user_id: &str, goal_id: &str) -> AppResult<Goal> {
        if !self.db.archive_goal(user_id, goal_id)? {
            return Err(AppError::NotFound(format!("Goal {} not found", goal_id)));
        }
        tracing::info!(user_id = %user_id, goal_id = %goal_id, "goal archived");
        self.goal(user_id, goal_id)
    }

    pub fn start_standup(
        &self,
        user_id: &str,
        session_date: NaiveDate,
        answers: StandupAnswers,
    ) -> AppResult<StandupSession> {
        let session = self.db.insert_standup_session(user_id, session_date, answers)?;
        tracing::info!(user_id = %user_id, session_id = %session.id, date = %session_date, "standup session started");
        Ok(session)
    }

    pub fn standup_session(&self, user_id: &str, session_id: &str) -> AppResult<StandupSession> {
        self.db
            .get_standup_session(user_id, session_id)?
            .ok_or_else(|| AppError::NotFound(format!("Standup session {} not found", session_id)))
    }

    /// Persists one checklist item per proposal, linked to the caller's active goals.
    /// Either every item is stored or none is.
    pub fn generate_checklist(
        &self,
        user_id: &str,
        session_id: &str,
        proposals: &[ProposedItem],
        mode: GenerationMode,
    ) -> AppResult<Vec<ChecklistItem>> {
        let settings = self.db.get_settings()?;
        let goals = self.db.list_active_goals(user_id)?;
        self.persist_checklist(user_id, session_id, &goals, proposals, &settings, mode, None)
    }

    #[allow(clippy::too_many_arguments)]
    fn persist_checklist(
        &self,
        user_id: &str,
        session_id: &str,
        goals: &[Goal],
        proposals: &[ProposedItem],
        settings: &EngineSettings,
        mode: GenerationMode,
        feedback: Option<&SessionFeedback>,
    ) -> AppResult<Vec<ChecklistItem>> {
        let items = plan_checklist(user_id, session_id, goals, proposals, settings, Utc::now());
        self.db.insert_checklist_items(user_id, session_id, &items, mode, feedback)?;

        let linked = items.iter().filter(|item| item.goal_id.is_some()).count();
        tracing::info!(
            user_id = %user_id,
            session_id = %session_id,
            mode = ?mode,
            items = items.len(),
            goal_linked = linked,
            "checklist generated"
        );
        Ok(items)
    }

    /// Asks `generator` for proposals from the session's answers, falls back to the
    /// configured placeholder item when the reply is unusable, then stores the items
    /// and the session feedback together.
    pub fn generate_from_standup(
        &self,
        user_id: &str,
        session_id: &str,
        generator: &dyn ChecklistGenerator,
        mode: GenerationMode,
    ) -> AppResult<Vec<ChecklistItem>> {
        let session = self.standup_session(user_id, session_id)?;
        let goals = self.db.list_active_goals(user_id)?;
        let settings = self.db.get_settings()?;

        let request = GenerationRequest {
            user_id: user_id.to_string(),
            session_id: session_id.to_string(),
            prompt: build_prompt(&session, &goals),
        };
        let outcome = match generator.generate(&request) {
            Ok(reply) => parse_reply(&reply),
            Err(error) => {
                let error = AppError::from(error);
                tracing::warn!(user_id = %user_id, session_id = %session_id, error = %error, "checklist generator failed");
                ProposalOutcome::ParseFailure(error.to_string())
            }
        };
        if let ProposalOutcome::ParseFailure(reason) = &outcome {
            tracing::warn!(user_id = %user_id, session_id = %session_id, reason = %reason, "unusable generator reply");
        }

        let (generated, used_fallback) = resolve_outcome(outcome, &settings);
        if used_fallback {
            tracing::warn!(user_id = %user_id, session_id = %session_id, "using fallback checklist item");
        }

        let feedback = SessionFeedback {
            feedback: generated.feedback,
            guiding_questions: generated.guiding_questions,
        };
        self.persist_checklist(
            user_id,
            session_id,
            &goals,
            &generated.items,
            &settings,
            mode,
            Some(&feedback),
        )
    }

    pub fn checklist_item(&self, user_id: &str, item_id: &str) -> AppResult<ChecklistItem> {
        self.db
            .get_checklist_item(user_id, item_id)?
            .ok_or_else(|| AppError::NotFound(format!("Checklist item {} not found", item_id)))
    }

    pub fn session_items(&self, user_id: &str, session_id: &str) -> AppResult<Vec<ChecklistItem>> {
        self.standup_session(user_id, session_id)?;
        self.db.list_session_items(user_id, session_id)
    }

    pub fn check_ins(&self, user_id: &str, item_id: &str) -> AppResult<Vec<CheckIn>> {
        self.checklist_item(user_id, item_id)?;
        self.db.list_check_ins(user_id, item_id)
    }

    pub fn record_check_in(
        &self,
        user_id: &str,
        item_id: &str,
        request: RecordCheckInRequest,
    ) -> AppResult<(ChecklistItem, CheckIn)> {
        let mut item = self.checklist_item(user_id, item_id)?;
        let previous = item.status;
        let check_in = checklist::apply_check_in(&mut item, &request, Utc::now())?;
        self.db.record_check_in(&item, &check_in)?;

        tracing::info!(
            user_id = %user_id,
            item_id = %item_id,
            from = previous.as_str(),
            to = item.status.as_str(),
            progress = check_in.progress_percentage,
            "checklist check-in recorded"
        );
        Ok((item, check_in))
    }

    pub fn apply_strike(&self, user_id: &str, item_id: &str) -> AppResult<ChecklistItem> {
        let mut item = self.checklist_item(user_id, item_id)?;
        let StrikeOutcome { applied, escalated } = checklist::apply_strike(&mut item, Utc::now());
        if !applied {
            tracing::debug!(user_id = %user_id, item_id = %item_id, strikes = item.strikes, "strike cap reached");
            return Ok(item);
        }

        self.db.update_checklist_item(&item)?;
        if escalated {
            tracing::warn!(user_id = %user_id, item_id = %item_id, strikes = item.strikes, "checklist item escalated to at_risk");
        } else {
            tracing::info!(user_id = %user_id, item_id = %item_id, strikes = item.strikes, "strike applied");
        }
        Ok(item)
    }

    pub fn set_clarity_score(&self, user_id: &str, item_id: &str, score: i64) -> AppResult<ChecklistItem> {
        let mut item = self.checklist_item(user_id, item_id)?;
        if checklist::set_clarity_score(&mut item, score, Utc::now())? {
            self.db.update_checklist_item(&item)?;
            tracing::info!(user_id = %user_id, item_id = %item_id, clarity = item.clarity_score, "clarity score set");
        }
        Ok(item)
    }

    pub fn create_task(&self, user_id: &str, request: CreateTaskRequest) -> AppResult<TaskRecord> {
        let task = records::new_task(user_id, request, Utc::now())?;
        self.db.insert_task(&task)?;
        tracing::info!(user_id = %user_id, task_id = %task.id, "task created");
        Ok(task)
    }

    pub fn task(&self, user_id: &str, task_id: &str) -> AppResult<TaskRecord> {
        self.db
            .get_task(user_id, task_id)?
            .ok_or_else(|| AppError::NotFound(format!("Task {} not found", task_id)))
    }

    pub fn update_task(&self, user_id: &str, task_id: &str, request: UpdateTaskRequest) -> AppResult<TaskRecord> {
        let mut task = self.task(user_id, task_id)?;
        records::apply_task_update(&mut task, request, Utc::now())?;
        self.db.update_task(&task)?;
        tracing::info!(user_id = %user_id, task_id = %task_id, status = task.status.as_str(), "task updated");
        Ok(task)
    }

    pub fn tasks_created_between(&self, user_id: &str, start: NaiveDate, end: NaiveDate) -> AppResult<Vec<TaskRecord>> {
        self.db.list_tasks_created_between(user_id, start, end)
    }

    pub fn start_focus_session(&self, user_id: &str, request: StartFocusSessionRequest) -> AppResult<FocusSession> {
        let session = records::new_focus_session(user_id, request, Utc::now());
        self.db.insert_focus_session(&session)?;
        tracing::info!(
            user_id = %user_id,
            focus_session_id = %session.id,
            session_type = session.session_type.as_str(),
            "focus session started"
        );
        Ok(session)
    }

    pub fn focus_session(&self, user_id: &str, session_id: &str) -> AppResult<FocusSession> {
        self.db
            .get_focus_session(user_id, session_id)?
            .ok_or_else(|| AppError::NotFound(format!("Focus session {} not found", session_id)))
    }

    pub fn end_focus_session(
        &self,
        user_id: &str,
        session_id: &str,
        request: EndFocusSessionRequest,
    ) -> AppResult<FocusSession> {
        let mut session = self.focus_session(user_id, session_id)?;
        records::close_focus_session(&mut session, request, Utc::now())?;
        self.db.update_focus_session(&session)?;
        tracing::info!(
            user_id = %user_id,
            focus_session_id = %session_id,
            minutes = session.duration_minutes,
            "focus session ended"
        );
        Ok(session)
    }

    pub fn record_interruption(&self, user_id: &str, session_id: &str) -> AppResult<FocusSession> {
        let mut session = self.focus_session(user_id, session_id)?;
        if !session.is_open() {
            return Err(AppError::InvalidArgument(format!(
                "Focus session {} has already ended",
                session_id
            )));
        }
        session.interruptions_count = session.interruptions_count.saturating_add(1);
        self.db.update_focus_session(&session)?;
        Ok(session)
    }

    pub fn upsert_daily_metric(
        &self,
        user_id: &str,
        date: NaiveDate,
        update: DailyMetricUpdate,
    ) -> AppResult<DailyMetric> {
        validate_metric_update(&update)?;
        let metric = self.db.upsert_daily_metric(user_id, date, &update)?;
        tracing::info!(user_id = %user_id, date = %date, "daily metric merged");
        Ok(metric)
    }

    /// Folds the checklist items of `date`'s standup sessions into that day's metric row.
    pub fn sync_checklist_metrics(&self, user_id: &str, date: NaiveDate) -> AppResult<DailyMetric> {
        let items = self.db.list_items_for_date(user_id, date)?;
        let update = records::checklist_metric_update(&items);
        let metric = self.db.upsert_daily_metric(user_id, date, &update)?;
        tracing::info!(
            user_id = %user_id,
            date = %date,
            planned = metric.tasks_planned,
            completed = metric.tasks_completed,
            "checklist metrics synced"
        );
        Ok(metric)
    }

    /// Recomputed on every call; nothing here is cached or stored.
    pub fn metrics_snapshot(&self, user_id: &str, as_of: NaiveDate) -> AppResult<MetricsSnapshot> {
        let settings = self.db.get_settings()?;
        let window = window_dates(as_of, CALENDAR_WINDOW_DAYS);
        let start = window.first().copied().unwrap_or(as_of);

        let metrics = self.db.list_daily_metrics(user_id, start, as_of)?;
        let tasks = self.db.list_tasks_created_between(user_id, start, as_of)?;
        let sessions = self.db.list_focus_sessions_between(user_id, start, as_of)?;

        let options = RollupOptions {
            focus_minutes_per_point: settings.focus_minutes_per_point,
        };
        Ok(rollup_with_options(&metrics, &tasks, &sessions, as_of, &options))
    }
}
