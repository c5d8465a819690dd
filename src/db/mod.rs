use crate::errors::{AppError, AppResult};
use crate::models::{
    CheckIn, ChecklistItem, DailyMetric, DailyMetricUpdate, EngineSettings, FocusSession, GenerationMode, Goal,
    GoalStatus, SaveGoalPayload, SessionFeedback, StandupAnswers, StandupSession, TaskRecord,
};
use crate::policy::{validate_settings, validate_task_counts};
use crate::records::merge_daily_metric;
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

const SCHEMA_SQL: &str = include_str!("schema.sql");
const SETTINGS_KEY: &str = "engine";

const GOAL_COLUMNS: &str =
    "id, user_id, title, description, goal_type, priority, status, stakeholders_json, created_at, updated_at";
const SESSION_COLUMNS: &str =
    "id, user_id, session_date, answers_json, feedback, guiding_questions_json, created_at";
const CHECKLIST_COLUMNS: &str = "id, user_id, session_id, title, description, estimated_minutes, actual_minutes, \
     priority, status, strikes, max_strikes, clarity_score, goal_id, assigned_by, assigned_to, due_date, \
     completed_at, created_at, updated_at";
const CHECK_IN_COLUMNS: &str =
    "id, checklist_item_id, status, notes, blockers, time_spent_minutes, progress_percentage, created_at";
const METRIC_COLUMNS: &str = "metric_date, focus_score, completion_rate, proactiveness_score, alignment_score, \
     tasks_planned, tasks_completed, blockers_encountered, blockers_resolved, distractions_count, \
     focus_time_minutes, total_work_minutes";
const TASK_COLUMNS: &str = "id, user_id, title, description, priority, estimated_minutes, actual_minutes, status, \
     due_date, completed_at, created_at, updated_at";
const FOCUS_COLUMNS: &str =
    "id, user_id, start_time, end_time, duration_minutes, session_type, interruptions_count, notes";

#[derive(Debug)]
pub struct Database {
    conn: Mutex<Connection>,
    db_path: PathBuf,
}

impl Database {
    pub fn new(path: &Path) -> AppResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA_SQL)?;

        let db = Self {
            conn: Mutex::new(conn),
            db_path: path.to_path_buf(),
        };
        db.ensure_default_settings()?;

        Ok(db)
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn lock(&self) -> AppResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| AppError::Internal("database mutex poisoned".to_string()))
    }

    pub fn get_settings(&self) -> AppResult<EngineSettings> {
        let conn = self.lock()?;
        let raw = conn
            .query_row(
                "SELECT value_json FROM settings WHERE key = ?1",
                [SETTINGS_KEY],
                |row| row.get::<_, String>(0),
            )
            .optional()?;

        match raw {
            Some(raw) => Ok(serde_json::from_str::<EngineSettings>(&raw)?),
            None => Ok(EngineSettings::default()),
        }
    }

    pub fn update_settings(&self, update: serde_json::Value) -> AppResult<EngineSettings> {
        let current = self.get_settings()?;
        let mut merged = serde_json::to_value(current)?;
        merge_json(&mut merged, update);
        let settings: EngineSettings = serde_json::from_value(merged)
            .map_err(|error| AppError::InvalidArgument(format!("Invalid settings: {}", error)))?;
        validate_settings(&settings)?;

        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO settings (key, value_json, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json, updated_at = excluded.updated_at",
            params![SETTINGS_KEY, serde_json::to_string(&settings)?, Utc::now().to_rfc3339()],
        )?;

        Ok(settings)
    }

    pub fn save_goal(&self, user_id: &str, payload: SaveGoalPayload) -> AppResult<Goal> {
        let now = Utc::now();
        let conn = self.lock()?;

        let existing = match payload.id.as_deref() {
            Some(id) => Some(
                query_goal(&conn, user_id, id)?
                    .ok_or_else(|| AppError::NotFound(format!("Goal {} not found", id)))?,
            ),
            None => None,
        };

        let goal = Goal {
            id: existing
                .as_ref()
                .map(|goal| goal.id.clone())
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            user_id: user_id.to_string(),
            title: payload.title,
            description: payload.description,
            goal_type: payload.goal_type,
            priority: payload.priority,
            status: payload
                .status
                .or_else(|| existing.as_ref().map(|goal| goal.status))
                .unwrap_or(GoalStatus::Active),
            stakeholders: payload.stakeholders,
            created_at: existing.as_ref().map(|goal| goal.created_at).unwrap_or(now),
            updated_at: now,
        };

        conn.execute(
            "INSERT INTO goals (id, user_id, title, description, goal_type, priority, status, stakeholders_json, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(id) DO UPDATE SET
               title = excluded.title,
               description = excluded.description,
               goal_type = excluded.goal_type,
               priority = excluded.priority,
               status = excluded.status,
               stakeholders_json = excluded.stakeholders_json,
               updated_at = excluded.updated_at",
            params![
                goal.id,
                goal.user_id,
                goal.title,
                goal.description,
                goal.goal_type.as_str(),
                goal.priority,
                goal.status.as_str(),
                serde_json::to_string(&goal.stakeholders)?,
                goal.created_at.to_rfc3339(),
                goal.updated_at.to_rfc3339(),
            ],
        )?;

        Ok(goal)
    }

    pub fn get_goal(&self, user_id: &str, goal_id: &str) -> AppResult<Option<Goal>> {
        let conn = self.lock()?;
        query_goal(&conn, user_id, goal_id)
    }

    /// Active goals, highest priority first, then most recently updated.
    pub fn list_active_goals(&self, user_id: &str) -> AppResult<Vec<Goal>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM goals WHERE user_id = ?1 AND status = ?2
             ORDER BY priority ASC, updated_at DESC, rowid DESC",
            GOAL_COLUMNS
        ))?;
        let rows = stmt.query_map(params![user_id, GoalStatus::Active.as_str()], parse_goal_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn archive_goal(&self, user_id: &str, goal_id: &str) -> AppResult<bool> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE goals SET status = ?1, updated_at = ?2 WHERE id = ?3 AND user_id = ?4",
            params![GoalStatus::Archived.as_str(), Utc::now().to_rfc3339(), goal_id, user_id],
        )?;
        Ok(changed > 0)
    }

    pub fn insert_standup_session(
        &self,
        user_id: &str,
        session_date: NaiveDate,
        answers: StandupAnswers,
    ) -> AppResult<StandupSession> {
        let session = StandupSession {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            session_date,
            answers,
            feedback: None,
            guiding_questions: Vec::new(),
            created_at: Utc::now(),
        };

        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO standup_sessions (id, user_id, session_date, answers_json, feedback, guiding_questions_json, created_at)
             VALUES (?1, ?2, ?3, ?4, NULL, '[]', ?5)",
            params![
                session.id,
                session.user_id,
                session.session_date.to_string(),
                serde_json::to_string(&session.answers)?,
                session.created_at.to_rfc3339(),
            ],
        )?;

        Ok(session)
    }

    pub fn get_standup_session(&self, user_id: &str, session_id: &str) -> AppResult<Option<StandupSession>> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("SELECT {} FROM standup_sessions WHERE id = ?1 AND user_id = ?2", SESSION_COLUMNS),
            params![session_id, user_id],
            parse_session_row,
        )
        .optional()
        .map_err(AppError::from)
    }

    /// Persists a session's generated items, and optionally its feedback, in one
    /// transaction. Nothing is written if the session is not the caller's, any goal
    /// link points at a foreign goal, or the feedback update fails.
    pub fn insert_checklist_items(
        &self,
        user_id: &str,
        session_id: &str,
        items: &[ChecklistItem],
        mode: GenerationMode,
        feedback: Option<&SessionFeedback>,
    ) -> AppResult<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let owner: Option<String> = tx
            .query_row("SELECT user_id FROM standup_sessions WHERE id = ?1", [session_id], |row| row.get(0))
            .optional()?;
        if owner.as_deref() != Some(user_id) {
            return Err(AppError::NotFound(format!("Standup session {} not found", session_id)));
        }

        if mode == GenerationMode::Replace {
            tx.execute(
                "DELETE FROM check_ins WHERE checklist_item_id IN
                   (SELECT id FROM checklist_items WHERE session_id = ?1 AND user_id = ?2)",
                params![session_id, user_id],
            )?;
            tx.execute(
                "DELETE FROM checklist_items WHERE session_id = ?1 AND user_id = ?2",
                params![session_id, user_id],
            )?;
        }

        for item in items {
            if item.user_id != user_id || item.session_id != session_id {
                return Err(AppError::InvalidArgument(format!(
                    "Checklist item {} does not belong to session {}",
                    item.id, session_id
                )));
            }
            if let Some(goal_id) = item.goal_id.as_deref() {
                let owned: i64 = tx.query_row(
                    "SELECT COUNT(1) FROM goals WHERE id = ?1 AND user_id = ?2",
                    params![goal_id, user_id],
                    |row| row.get(0),
                )?;
                if owned == 0 {
                    return Err(AppError::InvalidArgument(format!(
                        "Goal {} is not owned by user {}",
                        goal_id, user_id
                    )));
                }
            }
            insert_checklist_item(&tx, item)?;
        }

        if let Some(feedback) = feedback {
            let changed = tx.execute(
                "UPDATE standup_sessions SET feedback = ?1, guiding_questions_json = ?2 WHERE id = ?3 AND user_id = ?4",
                params![
                    feedback.feedback,
                    serde_json::to_string(&feedback.guiding_questions)?,
                    session_id,
                    user_id
                ],
            )?;
            if changed == 0 {
                return Err(AppError::NotFound(format!("Standup session {} not found", session_id)));
            }
        }

        tx.commit()?;
        Ok(())
    }

    pub fn get_checklist_item(&self, user_id: &str, item_id: &str) -> AppResult<Option<ChecklistItem>> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("SELECT {} FROM checklist_items WHERE id = ?1 AND user_id = ?2", CHECKLIST_COLUMNS),
            params![item_id, user_id],
            parse_checklist_row,
        )
        .optional()
        .map_err(AppError::from)
    }

    pub fn list_session_items(&self, user_id: &str, session_id: &str) -> AppResult<Vec<ChecklistItem>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM checklist_items WHERE session_id = ?1 AND user_id = ?2 ORDER BY created_at ASC, rowid ASC",
            CHECKLIST_COLUMNS
        ))?;
        let rows = stmt.query_map(params![session_id, user_id], parse_checklist_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Items from every standup session the user held on `date`.
    pub fn list_items_for_date(&self, user_id: &str, date: NaiveDate) -> AppResult<Vec<ChecklistItem>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM checklist_items
             WHERE user_id = ?1
               AND session_id IN (SELECT id FROM standup_sessions WHERE user_id = ?1 AND session_date = ?2)
             ORDER BY created_at ASC, rowid ASC",
            CHECKLIST_COLUMNS
        ))?;
        let rows = stmt.query_map(params![user_id, date.to_string()], parse_checklist_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn update_checklist_item(&self, item: &ChecklistItem) -> AppResult<()> {
        let conn = self.lock()?;
        write_checklist_item(&conn, item)
    }

    /// Appends the check-in and stores the item's new state together.
    pub fn record_check_in(&self, item: &ChecklistItem, check_in: &CheckIn) -> AppResult<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute(
            &format!("INSERT INTO check_ins ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)", CHECK_IN_COLUMNS),
            params![
                check_in.id,
                check_in.checklist_item_id,
                check_in.status.as_str(),
                check_in.notes,
                check_in.blockers,
                check_in.time_spent_minutes,
                check_in.progress_percentage,
                check_in.created_at.to_rfc3339(),
            ],
        )?;
        write_checklist_item(&tx, item)?;
        tx.commit()?;
        Ok(())
    }

    pub fn list_check_ins(&self, user_id: &str, item_id: &str) -> AppResult<Vec<CheckIn>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM check_ins
             WHERE checklist_item_id = ?1
               AND EXISTS (SELECT 1 FROM checklist_items WHERE id = ?1 AND user_id = ?2)
             ORDER BY created_at ASC, rowid ASC",
            CHECK_IN_COLUMNS
        ))?;
        let rows = stmt.query_map(params![item_id, user_id], parse_check_in_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn get_daily_metric(&self, user_id: &str, date: NaiveDate) -> AppResult<Option<DailyMetric>> {
        let conn = self.lock()?;
        query_daily_metric(&conn, user_id, date)
    }

    /// Read-merge-write of the (user, date) row inside one transaction.
    pub fn upsert_daily_metric(
        &self,
        user_id: &str,
        date: NaiveDate,
        update: &DailyMetricUpdate,
    ) -> AppResult<DailyMetric> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let existing = query_daily_metric(&tx, user_id, date)?.unwrap_or_else(|| DailyMetric::empty(date));
        let merged = merge_daily_metric(existing, update);
        validate_task_counts(merged.tasks_planned, merged.tasks_completed)?;

        tx.execute(
            "INSERT INTO daily_metrics (
               user_id, metric_date, focus_score, completion_rate, proactiveness_score, alignment_score,
               tasks_planned, tasks_completed, blockers_encountered, blockers_resolved, distractions_count,
               focus_time_minutes, total_work_minutes, updated_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
             ON CONFLICT(user_id, metric_date) DO UPDATE SET
               focus_score = excluded.focus_score,
               completion_rate = excluded.completion_rate,
               proactiveness_score = excluded.proactiveness_score,
               alignment_score = excluded.alignment_score,
               tasks_planned = excluded.tasks_planned,
               tasks_completed = excluded.tasks_completed,
               blockers_encountered = excluded.blockers_encountered,
               blockers_resolved = excluded.blockers_resolved,
               distractions_count = excluded.distractions_count,
               focus_time_minutes = excluded.focus_time_minutes,
               total_work_minutes = excluded.total_work_minutes,
               updated_at = excluded.updated_at",
            params![
                user_id,
                date.to_string(),
                merged.focus_score,
                merged.completion_rate,
                merged.proactiveness_score,
                merged.alignment_score,
                merged.tasks_planned,
                merged.tasks_completed,
                merged.blockers_encountered,
                merged.blockers_resolved,
                merged.distractions_count,
                merged.focus_time_minutes,
                merged.total_work_minutes,
                Utc::now().to_rfc3339(),
            ],
        )?;
        tx.commit()?;

        Ok(merged)
    }

    pub fn list_daily_metrics(&self, user_id: &str, start: NaiveDate, end: NaiveDate) -> AppResult<Vec<DailyMetric>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM daily_metrics WHERE user_id = ?1 AND metric_date BETWEEN ?2 AND ?3 ORDER BY metric_date ASC",
            METRIC_COLUMNS
        ))?;
        let rows = stmt.query_map(params![user_id, start.to_string(), end.to_string()], parse_metric_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn insert_task(&self, task: &TaskRecord) -> AppResult<()> {
        let conn = self.lock()?;
        conn.execute(
            &format!(
                "INSERT INTO tasks ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                TASK_COLUMNS
            ),
            params![
                task.id,
                task.user_id,
                task.title,
                task.description,
                task.priority.as_str(),
                task.estimated_minutes,
                task.actual_minutes,
                task.status.as_str(),
                task.due_date.map(|date| date.to_string()),
                task.completed_at.map(|at| at.to_rfc3339()),
                task.created_at.to_rfc3339(),
                task.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn get_task(&self, user_id: &str, task_id: &str) -> AppResult<Option<TaskRecord>> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("SELECT {} FROM tasks WHERE id = ?1 AND user_id = ?2", TASK_COLUMNS),
            params![task_id, user_id],
            parse_task_row,
        )
        .optional()
        .map_err(AppError::from)
    }

    pub fn update_task(&self, task: &TaskRecord) -> AppResult<()> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE tasks SET title = ?1, description = ?2, priority = ?3, estimated_minutes = ?4,
               actual_minutes = ?5, status = ?6, due_date = ?7, completed_at = ?8, updated_at = ?9
             WHERE id = ?10 AND user_id = ?11",
            params![
                task.title,
                task.description,
                task.priority.as_str(),
                task.estimated_minutes,
                task.actual_minutes,
                task.status.as_str(),
                task.due_date.map(|date| date.to_string()),
                task.completed_at.map(|at| at.to_rfc3339()),
                task.updated_at.to_rfc3339(),
                task.id,
                task.user_id,
            ],
        )?;
        if changed == 0 {
            return Err(AppError::NotFound(format!("Task {} not found", task.id)));
        }
        Ok(())
    }

    /// Tasks whose creation date (UTC) falls within `start..=end`.
    pub fn list_tasks_created_between(
        &self,
        user_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> AppResult<Vec<TaskRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM tasks
             WHERE user_id = ?1 AND substr(created_at, 1, 10) BETWEEN ?2 AND ?3
             ORDER BY created_at ASC, rowid ASC",
            TASK_COLUMNS
        ))?;
        let rows = stmt.query_map(params![user_id, start.to_string(), end.to_string()], parse_task_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn insert_focus_session(&self, session: &FocusSession) -> AppResult<()> {
        let conn = self.lock()?;
        conn.execute(
            &format!("INSERT INTO focus_sessions ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)", FOCUS_COLUMNS),
            params![
                session.id,
                session.user_id,
                session.start_time.to_rfc3339(),
                session.end_time.map(|at| at.to_rfc3339()),
                session.duration_minutes,
                session.session_type.as_str(),
                session.interruptions_count,
                session.notes,
            ],
        )?;
        Ok(())
    }

    pub fn get_focus_session(&self, user_id: &str, session_id: &str) -> AppResult<Option<FocusSession>> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("SELECT {} FROM focus_sessions WHERE id = ?1 AND user_id = ?2", FOCUS_COLUMNS),
            params![session_id, user_id],
            parse_focus_row,
        )
        .optional()
        .map_err(AppError::from)
    }

    pub fn update_focus_session(&self, session: &FocusSession) -> AppResult<()> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE focus_sessions SET end_time = ?1, duration_minutes = ?2, interruptions_count = ?3, notes = ?4
             WHERE id = ?5 AND user_id = ?6",
            params![
                session.end_time.map(|at| at.to_rfc3339()),
                session.duration_minutes,
                session.interruptions_count,
                session.notes,
                session.id,
                session.user_id,
            ],
        )?;
        if changed == 0 {
            return Err(AppError::NotFound(format!("Focus session {} not found", session.id)));
        }
        Ok(())
    }

    pub fn list_focus_sessions_between(
        &self,
        user_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> AppResult<Vec<FocusSession>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM focus_sessions
             WHERE user_id = ?1 AND substr(start_time, 1, 10) BETWEEN ?2 AND ?3
             ORDER BY start_time ASC",
            FOCUS_COLUMNS
        ))?;
        let rows = stmt.query_map(params![user_id, start.to_string(), end.to_string()], parse_focus_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn ensure_default_settings(&self) -> AppResult<()> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(1) FROM settings WHERE key = ?1",
            [SETTINGS_KEY],
            |row| row.get(0),
        )?;
        if count == 0 {
            conn.execute(
                "INSERT INTO settings (key, value_json, updated_at) VALUES (?1, ?2, ?3)",
                params![
                    SETTINGS_KEY,
                    serde_json::to_string(&EngineSettings::default())?,
                    Utc::now().to_rfc3339()
                ],
            )?;
        }
        Ok(())
    }
}

fn query_goal(conn: &Connection, user_id: &str, goal_id: &str) -> AppResult<Option<Goal>> {
    conn.query_row(
        &format!("SELECT {} FROM goals WHERE id = ?1 AND user_id = ?2", GOAL_COLUMNS),
        params![goal_id, user_id],
        parse_goal_row,
    )
    .optional()
    .map_err(AppError::from)
}

fn query_daily_metric(conn: &Connection, user_id: &str, date: NaiveDate) -> AppResult<Option<DailyMetric>> {
    conn.query_row(
        &format!("SELECT {} FROM daily_metrics WHERE user_id = ?1 AND metric_date = ?2", METRIC_COLUMNS),
        params![user_id, date.to_string()],
        parse_metric_row,
    )
    .optional()
    .map_err(AppError::from)
}

fn insert_checklist_item(conn: &Connection, item: &ChecklistItem) -> AppResult<()> {
    conn.execute(
        &format!(
            "INSERT INTO checklist_items ({})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)",
            CHECKLIST_COLUMNS
        ),
        params![
            item.id,
            item.user_id,
            item.session_id,
            item.title,
            item.description,
            item.estimated_minutes,
            item.actual_minutes,
            item.priority,
            item.status.as_str(),
            item.strikes,
            item.max_strikes,
            item.clarity_score,
            item.goal_id,
            item.assigned_by,
            item.assigned_to,
            item.due_date.map(|date| date.to_string()),
            item.completed_at.map(|at| at.to_rfc3339()),
            item.created_at.to_rfc3339(),
            item.updated_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

fn write_checklist_item(conn: &Connection, item: &ChecklistItem) -> AppResult<()> {
    let changed = conn.execute(
        "UPDATE checklist_items SET
           actual_minutes = ?1, status = ?2, strikes = ?3, clarity_score = ?4,
           assigned_by = ?5, assigned_to = ?6, due_date = ?7, completed_at = ?8, updated_at = ?9
         WHERE id = ?10 AND user_id = ?11",
        params![
            item.actual_minutes,
            item.status.as_str(),
            item.strikes,
            item.clarity_score,
            item.assigned_by,
            item.assigned_to,
            item.due_date.map(|date| date.to_string()),
            item.completed_at.map(|at| at.to_rfc3339()),
            item.updated_at.to_rfc3339(),
            item.id,
            item.user_id,
        ],
    )?;
    if changed == 0 {
        return Err(AppError::NotFound(format!("Checklist item {} not found", item.id)));
    }
    Ok(())
}

fn parse_goal_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Goal> {
    let stakeholders_json: String = row.get(7)?;
    Ok(Goal {
        id: row.get(0)?,
        user_id: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        goal_type: parse_enum(&row.get::<_, String>(4)?)?,
        priority: row.get(5)?,
        status: parse_enum(&row.get::<_, String>(6)?)?,
        stakeholders: serde_json::from_str(&stakeholders_json).map_err(|error| conversion_error(error.to_string()))?,
        created_at: parse_time(&row.get::<_, String>(8)?)?,
        updated_at: parse_time(&row.get::<_, String>(9)?)?,
    })
}

fn parse_session_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<StandupSession> {
    let answers_json: String = row.get(3)?;
    let questions_json: String = row.get(5)?;
    Ok(StandupSession {
        id: row.get(0)?,
        user_id: row.get(1)?,
        session_date: parse_date(&row.get::<_, String>(2)?)?,
        answers: serde_json::from_str(&answers_json).map_err(|error| conversion_error(error.to_string()))?,
        feedback: row.get(4)?,
        guiding_questions: serde_json::from_str(&questions_json)
            .map_err(|error| conversion_error(error.to_string()))?,
        created_at: parse_time(&row.get::<_, String>(6)?)?,
    })
}

fn parse_checklist_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChecklistItem> {
    Ok(ChecklistItem {
        id: row.get(0)?,
        user_id: row.get(1)?,
        session_id: row.get(2)?,
        title: row.get(3)?,
        description: row.get(4)?,
        estimated_minutes: row.get(5)?,
        actual_minutes: row.get(6)?,
        priority: row.get(7)?,
        status: parse_enum(&row.get::<_, String>(8)?)?,
        strikes: row.get(9)?,
        max_strikes: row.get(10)?,
        clarity_score: row.get(11)?,
        goal_id: row.get(12)?,
        assigned_by: row.get(13)?,
        assigned_to: row.get(14)?,
        due_date: parse_optional_date(row.get(15)?)?,
        completed_at: parse_optional_time(row.get(16)?)?,
        created_at: parse_time(&row.get::<_, String>(17)?)?,
        updated_at: parse_time(&row.get::<_, String>(18)?)?,
    })
}

fn parse_check_in_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<CheckIn> {
    Ok(CheckIn {
        id: row.get(0)?,
        checklist_item_id: row.get(1)?,
        status: parse_enum(&row.get::<_, String>(2)?)?,
        notes: row.get(3)?,
        blockers: row.get(4)?,
        time_spent_minutes: row.get(5)?,
        progress_percentage: row.get(6)?,
        created_at: parse_time(&row.get::<_, String>(7)?)?,
    })
}

fn parse_metric_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DailyMetric> {
    Ok(DailyMetric {
        date: parse_date(&row.get::<_, String>(0)?)?,
        focus_score: row.get(1)?,
        completion_rate: row.get(2)?,
        proactiveness_score: row.get(3)?,
        alignment_score: row.get(4)?,
        tasks_planned: row.get(5)?,
        tasks_completed: row.get(6)?,
        blockers_encountered: row.get(7)?,
        blockers_resolved: row.get(8)?,
        distractions_count: row.get(9)?,
        focus_time_minutes: row.get(10)?,
        total_work_minutes: row.get(11)?,
    })
}

fn parse_task_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<TaskRecord> {
    Ok(TaskRecord {
        id: row.get(0)?,
        user_id: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        priority: parse_enum(&row.get::<_, String>(4)?)?,
        estimated_minutes: row.get(5)?,
        actual_minutes: row.get(6)?,
        status: parse_enum(&row.get::<_, String>(7)?)?,
        due_date: parse_optional_date(row.get(8)?)?,
        completed_at: parse_optional_time(row.get(9)?)?,
        created_at: parse_time(&row.get::<_, String>(10)?)?,
        updated_at: parse_time(&row.get::<_, String>(11)?)?,
    })
}

fn parse_focus_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<FocusSession> {
    Ok(FocusSession {
        id: row.get(0)?,
        user_id: row.get(1)?,
        start_time: parse_time(&row.get::<_, String>(2)?)?,
        end_time: parse_optional_time(row.get(3)?)?,
        duration_minutes: row.get(4)?,
        session_type: parse_enum(&row.get::<_, String>(5)?)?,
        interruptions_count: row.get(6)?,
        notes: row.get(7)?,
    })
}

fn parse_enum<T: FromStr<Err = AppError>>(raw: &str) -> rusqlite::Result<T> {
    raw.parse::<T>().map_err(|error| conversion_error(error.to_string()))
}

fn parse_time(raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|error| conversion_error(error.to_string()))
}

fn parse_optional_time(raw: Option<String>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    raw.as_deref().map(parse_time).transpose()
}

fn parse_date(raw: &str) -> rusqlite::Result<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|error| conversion_error(error.to_string()))
}

fn parse_optional_date(raw: Option<String>) -> rusqlite::Result<Option<NaiveDate>> {
    raw.as_deref().map(parse_date).transpose()
}

fn conversion_error(message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        0,
        rusqlite::types::Type::Text,
        Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, message)),
    )
}

fn merge_json(target: &mut serde_json::Value, update: serde_json::Value) {
    match (target, update) {
        (serde_json::Value::Object(target_map), serde_json::Value::Object(update_map)) => {
            for (key, value) in update_map {
                merge_json(target_map.entry(key).or_insert(serde_json::Value::Null), value);
            }
        }
        (target, update) => {
            *target = update;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Database;
    use crate::errors::AppError;
    use crate::models::{
        ChecklistItem, ChecklistStatus, DailyMetricUpdate, EngineSettings, GenerationMode, GoalStatus, GoalType,
        SaveGoalPayload, SessionFeedback, StandupAnswers,
    };
    use chrono::{NaiveDate, Utc};
    use std::collections::BTreeSet;

    fn open() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Database::new(&dir.path().join("test.db")).expect("db");
        (dir, db)
    }

    fn goal_payload(title: &str, priority: u8) -> SaveGoalPayload {
        SaveGoalPayload {
            id: None,
            title: title.to_string(),
            description: None,
            goal_type: GoalType::Goal,
            priority,
            status: None,
            stakeholders: BTreeSet::new(),
        }
    }

    fn item(user_id: &str, session_id: &str, title: &str, goal_id: Option<String>) -> ChecklistItem {
        let now = Utc::now();
        ChecklistItem {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            session_id: session_id.to_string(),
            title: title.to_string(),
            description: None,
            estimated_minutes: 30,
            actual_minutes: None,
            priority: 2,
            status: ChecklistStatus::Pending,
            strikes: 0,
            max_strikes: 3,
            clarity_score: 10,
            goal_id,
            assigned_by: None,
            assigned_to: None,
            due_date: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 20).expect("date")
    }

    #[test]
    fn settings_are_seeded_and_merged() {
        let (_dir, db) = open();
        assert_eq!(db.get_settings().expect("settings"), EngineSettings::default());

        let updated = db
            .update_settings(serde_json::json!({"defaultMaxStrikes": 5}))
            .expect("update");
        assert_eq!(updated.default_max_strikes, 5);
        assert_eq!(db.get_settings().expect("settings").default_max_strikes, 5);

        let rejected = db.update_settings(serde_json::json!({"defaultMaxStrikes": 0}));
        assert!(matches!(rejected, Err(AppError::InvalidArgument(_))));
    }

    #[test]
    fn corrupt_settings_row_surfaces_an_error() {
        let (_dir, db) = open();
        db.lock()
            .expect("lock")
            .execute("UPDATE settings SET value_json = '{not json' WHERE key = 'engine'", [])
            .expect("corrupt");
        assert!(matches!(db.get_settings(), Err(AppError::Internal(_))));
    }

    #[test]
    fn active_goals_are_ordered_and_archive_hides_them() {
        let (_dir, db) = open();
        let low = db.save_goal("user-1", goal_payload("Low", 4)).expect("low");
        let high = db.save_goal("user-1", goal_payload("High", 1)).expect("high");
        db.save_goal("user-2", goal_payload("Foreign", 1)).expect("foreign");

        let goals = db.list_active_goals("user-1").expect("goals");
        assert_eq!(goals.iter().map(|g| g.id.as_str()).collect::<Vec<_>>(), vec![high.id.as_str(), low.id.as_str()]);

        assert!(db.archive_goal("user-1", &low.id).expect("archive"));
        assert!(!db.archive_goal("user-2", &high.id).expect("foreign archive"));
        let archived = db.get_goal("user-1", &low.id).expect("get").expect("exists");
        assert_eq!(archived.status, GoalStatus::Archived);
        assert_eq!(db.list_active_goals("user-1").expect("goals").len(), 1);
    }

    #[test]
    fn updating_a_foreign_goal_is_not_found() {
        let (_dir, db) = open();
        let goal = db.save_goal("user-1", goal_payload("Mine", 2)).expect("goal");
        let mut payload = goal_payload("Stolen", 2);
        payload.id = Some(goal.id.clone());
        assert!(matches!(db.save_goal("user-2", payload), Err(AppError::NotFound(_))));
    }

    #[test]
    fn checklist_insert_is_all_or_nothing() {
        let (_dir, db) = open();
        let session = db
            .insert_standup_session("user-1", date(), StandupAnswers::default())
            .expect("session");
        let foreign_goal = db.save_goal("user-2", goal_payload("Foreign", 1)).expect("goal");

        let items = vec![
            item("user-1", &session.id, "ok", None),
            item("user-1", &session.id, "bad link", Some(foreign_goal.id.clone())),
        ];
        let result = db.insert_checklist_items("user-1", &session.id, &items, GenerationMode::Append, None);
        assert!(matches!(result, Err(AppError::InvalidArgument(_))));
        assert!(db.list_session_items("user-1", &session.id).expect("items").is_empty());
    }

    #[test]
    fn feedback_is_stored_with_the_items() {
        let (_dir, db) = open();
        let session = db
            .insert_standup_session("user-1", date(), StandupAnswers::default())
            .expect("session");
        let feedback = SessionFeedback {
            feedback: Some("Good focus".to_string()),
            guiding_questions: vec!["What blocks the release?".to_string()],
        };
        let items = vec![item("user-1", &session.id, "one", None)];
        db.insert_checklist_items("user-1", &session.id, &items, GenerationMode::Append, Some(&feedback))
            .expect("insert");

        let stored = db.get_standup_session("user-1", &session.id).expect("get").expect("exists");
        assert_eq!(stored.feedback.as_deref(), Some("Good focus"));
        assert_eq!(stored.guiding_questions, feedback.guiding_questions);
        assert_eq!(db.list_session_items("user-1", &session.id).expect("items").len(), 1);
    }

    #[test]
    fn failed_feedback_write_rolls_back_items() {
        let (_dir, db) = open();
        let session = db
            .insert_standup_session("user-1", date(), StandupAnswers::default())
            .expect("session");
        db.lock()
            .expect("lock")
            .execute_batch(
                "CREATE TRIGGER reject_feedback BEFORE UPDATE OF feedback ON standup_sessions
                 BEGIN SELECT RAISE(ABORT, 'feedback rejected'); END;",
            )
            .expect("trigger");

        let feedback = SessionFeedback {
            feedback: Some("Keep going".to_string()),
            guiding_questions: Vec::new(),
        };
        let items = vec![item("user-1", &session.id, "one", None), item("user-1", &session.id, "two", None)];
        let result = db.insert_checklist_items("user-1", &session.id, &items, GenerationMode::Append, Some(&feedback));
        assert!(matches!(result, Err(AppError::UpstreamUnavailable(_))));
        assert!(db.list_session_items("user-1", &session.id).expect("items").is_empty());
        let stored = db.get_standup_session("user-1", &session.id).expect("get").expect("exists");
        assert_eq!(stored.feedback, None);
    }

    #[test]
    fn replace_mode_drops_previous_items() {
        let (_dir, db) = open();
        let session = db
            .insert_standup_session("user-1", date(), StandupAnswers::default())
            .expect("session");

        let first = vec![item("user-1", &session.id, "one", None)];
        db.insert_checklist_items("user-1", &session.id, &first, GenerationMode::Append, None)
            .expect("first");
        let second = vec![item("user-1", &session.id, "two", None), item("user-1", &session.id, "three", None)];
        db.insert_checklist_items("user-1", &session.id, &second, GenerationMode::Append, None)
            .expect("append");
        assert_eq!(db.list_session_items("user-1", &session.id).expect("items").len(), 3);

        let third = vec![item("user-1", &session.id, "four", None)];
        db.insert_checklist_items("user-1", &session.id, &third, GenerationMode::Replace, None)
            .expect("replace");
        let titles: Vec<String> = db
            .list_session_items("user-1", &session.id)
            .expect("items")
            .into_iter()
            .map(|item| item.title)
            .collect();
        assert_eq!(titles, vec!["four".to_string()]);
        assert_eq!(db.list_items_for_date("user-1", date()).expect("by date").len(), 1);
    }

    #[test]
    fn foreign_session_rejects_items() {
        let (_dir, db) = open();
        let session = db
            .insert_standup_session("user-1", date(), StandupAnswers::default())
            .expect("session");
        let items = vec![item("user-2", &session.id, "sneaky", None)];
        let result = db.insert_checklist_items("user-2", &session.id, &items, GenerationMode::Append, None);
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[test]
    fn daily_metric_upsert_merges_instead_of_duplicating() {
        let (_dir, db) = open();
        db.upsert_daily_metric(
            "user-1",
            date(),
            &DailyMetricUpdate {
                focus_score: Some(87.0),
                ..DailyMetricUpdate::default()
            },
        )
        .expect("first");
        let merged = db
            .upsert_daily_metric(
                "user-1",
                date(),
                &DailyMetricUpdate {
                    completion_rate: Some(50.0),
                    ..DailyMetricUpdate::default()
                },
            )
            .expect("second");
        assert_eq!(merged.focus_score, 87.0);
        assert_eq!(merged.completion_rate, 50.0);

        let rows = db.list_daily_metrics("user-1", date(), date()).expect("rows");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0], merged);
        assert!(db.get_daily_metric("user-2", date()).expect("other").is_none());
    }

    #[test]
    fn task_counts_are_checked_on_the_merged_row() {
        let (_dir, db) = open();
        db.upsert_daily_metric(
            "user-1",
            date(),
            &DailyMetricUpdate {
                tasks_planned: Some(2),
                ..DailyMetricUpdate::default()
            },
        )
        .expect("planned");

        let rejected = db.upsert_daily_metric(
            "user-1",
            date(),
            &DailyMetricUpdate {
                tasks_completed: Some(3),
                ..DailyMetricUpdate::default()
            },
        );
        assert!(matches!(rejected, Err(AppError::InvalidArgument(_))));

        let stored = db.get_daily_metric("user-1", date()).expect("get").expect("exists");
        assert_eq!(stored.tasks_planned, 2);
        assert_eq!(stored.tasks_completed, 0);
    }
}
