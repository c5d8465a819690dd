use crate::errors::AppError;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::str::FromStr;

/// User id the identity collaborator hands out for unauthenticated callers.
pub const GUEST_USER_ID: &str = "guest";

pub const WEEKLY_WINDOW_DAYS: usize = 7;
pub const CALENDAR_WINDOW_DAYS: usize = 28;

macro_rules! string_enum {
    ($name:ident { $($variant:ident => $raw:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $raw,)+
                }
            }
        }

        impl FromStr for $name {
            type Err = AppError;

            fn from_str(raw: &str) -> Result<Self, Self::Err> {
                match raw.trim() {
                    $($raw => Ok(Self::$variant),)+
                    other => Err(AppError::InvalidArgument(format!(
                        "unknown {} '{}'",
                        stringify!($name),
                        other
                    ))),
                }
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoalType {
    Goal,
    Routine,
    BusinessObjective,
}

string_enum!(GoalType {
    Goal => "goal",
    Routine => "routine",
    BusinessObjective => "business_objective",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoalStatus {
    Active,
    Completed,
    Paused,
    Archived,
}

string_enum!(GoalStatus {
    Active => "active",
    Completed => "completed",
    Paused => "paused",
    Archived => "archived",
});

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Goal {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub goal_type: GoalType,
    /// 1 is the highest priority, 5 the lowest.
    pub priority: u8,
    pub status: GoalStatus,
    pub stakeholders: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveGoalPayload {
    pub id: Option<String>,
    pub title: String,
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub goal_type: GoalType,
    pub priority: u8,
    pub status: Option<GoalStatus>,
    #[serde(default)]
    pub stakeholders: BTreeSet<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StandupAnswers {
    pub yesterday: String,
    pub today: String,
    pub blockers: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StandupSession {
    pub id: String,
    pub user_id: String,
    pub session_date: NaiveDate,
    pub answers: StandupAnswers,
    pub feedback: Option<String>,
    pub guiding_questions: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Coaching text stored on a session alongside its generated items.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct SessionFeedback {
    pub feedback: Option<String>,
    pub guiding_questions: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChecklistStatus {
    Pending,
    InProgress,
    Completed,
    Blocked,
    AtRisk,
}

string_enum!(ChecklistStatus {
    Pending => "pending",
    InProgress => "in_progress",
    Completed => "completed",
    Blocked => "blocked",
    AtRisk => "at_risk",
});

impl ChecklistStatus {
    /// Completed and blocked items are not escalated by strikes.
    pub fn is_settled(self) -> bool {
        matches!(self, Self::Completed | Self::Blocked)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChecklistItem {
    pub id: String,
    pub user_id: String,
    pub session_id: String,
    pub title: String,
    pub description: Option<String>,
    pub estimated_minutes: u32,
    pub actual_minutes: Option<u32>,
    pub priority: u8,
    pub status: ChecklistStatus,
    pub strikes: u32,
    pub max_strikes: u32,
    pub clarity_score: u8,
    pub goal_id: Option<String>,
    pub assigned_by: Option<String>,
    pub assigned_to: Option<String>,
    pub due_date: Option<NaiveDate>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CheckIn {
    pub id: String,
    pub checklist_item_id: String,
    pub status: ChecklistStatus,
    pub notes: Option<String>,
    pub blockers: Option<String>,
    pub time_spent_minutes: Option<u32>,
    pub progress_percentage: u8,
    pub created_at: DateTime<Utc>,
}

/// Raw check-in input from the presentation layer; `status` is validated on use.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct RecordCheckInRequest {
    pub status: String,
    pub notes: Option<String>,
    pub blockers: Option<String>,
    pub time_spent_minutes: Option<u32>,
    pub progress_percentage: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProposedItem {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub priority: u8,
    pub estimated_minutes: u32,
    #[serde(default, alias = "goalAlignment")]
    pub goal_alignment_labels: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum GenerationMode {
    /// Add items next to whatever the session already holds.
    #[default]
    Append,
    /// Drop the session's existing items (and their check-ins) first.
    Replace,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DailyMetric {
    pub date: NaiveDate,
    pub focus_score: f64,
    pub completion_rate: f64,
    pub proactiveness_score: f64,
    pub alignment_score: f64,
    pub tasks_planned: u32,
    pub tasks_completed: u32,
    pub blockers_encountered: u32,
    pub blockers_resolved: u32,
    pub distractions_count: u32,
    pub focus_time_minutes: u32,
    pub total_work_minutes: u32,
}

impl DailyMetric {
    pub fn empty(date: NaiveDate) -> Self {
        Self {
            date,
            focus_score: 0.0,
            completion_rate: 0.0,
            proactiveness_score: 0.0,
            alignment_score: 0.0,
            tasks_planned: 0,
            tasks_completed: 0,
            blockers_encountered: 0,
            blockers_resolved: 0,
            distractions_count: 0,
            focus_time_minutes: 0,
            total_work_minutes: 0,
        }
    }
}

/// Partial write for a (user, date) metric row. Absent fields keep the stored value.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DailyMetricUpdate {
    pub focus_score: Option<f64>,
    pub completion_rate: Option<f64>,
    pub proactiveness_score: Option<f64>,
    pub alignment_score: Option<f64>,
    pub tasks_planned: Option<u32>,
    pub tasks_completed: Option<u32>,
    pub blockers_encountered: Option<u32>,
    pub blockers_resolved: Option<u32>,
    pub distractions_count: Option<u32>,
    pub focus_time_minutes: Option<u32>,
    pub total_work_minutes: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    Medium,
    High,
}

string_enum!(TaskPriority {
    Low => "low",
    Medium => "medium",
    High => "high",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Cancelled,
}

string_enum!(TaskStatus {
    Pending => "pending",
    InProgress => "in_progress",
    Completed => "completed",
    Cancelled => "cancelled",
});

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TaskRecord {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub description: Option<String>,
    pub priority: TaskPriority,
    pub estimated_minutes: Option<u32>,
    pub actual_minutes: Option<u32>,
    pub status: TaskStatus,
    pub due_date: Option<NaiveDate>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTaskRequest {
    pub title: String,
    pub description: Option<String>,
    pub priority: TaskPriority,
    pub estimated_minutes: Option<u32>,
    pub due_date: Option<NaiveDate>,
    /// Set by collaborators that backfill records after their nominal date.
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTaskRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub priority: Option<TaskPriority>,
    pub estimated_minutes: Option<u32>,
    pub actual_minutes: Option<u32>,
    pub status: Option<TaskStatus>,
    pub due_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FocusSessionType {
    DeepWork,
    Meetings,
    Admin,
    Break,
}

string_enum!(FocusSessionType {
    DeepWork => "deep_work",
    Meetings => "meetings",
    Admin => "admin",
    Break => "break",
});

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FocusSession {
    pub id: String,
    pub user_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_minutes: u32,
    pub session_type: FocusSessionType,
    pub interruptions_count: u32,
    pub notes: Option<String>,
}

impl FocusSession {
    pub fn is_open(&self) -> bool {
        self.end_time.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartFocusSessionRequest {
    pub session_type: FocusSessionType,
    pub notes: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct EndFocusSessionRequest {
    pub end_time: Option<DateTime<Utc>>,
    pub duration_minutes: Option<u32>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WeeklyPoint {
    pub date: NaiveDate,
    pub completion_percentage: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CalendarPoint {
    pub date: NaiveDate,
    pub completion_percentage: f64,
    pub focus_percentage: f64,
    pub proactiveness_percentage: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub as_of: NaiveDate,
    pub current: DailyMetric,
    pub weekly: Vec<WeeklyPoint>,
    pub calendar: Vec<CalendarPoint>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineSettings {
    pub default_max_strikes: u32,
    pub default_clarity_score: u8,
    pub fallback_item_title: String,
    pub fallback_item_priority: u8,
    pub fallback_item_minutes: u32,
    /// Focus minutes that make up one percentage point of derived focus.
    pub focus_minutes_per_point: f64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            default_max_strikes: 3,
            default_clarity_score: 10,
            fallback_item_title: "Review and prioritize today's tasks".to_string(),
            fallback_item_priority: 1,
            fallback_item_minutes: 30,
            focus_minutes_per_point: 2.0,
        }
    }
}

impl EngineSettings {
    pub fn fallback_item(&self) -> ProposedItem {
        ProposedItem {
            title: self.fallback_item_title.clone(),
            description: None,
            priority: self.fallback_item_priority,
            estimated_minutes: self.fallback_item_minutes,
            goal_alignment_labels: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ChecklistStatus, EngineSettings, FocusSessionType};
    use crate::errors::AppError;

    #[test]
    fn parses_known_status_and_rejects_unknown() {
        assert_eq!("at_risk".parse::<ChecklistStatus>().expect("status"), ChecklistStatus::AtRisk);
        assert_eq!(" in_progress ".parse::<ChecklistStatus>().expect("status"), ChecklistStatus::InProgress);
        let err = "done".parse::<ChecklistStatus>().expect_err("unknown status");
        assert!(matches!(err, AppError::InvalidArgument(_)));
    }

    #[test]
    fn session_type_round_trips_through_str() {
        for session_type in [
            FocusSessionType::DeepWork,
            FocusSessionType::Meetings,
            FocusSessionType::Admin,
            FocusSessionType::Break,
        ] {
            assert_eq!(session_type.as_str().parse::<FocusSessionType>().expect("type"), session_type);
        }
    }

    #[test]
    fn settings_fill_missing_fields_from_defaults() {
        let settings: EngineSettings =
            serde_json::from_value(serde_json::json!({"defaultMaxStrikes": 5})).expect("settings");
        assert_eq!(settings.default_max_strikes, 5);
        assert_eq!(settings.fallback_item_minutes, 30);
        assert_eq!(settings.fallback_item().priority, 1);
    }
}
