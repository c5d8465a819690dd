//! State transitions for a single checklist item.
//!
//! Everything here works on an in-memory [`ChecklistItem`]; loading, ownership
//! checks and persistence live in the engine so a failed write never leaves a
//! half-applied transition behind.

use crate::errors::AppResult;
use crate::models::{
    CheckIn, ChecklistItem, ChecklistStatus, EngineSettings, ProposedItem, RecordCheckInRequest,
};
use crate::policy::{validate_clarity_score, validate_progress};
use chrono::{DateTime, Utc};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StrikeOutcome {
    /// False once the item already sits at its strike cap.
    pub applied: bool,
    /// True only on the strike that reached the cap and forced `at_risk`.
    pub escalated: bool,
}

pub fn new_item(
    user_id: &str,
    session_id: &str,
    proposal: &ProposedItem,
    goal_id: Option<String>,
    settings: &EngineSettings,
    now: DateTime<Utc>,
) -> ChecklistItem {
    ChecklistItem {
        id: Uuid::new_v4().to_string(),
        user_id: user_id.to_string(),
        session_id: session_id.to_string(),
        title: proposal.title.clone(),
        description: proposal.description.clone(),
        estimated_minutes: proposal.estimated_minutes,
        actual_minutes: None,
        priority: proposal.priority,
        status: ChecklistStatus::Pending,
        strikes: 0,
        max_strikes: settings.default_max_strikes,
        clarity_score: settings.default_clarity_score,
        goal_id,
        assigned_by: None,
        assigned_to: None,
        due_date: None,
        completed_at: None,
        created_at: now,
        updated_at: now,
    }
}

/// Validates the request, assigns its status to the item and returns the check-in to append.
pub fn apply_check_in(
    item: &mut ChecklistItem,
    request: &RecordCheckInRequest,
    now: DateTime<Utc>,
) -> AppResult<CheckIn> {
    let status: ChecklistStatus = request.status.parse()?;
    let progress_percentage = validate_progress(request.progress_percentage)?;

    let check_in = CheckIn {
        id: Uuid::new_v4().to_string(),
        checklist_item_id: item.id.clone(),
        status,
        notes: request.notes.clone(),
        blockers: request.blockers.clone(),
        time_spent_minutes: request.time_spent_minutes,
        progress_percentage,
        created_at: now,
    };

    if let Some(spent) = request.time_spent_minutes {
        item.actual_minutes = Some(item.actual_minutes.unwrap_or(0).saturating_add(spent));
    }
    set_status(item, status, now);

    Ok(check_in)
}

pub fn apply_strike(item: &mut ChecklistItem, now: DateTime<Utc>) -> StrikeOutcome {
    if item.strikes >= item.max_strikes {
        return StrikeOutcome {
            applied: false,
            escalated: false,
        };
    }

    item.strikes += 1;
    item.updated_at = now;

    let escalated = item.strikes == item.max_strikes && !item.status.is_settled();
    if escalated {
        item.status = ChecklistStatus::AtRisk;
    }

    StrikeOutcome {
        applied: true,
        escalated,
    }
}

/// Returns whether the stored score changed.
pub fn set_clarity_score(item: &mut ChecklistItem, score: i64, now: DateTime<Utc>) -> AppResult<bool> {
    let score = validate_clarity_score(score)?;
    if item.clarity_score == score {
        return Ok(false);
    }
    item.clarity_score = score;
    item.updated_at = now;
    Ok(true)
}

fn set_status(item: &mut ChecklistItem, status: ChecklistStatus, now: DateTime<Utc>) {
    if status == ChecklistStatus::Completed && item.completed_at.is_none() {
        item.completed_at = Some(now);
    }
    item.status = status;
    item.updated_at = now;
}
