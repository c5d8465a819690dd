use crate::errors::{AppError, AppResult};
use crate::models::{DailyMetricUpdate, EngineSettings, SaveGoalPayload};

pub const MIN_PRIORITY: u8 = 1;
pub const MAX_PRIORITY: u8 = 5;
pub const MIN_CLARITY_SCORE: u8 = 1;
pub const MAX_CLARITY_SCORE: u8 = 10;
pub const MAX_PROGRESS_PERCENTAGE: i64 = 100;
pub const MAX_SCORE: f64 = 100.0;
const MAX_TITLE_LENGTH: usize = 500;

pub fn validate_priority(priority: u8) -> AppResult<u8> {
    if !(MIN_PRIORITY..=MAX_PRIORITY).contains(&priority) {
        return Err(AppError::InvalidArgument(format!(
            "Priority {} is out of allowed range ({}..={})",
            priority, MIN_PRIORITY, MAX_PRIORITY
        )));
    }
    Ok(priority)
}

/// Generated text is not trusted to stay in range, so its priorities are pulled back in.
pub fn clamp_priority(priority: i64) -> u8 {
    priority.clamp(i64::from(MIN_PRIORITY), i64::from(MAX_PRIORITY)) as u8
}

pub fn validate_clarity_score(score: i64) -> AppResult<u8> {
    if !(i64::from(MIN_CLARITY_SCORE)..=i64::from(MAX_CLARITY_SCORE)).contains(&score) {
        return Err(AppError::InvalidArgument(format!(
            "Clarity score {} is out of allowed range ({}..={})",
            score, MIN_CLARITY_SCORE, MAX_CLARITY_SCORE
        )));
    }
    Ok(score as u8)
}

pub fn validate_progress(progress: i64) -> AppResult<u8> {
    if !(0..=MAX_PROGRESS_PERCENTAGE).contains(&progress) {
        return Err(AppError::InvalidArgument(format!(
            "Progress {} is out of allowed range (0..={})",
            progress, MAX_PROGRESS_PERCENTAGE
        )));
    }
    Ok(progress as u8)
}

pub fn validate_score(field: &str, score: f64) -> AppResult<f64> {
    if !score.is_finite() || !(0.0..=MAX_SCORE).contains(&score) {
        return Err(AppError::InvalidArgument(format!(
            "{} {} is out of allowed range (0..={})",
            field, score, MAX_SCORE
        )));
    }
    Ok(score)
}

pub fn validate_title(title: &str) -> AppResult<()> {
    if title.trim().is_empty() {
        return Err(AppError::InvalidArgument("Title cannot be empty".to_string()));
    }
    if title.chars().count() > MAX_TITLE_LENGTH {
        return Err(AppError::InvalidArgument(format!(
            "Title exceeds {} characters",
            MAX_TITLE_LENGTH
        )));
    }
    Ok(())
}

pub fn validate_goal_payload(payload: &SaveGoalPayload) -> AppResult<()> {
    validate_title(&payload.title)?;
    validate_priority(payload.priority)?;
    if payload.stakeholders.iter().any(|person| person.trim().is_empty()) {
        return Err(AppError::InvalidArgument("Stakeholder ids cannot be empty".to_string()));
    }
    Ok(())
}

pub fn validate_metric_update(update: &DailyMetricUpdate) -> AppResult<()> {
    let scores = [
        ("focusScore", update.focus_score),
        ("completionRate", update.completion_rate),
        ("proactivenessScore", update.proactiveness_score),
        ("alignmentScore", update.alignment_score),
    ];
    for (field, value) in scores {
        if let Some(value) = value {
            validate_score(field, value)?;
        }
    }
    Ok(())
}

/// Checked against the merged row, since a patch may carry only one of the two counts.
pub fn validate_task_counts(planned: u32, completed: u32) -> AppResult<()> {
    if completed > planned {
        return Err(AppError::InvalidArgument(format!(
            "tasksCompleted {} exceeds tasksPlanned {}",
            completed, planned
        )));
    }
    Ok(())
}

pub fn validate_settings(settings: &EngineSettings) -> AppResult<()> {
    if settings.default_max_strikes == 0 {
        return Err(AppError::InvalidArgument("defaultMaxStrikes must be at least 1".to_string()));
    }
    validate_clarity_score(i64::from(settings.default_clarity_score))?;
    validate_title(&settings.fallback_item_title)?;
    validate_priority(settings.fallback_item_priority)?;
    if !settings.focus_minutes_per_point.is_finite() || settings.focus_minutes_per_point <= 0.0 {
        return Err(AppError::InvalidArgument(
            "focusMinutesPerPoint must be a positive number".to_string(),
        ));
    }
    Ok(())
}
