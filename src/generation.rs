//! Boundary to the text-generation collaborator.
//!
//! Generators are passed per request; raw replies are validated into a
//! [`ProposalOutcome`] before anything reaches the orchestrator.

use crate::models::{EngineSettings, Goal, ProposedItem, StandupSession};
use crate::policy::clamp_priority;
use jsonschema::JSONSchema;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Value};

static CODE_FENCE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)^\s*```[A-Za-z0-9_-]*\s*\n(.*?)\n?\s*```\s*$").expect("valid code fence regex")
});

static REPLY_SCHEMA: Lazy<Value> = Lazy::new(|| {
    json!({
        "type": "object",
        "required": ["items"],
        "properties": {
            "items": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["title"],
                    "properties": {
                        "title": { "type": "string", "minLength": 1 },
                        "description": { "type": ["string", "null"] },
                        "priority": { "type": "integer" },
                        "estimatedMinutes": { "type": "integer", "minimum": 0 },
                        "goalAlignment": { "type": "array", "items": { "type": "string" } }
                    }
                }
            },
            "feedback": { "type": ["string", "null"] },
            "guidingQuestions": { "type": "array", "items": { "type": "string" } }
        }
    })
});

static REPLY_VALIDATOR: Lazy<JSONSchema> =
    Lazy::new(|| JSONSchema::compile(&REPLY_SCHEMA).expect("valid checklist reply schema"));

const DEFAULT_ESTIMATED_MINUTES: u32 = 30;
const DEFAULT_PRIORITY: i64 = 3;

#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub user_id: String,
    pub session_id: String,
    pub prompt: String,
}

/// A text-generation client scoped to one request (and one user's credentials).
pub trait ChecklistGenerator {
    fn generate(&self, request: &GenerationRequest) -> anyhow::Result<String>;
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct GeneratedChecklist {
    pub items: Vec<ProposedItem>,
    pub feedback: Option<String>,
    pub guiding_questions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProposalOutcome {
    ProposedItems(GeneratedChecklist),
    ParseFailure(String),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawReply {
    items: Vec<RawItem>,
    #[serde(default)]
    feedback: Option<String>,
    #[serde(default)]
    guiding_questions: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawItem {
    title: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    priority: Option<i64>,
    #[serde(default)]
    estimated_minutes: Option<u64>,
    #[serde(default)]
    goal_alignment: Vec<String>,
}

pub fn build_prompt(session: &StandupSession, goals: &[Goal]) -> String {
    let mut prompt = format!(
        "Daily standup for {}.\nYesterday: {}\nToday: {}\n",
        session.session_date, session.answers.yesterday, session.answers.today
    );
    if let Some(blockers) = session.answers.blockers.as_deref().filter(|b| !b.trim().is_empty()) {
        prompt.push_str(&format!("Blockers: {}\n", blockers));
    }
    if let Some(notes) = session.answers.notes.as_deref().filter(|n| !n.trim().is_empty()) {
        prompt.push_str(&format!("Notes: {}\n", notes));
    }
    if !goals.is_empty() {
        prompt.push_str("Active goals:\n");
        for goal in goals {
            prompt.push_str(&format!("- [P{}] {}", goal.priority, goal.title));
            if let Some(description) = goal.description.as_deref() {
                prompt.push_str(&format!(": {}", description));
            }
            prompt.push('\n');
        }
    }
    prompt.push_str(
        "Reply with JSON {\"items\":[{\"title\",\"description\",\"priority\"(1-5),\"estimatedMinutes\",\
         \"goalAlignment\":[keywords]}],\"feedback\",\"guidingQuestions\":[...]}.",
    );
    prompt
}

pub fn parse_reply(raw: &str) -> ProposalOutcome {
    let body = strip_code_fence(raw);
    if body.is_empty() {
        return ProposalOutcome::ParseFailure("Reply was empty.".to_string());
    }

    let value: Value = match serde_json::from_str(body) {
        Ok(value) => value,
        Err(error) => return ProposalOutcome::ParseFailure(format!("Reply is not valid JSON: {}", error)),
    };

    if let Err(errors) = REPLY_VALIDATOR.validate(&value) {
        let details = errors
            .map(|error| {
                let path = error.instance_path.to_string();
                if path.is_empty() {
                    error.to_string()
                } else {
                    format!("{}: {}", path, error)
                }
            })
            .collect::<Vec<_>>()
            .join("; ");
        return ProposalOutcome::ParseFailure(format!("Reply did not match schema: {}", details));
    }

    let reply: RawReply = match serde_json::from_value(value) {
        Ok(reply) => reply,
        Err(error) => return ProposalOutcome::ParseFailure(error.to_string()),
    };

    let items = reply
        .items
        .into_iter()
        .map(|item| ProposedItem {
            title: item.title,
            description: item.description,
            priority: clamp_priority(item.priority.unwrap_or(DEFAULT_PRIORITY)),
            estimated_minutes: item
                .estimated_minutes
                .map(|minutes| u32::try_from(minutes).unwrap_or(u32::MAX))
                .unwrap_or(DEFAULT_ESTIMATED_MINUTES),
            // A blank keyword is a substring of every goal.
            goal_alignment_labels: item
                .goal_alignment
                .into_iter()
                .filter(|label| !label.trim().is_empty())
                .collect(),
        })
        .collect();

    ProposalOutcome::ProposedItems(GeneratedChecklist {
        items,
        feedback: reply.feedback,
        guiding_questions: reply.guiding_questions,
    })
}

/// Collapses an outcome into items the orchestrator can use, substituting the
/// configured fallback item when nothing usable came back. The flag reports
/// whether the fallback was used.
pub fn resolve_outcome(outcome: ProposalOutcome, settings: &EngineSettings) -> (GeneratedChecklist, bool) {
    match outcome {
        ProposalOutcome::ProposedItems(checklist) if !checklist.items.is_empty() => (checklist, false),
        ProposalOutcome::ProposedItems(checklist) => (
            GeneratedChecklist {
                items: vec![settings.fallback_item()],
                ..checklist
            },
            true,
        ),
        ProposalOutcome::ParseFailure(_) => (
            GeneratedChecklist {
                items: vec![settings.fallback_item()],
                feedback: None,
                guiding_questions: Vec::new(),
            },
            true,
        ),
    }
}

fn strip_code_fence(raw: &str) -> &str {
    match CODE_FENCE_RE.captures(raw).and_then(|caps| caps.get(1)) {
        Some(inner) => inner.as_str().trim(),
        None => raw.trim(),
    }
}
