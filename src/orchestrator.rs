use crate::alignment::match_goal;
use crate::checklist::new_item;
use crate::models::{ChecklistItem, EngineSettings, Goal, ProposedItem};
use crate::policy::clamp_priority;
use chrono::{DateTime, Utc};

/// Turns proposed items into pending checklist items for one session, in input order.
///
/// Each item is linked to the first of `active_goals` its alignment labels hit.
/// Goals belonging to another user are never linked. Titles are taken verbatim.
pub fn plan_checklist(
    user_id: &str,
    session_id: &str,
    active_goals: &[Goal],
    proposals: &[ProposedItem],
    settings: &EngineSettings,
    now: DateTime<Utc>,
) -> Vec<ChecklistItem> {
    if proposals.is_empty() {
        return Vec::new();
    }

    let owned_goals: Vec<Goal> = active_goals
        .iter()
        .filter(|goal| goal.user_id == user_id)
        .cloned()
        .collect();

    proposals
        .iter()
        .map(|proposal| {
            let goal_id = match_goal(&proposal.goal_alignment_labels, &owned_goals).map(|goal| goal.id.clone());
            let mut item = new_item(user_id, session_id, proposal, goal_id, settings, now);
            item.priority = clamp_priority(i64::from(proposal.priority));
            item
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::plan_checklist;
    use crate::models::{ChecklistStatus, EngineSettings, Goal, GoalStatus, GoalType, ProposedItem};
    use chrono::Utc;
    use std::collections::BTreeSet;

    fn goal(id: &str, user_id: &str, title: &str) -> Goal {
        let now = Utc::now();
        Goal {
            id: id.to_string(),
            user_id: user_id.to_string(),
            title: title.to_string(),
            description: None,
            goal_type: GoalType::BusinessObjective,
            priority: 2,
            status: GoalStatus::Active,
            stakeholders: BTreeSet::new(),
            created_at: now,
            updated_at: now,
        }
    }

    fn proposal(title: &str, labels: &[&str]) -> ProposedItem {
        ProposedItem {
            title: title.to_string(),
            description: Some("from standup".to_string()),
            priority: 3,
            estimated_minutes: 25,
            goal_alignment_labels: labels.iter().map(ToString::to_string).collect(),
        }
    }

    #[test]
    fn empty_proposals_yield_no_items() {
        let items = plan_checklist("user-1", "s-1", &[], &[], &EngineSettings::default(), Utc::now());
        assert!(items.is_empty());
    }

    #[test]
    fn links_quality_label_to_quality_goal() {
        let goals = vec![goal("g-sales", "user-1", "Close Q3 deals"), goal("g-quality", "user-1", "Improve Code Quality")];
        let items = plan_checklist(
            "user-1",
            "s-1",
            &goals,
            &[proposal("Refactor parser", &["quality"])],
            &EngineSettings::default(),
            Utc::now(),
        );
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].goal_id.as_deref(), Some("g-quality"));
        assert_eq!(items[0].status, ChecklistStatus::Pending);
        assert_eq!(items[0].clarity_score, 10);
        assert_eq!(items[0].strikes, 0);
    }

    #[test]
    fn keeps_input_order_and_skips_foreign_goals() {
        let goals = vec![goal("g-other", "user-2", "Improve Code Quality")];
        let items = plan_checklist(
            "user-1",
            "s-1",
            &goals,
            &[proposal("  first  ", &["quality"]), proposal("second", &[])],
            &EngineSettings::default(),
            Utc::now(),
        );
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].title, "  first  ");
        assert_eq!(items[1].title, "second");
        assert!(items.iter().all(|item| item.goal_id.is_none()));
        assert!(items.iter().all(|item| item.session_id == "s-1"));
    }
}
