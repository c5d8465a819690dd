use crate::models::Goal;

/// Returns the first goal (in the order given) whose title or description contains
/// any of the labels, compared case-insensitively. Labels are used exactly as given.
pub fn match_goal<'a, S: AsRef<str>>(labels: &[S], goals: &'a [Goal]) -> Option<&'a Goal> {
    let needles: Vec<String> = labels.iter().map(|label| label.as_ref().to_lowercase()).collect();
    if needles.is_empty() {
        return None;
    }

    goals.iter().find(|goal| {
        let title = goal.title.to_lowercase();
        let description = goal
            .description
            .as_deref()
            .map(str::to_lowercase)
            .unwrap_or_default();
        needles
            .iter()
            .any(|needle| title.contains(needle.as_str()) || description.contains(needle.as_str()))
    })
}
