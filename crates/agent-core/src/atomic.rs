//! Splits compound plan steps ("type the email and click Submit") into one
//! interaction per step.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use waypoint_core_types::{PlanStep, StepStatus};

type Splitter = fn(&Captures<'_>) -> Vec<String>;

struct CompoundPattern {
    name: &'static str,
    regex: Regex,
    split: Splitter,
}

fn capitalize(text: &str) -> String {
    let text = text.trim();
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn group<'a>(caps: &'a Captures<'_>, name: &str) -> &'a str {
    caps.name(name).map(|m| m.as_str().trim()).unwrap_or_default()
}

fn split_type_then_click(caps: &Captures<'_>) -> Vec<String> {
    vec![
        group(caps, "first").to_string(),
        format!("Click {}", group(caps, "second")),
    ]
}

fn split_fill_both(caps: &Captures<'_>) -> Vec<String> {
    let second = group(caps, "second");
    let second = if starts_with_action_verb(second) {
        capitalize(second)
    } else {
        format!("Fill {second}")
    };
    vec![format!("Fill {}", group(caps, "first")), second]
}

fn split_select_then_click(caps: &Captures<'_>) -> Vec<String> {
    vec![
        format!("Select {}", group(caps, "first")),
        format!("Click {}", group(caps, "second")),
    ]
}

fn split_enter_then_press(caps: &Captures<'_>) -> Vec<String> {
    vec![
        format!("Enter {}", group(caps, "first")),
        format!("Press {}", group(caps, "second")),
    ]
}

fn split_navigate_then_click(caps: &Captures<'_>) -> Vec<String> {
    vec![
        format!("Navigate to {}", group(caps, "first")),
        format!("Click {}", group(caps, "second")),
    ]
}

fn split_then(caps: &Captures<'_>) -> Vec<String> {
    vec![
        capitalize(group(caps, "first")),
        capitalize(group(caps, "second")),
    ]
}

fn pattern(name: &'static str, source: &str, split: Splitter) -> CompoundPattern {
    CompoundPattern {
        name,
        regex: Regex::new(source).expect("compound pattern regex"),
        split,
    }
}

static COMPOUND_PATTERNS: Lazy<Vec<CompoundPattern>> = Lazy::new(|| {
    vec![
        pattern(
            "type_and_click",
            r"(?i)^\s*type\s+(?P<first>.+?)\s+and\s+(?:then\s+)?click\s+(?P<second>.+?)\s*\.?$",
            split_type_then_click,
        ),
        pattern(
            "fill_both",
            r"(?i)^\s*fill(?:\s+in)?\s+(?P<first>.+?)\s+and\s+(?P<second>.+?)\s*\.?$",
            split_fill_both,
        ),
        pattern(
            "select_and_click",
            r"(?i)^\s*select\s+(?P<first>.+?)\s+and\s+(?:then\s+)?click\s+(?P<second>.+?)\s*\.?$",
            split_select_then_click,
        ),
        pattern(
            "enter_and_press",
            r"(?i)^\s*enter\s+(?P<first>.+?)\s+and\s+(?:then\s+)?press\s+(?P<second>.+?)\s*\.?$",
            split_enter_then_press,
        ),
        pattern(
            "navigate_and_click",
            r"(?i)^\s*(?:navigate|go)\s+to\s+(?P<first>.+?)\s+and\s+(?:then\s+)?click\s+(?P<second>.+?)\s*\.?$",
            split_navigate_then_click,
        ),
        pattern(
            "then",
            r"(?i)^\s*(?P<first>.+?),?\s+then\s+(?P<second>.+?)\s*\.?$",
            split_then,
        ),
    ]
});

static GENERIC_SEPARATOR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\s*,\s*(?:and\s+|then\s+)?|\s+and\s+then\s+|\s+and\s+|\s+then\s+")
        .expect("generic separator regex")
});

const ACTION_VERBS: &[&str] = &[
    "click", "type", "enter", "fill", "select", "choose", "press", "navigate", "go", "open",
    "scroll", "hover", "check", "uncheck", "submit", "search", "wait", "tap", "set", "input",
];

fn starts_with_action_verb(part: &str) -> bool {
    part.split_whitespace()
        .next()
        .map(|word| {
            let word = word.to_ascii_lowercase();
            ACTION_VERBS.contains(&word.as_str())
        })
        .unwrap_or(false)
}

fn generic_split(description: &str) -> Option<Vec<String>> {
    let parts: Vec<&str> = GENERIC_SEPARATOR
        .split(description.trim().trim_end_matches('.'))
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect();
    if parts.len() < 2 || !parts.iter().all(|part| starts_with_action_verb(part)) {
        return None;
    }
    Some(parts.into_iter().map(capitalize).collect())
}

/// Parts of a compound description, or the description itself when it is
/// already atomic.
pub fn split_compound_action(description: &str) -> Vec<String> {
    for pattern in COMPOUND_PATTERNS.iter() {
        if let Some(caps) = pattern.regex.captures(description) {
            let parts: Vec<String> = (pattern.split)(&caps)
                .into_iter()
                .filter(|part| !part.trim().is_empty())
                .collect();
            if parts.len() >= 2 {
                tracing::debug!(target: "planning", pattern = pattern.name, "split compound step");
                return parts;
            }
        }
    }
    generic_split(description).unwrap_or_else(|| vec![description.trim().to_string()])
}

pub fn is_compound_action(description: &str) -> bool {
    split_compound_action(description).len() >= 2
}

/// Splits every compound step and re-indexes the plan `0..n`. The expected
/// outcome of a split step stays with its last part.
pub fn atomize_plan(steps: Vec<PlanStep>) -> Vec<PlanStep> {
    let mut atomized = Vec::with_capacity(steps.len());
    for step in steps {
        let parts = split_compound_action(&step.description);
        let last = parts.len().saturating_sub(1);
        for (position, part) in parts.into_iter().enumerate() {
            let mut piece = PlanStep::new(0, part)
                .with_reasoning(step.reasoning.clone())
                .with_tool_type(step.tool_type);
            if position == last {
                piece.expected_outcome = step.expected_outcome.clone();
            }
            atomized.push(piece);
        }
    }
    for (index, step) in atomized.iter_mut().enumerate() {
        step.index = index as u32;
        step.status = StepStatus::Pending;
    }
    atomized
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_and_click_keeps_typed_value() {
        assert_eq!(
            split_compound_action("Type email and click Submit"),
            vec!["email".to_string(), "Click Submit".to_string()]
        );
    }

    #[test]
    fn known_patterns_split_in_two() {
        for case in [
            "Fill first name and last name",
            "Select Economy and click Continue",
            "Enter the coupon and press Enter",
            "Navigate to the cart and click Checkout",
            "Open the menu then choose Settings",
        ] {
            assert!(is_compound_action(case), "{case}");
            assert!(split_compound_action(case).len() >= 2, "{case}");
        }
        assert_eq!(
            split_compound_action("Fill first name and last name"),
            vec!["Fill first name", "Fill last name"]
        );
    }

    #[test]
    fn generic_split_requires_verbs_on_every_part() {
        assert_eq!(
            split_compound_action("click Login, type the password, press Enter"),
            vec!["Click Login", "Type the password", "Press Enter"]
        );
        assert!(!is_compound_action("Find salt and pepper grinders"));
        assert!(!is_compound_action("Click Submit"));
    }

    #[test]
    fn atomize_reindexes_and_keeps_outcome_on_last_part() {
        let steps = vec![
            PlanStep::new(0, "Open the login page"),
            PlanStep::new(1, "Type email and click Submit").with_expected_outcome("dashboard"),
            PlanStep::new(2, "Wait for the dashboard"),
        ];
        let atomized = atomize_plan(steps);
        let indices: Vec<u32> = atomized.iter().map(|step| step.index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3]);
        assert_eq!(atomized[1].expected_outcome, None);
        assert_eq!(atomized[2].expected_outcome.as_deref(), Some("dashboard"));
        assert_eq!(atomized[2].description, "Click Submit");
    }
}
