//! Action-type and task-complexity classification.

use once_cell::sync::Lazy;
use regex::Regex;
use waypoint_core_types::{ActionType, HierarchicalPlan, Plan, TaskComplexity};

use crate::grammar::{ActionVerb, ParsedAction};

const DROPDOWN_ROLES: &[&str] = &["combobox", "listbox"];

static INDEXED_ELEMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\[([^\]\s]+)\]\s*<([A-Za-z][A-Za-z0-9-]*)([^>]*)>")
        .expect("valid indexed element regex")
});

static ATTRIBUTE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"([A-Za-z_:][-A-Za-z0-9_:.]*)\s*=\s*(?:"([^"]*)"|'([^']*)')"#)
        .expect("valid attribute regex")
});

/// Tag name and attribute text of the indexed element `[id]<tag ...>`.
pub fn find_element<'a>(page_content: &'a str, id: &str) -> Option<(String, &'a str)> {
    let caps = INDEXED_ELEMENT
        .captures_iter(page_content)
        .find(|caps| caps.get(1).is_some_and(|found| found.as_str() == id))?;
    let tag = caps.get(2)?.as_str().to_ascii_lowercase();
    let attrs = caps.get(3).map(|m| m.as_str()).unwrap_or("");
    Some((tag, attrs))
}

/// Value of `name="..."` (or single-quoted) within an attribute string.
pub fn attribute<'a>(attrs: &'a str, name: &str) -> Option<&'a str> {
    ATTRIBUTE
        .captures_iter(attrs)
        .find(|caps| caps.get(1).is_some_and(|found| found.as_str().eq_ignore_ascii_case(name)))
        .and_then(|caps| caps.get(2).or_else(|| caps.get(3)))
        .map(|m| m.as_str())
}

pub fn classify_action(action: &ParsedAction, page_content: &str) -> ActionType {
    match action.verb {
        ActionVerb::Navigate => ActionType::Navigation,
        ActionVerb::Select => ActionType::Dropdown,
        ActionVerb::Click => {
            let Some((tag, attrs)) = action
                .target_id()
                .and_then(|id| find_element(page_content, id))
            else {
                return ActionType::Generic;
            };
            if tag == "a" && attribute(attrs, "href").is_some() {
                return ActionType::Navigation;
            }
            let role = attribute(attrs, "role").map(str::to_ascii_lowercase);
            if tag == "select" || role.is_some_and(|role| DROPDOWN_ROLES.contains(&role.as_str())) {
                return ActionType::Dropdown;
            }
            ActionType::Generic
        }
        _ => ActionType::Generic,
    }
}

pub fn classify_complexity(plan: Option<&Plan>, hierarchy: Option<&HierarchicalPlan>) -> TaskComplexity {
    let decomposed = hierarchy.is_some_and(|h| h.is_decomposed);
    let steps = plan.map(Plan::len).unwrap_or(0);
    if steps <= 2 && !decomposed {
        TaskComplexity::Simple
    } else {
        TaskComplexity::Complex
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammar::parse_action;
    use waypoint_core_types::PlanStep;

    const PAGE: &str = r#"
[1]<a href="/pricing">Pricing</a>
[2]<button type="submit">Send</button>
[3]<select name="country">
[4]<div role="combobox" aria-expanded="false">Pick one</div>
[5]<a name="anchor">No link</a>
"#;

    fn classify(raw: &str) -> ActionType {
        classify_action(&parse_action(raw).unwrap(), PAGE)
    }

    #[test]
    fn classifies_actions() {
        assert_eq!(classify("navigate('https://a.com')"), ActionType::Navigation);
        assert_eq!(classify("select(3, 'France')"), ActionType::Dropdown);
        assert_eq!(classify("click(1)"), ActionType::Navigation);
        assert_eq!(classify("click(2)"), ActionType::Generic);
        assert_eq!(classify("click(3)"), ActionType::Dropdown);
        assert_eq!(classify("click(4)"), ActionType::Dropdown);
        assert_eq!(classify("click(5)"), ActionType::Generic);
        assert_eq!(classify("click(99)"), ActionType::Generic);
        assert_eq!(classify("press('Enter')"), ActionType::Generic);
    }

    #[test]
    fn id_prefix_does_not_match_longer_ids() {
        assert!(find_element("[12]<a href=\"/x\">x</a>", "1").is_none());
        let (tag, attrs) = find_element("[12]<a href=\"/x\">x</a>\n[1]<button>go</button>", "1")
            .expect("second entry");
        assert_eq!(tag, "button");
        assert_eq!(attrs, "");
    }

    #[test]
    fn attribute_names_match_whole_and_case_insensitively() {
        assert_eq!(attribute(r#" data-href="/x" HREF='/y'"#, "href"), Some("/y"));
        assert_eq!(attribute(r#" data-href="/x""#, "href"), None);
        assert_eq!(attribute(r#" role="combobox""#, "role"), Some("combobox"));
    }

    #[test]
    fn complexity_by_plan_shape() {
        let short = Plan::new(vec![PlanStep::new(0, "a"), PlanStep::new(1, "b")]);
        assert_eq!(classify_complexity(Some(&short), None), TaskComplexity::Simple);
        let long = Plan::new((0..3).map(|i| PlanStep::new(i, "x")).collect());
        assert_eq!(classify_complexity(Some(&long), None), TaskComplexity::Complex);
        let decomposed = HierarchicalPlan {
            is_decomposed: true,
            ..Default::default()
        };
        assert_eq!(
            classify_complexity(Some(&short), Some(&decomposed)),
            TaskComplexity::Complex
        );
    }
}
