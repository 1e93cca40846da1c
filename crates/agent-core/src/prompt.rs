//! Prompt templates for every provider call the core makes.
//!
//! Each system prompt pins the JSON shape the caller parses; user prompts are
//! assembled by the formatter helpers below.

use std::collections::BTreeMap;

use crate::grammar::ActionVerb;

pub const ACTION_GRAMMAR_HELP: &str = r#"Allowed actions (exactly one per answer):
- click(id)                 click the element with index id
- setValue(id, "text")      replace the value of an input or textarea
- navigate("url")           load a URL
- scroll(direction)         up | down | left | right | top | bottom
- hover(id)                 move the pointer over an element
- check(id)                 toggle a checkbox or radio button
- select(id, "option")      choose an option of a <select>
- press("key")              press a keyboard key such as "Enter" or "Tab"
- wait(seconds)             wait up to 60 seconds
- finish()                  the goal is achieved
- fail("reason")            the goal cannot be achieved
Element ids are the bracketed indices of the page listing, e.g. [12]."#;

pub const PLANNER_SYSTEM_PROMPT: &str = r#"You plan browser tasks. Break the user's goal into short, ordered, atomic steps a browser agent can execute one action at a time.

Respond with JSON only:
{"steps":[{"index":0,"description":"...","reasoning":"...","toolType":"DOM|SERVER|MIXED","expectedOutcome":"..."}]}

Rules:
- One interaction per step ("Type the email", then "Click Submit"), never compound steps.
- DOM steps touch the page; SERVER steps need no page interaction (lookups, memory).
- Keep the plan as short as the goal allows."#;

pub const DECOMPOSER_SYSTEM_PROMPT: &str = r#"You group a browser plan into sub-tasks. Each sub-task owns a contiguous range of 3 to 7 plan steps; together the ranges cover every step in order.

Respond with JSON only:
{"subTasks":[{"id":"st-1","goal":"...","stepIndices":[0,1,2],"inputs":[{"name":"...","required":true,"source":"user"}],"outputs":[{"name":"...","extractionHint":"id|url|success"}]}]}

An input's source is "user" or the id of an earlier sub-task that produces it."#;

pub const REFINER_SYSTEM_PROMPT: &str = r#"You turn one plan step into one concrete browser action on the current page.

Respond with JSON only:
{"toolName":"click|setValue|navigate|scroll|hover|check|select|press|wait|finish|fail","toolType":"DOM|SERVER|MIXED","parameters":{"id":"12","text":"..."},"action":"click(12)","thought":"..."}

If information you need is missing, write [MISSING_INFO: name] in the thought instead of guessing."#;

pub const GENERATOR_SYSTEM_PROMPT: &str = r#"You are a browser agent choosing the single next action toward the user's goal.

Respond with JSON only:
{"thought":"...","action":"..."}

If a value only the user knows is needed (password, personal data), do not invent it: write [MISSING_INFO: name] in the thought and leave action empty."#;

pub const PREDICTOR_SYSTEM_PROMPT: &str = r#"You predict what a browser action will change on the page.

Respond with JSON only:
{"urlShouldChange":true,"expectedUrl":"...","domChange":"none|partial|full","expectedElements":["..."],"description":"..."}"#;

pub const LIGHTWEIGHT_VERIFIER_SYSTEM_PROMPT: &str = r#"Did the browser action succeed? Answer with JSON only: {"succeeded":true} or {"succeeded":false}."#;

pub const OBSERVATION_VERIFIER_SYSTEM_PROMPT: &str = r#"You verify browser actions from observed changes. Judge whether the action did what it was meant to do and whether the overall goal is now achieved.

Respond with JSON only:
{"action_succeeded":true,"task_completed":false,"confidence":0.0,"reason":"..."}"#;

pub const PREDICTION_VERIFIER_SYSTEM_PROMPT: &str = r#"You verify browser actions by comparing the expected outcome with the page after the action. Judge whether the action did what it was meant to do and whether the overall goal is now achieved.

Respond with JSON only:
{"action_succeeded":true,"task_completed":false,"confidence":0.0,"reason":"..."}"#;

pub const CORRECTION_SYSTEM_PROMPT: &str = r#"A browser action failed. Propose a different action for the same step.

Strategies: ALTERNATIVE_SELECTOR (another element), ALTERNATIVE_TOOL (another kind of action), GATHER_INFORMATION (scroll or inspect first), UPDATE_PLAN (rephrase the step), RETRY_WITH_DELAY (wait, then retry).

Never repeat the failed action or any earlier correction.

Respond with JSON only:
{"strategy":"...","reason":"...","correctedAction":"...","correctedDescription":"..."}"#;

pub const CONTEXT_SYSTEM_PROMPT: &str = r#"Decide where the information needed for the user's goal comes from.

Sources: MEMORY (already in the conversation or knowledge), PAGE (visible on the site), WEB_SEARCH (public knowledge), ASK_USER (only the user knows it).

Respond with JSON only:
{"primarySource":"MEMORY|PAGE|WEB_SEARCH|ASK_USER","requiredSources":["..."],"missingFields":["..."],"reasoning":"..."}"#;

pub const SEARCH_EVALUATION_SYSTEM_PROMPT: &str = r#"Judge whether search results answer the missing information.

Respond with JSON only:
{"solved":false,"shouldRetry":true,"shouldAskUser":false,"refinedQuery":"...","confidence":0.0}"#;

pub const CRITIC_SYSTEM_PROMPT: &str = r#"You review a browser action before it runs. Reject it only if it clearly targets the wrong element, enters wrong data, or is irreversible without reason.

Respond with JSON only:
{"approved":true,"reason":"..."}"#;

/// Truncates on a char boundary and marks the cut.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max_chars).collect();
    cut.push_str("\n...[truncated]");
    cut
}

pub fn format_known_values(values: &BTreeMap<String, String>) -> String {
    if values.is_empty() {
        return String::new();
    }
    let mut out = String::from("Known values:\n");
    for (key, value) in values {
        out.push_str(&format!("- {key}: {value}\n"));
    }
    out
}

pub fn format_notes(notes: &[String]) -> String {
    if notes.is_empty() {
        return String::new();
    }
    let mut out = String::from("Context notes:\n");
    for note in notes {
        out.push_str(&format!("- {note}\n"));
    }
    out
}

pub fn verb_list() -> String {
    ActionVerb::ALL
        .iter()
        .map(|verb| verb.name())
        .collect::<Vec<_>>()
        .join(", ")
}
