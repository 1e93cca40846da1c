//! Action grammar: the whitelist of browser actions the core may emit.
//!
//! Actions are rendered as `verb(arg, ...)`. Arguments are bare tokens or
//! single/double-quoted strings; commas inside quotes are literal and
//! backslash escapes are honoured inside quotes.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

const SCROLL_DIRECTIONS: &[&str] = &["up", "down", "left", "right", "top", "bottom"];
const MAX_WAIT_SECONDS: f64 = 60.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ActionVerb {
    Click,
    SetValue,
    Navigate,
    Scroll,
    Hover,
    Check,
    Select,
    Press,
    Wait,
    Finish,
    Fail,
}

/// How an argument is rendered in canonical form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArgKind {
    ElementId,
    Text,
    Direction,
    Seconds,
}

impl ActionVerb {
    pub const ALL: [ActionVerb; 11] = [
        ActionVerb::Click,
        ActionVerb::SetValue,
        ActionVerb::Navigate,
        ActionVerb::Scroll,
        ActionVerb::Hover,
        ActionVerb::Check,
        ActionVerb::Select,
        ActionVerb::Press,
        ActionVerb::Wait,
        ActionVerb::Finish,
        ActionVerb::Fail,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ActionVerb::Click => "click",
            ActionVerb::SetValue => "setValue",
            ActionVerb::Navigate => "navigate",
            ActionVerb::Scroll => "scroll",
            ActionVerb::Hover => "hover",
            ActionVerb::Check => "check",
            ActionVerb::Select => "select",
            ActionVerb::Press => "press",
            ActionVerb::Wait => "wait",
            ActionVerb::Finish => "finish",
            ActionVerb::Fail => "fail",
        }
    }

    /// Case-insensitive, tolerant of `set_value` style spellings.
    pub fn from_name(raw: &str) -> Option<Self> {
        let folded: String = raw
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .flat_map(char::to_lowercase)
            .collect();
        ActionVerb::ALL
            .into_iter()
            .find(|verb| verb.name().to_ascii_lowercase() == folded)
    }

    fn signature(self) -> &'static [ArgKind] {
        match self {
            ActionVerb::Click | ActionVerb::Hover | ActionVerb::Check => &[ArgKind::ElementId],
            ActionVerb::SetValue | ActionVerb::Select => &[ArgKind::ElementId, ArgKind::Text],
            ActionVerb::Navigate | ActionVerb::Press | ActionVerb::Fail => &[ArgKind::Text],
            ActionVerb::Scroll => &[ArgKind::Direction],
            ActionVerb::Wait => &[ArgKind::Seconds],
            ActionVerb::Finish => &[],
        }
    }

    pub fn arity(self) -> usize {
        self.signature().len()
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ActionVerb::Finish | ActionVerb::Fail)
    }
}

impl fmt::Display for ActionVerb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GrammarError {
    #[error("action is empty")]
    Empty,
    #[error("malformed action '{0}': expected verb(args)")]
    Malformed(String),
    #[error("unknown action verb '{0}'")]
    UnknownVerb(String),
    #[error("unterminated quote in '{0}'")]
    UnterminatedQuote(String),
    #[error("{verb} takes {expected} argument(s), got {got}")]
    Arity {
        verb: ActionVerb,
        expected: usize,
        got: usize,
    },
    #[error("invalid argument for {verb}: {reason}")]
    InvalidArgument { verb: ActionVerb, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedAction {
    pub verb: ActionVerb,
    pub args: Vec<String>,
}

impl ParsedAction {
    /// Builds and validates an action from already-split arguments.
    pub fn new(verb: ActionVerb, args: Vec<String>) -> Result<Self, GrammarError> {
        let action = Self { verb, args };
        action.check()?;
        Ok(action)
    }

    pub fn finish() -> Self {
        Self {
            verb: ActionVerb::Finish,
            args: Vec::new(),
        }
    }

    pub fn fail(reason: impl Into<String>) -> Self {
        Self {
            verb: ActionVerb::Fail,
            args: vec![reason.into()],
        }
    }

    /// Element id targeted by the action, if any.
    pub fn target_id(&self) -> Option<&str> {
        match self.verb.signature().first() {
            Some(ArgKind::ElementId) => self.args.first().map(String::as_str),
            _ => None,
        }
    }

    pub fn arg(&self, index: usize) -> Option<&str> {
        self.args.get(index).map(String::as_str)
    }

    fn check(&self) -> Result<(), GrammarError> {
        let signature = self.verb.signature();
        if signature.len() != self.args.len() {
            return Err(GrammarError::Arity {
                verb: self.verb,
                expected: signature.len(),
                got: self.args.len(),
            });
        }
        let invalid = |reason: String| GrammarError::InvalidArgument {
            verb: self.verb,
            reason,
        };
        for (kind, arg) in signature.iter().zip(&self.args) {
            match kind {
                ArgKind::ElementId if arg.trim().is_empty() => {
                    return Err(invalid("element id is empty".to_string()))
                }
                ArgKind::Direction
                    if !SCROLL_DIRECTIONS.contains(&arg.to_ascii_lowercase().as_str()) =>
                {
                    return Err(invalid(format!(
                        "direction '{arg}' not in {}",
                        SCROLL_DIRECTIONS.join("|")
                    )))
                }
                ArgKind::Seconds => {
                    let seconds: f64 = arg
                        .trim()
                        .parse()
                        .map_err(|_| invalid(format!("'{arg}' is not a number")))?;
                    if !(0.0..=MAX_WAIT_SECONDS).contains(&seconds) {
                        return Err(invalid(format!(
                            "{seconds} seconds outside 0..={MAX_WAIT_SECONDS}"
                        )));
                    }
                }
                _ => {}
            }
        }
        if self.verb == ActionVerb::Navigate && self.args[0].trim().is_empty() {
            return Err(invalid("url is empty".to_string()));
        }
        if self.verb == ActionVerb::Press && self.args[0].trim().is_empty() {
            return Err(invalid("key is empty".to_string()));
        }
        Ok(())
    }
}

impl fmt::Display for ParsedAction {
    /// Canonical rendering: safe ids and numbers bare, directions lowercase,
    /// free text double-quoted.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.verb.name())?;
        for (idx, (kind, arg)) in self.verb.signature().iter().zip(&self.args).enumerate() {
            if idx > 0 {
                f.write_str(", ")?;
            }
            match kind {
                ArgKind::ElementId if is_bare_token(arg) => f.write_str(arg.trim())?,
                ArgKind::Direction => f.write_str(&arg.to_ascii_lowercase())?,
                ArgKind::Seconds => f.write_str(arg.trim())?,
                _ => write_quoted(f, arg)?,
            }
        }
        f.write_str(")")
    }
}

fn is_bare_token(value: &str) -> bool {
    let trimmed = value.trim();
    !trimmed.is_empty()
        && trimmed
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn write_quoted(f: &mut fmt::Formatter<'_>, value: &str) -> fmt::Result {
    f.write_str("\"")?;
    for ch in value.chars() {
        match ch {
            '"' => f.write_str("\\\"")?,
            '\\' => f.write_str("\\\\")?,
            '\n' => f.write_str("\\n")?,
            other => write!(f, "{other}")?,
        }
    }
    f.write_str("\"")
}

pub fn parse_action(raw: &str) -> Result<ParsedAction, GrammarError> {
    let trimmed = raw.trim().trim_end_matches(';').trim();
    if trimmed.is_empty() {
        return Err(GrammarError::Empty);
    }
    let open = trimmed
        .find('(')
        .ok_or_else(|| GrammarError::Malformed(trimmed.to_string()))?;
    if !trimmed.ends_with(')') {
        return Err(GrammarError::Malformed(trimmed.to_string()));
    }
    let name = trimmed[..open].trim();
    if name.is_empty() || name.contains(char::is_whitespace) {
        return Err(GrammarError::Malformed(trimmed.to_string()));
    }
    let verb = ActionVerb::from_name(name).ok_or_else(|| GrammarError::UnknownVerb(name.to_string()))?;
    let inner = &trimmed[open + 1..trimmed.len() - 1];
    let args = split_args(inner).ok_or_else(|| GrammarError::UnterminatedQuote(trimmed.to_string()))?;
    ParsedAction::new(verb, args)
}

pub fn validate_action(raw: &str) -> bool {
    parse_action(raw).is_ok()
}

/// Compares two actions on their canonical form; unparsable actions fall
/// back to whitespace-trimmed string equality.
pub fn same_action(left: &str, right: &str) -> bool {
    match (parse_action(left), parse_action(right)) {
        (Ok(a), Ok(b)) => a == b || a.to_string() == b.to_string(),
        _ => left.trim() == right.trim(),
    }
}

/// Canonical form of a raw action, or the trimmed input when it does not parse.
pub fn canonicalize(raw: &str) -> String {
    parse_action(raw)
        .map(|action| action.to_string())
        .unwrap_or_else(|_| raw.trim().to_string())
}

/// Returns `None` when a quote is left open.
fn split_args(inner: &str) -> Option<Vec<String>> {
    if inner.trim().is_empty() {
        return Some(Vec::new());
    }
    let mut args = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut quoted_arg = false;
    let mut chars = inner.chars();
    while let Some(ch) = chars.next() {
        match quote {
            Some(q) => match ch {
                '\\' => match chars.next() {
                    Some('n') => current.push('\n'),
                    Some('t') => current.push('\t'),
                    Some(other) => current.push(other),
                    None => return None,
                },
                c if c == q => quote = None,
                c => current.push(c),
            },
            None => match ch {
                '"' | '\'' => {
                    quote = Some(ch);
                    quoted_arg = true;
                }
                ',' => {
                    args.push(finish_arg(&current, quoted_arg));
                    current.clear();
                    quoted_arg = false;
                }
                c => current.push(c),
            },
        }
    }
    if quote.is_some() {
        return None;
    }
    args.push(finish_arg(&current, quoted_arg));
    Some(args)
}

fn finish_arg(raw: &str, quoted: bool) -> String {
    if quoted {
        // Whitespace around the quotes is dropped, whitespace inside is kept.
        raw.trim_matches(|c: char| c == ' ' || c == '\t').to_string()
    } else {
        raw.trim().to_string()
    }
}
