//! Detection of missing-information markers in generation output.
//!
//! Each marker names a parameter. Parameters are normalized to snake_case,
//! deduplicated and sorted into data only the user can give (asked for) and
//! public knowledge (searched for).

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InfoKind {
    PrivateData,
    ExternalKnowledge,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissingInfo {
    /// Normalized snake_case parameter name.
    pub name: String,
    /// Text as it appeared in the marker.
    pub raw: String,
    pub kind: InfoKind,
}

impl MissingInfo {
    pub fn new(raw: &str) -> Self {
        Self {
            name: normalize_name(raw),
            raw: raw.trim().to_string(),
            kind: classify_field(raw),
        }
    }

    pub fn label(&self) -> String {
        self.name.replace('_', " ")
    }
}

const PRIVATE_KEYWORDS: &[&str] = &[
    "password",
    "passcode",
    "pin",
    "social security",
    "ssn",
    "credit card",
    "card number",
    "cvv",
    "cvc",
    "expiry",
    "expiration date",
    "bank account",
    "account number",
    "routing number",
    "iban",
    "date of birth",
    "birthday",
    "dob",
    "phone",
    "mobile number",
    "email",
    "home address",
    "shipping address",
    "billing address",
    "my address",
    "passport",
    "driver license",
    "drivers license",
    "license number",
    "first name",
    "last name",
    "full name",
    "my name",
    "username",
    "login",
    "otp",
    "verification code",
    "one time code",
    "security question",
    "tax id",
    "personal",
    "private",
];

fn spaced(raw: &str) -> String {
    let cleaned: String = raw
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn normalize_name(raw: &str) -> String {
    spaced(raw).replace(' ', "_")
}

pub fn classify_field(raw: &str) -> InfoKind {
    let padded = format!(" {} ", spaced(raw));
    if PRIVATE_KEYWORDS
        .iter()
        .any(|keyword| padded.contains(&format!(" {keyword} ")))
    {
        InfoKind::PrivateData
    } else {
        InfoKind::ExternalKnowledge
    }
}

static TAGGED_MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\[\s*(?:MISSING_INFO|MISSING|NEED_INFO)\s*:\s*([^\]]+)\]").expect("tagged marker regex")
});
static XML_MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<missing_info>\s*(.*?)\s*</missing_info>").expect("xml marker regex")
});
static LINE_MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?im)^\s*MISSING_INFORMATION\s*:\s*(.+?)\s*$").expect("line marker regex")
});
static JSON_STRING_FIELD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#""missing_info"\s*:\s*"([^"]*)""#).expect("json string field regex")
});
static JSON_ARRAY_FIELD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#""missing_info"\s*:\s*\[([^\]]*)\]"#).expect("json array field regex")
});
static QUOTED: Lazy<Regex> = Lazy::new(|| Regex::new(r#""([^"]+)""#).expect("quoted regex"));
static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[([a-z][a-z ]{1,38}[a-z])\]").expect("placeholder regex"));

fn split_list(raw: &str) -> impl Iterator<Item = &str> {
    raw.split([',', ';'])
        .map(str::trim)
        .filter(|part| !part.is_empty())
}

fn tagged(text: &str, found: &mut Vec<String>) {
    for caps in TAGGED_MARKER.captures_iter(text) {
        found.extend(split_list(&caps[1]).map(str::to_string));
    }
}

fn xml(text: &str, found: &mut Vec<String>) {
    for caps in XML_MARKER.captures_iter(text) {
        found.extend(split_list(&caps[1]).map(str::to_string));
    }
}

fn lines(text: &str, found: &mut Vec<String>) {
    for caps in LINE_MARKER.captures_iter(text) {
        found.extend(split_list(&caps[1]).map(str::to_string));
    }
}

fn json_fields(text: &str, found: &mut Vec<String>) {
    for caps in JSON_STRING_FIELD.captures_iter(text) {
        found.extend(split_list(&caps[1]).map(str::to_string));
    }
    for caps in JSON_ARRAY_FIELD.captures_iter(text) {
        found.extend(QUOTED.captures_iter(&caps[1]).map(|item| item[1].trim().to_string()));
    }
}

fn placeholders(text: &str, found: &mut Vec<String>) {
    found.extend(
        PLACEHOLDER
            .captures_iter(text)
            .map(|caps| caps[1].trim().to_string()),
    );
}

type Scanner = fn(&str, &mut Vec<String>);

const SCANNERS: &[(&str, Scanner)] = &[
    ("tagged", tagged),
    ("xml", xml),
    ("line", lines),
    ("json", json_fields),
    ("placeholder", placeholders),
];

/// Every missing parameter named in `text`, first occurrence wins.
pub fn detect_missing_info(text: &str) -> Vec<MissingInfo> {
    let mut raw = Vec::new();
    for (_, scan) in SCANNERS {
        scan(text, &mut raw);
    }
    let mut found: Vec<MissingInfo> = Vec::new();
    for item in raw {
        let info = MissingInfo::new(&item);
        if info.name.is_empty() || found.iter().any(|seen| seen.name == info.name) {
            continue;
        }
        found.push(info);
    }
    found
}

pub fn has_missing_info(text: &str) -> bool {
    !detect_missing_info(text).is_empty()
}

/// Missing parameters split by who can supply them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Interrupt {
    pub private: Vec<MissingInfo>,
    pub external: Vec<MissingInfo>,
}

impl Interrupt {
    pub fn from_text(text: &str) -> Option<Self> {
        let found = detect_missing_info(text);
        if found.is_empty() {
            return None;
        }
        let (private, external) = found
            .into_iter()
            .partition(|info| info.kind == InfoKind::PrivateData);
        Some(Self { private, external })
    }

    pub fn needs_user(&self) -> bool {
        !self.private.is_empty()
    }
}

pub fn clarification_question(fields: &[MissingInfo]) -> String {
    let labels: Vec<String> = fields.iter().map(MissingInfo::label).collect();
    match labels.as_slice() {
        [] => "Could you provide the details needed to continue?".to_string(),
        [only] => format!("To continue I need your {only}. Could you provide it?"),
        many => format!(
            "To continue I need the following from you: {}.",
            many.join(", ")
        ),
    }
}
