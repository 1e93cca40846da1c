//! Structural comparison of page representations.
//!
//! A skeleton is the sorted set of interactive elements on a page with
//! volatile element indices stripped. Only skeleton changes count as a
//! meaningful content change; a differing content hash alone does not.

use std::collections::BTreeSet;

use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};

static INTERACTIVE_TAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)<(a|button|input|select|textarea|option)\b([^>]*)>([^<\n]{0,80})")
        .expect("valid interactive tag regex")
});

static INTERACTIVE_ROLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?i)<([a-z][a-z0-9-]*)\b([^>]*\brole\s*=\s*["'](?:button|link|checkbox|radio|tab|menuitem|combobox|textbox|option|switch|searchbox)["'][^>]*)>([^<\n]{0,80})"#,
    )
    .expect("valid interactive role regex")
});

static INDEXED_ENTRY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\[\d+\]\s*<([A-Za-z][A-Za-z0-9-]*)([^>]*)>([^<\n]{0,80})")
        .expect("valid indexed entry regex")
});

static VOLATILE_ATTR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)\s+(?:data-index|data-reactid|data-testid|id|style|tabindex)\s*=\s*("[^"]*"|'[^']*')"#)
        .expect("valid volatile attribute regex")
});

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid whitespace regex"));

/// Public suffixes with more than one label; everything else is treated as a
/// single-label suffix.
const MULTI_LABEL_SUFFIXES: &[&str] = &[
    "co.uk", "org.uk", "ac.uk", "gov.uk", "ltd.uk", "me.uk", "com.au", "net.au", "org.au",
    "edu.au", "gov.au", "co.nz", "org.nz", "co.jp", "ne.jp", "or.jp", "com.br", "com.cn",
    "net.cn", "org.cn", "co.in", "co.kr", "com.mx", "co.za", "com.sg", "com.tr", "com.tw",
    "com.hk", "co.il", "com.ar",
];

fn normalize_entry(tag: &str, attrs: &str, text: &str) -> String {
    let attrs = VOLATILE_ATTR.replace_all(attrs, "");
    let attrs = WHITESPACE.replace_all(attrs.trim(), " ");
    let text = WHITESPACE.replace_all(text.trim(), " ");
    let tag = tag.to_ascii_lowercase();
    match (attrs.is_empty(), text.is_empty()) {
        (true, true) => format!("<{tag}>"),
        (true, false) => format!("<{tag}>{text}"),
        (false, true) => format!("<{tag} {attrs}>"),
        (false, false) => format!("<{tag} {attrs}>{text}"),
    }
}

/// Interactive-element skeleton of a page, sorted and de-duplicated.
pub fn extract_skeleton(content: &str) -> Vec<String> {
    let mut entries = BTreeSet::new();
    for re in [&*INDEXED_ENTRY, &*INTERACTIVE_TAG, &*INTERACTIVE_ROLE] {
        for caps in re.captures_iter(content) {
            let tag = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
            let attrs = caps.get(2).map(|m| m.as_str()).unwrap_or_default();
            let text = caps.get(3).map(|m| m.as_str()).unwrap_or_default();
            entries.insert(normalize_entry(tag, attrs, text));
        }
    }
    entries.into_iter().collect()
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StructuralDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

impl StructuralDiff {
    pub fn between(before: &[String], after: &[String]) -> Self {
        let before: BTreeSet<&String> = before.iter().collect();
        let after: BTreeSet<&String> = after.iter().collect();
        Self {
            added: after.difference(&before).map(|s| (*s).clone()).collect(),
            removed: before.difference(&after).map(|s| (*s).clone()).collect(),
        }
    }

    pub fn is_meaningful(&self) -> bool {
        !self.added.is_empty() || !self.removed.is_empty()
    }

    /// Plain-language description used by the observation-based verifier.
    pub fn summary(&self, max_items: usize) -> String {
        if !self.is_meaningful() {
            return "no interactive elements added or removed".to_string();
        }
        let list = |items: &[String]| {
            let mut shown: Vec<&str> = items.iter().take(max_items).map(String::as_str).collect();
            if items.len() > max_items {
                shown.push("...");
            }
            shown.join("; ")
        };
        let mut parts = Vec::new();
        if !self.added.is_empty() {
            parts.push(format!("{} added: {}", self.added.len(), list(&self.added)));
        }
        if !self.removed.is_empty() {
            parts.push(format!("{} removed: {}", self.removed.len(), list(&self.removed)));
        }
        parts.join(" | ")
    }
}

pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

/// Registered domain (eTLD+1) of a URL or bare host, lowercased.
pub fn registered_domain(url_or_host: &str) -> Option<String> {
    let host = match url::Url::parse(url_or_host) {
        Ok(url) => url.host_str()?.to_ascii_lowercase(),
        Err(_) => url_or_host.trim().trim_end_matches('/').to_ascii_lowercase(),
    };
    let host = host.trim_start_matches("www.").trim_end_matches('.');
    if host.is_empty() {
        return None;
    }
    if host.parse::<std::net::IpAddr>().is_ok() || !host.contains('.') {
        return Some(host.to_string());
    }
    let labels: Vec<&str> = host.split('.').collect();
    let take = if labels.len() >= 3
        && MULTI_LABEL_SUFFIXES.contains(&labels[labels.len() - 2..].join(".").as_str())
    {
        3
    } else {
        2
    };
    Some(labels[labels.len().saturating_sub(take)..].join("."))
}

/// URLs compared without fragment and trailing slash.
pub fn urls_differ(before: &str, after: &str) -> bool {
    fn normalize(raw: &str) -> String {
        let raw = raw.trim();
        let without_fragment = raw.split('#').next().unwrap_or(raw);
        without_fragment.trim_end_matches('/').to_string()
    }
    normalize(before) != normalize(after)
}
