//! Content policy: validation and sanitization of message payloads.
//!
//! Both functions are deterministic and side-effect free.  [`validate`]
//! runs against the raw payload before [`sanitize`] output is trusted, and
//! both run again on edit with the message's original (immutable) type.
//!
//! The spam heuristics are a table of named predicates so rules can be
//! swapped without touching the message ledger contract.

use std::sync::LazyLock;

use regex::Regex;

use palaver_store::MessageKind;

use crate::error::PolicyViolation;

/// Maximum content length in Unicode code points, not encoded bytes.
pub const MAX_CONTENT_CHARS: usize = 10_000;

/// A run of this many identical characters is treated as spam.
const REPEAT_RUN_LIMIT: usize = 21;

/// Maximum consecutive newlines left in sanitized text.
const MAX_NEWLINE_RUN: usize = 3;

static URL_SEQUENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"https?://\S+\s+https?://\S+\s+https?://").unwrap());

static SPAM_PHRASES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(buy now|click here|free money|win now|act now|limited time|urgent|congratulations)\b",
    )
    .unwrap()
});

static CARD_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d{4}[\s-]?\d{4}[\s-]?\d{4}[\s-]?\d{4}\b").unwrap());

static EMAIL_ADDRESS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b[A-Z0-9._%+-]+@[A-Z0-9.-]+\.[A-Z]{2,}\b").unwrap());

static MONEY_AMOUNT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\$\d+|\d+\s*(USD|EUR|GBP)").unwrap());

static MARKUP_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").unwrap());

static SPACE_RUN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[ \t]+").unwrap());

static ABSOLUTE_URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9+.\-]*://[^\s]+$").unwrap());

static FILE_REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^[A-Za-z0-9_\-./]+\.(jpg|jpeg|png|gif|pdf|doc|docx|txt)$").unwrap()
});

/// A named spam predicate.  Kept as a table so individual heuristics can be
/// replaced or reordered independently.
struct SpamRule {
    name: &'static str,
    hit: fn(&str) -> bool,
}

static SPAM_RULES: &[SpamRule] = &[
    SpamRule {
        name: "repeated_characters",
        hit: has_repeated_run,
    },
    SpamRule {
        name: "url_sequence",
        hit: |s| URL_SEQUENCE.is_match(s),
    },
    SpamRule {
        name: "spam_phrase",
        hit: |s| SPAM_PHRASES.is_match(s),
    },
    SpamRule {
        name: "card_number",
        hit: |s| CARD_NUMBER.is_match(s),
    },
    SpamRule {
        name: "email_address",
        hit: |s| EMAIL_ADDRESS.is_match(s),
    },
    SpamRule {
        name: "money_amount",
        hit: |s| MONEY_AMOUNT.is_match(s),
    },
];

/// Validate a raw payload for the given message type.
///
/// Checks run in a fixed order: emptiness, length, then type-specific rules.
pub fn validate(content: &str, kind: MessageKind) -> Result<(), PolicyViolation> {
    if content.trim().is_empty() {
        return Err(PolicyViolation::Empty);
    }
    if content.chars().count() > MAX_CONTENT_CHARS {
        return Err(PolicyViolation::TooLong);
    }

    match kind {
        MessageKind::Text => {
            if let Some(rule) = SPAM_RULES.iter().find(|r| (r.hit)(content)) {
                tracing::debug!(rule = rule.name, "content matched spam heuristic");
                return Err(PolicyViolation::SpamSuspected);
            }
            Ok(())
        }
        MessageKind::Image | MessageKind::File => {
            let trimmed = content.trim();
            if ABSOLUTE_URL.is_match(trimmed) || FILE_REFERENCE.is_match(trimmed) {
                Ok(())
            } else {
                Err(PolicyViolation::InvalidReference)
            }
        }
    }
}

/// Sanitize a payload for storage.
///
/// Text: strip markup tags, HTML-escape the remainder, collapse runs of
/// spaces/tabs, cap consecutive newlines, trim.  Image/file: trim and drop
/// characters that cannot appear in a URL; a relative file path keeps its
/// meaning.
pub fn sanitize(content: &str, kind: MessageKind) -> String {
    match kind {
        MessageKind::Text => sanitize_text(content),
        MessageKind::Image | MessageKind::File => sanitize_url(content),
    }
}

fn sanitize_text(content: &str) -> String {
    let stripped = MARKUP_TAG.replace_all(content, "");
    let escaped = html_escape(&stripped);
    let collapsed = SPACE_RUN.replace_all(&escaped, " ");
    cap_newlines(&collapsed, MAX_NEWLINE_RUN).trim().to_string()
}

fn sanitize_url(content: &str) -> String {
    content
        .trim()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || URL_PUNCTUATION.contains(*c))
        .collect()
}

/// RFC 3986 punctuation permitted in URLs (plus `%` for escapes).
const URL_PUNCTUATION: &str = "-._~:/?#[]@!$&'()*+,;=%";

fn html_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#039;"),
            other => out.push(other),
        }
    }
    out
}

/// Replace runs of more than `max` newlines with exactly `max`.
fn cap_newlines(s: &str, max: usize) -> String {
    let mut out = String::with_capacity(s.len());
    let mut run = 0usize;
    for c in s.chars() {
        if c == '\n' {
            run += 1;
            if run <= max {
                out.push(c);
            }
        } else {
            run = 0;
            out.push(c);
        }
    }
    out
}

/// True when any single character repeats [`REPEAT_RUN_LIMIT`] or more
/// times in a row.  Hand-rolled because the regex crate has no
/// backreferences.
fn has_repeated_run(s: &str) -> bool {
    let mut prev: Option<char> = None;
    let mut run = 0usize;
    for c in s.chars() {
        if Some(c) == prev {
            run += 1;
        } else {
            prev = Some(c);
            run = 1;
        }
        if run >= REPEAT_RUN_LIMIT {
            return true;
        }
    }
    false
}
