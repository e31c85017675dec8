//! Prompt validation and sanitization.

use std::sync::OnceLock;

use regex::RegexSet;
use tracing::warn;

use crate::error::{ApiError, ApiResult};

pub const MIN_PROMPT_CHARS: usize = 3;
pub const MAX_PROMPT_CHARS: usize = 500;

const MAX_SPECIAL_CHAR_RATIO: f64 = 0.3;
const SPECIAL_CHARS: &str = "!@#$%^&*()_+=";
/// Runs of identical characters longer than this are rejected.
const MAX_REPEAT_RUN: usize = 10;

const DENY_PATTERNS: &[&str] = &[
    // filesystem
    r"\bopen\s*\(",
    r"\bfile\s*\(",
    r"\bread\s*\(",
    r"\bwrite\s*\(",
    r"\bos\.",
    r"\bpath\.",
    r"__file__",
    r"__path__",
    // network
    r"\burllib\b",
    r"\brequests\b",
    r"\bsocket\b",
    r"\bhttp\.",
    r"\bftp\b",
    // processes and dynamic code
    r"\bsubprocess\b",
    r"\bsystem\(",
    r"\bexec\(",
    r"\beval\(",
    r"\bcompile\(",
    r"__import__",
    // database
    r"\bsql\b",
    r"\binsert\b.*\binto\b",
    r"\bselect\b.*\bfrom\b",
    r"\bdrop\b.*\btable\b",
    // introspection
    r"globals\(",
    r"locals\(",
    r"vars\(",
    r"dir\(",
];

fn deny_set() -> &'static RegexSet {
    static SET: OnceLock<RegexSet> = OnceLock::new();
    SET.get_or_init(|| {
        let patterns = DENY_PATTERNS.iter().map(|p| format!("(?i){p}"));
        RegexSet::new(patterns).unwrap_or_else(|_| RegexSet::empty())
    })
}

/// Validate a raw prompt.
pub fn validate_prompt(prompt: &str) -> ApiResult<()> {
    if prompt.trim().is_empty() {
        return Err(ApiError::validation("Prompt cannot be empty"));
    }

    let chars = prompt.chars().count();
    if chars < MIN_PROMPT_CHARS {
        return Err(ApiError::validation(format!(
            "Prompt is too short (minimum {MIN_PROMPT_CHARS} characters)"
        )));
    }
    if chars > MAX_PROMPT_CHARS {
        return Err(ApiError::validation(format!(
            "Prompt is too long (maximum {MAX_PROMPT_CHARS} characters)"
        )));
    }

    let matches = deny_set().matches(prompt);
    if let Some(index) = matches.iter().next() {
        warn!(pattern = DENY_PATTERNS[index], "Rejected prompt with unsafe content");
        return Err(ApiError::validation(
            "Your prompt contains potentially unsafe content. Please rephrase to describe visual animations only.",
        ));
    }

    let special = prompt.chars().filter(|c| SPECIAL_CHARS.contains(*c)).count();
    if special as f64 / chars as f64 > MAX_SPECIAL_CHAR_RATIO {
        return Err(ApiError::validation("Prompt contains too many special characters"));
    }

    if longest_run(prompt) > MAX_REPEAT_RUN {
        return Err(ApiError::validation("Prompt contains excessive repeated characters"));
    }

    Ok(())
}

/// Drop control characters, collapse whitespace and bound the length.
pub fn sanitize_prompt(prompt: &str) -> String {
    let printable: String = prompt
        .chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .collect();

    let collapsed = printable.split_whitespace().collect::<Vec<_>>().join(" ");

    collapsed
        .chars()
        .take(MAX_PROMPT_CHARS)
        .collect::<String>()
        .trim()
        .to_string()
}

fn longest_run(text: &str) -> usize {
    let mut longest = 0;
    let mut current = 0;
    let mut previous = None;
    for c in text.chars() {
        if Some(c) == previous {
            current += 1;
        } else {
            current = 1;
            previous = Some(c);
        }
        longest = longest.max(current);
    }
    longest
}
