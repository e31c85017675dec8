//! Structural enumeration of scene entry points.
//!
//! Finds module-level classes that subclass a scene base type, directly or
//! through another class declared in the same source. Comments and string
//! literals are blanked out first so commented-out or quoted class headers
//! are ignored. The scan is structural only; it does not validate the rest of
//! the source.
//!
//! Only class statements starting at column zero are seen. A scene declared
//! inside an `if` block, a `try` block or a function body is not found, even
//! if the renderer would pick it up at run time.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;

/// Base types treated as scenes when the caller does not supply its own.
pub const DEFAULT_SCENE_BASES: &[&str] = &["Scene", "ThreeDScene", "MovingCameraScene"];

fn class_header() -> Option<&'static Regex> {
    static HEADER: OnceLock<Option<Regex>> = OnceLock::new();
    HEADER
        .get_or_init(|| Regex::new(r"(?m)^class[ \t]+([A-Za-z_][A-Za-z0-9_]*)[ \t]*([(:])").ok())
        .as_ref()
}

/// Names of the scene classes declared in `source`, in declaration order.
pub fn enumerate_scenes<S: AsRef<str>>(source: &str, bases: &[S]) -> Vec<String> {
    let Some(header) = class_header() else {
        return Vec::new();
    };
    let cleaned = blank_strings_and_comments(source);

    let mut classes: Vec<(String, Vec<String>)> = Vec::new();
    for caps in header.captures_iter(&cleaned) {
        let (Some(name), Some(opener)) = (caps.get(1), caps.get(2)) else {
            continue;
        };
        let parents = if opener.as_str() == "(" {
            match balanced_segment(&cleaned, opener.end()) {
                Some(segment) => parse_bases(segment),
                None => continue,
            }
        } else {
            Vec::new()
        };
        classes.push((name.as_str().to_string(), parents));
    }

    let mut scene_types: HashSet<String> = bases.iter().map(|b| b.as_ref().to_string()).collect();
    let mut scenes: HashSet<String> = HashSet::new();

    // Fixed point over in-file inheritance; a class may only inherit from
    // classes that resolve as scenes at some point.
    loop {
        let mut changed = false;
        for (name, parents) in &classes {
            if scenes.contains(name) {
                continue;
            }
            if parents.iter().any(|p| scene_types.contains(p)) {
                scenes.insert(name.clone());
                scene_types.insert(name.clone());
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }

    let mut seen = HashSet::new();
    classes
        .into_iter()
        .filter(|(name, _)| scenes.contains(name) && seen.insert(name.clone()))
        .map(|(name, _)| name)
        .collect()
}

/// Text between the `(` ending at `start` and its matching `)`.
fn balanced_segment(text: &str, start: usize) -> Option<&str> {
    let mut depth = 1usize;
    for (offset, ch) in text[start..].char_indices() {
        match ch {
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Last dotted segment of each positional base, keyword arguments dropped.
fn parse_bases(segment: &str) -> Vec<String> {
    let mut bases = Vec::new();
    let mut depth = 0usize;
    let mut current = String::new();

    for ch in segment.chars().chain(std::iter::once(',')) {
        match ch {
            '(' | '[' | '{' => {
                depth += 1;
                current.push(ch);
            }
            ')' | ']' | '}' => {
                depth = depth.saturating_sub(1);
                current.push(ch);
            }
            ',' if depth == 0 => {
                let base = current.trim();
                if !base.is_empty() && !base.contains('=') {
                    let head = base.split('[').next().unwrap_or(base);
                    if let Some(last) = head.rsplit('.').next() {
                        bases.push(last.trim().to_string());
                    }
                }
                current.clear();
            }
            _ => current.push(ch),
        }
    }

    bases
}

/// Replace comment text and string literal contents with spaces, keeping
/// quotes and newlines so line structure is preserved.
fn blank_strings_and_comments(source: &str) -> String {
    let chars: Vec<char> = source.chars().collect();
    let mut out = String::with_capacity(source.len());
    let mut i = 0;

    while i < chars.len() {
        let ch = chars[i];
        match ch {
            '#' => {
                while i < chars.len() && chars[i] != '\n' {
                    out.push(' ');
                    i += 1;
                }
            }
            '\'' | '"' => {
                let triple = i + 2 < chars.len() && chars[i + 1] == ch && chars[i + 2] == ch;
                let delim_len = if triple { 3 } else { 1 };
                for _ in 0..delim_len {
                    out.push(ch);
                }
                i += delim_len;

                while i < chars.len() {
                    let c = chars[i];
                    if c == '\\' {
                        out.push(' ');
                        if i + 1 < chars.len() {
                            out.push(if chars[i + 1] == '\n' { '\n' } else { ' ' });
                        }
                        i += 2;
                        continue;
                    }
                    if c == ch
                        && (!triple || (i + 2 < chars.len() && chars[i + 1] == ch && chars[i + 2] == ch))
                    {
                        for _ in 0..delim_len {
                            out.push(ch);
                        }
                        i += delim_len;
                        break;
                    }
                    if c == '\n' && !triple {
                        // Unterminated single-line string
                        break;
                    }
                    out.push(if c == '\n' { '\n' } else { ' ' });
                    i += 1;
                }
            }
            _ => {
                out.push(ch);
                i += 1;
            }
        }
    }

    out
}
