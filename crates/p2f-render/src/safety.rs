//! Advisory safety scan over generated scene source.
//!
//! This is a textual deny-list, not a sandbox. It catches the obvious
//! filesystem, process, network and interpreter-escape primitives an LLM might
//! emit, and nothing more: obfuscated code passes straight through. Rendering
//! must still run with the privileges of an untrusted workload.

use metrics::counter;
use regex::Regex;
use serde::Serialize;
use tracing::warn;

use crate::error::{RenderError, RenderResult};
use crate::names;

/// Default source size limit, in bytes.
pub const DEFAULT_MAX_SOURCE_BYTES: usize = 10_000;

/// Imports generated source may use.
pub const DEFAULT_ALLOWED_IMPORTS: &[&str] = &[
    "from manim import *",
    "import random",
    "import numpy as np",
    "import math",
];

/// (rule name, pattern) pairs for the deny-list.
const DENY_PATTERNS: &[(&str, &str)] = &[
    ("file_io", r"\b(open|file)\s*\("),
    ("os_module", r"\b(os|sys|subprocess|shutil|pathlib)\s*\."),
    ("network", r"\b(urllib|requests|socket)\b|\bhttp\."),
    ("dynamic_exec", r"\b(exec|eval|compile)\s*\(|__import__"),
    ("introspection", r"\b(globals|locals|vars)\s*\(\s*\)"),
    ("shell", r"\b(system|popen)\s*\(|\bshell\s*="),
    ("interpreter_internals", r"__(file|path|dict|class|builtins|subclasses|globals)__"),
];

/// What to do when the scan finds something.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SafetyPolicy {
    /// Fail the render with a validation error.
    #[default]
    Reject,
    /// Log findings and render anyway.
    LogOnly,
}

/// One deny-list hit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SafetyFinding {
    pub rule: String,
    /// 1-based line number
    pub line: usize,
    pub excerpt: String,
}

/// Result of a scan.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SafetyReport {
    pub findings: Vec<SafetyFinding>,
}

impl SafetyReport {
    pub fn is_clean(&self) -> bool {
        self.findings.is_empty()
    }

    /// One-line description of the first findings.
    pub fn summary(&self) -> String {
        self.findings
            .iter()
            .take(3)
            .map(|f| format!("{} (line {})", f.rule, f.line))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Deny-list scanner with an import allow-list and a size limit.
#[derive(Debug, Clone)]
pub struct SafetyScanner {
    rules: Vec<(String, Regex)>,
    allowed_imports: Vec<String>,
    max_source_bytes: usize,
    policy: SafetyPolicy,
}

impl Default for SafetyScanner {
    fn default() -> Self {
        Self::new(SafetyPolicy::default())
    }
}

impl SafetyScanner {
    pub fn new(policy: SafetyPolicy) -> Self {
        let rules = DENY_PATTERNS
            .iter()
            .filter_map(|(name, pattern)| match Regex::new(pattern) {
                Ok(regex) => Some((name.to_string(), regex)),
                Err(e) => {
                    warn!(rule = name, error = %e, "Skipping invalid safety pattern");
                    None
                }
            })
            .collect();

        Self {
            rules,
            allowed_imports: DEFAULT_ALLOWED_IMPORTS.iter().map(|s| s.to_string()).collect(),
            max_source_bytes: DEFAULT_MAX_SOURCE_BYTES,
            policy,
        }
    }

    pub fn with_max_source_bytes(mut self, max: usize) -> Self {
        self.max_source_bytes = max;
        self
    }

    pub fn with_allowed_imports<I, S>(mut self, imports: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_imports = imports.into_iter().map(Into::into).collect();
        self
    }

    pub fn policy(&self) -> SafetyPolicy {
        self.policy
    }

    /// Scan `source` and report every hit.
    pub fn scan(&self, source: &str) -> SafetyReport {
        let mut findings = Vec::new();

        if source.len() > self.max_source_bytes {
            findings.push(SafetyFinding {
                rule: "source_too_large".to_string(),
                line: 0,
                excerpt: format!("{} bytes > {}", source.len(), self.max_source_bytes),
            });
        }

        for (index, raw_line) in source.lines().enumerate() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if (line.starts_with("import ") || line.starts_with("from ")) && !self.import_allowed(line) {
                findings.push(finding("unauthorized_import", index, line));
            }

            for (rule, regex) in &self.rules {
                if regex.is_match(line) {
                    findings.push(finding(rule, index, line));
                }
            }
        }

        SafetyReport { findings }
    }

    /// Scan `source` and apply the policy.
    pub fn check(&self, source: &str) -> RenderResult<SafetyReport> {
        let report = self.scan(source);
        if report.is_clean() {
            return Ok(report);
        }

        for f in &report.findings {
            counter!(names::SAFETY_FINDINGS_TOTAL, "rule" => f.rule.clone()).increment(1);
        }
        warn!(
            findings = report.findings.len(),
            summary = %report.summary(),
            policy = ?self.policy,
            "Safety scan flagged generated source"
        );

        match self.policy {
            SafetyPolicy::Reject => Err(RenderError::UnsafeSource(report.summary())),
            SafetyPolicy::LogOnly => Ok(report),
        }
    }

    fn import_allowed(&self, line: &str) -> bool {
        let statement = line.split('#').next().unwrap_or(line);
        let statement = statement.split_whitespace().collect::<Vec<_>>().join(" ");
        self.allowed_imports.iter().any(|allowed| *allowed == statement)
    }
}

fn finding(rule: &str, index: usize, line: &str) -> SafetyFinding {
    SafetyFinding {
        rule: rule.to_string(),
        line: index + 1,
        excerpt: line.chars().take(80).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CLEAN: &str = "from manim import *\nimport numpy as np  # points\n\nclass Demo(Scene):\n    def construct(self):\n        self.play(Create(Circle()))\n";

    #[test]
    fn test_clean_source_passes() {
        let scanner = SafetyScanner::default();
        let report = scanner.check(CLEAN).unwrap();
        assert!(report.is_clean());
    }

    #[test]
    fn test_deny_list_hits() {
        let scanner = SafetyScanner::new(SafetyPolicy::LogOnly);
        let source = "from manim import *\nclass A(Scene):\n    def construct(self):\n        os.remove('x')\n        eval('1')\n        print(self.__class__)\n";

        let rules: Vec<String> = scanner.scan(source).findings.into_iter().map(|f| f.rule).collect();
        assert!(rules.contains(&"os_module".to_string()));
        assert!(rules.contains(&"dynamic_exec".to_string()));
        assert!(rules.contains(&"interpreter_internals".to_string()));
    }

    #[test]
    fn test_unauthorized_import() {
        let scanner = SafetyScanner::default();
        let source = "from manim import *\nimport pickle\nclass A(Scene):\n    pass\n";

        let err = scanner.check(source).unwrap_err();
        assert!(matches!(err, RenderError::UnsafeSource(ref s) if s.contains("unauthorized_import")));
    }

    #[test]
    fn test_log_only_policy_allows_render() {
        let scanner = SafetyScanner::new(SafetyPolicy::LogOnly);
        let report = scanner.check("import subprocess\n").unwrap();
        assert!(!report.is_clean());
    }

    #[test]
    fn test_size_limit() {
        let scanner = SafetyScanner::default().with_max_source_bytes(16);
        let report = scanner.scan(CLEAN);
        assert_eq!(report.findings[0].rule, "source_too_large");
    }

    #[test]
    fn test_identifiers_containing_keywords_are_not_flagged() {
        let scanner = SafetyScanner::default();
        let source = "from manim import *\nclass A(Scene):\n    def construct(self):\n        evaluate = 1\n        self.opening = Circle()\n        positions = [1]\n";
        assert!(scanner.scan(source).is_clean());
    }
}
