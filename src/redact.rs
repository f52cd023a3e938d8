//! Best-effort statement sanitization
//!
//! Redacts password material from statement text before it reaches the
//! audit log. This is a heuristic scrub, not a SQL parser — obfuscated
//! statements can evade it, and the audit trail treats stored query text
//! as display-only.

use regex::Regex;

const REDACTED: &str = "'***'";

/// Statement sanitizer with patterns compiled once at construction
pub struct Redactor {
    patterns: Vec<Regex>,
}

impl Default for Redactor {
    fn default() -> Self {
        // Keyword, optional separator, then a quoted or bare value.
        let patterns = [
            r#"(?i)\b(identified\s+by)(\s+)('[^']*'|"[^"]*"|[^\s,;)]+)"#,
            r#"(?i)\b(password|passwd|pwd)(\s*[:=]\s*|\s+)('[^']*'|"[^"]*"|[^\s,;)]+)"#,
        ]
        .iter()
        .filter_map(|p| Regex::new(p).ok())
        .collect();
        Self { patterns }
    }
}

impl Redactor {
    /// Replace password values in `statement` with `'***'`
    pub fn redact(&self, statement: &str) -> String {
        let mut out = statement.to_string();
        for pattern in &self.patterns {
            out = pattern
                .replace_all(&out, format!("${{1}}${{2}}{}", REDACTED))
                .into_owned();
        }
        out
    }
}
