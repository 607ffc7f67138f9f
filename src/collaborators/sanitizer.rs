use regex::Regex;

use super::Sanitizer;

/// Regex-based PII and secret redaction.
///
/// Rules run in order; each replacement is a fixed marker that no later rule
/// matches, so sanitizing already-sanitized text is a no-op.
pub struct PatternSanitizer {
    rules: Vec<(Regex, &'static str)>,
}

const RULES: &[(&str, &str)] = &[
    (
        r"-----BEGIN [A-Z ]*PRIVATE KEY-----[\s\S]*?-----END [A-Z ]*PRIVATE KEY-----",
        "[REDACTED_PRIVATE_KEY]",
    ),
    (r"(?i)\bbearer\s+[A-Za-z0-9\-._~+/]+=*", "Bearer [REDACTED_TOKEN]"),
    (
        r"(?i)\b(password|passwd|pwd|secret|api[_-]?key|access[_-]?key|token)\b\s*[:=]\s*\S+",
        "${1}=[REDACTED]",
    ),
    (r"\bAKIA[0-9A-Z]{16}\b", "[REDACTED_AWS_KEY]"),
    (
        r"\b[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}\b",
        "[REDACTED_EMAIL]",
    ),
    (r"\b(?:\d{1,3}\.){3}\d{1,3}\b", "[REDACTED_IP]"),
];

impl PatternSanitizer {
    /// Compile the redaction rules.
    pub fn new() -> Result<Self, regex::Error> {
        let rules = RULES
            .iter()
            .map(|(pattern, replacement)| Ok((Regex::new(pattern)?, *replacement)))
            .collect::<Result<Vec<_>, regex::Error>>()?;
        Ok(Self { rules })
    }
}

impl Sanitizer for PatternSanitizer {
    fn sanitize(&self, text: &str) -> String {
        self.rules
            .iter()
            .fold(text.to_string(), |acc, (regex, replacement)| {
                regex.replace_all(&acc, *replacement).into_owned()
            })
    }
}
