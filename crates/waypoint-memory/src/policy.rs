use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

use crate::types::MemoryClassification;

pub const MAX_CONTENT_CHARS: usize = 10_000;

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("memory content is empty")]
    EmptyContent,
    #[error("memory content exceeds {MAX_CONTENT_CHARS} characters ({actual} given)")]
    ContentTooLong { actual: usize },
    #[error("memory content contains a disallowed injection pattern")]
    InjectionPattern,
    #[error(transparent)]
    Storage(#[from] waypoint_storage::StorageError),
    #[error(transparent)]
    Serde(#[from] serde_json::Error),
    #[error(transparent)]
    Gateway(#[from] waypoint_providers::GatewayError),
}

static INJECTION_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)<script|javascript:|on\w+\s*=\s*['\"]").expect("valid regex")
});

static EMAIL_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").expect("valid regex"));

static CREDIT_CARD_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(?:\d[ -]?){13,16}\b").expect("valid regex"));

static API_KEY_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(?:sk|pk|ghp|xox[bp])-[A-Za-z0-9_-]{10,}\b").expect("valid regex"));

static ASSIGNMENT_SECRET_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)\b(password|token|secret|api_key)\s*[:=]\s*['"]?[^\s'"]+"#)
        .expect("valid regex")
});

/// Validates/sanitizes extracted content and redacts sensitive substrings
/// before persistence. A fixed regex table, matching the spec's named
/// patterns (email, credit card, API-key-shaped token, `password=`/
/// `token=`/`secret=` assignments), distinct from a hash-based redaction
/// helper meant for *logging* rather than content meant to remain readable
/// after redaction.
pub struct MemoryPolicy;

impl MemoryPolicy {
    pub fn validate(content: &str) -> Result<(), MemoryError> {
        if content.trim().is_empty() {
            return Err(MemoryError::EmptyContent);
        }
        if content.chars().count() > MAX_CONTENT_CHARS {
            return Err(MemoryError::ContentTooLong {
                actual: content.chars().count(),
            });
        }
        if INJECTION_PATTERN.is_match(content) {
            return Err(MemoryError::InjectionPattern);
        }
        Ok(())
    }

    pub fn redact(content: &str) -> String {
        let redacted = EMAIL_PATTERN.replace_all(content, "[redacted-email]");
        let redacted = CREDIT_CARD_PATTERN.replace_all(&redacted, "[redacted-card]");
        let redacted = API_KEY_PATTERN.replace_all(&redacted, "[redacted-key]");
        let redacted = ASSIGNMENT_SECRET_PATTERN.replace_all(&redacted, |caps: &regex::Captures| {
            format!("{}=[redacted]", &caps[1].to_lowercase())
        });
        redacted.into_owned()
    }

    /// A piece of content is `Restricted` if redaction changed it (it held
    /// something sensitive), `Internal` otherwise. Passthrough annotation
    /// only; it does not gate retrieval.
    pub fn classify(original: &str, redacted: &str) -> MemoryClassification {
        if original == redacted {
            MemoryClassification::Internal
        } else {
            MemoryClassification::Restricted
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_content() {
        assert!(matches!(
            MemoryPolicy::validate(""),
            Err(MemoryError::EmptyContent)
        ));
    }

    #[test]
    fn rejects_content_over_the_limit() {
        let huge = "a".repeat(MAX_CONTENT_CHARS + 1);
        assert!(matches!(
            MemoryPolicy::validate(&huge),
            Err(MemoryError::ContentTooLong { .. })
        ));
    }

    #[test]
    fn rejects_script_injection() {
        let content = "remember this <script>alert(1)</script>";
        assert!(matches!(
            MemoryPolicy::validate(content),
            Err(MemoryError::InjectionPattern)
        ));
    }

    #[test]
    fn redacts_email_and_marks_restricted() {
        let content = "contact jane@example.com about this";
        let redacted = MemoryPolicy::redact(content);
        assert!(redacted.contains("[redacted-email]"));
        assert_eq!(
            MemoryPolicy::classify(content, &redacted),
            MemoryClassification::Restricted
        );
    }

    #[test]
    fn redacts_secret_assignment() {
        let content = "export token=abcd1234efgh and continue";
        let redacted = MemoryPolicy::redact(content);
        assert!(redacted.contains("token=[redacted]"));
    }

    #[test]
    fn unremarkable_content_is_internal() {
        let content = "the build passed on CI";
        let redacted = MemoryPolicy::redact(content);
        assert_eq!(redacted, content);
        assert_eq!(
            MemoryPolicy::classify(content, &redacted),
            MemoryClassification::Internal
        );
    }
}
