//! Identifier whitelist for table and column names.
//!
//! Table and column names cannot be bound as parameters, so every name that is
//! interpolated into generated SQL goes through [`validate_identifier`] first.

use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

static ALLOWED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_.*\s(),]+$").expect("identifier pattern is valid"));

static KEYWORDS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(DROP|DELETE|INSERT|UPDATE|ALTER|TRUNCATE|CREATE|EXEC|EXECUTE|UNION|GRANT|REVOKE|ATTACH|DETACH|PRAGMA)\b",
    )
    .expect("keyword pattern is valid")
});

/// An identifier rejected by the whitelist.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid identifier `{identifier}`: {reason}")]
pub struct IdentifierError {
    /// The rejected identifier.
    pub identifier: String,
    /// Why it was rejected.
    pub reason: &'static str,
}

impl IdentifierError {
    fn new(identifier: &str, reason: &'static str) -> Self {
        Self {
            identifier: identifier.to_string(),
            reason,
        }
    }
}

/// Validates a table or column name before it is interpolated into SQL.
///
/// Letters, digits, `_`, `.`, `*`, whitespace, parentheses and commas are
/// accepted. Quotes, statement terminators, comment sequences and dangerous
/// keywords standing as whole words are rejected.
///
/// # Errors
///
/// Returns an [`IdentifierError`] describing the first rule the name breaks.
pub fn validate_identifier(identifier: &str) -> Result<(), IdentifierError> {
    if identifier.trim().is_empty() {
        return Err(IdentifierError::new(identifier, "identifier is empty"));
    }
    if identifier.contains(['\'', '"', '`']) {
        return Err(IdentifierError::new(identifier, "quotes are not allowed"));
    }
    if identifier.contains(';') {
        return Err(IdentifierError::new(
            identifier,
            "statement terminators are not allowed",
        ));
    }
    if identifier.contains("--") || identifier.contains("/*") || identifier.contains("*/") {
        return Err(IdentifierError::new(
            identifier,
            "comment sequences are not allowed",
        ));
    }
    if !ALLOWED.is_match(identifier) {
        return Err(IdentifierError::new(
            identifier,
            "only letters, digits, `_`, `.`, `*`, spaces, parentheses and commas are allowed",
        ));
    }
    if KEYWORDS.is_match(identifier) {
        return Err(IdentifierError::new(
            identifier,
            "SQL keywords are not allowed",
        ));
    }
    Ok(())
}

/// Validates every identifier in order, stopping at the first failure.
///
/// # Errors
///
/// Returns the error for the first rejected identifier.
pub fn validate_identifiers<'a, I>(identifiers: I) -> Result<(), IdentifierError>
where
    I: IntoIterator<Item = &'a str>,
{
    identifiers.into_iter().try_for_each(validate_identifier)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_names() {
        for name in ["id", "author_id", "posts.author_id", "COUNT(*)", "a, b"] {
            assert!(validate_identifier(name).is_ok(), "{name}");
        }
    }

    #[test]
    fn rejects_injection_attempts() {
        let err = validate_identifier("author_id; DROP TABLE authors; --").unwrap_err();
        assert_eq!(err.reason, "statement terminators are not allowed");

        assert!(validate_identifier("id' OR '1'='1").is_err());
        assert!(validate_identifier("id -- comment").is_err());
        assert!(validate_identifier("id /* x */").is_err());
        assert!(validate_identifier("id union select").is_err());
        assert!(validate_identifier("").is_err());
        assert!(validate_identifier("id=1").is_err());
    }

    #[test]
    fn keywords_only_match_whole_words() {
        assert!(validate_identifier("updated_at").is_ok());
        assert!(validate_identifier("created_by").is_ok());
        assert!(validate_identifier("dropped").is_ok());
        assert!(validate_identifier("drop").is_err());
    }
}
