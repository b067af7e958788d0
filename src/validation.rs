//! Contact-field validation shared by callback and rating submission.
use phonenumber::country::Id as CountryId;
use phonenumber::Mode;
use regex::Regex;
use std::sync::OnceLock;

use crate::errors::AppError;

/// Longest free-text purpose accepted on a callback request.
pub const MAX_PURPOSE_LEN: usize = 2000;

/// Longest rating comment accepted.
pub const MAX_COMMENT_LEN: usize = 4000;

fn email_regex() -> &'static Regex {
    static EMAIL: OnceLock<Regex> = OnceLock::new();
    // RFC 5322 simplified email regex: local@domain.tld
    EMAIL.get_or_init(|| {
        Regex::new(
            r"^[a-zA-Z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)+$",
        )
        .expect("email regex is valid")
    })
}

/// Validate email address
///
/// Checks for:
/// - Minimum length and an `@`
/// - Simplified RFC 5322 local part
/// - A dotted domain
pub fn is_valid_email(email: &str) -> bool {
    if email.len() < 5 || email.len() > 254 || !email.contains('@') {
        return false;
    }

    if !email_regex().is_match(email) {
        tracing::debug!("Invalid email format: {}", email);
        return false;
    }

    true
}

/// Validate and normalize a phone number to E.164.
///
/// Numbers without a leading `+` are parsed in `region`.
pub fn normalize_phone(raw: &str, region: CountryId) -> Result<String, AppError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.len() < 7 {
        return Err(AppError::Validation("requesterPhone is too short".to_string()));
    }

    match phonenumber::parse(Some(region), trimmed) {
        Ok(number) if phonenumber::is_valid(&number) => {
            let formatted = number.format().mode(Mode::E164).to_string();
            tracing::debug!("Valid phone: {} -> {}", raw, formatted);
            Ok(formatted)
        }
        Ok(_) => Err(AppError::Validation(format!(
            "requesterPhone '{}' is not a valid phone number",
            raw
        ))),
        Err(e) => Err(AppError::Validation(format!(
            "requesterPhone '{}' could not be parsed: {:?}",
            raw, e
        ))),
    }
}

/// Trims a required text field, rejecting it when blank.
pub fn required_text(value: Option<&str>, field: &'static str) -> Result<String, AppError> {
    match value.map(str::trim) {
        None => Err(AppError::MissingField(field)),
        Some("") => Err(AppError::Validation(format!("{} must not be blank", field))),
        Some(v) => Ok(v.to_string()),
    }
}

/// Trims an optional text field, mapping blank to `None`.
pub fn optional_text(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Checks that a score is an integer in `[1, 5]`.
pub fn score(value: i64, field: &str) -> Result<i16, AppError> {
    if (1..=5).contains(&value) {
        Ok(value as i16)
    } else {
        Err(AppError::Validation(format!(
            "{} must be an integer between 1 and 5, got {}",
            field, value
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_emails() {
        assert!(is_valid_email("user@example.com"));
        assert!(is_valid_email("test.user@example.com"));
        assert!(is_valid_email("user+tag@example.co.uk"));
        assert!(is_valid_email("a@b.co"));
    }

    #[test]
    fn test_invalid_emails() {
        assert!(!is_valid_email("userexample.com"));
        assert!(!is_valid_email("user@examplecom"));
        assert!(!is_valid_email("@example.com"));
        assert!(!is_valid_email("user@"));
        assert!(!is_valid_email("user @example.com"));
        assert!(!is_valid_email(""));
    }

    #[test]
    fn test_phone_normalization() {
        let normalized = normalize_phone("(201) 555-0123", CountryId::US).unwrap();
        assert_eq!(normalized, "+12015550123");

        let normalized = normalize_phone("+44 7400 123456", CountryId::US).unwrap();
        assert_eq!(normalized, "+447400123456");

        assert!(normalize_phone("12", CountryId::US).is_err());
        assert!(normalize_phone("not a phone", CountryId::US).is_err());
    }

    #[test]
    fn test_score_range() {
        assert_eq!(score(1, "score").unwrap(), 1);
        assert_eq!(score(5, "score").unwrap(), 5);
        assert!(score(0, "score").is_err());
        assert!(score(6, "score").is_err());
    }

    #[test]
    fn test_required_text() {
        assert!(matches!(
            required_text(None, "purpose"),
            Err(AppError::MissingField("purpose"))
        ));
        assert!(matches!(
            required_text(Some("  "), "purpose"),
            Err(AppError::Validation(_))
        ));
        assert_eq!(required_text(Some(" hi "), "purpose").unwrap(), "hi");
    }
}
