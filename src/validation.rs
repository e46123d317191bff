//! Input validation for booking contact details.
//!
//! A raw string only becomes a [`ValidatedField`] by passing through one of the
//! `validate_*` functions below, so anything stored in a booking session has
//! already been checked.

use std::sync::LazyLock;

use regex::Regex;

/// Maximum email length (RFC 5321 path limit).
pub const MAX_EMAIL_LEN: usize = 254;

const NAME_MIN_CHARS: usize = 2;
const NAME_MAX_CHARS: usize = 100;
const PHONE_MIN_DIGITS: usize = 7;
const PHONE_MAX_DIGITS: usize = 15;

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}$").expect("valid email regex")
});

/// A contact detail that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidatedField {
    Name(String),
    Email(String),
    Phone(String),
}

impl ValidatedField {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Name(s) | Self::Email(s) | Self::Phone(s) => s,
        }
    }
}

/// Why a value was rejected. The reason is user-facing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{reason}")]
pub struct Invalid {
    pub reason: String,
}

impl Invalid {
    fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Validate a person's name: 2–100 characters of letters, spaces, hyphens,
/// apostrophes or dots.
pub fn validate_name(input: &str) -> Result<ValidatedField, Invalid> {
    let name = input.trim();
    if name.is_empty() {
        return Err(Invalid::new("Name cannot be empty."));
    }

    let len = name.chars().count();
    if len < NAME_MIN_CHARS {
        return Err(Invalid::new(format!(
            "Name is too short (at least {NAME_MIN_CHARS} characters)."
        )));
    }
    if len > NAME_MAX_CHARS {
        return Err(Invalid::new(format!(
            "Name is too long (at most {NAME_MAX_CHARS} characters)."
        )));
    }

    if name
        .chars()
        .filter(|c| !c.is_whitespace())
        .all(|c| c.is_ascii_digit())
    {
        return Err(Invalid::new("Name cannot be just a number."));
    }

    let allowed = |c: char| c.is_alphabetic() || matches!(c, ' ' | '-' | '\'' | '.');
    if !name.chars().all(allowed) {
        return Err(Invalid::new(
            "Name may contain only letters, spaces, hyphens, apostrophes and dots.",
        ));
    }
    if !name.chars().any(char::is_alphabetic) {
        return Err(Invalid::new("Name must contain at least one letter."));
    }

    Ok(ValidatedField::Name(name.to_string()))
}

/// Validate an email address against a `local@domain.tld` pattern.
pub fn validate_email(input: &str) -> Result<ValidatedField, Invalid> {
    let email = input.trim();
    if email.is_empty() {
        return Err(Invalid::new("Email cannot be empty."));
    }
    if email.chars().count() > MAX_EMAIL_LEN {
        return Err(Invalid::new(format!(
            "Email is too long (at most {MAX_EMAIL_LEN} characters)."
        )));
    }
    if !EMAIL_RE.is_match(email) {
        return Err(Invalid::new(
            "That doesn't look like an email address. Example: name@example.com",
        ));
    }
    Ok(ValidatedField::Email(email.to_string()))
}

/// Validate a phone number: digits with an optional leading `+`, separated by
/// spaces, hyphens or parentheses, 7–15 digits in total.
pub fn validate_phone(input: &str) -> Result<ValidatedField, Invalid> {
    let phone = input.trim();
    if phone.is_empty() {
        return Err(Invalid::new("Phone number cannot be empty."));
    }

    let body = phone.strip_prefix('+').unwrap_or(phone);
    if !body
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, ' ' | '-' | '(' | ')'))
    {
        return Err(Invalid::new(
            "Phone number may contain only digits, an optional leading +, spaces, hyphens and parentheses.",
        ));
    }

    let digits = body.chars().filter(char::is_ascii_digit).count();
    if !(PHONE_MIN_DIGITS..=PHONE_MAX_DIGITS).contains(&digits) {
        return Err(Invalid::new(format!(
            "Phone number must have between {PHONE_MIN_DIGITS} and {PHONE_MAX_DIGITS} digits."
        )));
    }

    Ok(ValidatedField::Phone(phone.to_string()))
}

/// Strip control characters (keeping newlines and tabs), cap the length in
/// characters and trim.
pub fn sanitize_input(text: &str, max_len: usize) -> String {
    let cleaned: String = text
        .chars()
        .filter(|c| !c.is_control() || matches!(c, '\n' | '\t'))
        .take(max_len)
        .collect();
    cleaned.trim().to_string()
}
