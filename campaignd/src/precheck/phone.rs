//! Phone number normalization to E.164.

use thiserror::Error;

/// E.164 allows at most 15 digits; anything under 8 cannot be a routable mobile number.
const MIN_DIGITS: usize = 8;
const MAX_DIGITS: usize = 15;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PhoneError {
    #[error("phone number is empty")]
    Empty,
    #[error("phone number contains invalid characters")]
    InvalidCharacters,
    #[error("phone number has no country code")]
    MissingCountryCode,
    #[error("phone number is too short")]
    TooShort,
    #[error("phone number is too long")]
    TooLong,
}

/// Normalize a phone number to `+<digits>`.
///
/// Spaces, dashes, dots and parentheses are ignored. International numbers are written with a
/// `+` or `00` prefix. A national number gets `default_country_code` (digits only) prepended,
/// with a single trunk `0` dropped; without a default it is rejected.
pub fn normalize_e164(raw: &str, default_country_code: Option<&str>) -> Result<String, PhoneError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(PhoneError::Empty);
    }

    let (international, rest) = match trimmed.strip_prefix('+') {
        Some(rest) => (true, rest),
        None => (false, trimmed),
    };

    let mut digits = String::with_capacity(rest.len());
    for c in rest.chars() {
        match c {
            '0'..='9' => digits.push(c),
            ' ' | '-' | '.' | '(' | ')' => {}
            _ => return Err(PhoneError::InvalidCharacters),
        }
    }

    if digits.is_empty() {
        return Err(PhoneError::Empty);
    }

    let full = if international {
        digits
    } else if let Some(rest) = digits.strip_prefix("00") {
        rest.to_string()
    } else {
        let cc = default_country_code.ok_or(PhoneError::MissingCountryCode)?;
        let national = digits.strip_prefix('0').unwrap_or(&digits);
        format!("{cc}{national}")
    };

    if full.starts_with('0') {
        return Err(PhoneError::MissingCountryCode);
    }
    if full.len() < MIN_DIGITS {
        return Err(PhoneError::TooShort);
    }
    if full.len() > MAX_DIGITS {
        return Err(PhoneError::TooLong);
    }

    Ok(format!("+{full}"))
}
