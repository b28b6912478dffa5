//! Phone number normalization.
//!
//! Outbound calls accept loosely formatted numbers from API callers. Before a
//! number reaches the SIP trunk it is reduced to E.164 form: a leading `+`
//! followed by 8 to 15 digits.

use thiserror::Error;

const MIN_E164_DIGITS: usize = 8;
const MAX_E164_DIGITS: usize = 15;

/// Digit count of a national number that gets the default country code.
const NATIONAL_NUMBER_DIGITS: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PhoneNumberError {
    #[error("phone number is empty")]
    Empty,

    #[error("phone number contains invalid character {0:?}")]
    InvalidCharacter(char),

    #[error("phone number must have between 8 and 15 digits, got {0}")]
    InvalidLength(usize),
}

/// Normalizes `raw` to E.164.
///
/// Accepts `tel:`/`sip:` prefixes, spaces, dashes, dots and parentheses. A
/// leading `00` is treated as an international prefix. A bare 10-digit
/// national number is prefixed with `default_country_code`.
///
/// # Errors
///
/// Returns [`PhoneNumberError`] if the input is empty, contains characters
/// other than digits and separators, or has an invalid digit count.
pub fn normalize_phone_number(
    raw: &str,
    default_country_code: &str,
) -> Result<String, PhoneNumberError> {
    let trimmed = raw.trim();
    let trimmed = trimmed
        .strip_prefix("tel:")
        .or_else(|| trimmed.strip_prefix("sip:"))
        .unwrap_or(trimmed);
    // Drop any SIP host part.
    let trimmed = trimmed.split('@').next().unwrap_or_default();

    if trimmed.is_empty() {
        return Err(PhoneNumberError::Empty);
    }

    let mut international = false;
    let mut digits = String::with_capacity(trimmed.len());
    for (i, c) in trimmed.chars().enumerate() {
        match c {
            '+' if i == 0 => international = true,
            '0'..='9' => digits.push(c),
            ' ' | '-' | '.' | '(' | ')' => {}
            other => return Err(PhoneNumberError::InvalidCharacter(other)),
        }
    }

    if digits.is_empty() {
        return Err(PhoneNumberError::Empty);
    }

    if !international {
        if let Some(rest) = digits.strip_prefix("00") {
            digits = rest.to_string();
        } else if digits.len() == NATIONAL_NUMBER_DIGITS {
            digits = format!("{}{}", default_country_code.trim_start_matches('+'), digits);
        }
    }

    if !(MIN_E164_DIGITS..=MAX_E164_DIGITS).contains(&digits.len()) {
        return Err(PhoneNumberError::InvalidLength(digits.len()));
    }

    Ok(format!("+{}", digits))
}
