//! Phone number normalization for the `WhatsApp` wire format
//!
//! The provider addresses recipients as bare digit strings with the country
//! code and no `+`. Domestic mobiles typed by operators (`612 345 678`) or
//! numbers with an international `00` prefix are folded into that form.

/// Country code prepended to 9-digit domestic mobiles
pub const DEFAULT_COUNTRY_CODE: &str = "34";

/// Shortest accepted normalized number
const MIN_LEN: usize = 10;

/// Longest accepted normalized number (E.164 limit)
const MAX_LEN: usize = 15;

/// Normalize a free-form phone string using the default country code
#[must_use]
pub fn normalize(raw: &str) -> String {
    normalize_with_country(raw, DEFAULT_COUNTRY_CODE)
}

/// Normalize a free-form phone string into a digit-only provider number
///
/// Strips every non-digit, drops a leading `00`, and prefixes
/// `country_code` onto 9-digit numbers starting with `6` or `7`.
#[must_use]
pub fn normalize_with_country(raw: &str, country_code: &str) -> String {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();

    let digits = if digits.starts_with("00") {
        digits[2..].to_string()
    } else {
        digits
    };

    if digits.len() == 9 && (digits.starts_with('6') || digits.starts_with('7')) {
        return format!("{country_code}{digits}");
    }

    digits
}

/// Whether a normalized number can be dispatched to
#[must_use]
pub fn is_valid(normalized: &str) -> bool {
    (MIN_LEN..=MAX_LEN).contains(&normalized.len())
        && normalized.chars().all(|c| c.is_ascii_digit())
}

/// Trailing digits used for best-effort customer matching
///
/// Stored customer phones are inconsistently prefixed, so linkage compares
/// only the national significant part.
#[must_use]
pub fn match_suffix(normalized: &str) -> &str {
    const SUFFIX_LEN: usize = 9;
    normalized
        .len()
        .checked_sub(SUFFIX_LEN)
        .map_or(normalized, |start| &normalized[start..])
}
