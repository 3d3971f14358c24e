//! Local PII scrub
//!
//! Used when the language model cannot sanitize a bio (failure or soft
//! deadline). Removes email addresses and 10-digit phone numbers.

use regex::Regex;
use std::borrow::Cow;
use std::sync::OnceLock;

const EMAIL_PATTERN: &str = r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b";
const PHONE_PATTERN: &str = r"\b\d{3}[-.]?\d{3}[-.]?\d{4}\b";

pub const EMAIL_REPLACEMENT: &str = "[email removed]";
pub const PHONE_REPLACEMENT: &str = "[phone removed]";

fn email_regex() -> &'static Regex {
    static EMAIL: OnceLock<Regex> = OnceLock::new();
    EMAIL.get_or_init(|| Regex::new(EMAIL_PATTERN).expect("email pattern is valid"))
}

fn phone_regex() -> &'static Regex {
    static PHONE: OnceLock<Regex> = OnceLock::new();
    PHONE.get_or_init(|| Regex::new(PHONE_PATTERN).expect("phone pattern is valid"))
}

/// Scrubbed text and whether anything was removed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrubOutcome {
    pub text: String,
    pub pii_found: bool,
}

/// Replace emails and phone numbers with placeholders
pub fn scrub_pii(text: &str) -> ScrubOutcome {
    let without_email = email_regex().replace_all(text, EMAIL_REPLACEMENT);
    let email_found = matches!(without_email, Cow::Owned(_));

    let without_phone = phone_regex().replace_all(&without_email, PHONE_REPLACEMENT);
    let phone_found = matches!(without_phone, Cow::Owned(_));

    ScrubOutcome {
        text: without_phone.into_owned(),
        pii_found: email_found || phone_found,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_removes_email_and_phone() {
        let outcome = scrub_pii("Reach me at jane.doe@example.com or 555-123-4567!");
        assert_eq!(outcome.text, "Reach me at [email removed] or [phone removed]!");
        assert!(outcome.pii_found);
    }

    #[test]
    fn test_phone_separators_are_optional() {
        assert_eq!(scrub_pii("call 555.123.4567").text, "call [phone removed]");
        assert_eq!(scrub_pii("call 5551234567").text, "call [phone removed]");
    }

    #[test]
    fn test_clean_text_is_untouched() {
        let outcome = scrub_pii("I write Rust and climb on weekends");
        assert_eq!(outcome.text, "I write Rust and climb on weekends");
        assert!(!outcome.pii_found);
    }

    #[test]
    fn test_short_numbers_are_kept() {
        let outcome = scrub_pii("I have 2 cats and 123 plants");
        assert!(!outcome.pii_found);
    }
}
