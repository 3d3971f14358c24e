//! Onboarding submission accepted by the ingestion endpoint

use serde::{Deserialize, Serialize};

/// A user's onboarding profile, immutable once accepted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    pub user_id: String,
    /// Free-text bio as typed by the user (may contain PII)
    #[serde(alias = "bio")]
    pub raw_bio: String,
    #[serde(default)]
    pub interest_tags: Vec<String>,
    pub city: String,
    pub timezone: String,
}

impl Submission {
    /// Trim identity and locality fields
    ///
    /// Realtime connections register the trimmed user id, so the task,
    /// channel key and published result must carry the same form.
    pub fn normalize(&mut self) {
        for field in [&mut self.user_id, &mut self.city, &mut self.timezone] {
            let trimmed = field.trim();
            if trimmed.len() != field.len() {
                *field = trimmed.to_string();
            }
        }
    }

    /// Check the fields the pipeline cannot run without
    ///
    /// Returns the name of the first missing field.
    pub fn missing_field(&self) -> Option<&'static str> {
        if self.user_id.trim().is_empty() {
            Some("user_id")
        } else if self.city.trim().is_empty() {
            Some("city")
        } else if self.timezone.trim().is_empty() {
            Some("timezone")
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bio_alias_and_default_tags() {
        let submission: Submission = serde_json::from_str(
            r#"{"user_id":"u1","bio":"hello","city":"Austin","timezone":"America/Chicago"}"#,
        )
        .unwrap();
        assert_eq!(submission.raw_bio, "hello");
        assert!(submission.interest_tags.is_empty());
        assert_eq!(submission.missing_field(), None);
    }

    #[test]
    fn test_normalize_trims_identity_and_locality() {
        let mut submission = Submission {
            user_id: " alice\t".to_string(),
            raw_bio: "  keep me  ".to_string(),
            interest_tags: vec![],
            city: "Austin ".to_string(),
            timezone: " America/Chicago".to_string(),
        };
        submission.normalize();

        assert_eq!(submission.user_id, "alice");
        assert_eq!(submission.city, "Austin");
        assert_eq!(submission.timezone, "America/Chicago");
        assert_eq!(submission.raw_bio, "  keep me  ");
    }

    #[test]
    fn test_blank_city_is_reported() {
        let submission = Submission {
            user_id: "u1".to_string(),
            raw_bio: String::new(),
            interest_tags: vec![],
            city: "  ".to_string(),
            timezone: "UTC".to_string(),
        };
        assert_eq!(submission.missing_field(), Some("city"));
    }
}
