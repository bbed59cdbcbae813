use serde::{Deserialize, Serialize};
use techie_protocol::{AuditCategory, AuditReport};

/// User-configured strictness. Ordered from most to least demanding:
/// `Basic` asks about everything, `Critical` only about dangerous commands.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SafetyLevel {
    Basic,
    Cautious,
    Critical,
}

impl SafetyLevel {
    pub const ALL: [SafetyLevel; 3] = [SafetyLevel::Basic, SafetyLevel::Cautious, SafetyLevel::Critical];

    /// Parse a persisted value: a level name or its ordinal (`0`..=`2`).
    pub fn from_persisted(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "basic" | "0" => Some(SafetyLevel::Basic),
            "cautious" | "1" => Some(SafetyLevel::Cautious),
            "critical" | "2" => Some(SafetyLevel::Critical),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SafetyLevel::Basic => "basic",
            SafetyLevel::Cautious => "cautious",
            SafetyLevel::Critical => "critical",
        }
    }
}

impl Default for SafetyLevel {
    fn default() -> Self {
        SafetyLevel::Critical
    }
}

/// Whether a command with the given audit report needs explicit approval.
///
/// Commands without a report, or with a category this client does not
/// recognise, are judged by the category alone and so never match.
pub fn requires_approval(level: SafetyLevel, report: Option<&AuditReport>) -> bool {
    let Some(category) = report.map(|r| r.category) else {
        return false;
    };

    match level {
        SafetyLevel::Basic => matches!(
            category,
            AuditCategory::Safe | AuditCategory::Warning | AuditCategory::Danger
        ),
        SafetyLevel::Cautious => matches!(category, AuditCategory::Warning | AuditCategory::Danger),
        SafetyLevel::Critical => category == AuditCategory::Danger,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(category: AuditCategory) -> AuditReport {
        AuditReport {
            category,
            reason: String::new(),
        }
    }

    #[test]
    fn test_rule_table() {
        use AuditCategory::*;
        use SafetyLevel::*;

        let cases = [
            (Basic, Safe, true),
            (Basic, Warning, true),
            (Basic, Danger, true),
            (Cautious, Safe, false),
            (Cautious, Warning, true),
            (Cautious, Danger, true),
            (Critical, Safe, false),
            (Critical, Warning, false),
            (Critical, Danger, true),
        ];

        for (level, category, expected) in cases {
            assert_eq!(
                requires_approval(level, Some(&report(category))),
                expected,
                "{:?} / {:?}",
                level,
                category
            );
        }
    }

    #[test]
    fn test_danger_always_requires_approval() {
        for level in SafetyLevel::ALL {
            assert!(requires_approval(level, Some(&report(AuditCategory::Danger))));
        }
    }

    #[test]
    fn test_monotonic_in_level() {
        // A stricter level never asks about fewer categories than a looser one.
        for category in [AuditCategory::Safe, AuditCategory::Warning, AuditCategory::Danger] {
            let r = report(category);
            for pair in SafetyLevel::ALL.windows(2) {
                let (stricter, looser) = (pair[0], pair[1]);
                if requires_approval(looser, Some(&r)) {
                    assert!(requires_approval(stricter, Some(&r)));
                }
            }
        }
    }

    #[test]
    fn test_missing_or_unknown_report() {
        for level in SafetyLevel::ALL {
            assert!(!requires_approval(level, None));
            assert!(!requires_approval(level, Some(&report(AuditCategory::Unknown))));
        }
    }

    #[test]
    fn test_level_ordering() {
        assert!(SafetyLevel::Basic < SafetyLevel::Cautious);
        assert!(SafetyLevel::Cautious < SafetyLevel::Critical);
        assert_eq!(SafetyLevel::default(), SafetyLevel::Critical);
    }

    #[test]
    fn test_from_persisted() {
        assert_eq!(SafetyLevel::from_persisted("0"), Some(SafetyLevel::Basic));
        assert_eq!(SafetyLevel::from_persisted(" Cautious "), Some(SafetyLevel::Cautious));
        assert_eq!(SafetyLevel::from_persisted("critical"), Some(SafetyLevel::Critical));
        assert_eq!(SafetyLevel::from_persisted("7"), None);
    }
}
