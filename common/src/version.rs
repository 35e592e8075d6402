use std::fmt;

/// A published firmware release identifier.
///
/// Tokens carry no ordering: two tokens are either the same release or not.
/// A token is never empty, so an empty fetch result can't be mistaken for a
/// real release.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VersionToken(String);

impl VersionToken {
    /// Trims surrounding whitespace; `None` if nothing is left.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VersionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateDecision {
    UpToDate,
    Available,
}

impl UpdateDecision {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::UpToDate => "UP_TO_DATE",
            Self::Available => "AVAILABLE",
        }
    }
}

/// Any textual difference counts as an update, including a "lower" remote
/// version. No semantic version parsing happens here.
pub fn update_available(current: &str, latest: &str) -> bool {
    current != latest
}

pub fn decide(current: &str, latest: &VersionToken) -> UpdateDecision {
    if update_available(current, latest.as_str()) {
        UpdateDecision::Available
    } else {
        UpdateDecision::UpToDate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_tokens_mean_up_to_date() {
        assert!(!update_available("1.0.0", "1.0.0"));
        assert!(!update_available("", ""));
        assert!(!update_available("v2-β", "v2-β"));
    }

    #[test]
    fn any_difference_is_an_update() {
        let cases = [
            ("1.0.0", "1.0.1"),
            ("1.0.0", "0.9.0"),
            ("1.0.0", "1.0.0 "),
            ("1.0.0", "1.0"),
            ("1.0.0", "V1.0.0"),
            ("", "1"),
            ("1", ""),
            ("v2-β", "v2-b"),
        ];

        for (current, latest) in cases {
            assert!(
                update_available(current, latest),
                "{current:?} vs {latest:?}"
            );
            assert_eq!(
                update_available(current, latest),
                update_available(latest, current)
            );
        }
    }

    #[test]
    fn lower_remote_version_still_triggers_update() {
        let latest = VersionToken::parse("0.9.0").unwrap();
        assert_eq!(decide("1.0.0", &latest), UpdateDecision::Available);
    }

    #[test]
    fn parse_trims_and_rejects_blank() {
        assert_eq!(VersionToken::parse("  1.4.2\r\n").unwrap().as_str(), "1.4.2");
        assert_eq!(VersionToken::parse(""), None);
        assert_eq!(VersionToken::parse(" \t\n"), None);
    }

    #[test]
    fn decide_matches_update_available() {
        let latest = VersionToken::parse("2024.11.3").unwrap();
        assert_eq!(decide("2024.11.3", &latest), UpdateDecision::UpToDate);
        assert_eq!(decide("2024.11.2", &latest), UpdateDecision::Available);
        assert_eq!(UpdateDecision::Available.as_str(), "AVAILABLE");
    }
}
