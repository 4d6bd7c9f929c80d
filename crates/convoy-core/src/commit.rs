//! Commit metadata carried in the commit annotation
//!
//! The document mirrors the GitHub commit API shape so a lookup response can
//! be stored as-is: `{"sha": "...", "commit": {"committer": {"date": "..."}}}`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommitInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit: Option<CommitDetails>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommitDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub committer: Option<CommitSignature>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommitSignature {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<DateTime<Utc>>,
}

impl CommitInfo {
    pub fn from_sha(sha: impl Into<String>) -> Self {
        Self {
            sha: Some(sha.into()),
            commit: None,
        }
    }

    pub fn with_committer_date(mut self, date: DateTime<Utc>) -> Self {
        self.commit = Some(CommitDetails {
            committer: Some(CommitSignature { date: Some(date) }),
        });
        self
    }

    pub fn committer_date(&self) -> Option<DateTime<Utc>> {
        self.commit.as_ref()?.committer.as_ref()?.date
    }

    /// Parse an annotation value, tolerating a bare JSON string sha
    pub fn from_annotation(value: &str) -> Option<Self> {
        match serde_json::from_str::<serde_json::Value>(value).ok()? {
            serde_json::Value::String(sha) => Some(Self::from_sha(sha)),
            other => serde_json::from_value(other).ok(),
        }
    }

    pub fn to_annotation(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }

    /// True when `live` was committed strictly after `self`
    pub fn is_older_than(&self, live: &CommitInfo) -> bool {
        match (live.committer_date(), self.committer_date()) {
            (Some(live), Some(ours)) => live > ours,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_annotation_round_trip() {
        let date = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let info = CommitInfo::from_sha("abc123").with_committer_date(date);
        let parsed = CommitInfo::from_annotation(&info.to_annotation()).unwrap();
        assert_eq!(parsed.committer_date(), Some(date));
        assert_eq!(parsed.sha.as_deref(), Some("abc123"));
    }

    #[test]
    fn test_bare_sha_annotation() {
        let parsed = CommitInfo::from_annotation("\"deadbeef\"").unwrap();
        assert_eq!(parsed.sha.as_deref(), Some("deadbeef"));
        assert_eq!(parsed.committer_date(), None);
    }

    #[test]
    fn test_is_older_than() {
        let early = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let late = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let ours = CommitInfo::from_sha("a").with_committer_date(early);
        let live = CommitInfo::from_sha("b").with_committer_date(late);

        assert!(ours.is_older_than(&live));
        assert!(!live.is_older_than(&ours));
        assert!(!ours.is_older_than(&CommitInfo::from_sha("c")));
    }
}
