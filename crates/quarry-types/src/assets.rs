use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of analyst asset a tool call produces or edits.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AssetKind {
    Metric,
    Dashboard,
    Report,
}

impl AssetKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AssetKind::Metric => "metric",
            AssetKind::Dashboard => "dashboard",
            AssetKind::Report => "report",
        }
    }

    /// Wire name used in message entries, e.g. `metric_file`.
    pub fn file_type(self) -> &'static str {
        match self {
            AssetKind::Metric => "metric_file",
            AssetKind::Dashboard => "dashboard_file",
            AssetKind::Report => "report_file",
        }
    }
}

/// One committed revision of a document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Version {
    pub content: String,
    pub updated_at: DateTime<Utc>,
    pub version_number: u32,
}

/// Append-only log of a document's prior contents, keyed by version number.
///
/// Serialized as a JSON object whose keys are decimal version-number strings
/// (`"1"`, `"2"`, …) to match the stored JSONB shape. Version numbers form a
/// dense, monotonically increasing sequence starting at 1; the current version
/// is the highest key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "BTreeMap<String, Version>", into = "BTreeMap<String, Version>")]
pub struct VersionHistory(BTreeMap<u32, Version>);

impl VersionHistory {
    /// History for a document that was just created: a single version 1.
    pub fn initial(content: impl Into<String>, at: DateTime<Utc>) -> Self {
        let mut map = BTreeMap::new();
        map.insert(
            1,
            Version {
                content: content.into(),
                updated_at: at,
                version_number: 1,
            },
        );
        Self(map)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn latest_version_number(&self) -> u32 {
        self.0.keys().next_back().copied().unwrap_or(0)
    }

    pub fn latest(&self) -> Option<&Version> {
        self.0.values().next_back()
    }

    pub fn get(&self, version_number: u32) -> Option<&Version> {
        self.0.get(&version_number)
    }

    /// Mint the next version. Returns the new version number.
    pub fn push_version(&mut self, content: impl Into<String>, at: DateTime<Utc>) -> u32 {
        let next = self.latest_version_number() + 1;
        self.0.insert(
            next,
            Version {
                content: content.into(),
                updated_at: at,
                version_number: next,
            },
        );
        next
    }

    /// Fold new content into the current version without incrementing the
    /// counter. Used for edits within the turn that created the document.
    /// Returns the (unchanged) current version number.
    pub fn fold_into_latest(&mut self, content: impl Into<String>, at: DateTime<Utc>) -> u32 {
        let current = self.latest_version_number();
        if current == 0 {
            self.0.insert(
                1,
                Version {
                    content: content.into(),
                    updated_at: at,
                    version_number: 1,
                },
            );
            return 1;
        }
        self.0.insert(
            current,
            Version {
                content: content.into(),
                updated_at: at,
                version_number: current,
            },
        );
        current
    }

    pub fn iter(&self) -> impl Iterator<Item = (&u32, &Version)> {
        self.0.iter()
    }
}

impl TryFrom<BTreeMap<String, Version>> for VersionHistory {
    type Error = String;

    fn try_from(map: BTreeMap<String, Version>) -> Result<Self, Self::Error> {
        let mut out = BTreeMap::new();
        for (key, version) in map {
            let number: u32 = key
                .parse()
                .map_err(|_| format!("invalid version key: {key}"))?;
            out.insert(number, version);
        }
        Ok(Self(out))
    }
}

impl From<VersionHistory> for BTreeMap<String, Version> {
    fn from(history: VersionHistory) -> Self {
        history
            .0
            .into_iter()
            .map(|(number, version)| (number.to_string(), version))
            .collect()
    }
}

/// A stored document row: the single cross-process shared resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetDocument {
    pub id: String,
    pub name: String,
    pub kind: AssetKind,
    pub content: String,
    #[serde(default)]
    pub version_history: VersionHistory,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An immutable, timestamped copy of a document's content and version
/// history, used as a consistent base for sequential edits within one turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentSnapshot {
    pub document_id: String,
    pub content: String,
    pub version_history: VersionHistory,
    pub captured_at: DateTime<Utc>,
}

/// One edit in an ordered batch applied to a document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EditOperation {
    #[serde(default)]
    pub operation: EditOp,
    #[serde(default)]
    pub code_to_replace: String,
    pub code: String,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EditOp {
    #[default]
    Replace,
    Append,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_history_round_trips_string_keys() {
        let mut history = VersionHistory::initial("v1", Utc::now());
        history.push_version("v2", Utc::now());

        let json = serde_json::to_value(&history).unwrap();
        assert!(json.get("1").is_some());
        assert!(json.get("2").is_some());

        let back: VersionHistory = serde_json::from_value(json).unwrap();
        assert_eq!(back.latest_version_number(), 2);
        assert_eq!(back.latest().unwrap().content, "v2");
    }

    #[test]
    fn push_version_is_dense_and_monotone() {
        let mut history = VersionHistory::initial("a", Utc::now());
        assert_eq!(history.push_version("b", Utc::now()), 2);
        assert_eq!(history.push_version("c", Utc::now()), 3);
        let numbers: Vec<u32> = history.iter().map(|(n, _)| *n).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
    }

    #[test]
    fn fold_keeps_version_number() {
        let mut history = VersionHistory::initial("draft", Utc::now());
        let folded = history.fold_into_latest("draft, revised", Utc::now());
        assert_eq!(folded, 1);
        assert_eq!(history.len(), 1);
        assert_eq!(history.latest().unwrap().content, "draft, revised");
    }

    #[test]
    fn fold_on_empty_history_creates_version_one() {
        let mut history = VersionHistory::default();
        assert_eq!(history.fold_into_latest("content", Utc::now()), 1);
        assert_eq!(history.latest_version_number(), 1);
    }
}
