//! Log entries: the immutable unit of the shared discussion log.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

/// Position of an entry in the global commit order.
pub type Sequence = u64;

/// Free-form structured metadata attached to an entry.
pub type Metadata = BTreeMap<String, serde_json::Value>;

/// What an entry represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntryKind {
    /// A participant speaking (agent or human).
    Statement,
    /// Facilitation text from the moderator.
    Moderator,
    /// Bookkeeping notices: phase changes, skips, failures.
    System,
    /// Voting announcements and results.
    VoteEvent,
}

impl EntryKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Statement => "statement",
            Self::Moderator => "moderator",
            Self::System => "system",
            Self::VoteEvent => "vote-event",
        }
    }
}

impl std::fmt::Display for EntryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EntryKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "statement" => Ok(Self::Statement),
            "moderator" => Ok(Self::Moderator),
            "system" => Ok(Self::System),
            "vote-event" | "vote_event" | "vote" => Ok(Self::VoteEvent),
            other => Err(format!("unknown entry kind: {other}")),
        }
    }
}

/// One committed entry. Never mutated after insertion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub sequence: Sequence,
    pub author: String,
    pub body: String,
    pub kind: EntryKind,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: Metadata,
}

impl Entry {
    /// Whether the body names the participant `matcher` was built for.
    pub fn mentions(&self, matcher: &NameMatcher) -> bool {
        matcher.is_match(&self.body)
    }

    pub fn is_statement(&self) -> bool {
        self.kind == EntryKind::Statement
    }

    /// Metadata string value, if present.
    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(|v| v.as_str())
    }

    /// Single-line rendering used for prompt context and terminal output.
    pub fn render_line(&self) -> String {
        format!("{}: {}", self.author, self.body)
    }
}

/// An entry that has not been committed yet. The log assigns the sequence
/// number and timestamp at commit.
#[derive(Debug, Clone, PartialEq)]
pub struct EntryDraft {
    pub author: String,
    pub body: String,
    pub kind: EntryKind,
    pub metadata: Metadata,
}

impl EntryDraft {
    pub fn new(author: impl Into<String>, body: impl Into<String>, kind: EntryKind) -> Self {
        Self {
            author: author.into(),
            body: body.into(),
            kind,
            metadata: Metadata::new(),
        }
    }

    pub fn statement(author: impl Into<String>, body: impl Into<String>) -> Self {
        Self::new(author, body, EntryKind::Statement)
    }

    pub fn moderator(author: impl Into<String>, body: impl Into<String>) -> Self {
        Self::new(author, body, EntryKind::Moderator)
    }

    pub fn system(author: impl Into<String>, body: impl Into<String>) -> Self {
        Self::new(author, body, EntryKind::System)
    }

    pub fn vote_event(author: impl Into<String>, body: impl Into<String>) -> Self {
        Self::new(author, body, EntryKind::VoteEvent)
    }

    /// Attach a metadata key/value pair.
    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Whole-word, case-insensitive matcher for one participant name, compiled
/// once and reused for every entry scanned.
///
/// Underscores and spaces in the name are interchangeable so that
/// `devils_advocate` also matches "devils advocate".
#[derive(Debug, Clone)]
pub struct NameMatcher {
    pattern: Option<Regex>,
}

impl NameMatcher {
    pub fn new(name: &str) -> Self {
        let name = name.trim().to_lowercase();
        if name.is_empty() {
            return Self { pattern: None };
        }
        let mut variants = vec![name.replace('_', " "), name.replace(' ', "_"), name];
        variants.sort();
        variants.dedup();
        let alternation = variants
            .iter()
            .map(|v| regex::escape(v))
            .collect::<Vec<_>>()
            .join("|");
        let pattern = RegexBuilder::new(&format!(r"\b(?:{alternation})\b"))
            .case_insensitive(true)
            .build()
            .ok();
        Self { pattern }
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.pattern.as_ref().is_some_and(|re| re.is_match(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_round_trips_through_str() {
        for kind in [
            EntryKind::Statement,
            EntryKind::Moderator,
            EntryKind::System,
            EntryKind::VoteEvent,
        ] {
            assert_eq!(kind.as_str().parse::<EntryKind>().unwrap(), kind);
        }
        assert!("chat".parse::<EntryKind>().is_err());
    }

    #[test]
    fn test_kind_serializes_kebab_case() {
        let json = serde_json::to_string(&EntryKind::VoteEvent).unwrap();
        assert_eq!(json, "\"vote-event\"");
    }

    #[test]
    fn test_name_matcher_whole_word_only() {
        let socrates = NameMatcher::new("socrates");
        assert!(socrates.is_match("I think Socrates is wrong"));
        assert!(NameMatcher::new("Socrates").is_match("socrates: reply please"));
        assert!(!socrates.is_match("socratesque reasoning"));
        assert!(NameMatcher::new("devils_advocate").is_match("the devils advocate has a point"));
        assert!(!NameMatcher::new("  ").is_match("anything"));
    }

    #[test]
    fn test_name_matcher_is_reusable_across_entries() {
        let ada = NameMatcher::new("ada");
        let bodies = ["ada, you're wrong", "nobody here", "ADA has a point", "adamant"];
        let hits: Vec<bool> = bodies.iter().map(|b| ada.is_match(b)).collect();
        assert_eq!(hits, vec![true, false, true, false]);
    }

    #[test]
    fn test_draft_metadata() {
        let draft = EntryDraft::statement("ada", "hello").with_meta("phase", "discussion");
        assert_eq!(draft.kind, EntryKind::Statement);
        assert_eq!(
            draft.metadata.get("phase").and_then(|v| v.as_str()),
            Some("discussion")
        );
    }
}
