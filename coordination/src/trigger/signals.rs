//! Conversational signals an agent reacts to.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::Stance;
use crate::message_log::{Entry, EntryKind, NameMatcher};

/// Words that challenge a `pro` speaker.
const CHALLENGES_PRO: &[&str] = &[
    "wrong", "disagree", "against", "oppose", "bad idea", "fails", "problem", "no", "but", "however",
];

/// Words that challenge a `con` speaker.
const CHALLENGES_CON: &[&str] = &[
    "agree", "support", "favor", "good idea", "beneficial", "works", "success", "yes", "exactly",
    "true",
];

const STOPWORDS: &[&str] = &[
    "about", "after", "being", "could", "every", "other", "should", "their", "there", "these",
    "thing", "those", "we're", "what's", "where", "where's", "which", "while", "would",
];

/// Named signal used as a key in the personality table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Signal {
    Mentioned,
    StanceChallenged,
    Question,
    Expertise,
    BurningQuestion,
    RivalSpoke,
    Underdog,
    Dominant,
}

/// What the agent noticed in the recent window.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Signals {
    /// 1.0 for a mention in the latest entry, decaying toward 0 with every
    /// entry since; 0 when not mentioned.
    pub mention_recency: f64,
    pub stance_challenged: bool,
    pub question: bool,
    pub expertise: bool,
    pub burning_question: bool,
    /// Highest rivalry score among rivals who spoke recently.
    pub rival_score: f64,
    pub underdog: bool,
    /// This agent's share of recent statements.
    pub own_share: f64,
    pub dominant: bool,
}

impl Signals {
    pub fn fired(&self, signal: Signal) -> bool {
        match signal {
            Signal::Mentioned => self.mention_recency > 0.0,
            Signal::StanceChallenged => self.stance_challenged,
            Signal::Question => self.question,
            Signal::Expertise => self.expertise,
            Signal::BurningQuestion => self.burning_question,
            Signal::RivalSpoke => self.rival_score > 0.0,
            Signal::Underdog => self.underdog,
            Signal::Dominant => self.dominant,
        }
    }
}

/// Significant words of the burning questions, used for matching.
pub fn keywords(questions: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    questions
        .iter()
        .flat_map(|q| tokenize(q))
        .filter(|w| w.chars().count() >= 5 && !STOPWORDS.contains(&w.as_str()))
        .filter(|w| seen.insert(w.clone()))
        .collect()
}

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !(c.is_alphanumeric() || c == '\''))
        .map(|w| w.trim_matches('\''))
        .filter(|w| !w.is_empty())
        .map(String::from)
        .collect()
}

/// Whole-word lookup for single words, substring lookup for phrases.
fn has_term(lower: &str, words: &HashSet<String>, term: &str) -> bool {
    if term.contains(' ') {
        lower.contains(term)
    } else {
        words.contains(term)
    }
}

fn has_any(text: &str, terms: &[impl AsRef<str>]) -> bool {
    let lower = text.to_lowercase();
    let words: HashSet<String> = tokenize(&lower).into_iter().collect();
    terms
        .iter()
        .any(|t| has_term(&lower, &words, &t.as_ref().to_lowercase()))
}

/// Per-agent signal detection. Built once per engine.
#[derive(Debug, Clone)]
pub struct SignalDetector {
    pub agent_id: String,
    /// Matches the agent's own name in other entries.
    pub name: NameMatcher,
    pub stance: Stance,
    pub expertise: Vec<String>,
    pub burning_keywords: Vec<String>,
    /// Entries considered "recent" for mentions, challenges and questions.
    pub recent_window: usize,
    pub underdog_after: Duration,
    pub dominance_threshold: f64,
}

impl SignalDetector {
    /// Inspect `recent` (oldest first). `silent_for` is `None` when the
    /// agent has never spoken.
    pub fn detect(
        &self,
        recent: &[Entry],
        rivalry: &HashMap<String, f64>,
        silent_for: Option<Duration>,
    ) -> Signals {
        let mut signals = Signals::default();
        let skip = recent.len().saturating_sub(self.recent_window.max(1));
        let window = &recent[skip..];

        let others: Vec<&Entry> = window
            .iter()
            .filter(|e| e.author != self.agent_id && e.kind != EntryKind::System)
            .collect();

        if let Some(distance) = window
            .iter()
            .rev()
            .position(|e| e.author != self.agent_id && e.mentions(&self.name))
        {
            signals.mention_recency = 1.0 - distance as f64 / window.len() as f64;
        }

        if let Some(latest) = others.last() {
            signals.question = latest.body.contains('?');
            signals.expertise =
                !self.expertise.is_empty() && has_any(&latest.body, self.expertise.as_slice());
        }

        let challenge_terms: &[&str] = match self.stance {
            Stance::Pro => CHALLENGES_PRO,
            Stance::Con => CHALLENGES_CON,
            Stance::Neutral => &[],
        };
        let other_statements: Vec<&&Entry> = others.iter().filter(|e| e.is_statement()).collect();
        signals.stance_challenged = !challenge_terms.is_empty()
            && other_statements
                .iter()
                .any(|e| has_any(&e.body, challenge_terms));
        signals.burning_question = !self.burning_keywords.is_empty()
            && others
                .iter()
                .any(|e| has_any(&e.body, self.burning_keywords.as_slice()));

        signals.rival_score = other_statements
            .iter()
            .filter_map(|e| rivalry.get(&e.author).copied())
            .fold(0.0, f64::max);

        signals.underdog = !other_statements.is_empty()
            && silent_for.map_or(true, |silent| silent >= self.underdog_after);

        let statements: Vec<&Entry> = recent.iter().filter(|e| e.is_statement()).collect();
        if !statements.is_empty() {
            let own = statements
                .iter()
                .filter(|e| e.author == self.agent_id)
                .count();
            signals.own_share = own as f64 / statements.len() as f64;
            signals.dominant = statements.len() >= 3 && signals.own_share > self.dominance_threshold;
        }

        signals
    }
}
