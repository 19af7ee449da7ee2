//! Personality table: named probability modifiers looked up by tag.
//!
//! A personality is data: an overall multiplier, conditional modifiers keyed
//! by [`Signal`], expertise keywords and default burning questions. New
//! personalities come from configuration overrides without code changes.

use std::collections::BTreeMap;

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::signals::{Signal, Signals};

/// Number of burning questions sampled when none are configured.
pub const DEFAULT_BURNING_QUESTIONS: usize = 3;

const FALLBACK_LINES: &[&str] = &[
    "I want to come back to {topic}; there is more here than we have covered.",
    "That's a fascinating point! I have thoughts on this...",
    "Wait, there are some important aspects of {topic} we should consider!",
    "I've been listening and I really want to add something here.",
];

/// How a modifier changes the probability.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Effect {
    Multiply(f64),
    Add(f64),
}

/// A modifier applied when `when` fires.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Modifier {
    pub when: Signal,
    pub effect: Effect,
}

impl Modifier {
    pub fn multiply(when: Signal, factor: f64) -> Self {
        Self {
            when,
            effect: Effect::Multiply(factor),
        }
    }

    pub fn add(when: Signal, amount: f64) -> Self {
        Self {
            when,
            effect: Effect::Add(amount),
        }
    }
}

fn one() -> f64 {
    1.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonalityProfile {
    /// Unconditional multiplier.
    #[serde(default = "one")]
    pub multiplier: f64,
    #[serde(default)]
    pub modifiers: Vec<Modifier>,
    /// Words that make this personality feel its expertise is needed.
    #[serde(default)]
    pub expertise: Vec<String>,
    #[serde(default)]
    pub burning_questions: Vec<String>,
}

impl Default for PersonalityProfile {
    fn default() -> Self {
        Self {
            multiplier: 1.0,
            modifiers: Vec::new(),
            expertise: Vec::new(),
            burning_questions: Vec::new(),
        }
    }
}

impl PersonalityProfile {
    fn new(multiplier: f64) -> Self {
        Self {
            multiplier,
            ..Self::default()
        }
    }

    fn modifier(mut self, modifier: Modifier) -> Self {
        self.modifiers.push(modifier);
        self
    }

    fn expertise(mut self, words: &[&str]) -> Self {
        self.expertise = words.iter().map(|w| w.to_string()).collect();
        self
    }

    fn questions(mut self, questions: &[&str]) -> Self {
        self.burning_questions = questions.iter().map(|q| q.to_string()).collect();
        self
    }

    /// Sum of additive modifiers whose signal fired.
    pub fn additive(&self, signals: &Signals) -> f64 {
        self.modifiers
            .iter()
            .filter(|m| signals.fired(m.when))
            .filter_map(|m| match m.effect {
                Effect::Add(amount) => Some(amount),
                Effect::Multiply(_) => None,
            })
            .sum()
    }

    /// Product of the base multiplier and every multiplicative modifier
    /// whose signal fired.
    pub fn multiplier(&self, signals: &Signals) -> f64 {
        self.modifiers
            .iter()
            .filter(|m| signals.fired(m.when))
            .fold(self.multiplier, |acc, m| match m.effect {
                Effect::Multiply(factor) => acc * factor,
                Effect::Add(_) => acc,
            })
    }
}

/// Lookup table from personality tag to profile.
#[derive(Debug, Clone, PartialEq)]
pub struct PersonalityTable {
    profiles: BTreeMap<String, PersonalityProfile>,
    fallback: PersonalityProfile,
}

impl PersonalityTable {
    /// The built-in personalities.
    pub fn builtin() -> Self {
        let analytical_questions = [
            "Where's the data to support this?",
            "What does the research actually show?",
            "How do we measure success here?",
            "What are the real-world numbers?",
            "What evidence contradicts this?",
        ];

        let mut profiles = BTreeMap::new();
        profiles.insert("aggressive".to_string(), PersonalityProfile::new(1.4));
        profiles.insert("assertive".to_string(), PersonalityProfile::new(1.4));
        profiles.insert(
            "passionate".to_string(),
            PersonalityProfile::new(1.5)
                .expertise(&["amazing", "incredible", "urgent", "important", "critical", "essential"])
                .questions(&[
                    "This could change everything!",
                    "Why aren't we acting faster?",
                    "The benefits are obvious!",
                    "This is exactly what people need!",
                    "We're talking about real lives here!",
                ]),
        );
        profiles.insert(
            "philosophical".to_string(),
            PersonalityProfile::new(1.0)
                .modifier(Modifier::multiply(Signal::Question, 1.6))
                .expertise(&["meaning", "purpose", "ethics", "moral", "should", "ought", "values", "principle"])
                .questions(&[
                    "What does this mean for human purpose?",
                    "Are we considering the deeper implications?",
                    "What assumptions are we making here?",
                    "How does this change what it means to work?",
                    "What are the ethical dimensions we're missing?",
                ]),
        );
        profiles.insert(
            "analytical".to_string(),
            PersonalityProfile::new(1.1)
                .modifier(Modifier::multiply(Signal::Expertise, 1.4))
                .expertise(&["data", "evidence", "study", "research", "statistics", "proof", "numbers", "facts"])
                .questions(&analytical_questions),
        );
        profiles.insert(
            "critical".to_string(),
            PersonalityProfile::new(1.2)
                .modifier(Modifier::multiply(Signal::StanceChallenged, 1.2))
                .expertise(&["assume", "problem", "issue", "concern", "risk", "wrong", "flaw"])
                .questions(&[
                    "What could go wrong with this?",
                    "What are the hidden costs?",
                    "Who gets left behind in this scenario?",
                    "What problems are we creating?",
                    "Are we being realistic about challenges?",
                ]),
        );
        profiles.insert(
            "diplomatic".to_string(),
            PersonalityProfile::new(1.1)
                .modifier(Modifier::multiply(Signal::StanceChallenged, 1.2))
                .expertise(&["balance", "compromise", "middle", "together", "common"])
                .questions(&[
                    "How can we find common ground?",
                    "What if we're both right?",
                    "Can we build on each other's ideas?",
                    "Where do our perspectives overlap?",
                    "What would a compromise look like?",
                ]),
        );

        Self {
            profiles,
            fallback: PersonalityProfile::new(1.0).questions(&analytical_questions),
        }
    }

    /// Replace or add profiles by tag.
    pub fn with_overrides(mut self, overrides: &BTreeMap<String, PersonalityProfile>) -> Self {
        for (tag, profile) in overrides {
            self.profiles.insert(tag.to_lowercase(), profile.clone());
        }
        self
    }

    /// Profile for `tag`: exact match first, then the first known tag
    /// contained in it ("philosophical skeptic" → philosophical), else the
    /// neutral fallback.
    pub fn resolve(&self, tag: &str) -> &PersonalityProfile {
        let tag = tag.trim().to_lowercase();
        if let Some(profile) = self.profiles.get(&tag) {
            return profile;
        }
        self.profiles
            .iter()
            .find(|(key, _)| tag.contains(key.as_str()))
            .map(|(_, profile)| profile)
            .unwrap_or(&self.fallback)
    }

    /// Sample burning questions for `tag`, used when none are configured.
    pub fn sample_questions<R: Rng + ?Sized>(&self, tag: &str, count: usize, rng: &mut R) -> Vec<String> {
        let mut pool = self.resolve(tag).burning_questions.clone();
        if pool.is_empty() {
            pool = self.fallback.burning_questions.clone();
        }
        pool.shuffle(rng);
        pool.truncate(count);
        pool
    }
}

impl Default for PersonalityTable {
    fn default() -> Self {
        Self::builtin()
    }
}

/// A canned statement used when generation keeps failing.
pub fn fallback_line<R: Rng + ?Sized>(topic: &str, rng: &mut R) -> String {
    let line = FALLBACK_LINES
        .choose(rng)
        .copied()
        .unwrap_or("I'd like to add something here.");
    line.replace("{topic}", topic)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_resolve_exact_contains_and_fallback() {
        let table = PersonalityTable::builtin();
        assert_eq!(table.resolve("Passionate").multiplier, 1.5);
        assert_eq!(table.resolve("philosophical skeptic").expertise[0], "meaning");
        assert_eq!(table.resolve("laid back").multiplier, 1.0);
    }

    #[test]
    fn test_conditional_multiplier_applies_only_when_fired() {
        let table = PersonalityTable::builtin();
        let philosopher = table.resolve("philosophical");

        let quiet = Signals::default();
        assert_eq!(philosopher.multiplier(&quiet), 1.0);

        let asked = Signals {
            question: true,
            ..Signals::default()
        };
        assert!((philosopher.multiplier(&asked) - 1.6).abs() < 1e-9);
    }

    #[test]
    fn test_overrides_are_data() {
        let mut overrides = BTreeMap::new();
        overrides.insert(
            "Contrarian".to_string(),
            PersonalityProfile {
                multiplier: 0.5,
                modifiers: vec![Modifier::add(Signal::StanceChallenged, 0.3)],
                ..PersonalityProfile::default()
            },
        );
        let table = PersonalityTable::builtin().with_overrides(&overrides);
        let profile = table.resolve("contrarian");
        let challenged = Signals {
            stance_challenged: true,
            ..Signals::default()
        };
        assert_eq!(profile.multiplier(&challenged), 0.5);
        assert!((profile.additive(&challenged) - 0.3).abs() < 1e-9);
    }

    #[test]
    fn test_sample_questions_is_seeded() {
        let table = PersonalityTable::builtin();
        let mut a = StdRng::seed_from_u64(7);
        let mut b = StdRng::seed_from_u64(7);
        let qa = table.sample_questions("critical", DEFAULT_BURNING_QUESTIONS, &mut a);
        let qb = table.sample_questions("critical", DEFAULT_BURNING_QUESTIONS, &mut b);
        assert_eq!(qa.len(), 3);
        assert_eq!(qa, qb);
    }

    #[test]
    fn test_fallback_line_mentions_topic_or_is_generic() {
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..10 {
            let line = fallback_line("remote work", &mut rng);
            assert!(!line.contains("{topic}"));
        }
    }
}
