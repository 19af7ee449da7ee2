//! Session configuration
//!
//! One serde tree describing a whole discussion: topic, roster, phase
//! budgets, autonomous tuning, personality overrides, voting and the
//! generator endpoint. Every section has defaults, so a file only needs the
//! topic and the roster. Loaded from YAML or TOML; `${VAR}` references are
//! substituted from the environment before parsing.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::generation::RetryPolicy;
use crate::trigger::personality::PersonalityProfile;

/// Errors raised while loading or validating configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Unsupported config format: {0} (expected .yaml, .yml, .toml or .json)")]
    UnsupportedFormat(String),

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Environment variable {0} referenced in config is not set")]
    MissingEnv(String),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantRole {
    #[default]
    Agent,
    Human,
    Moderator,
}

impl std::fmt::Display for ParticipantRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Agent => write!(f, "agent"),
            Self::Human => write!(f, "human"),
            Self::Moderator => write!(f, "moderator"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stance {
    Pro,
    Con,
    #[default]
    Neutral,
}

impl std::fmt::Display for Stance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pro => write!(f, "pro"),
            Self::Con => write!(f, "con"),
            Self::Neutral => write!(f, "neutral"),
        }
    }
}

/// How the discussion phase hands out the floor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscussionMode {
    /// Round-robin structured turns.
    Sequential,
    /// Every agent decides for itself when to speak.
    #[default]
    Autonomous,
}

fn default_personality() -> String {
    "balanced".to_string()
}

fn default_max_tokens() -> u32 {
    120
}

fn default_temperature() -> f32 {
    0.8
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantConfig {
    pub id: String,
    #[serde(default)]
    pub role: ParticipantRole,
    /// Required for agents.
    #[serde(default)]
    pub stance: Option<Stance>,
    #[serde(default = "default_personality")]
    pub personality: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Sampled from the personality table when empty.
    #[serde(default)]
    pub burning_questions: Vec<String>,
    #[serde(default)]
    pub rivals: Vec<String>,
}

impl ParticipantConfig {
    pub fn agent(id: &str, stance: Stance, personality: &str) -> Self {
        Self {
            id: id.to_string(),
            role: ParticipantRole::Agent,
            stance: Some(stance),
            personality: personality.to_string(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            burning_questions: Vec::new(),
            rivals: Vec::new(),
        }
    }

    pub fn human(id: &str) -> Self {
        Self {
            role: ParticipantRole::Human,
            stance: None,
            ..Self::agent(id, Stance::Neutral, "human")
        }
    }

    pub fn is_agent(&self) -> bool {
        self.role == ParticipantRole::Agent
    }

    pub fn is_moderator(&self) -> bool {
        self.role == ParticipantRole::Moderator
    }

    pub fn stance(&self) -> Stance {
        self.stance.unwrap_or_default()
    }
}

/// Phase budgets, in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhaseConfig {
    pub intro_secs: f64,
    /// Deadline for one structured turn.
    pub turn_secs: f64,
    /// How long before a turn deadline the time warning is posted.
    pub warning_lead_secs: f64,
    /// Deadline misses before a turn is forcibly passed.
    pub max_misses: u32,
    pub discussion_secs: f64,
    /// Pause between sequential discussion turns.
    pub turn_gap_ms: u64,
}

impl Default for PhaseConfig {
    fn default() -> Self {
        Self {
            intro_secs: 5.0,
            turn_secs: 60.0,
            warning_lead_secs: 15.0,
            max_misses: 2,
            discussion_secs: 600.0,
            turn_gap_ms: 1000,
        }
    }
}

impl PhaseConfig {
    pub fn intro(&self) -> Duration {
        secs(self.intro_secs)
    }

    pub fn turn(&self) -> Duration {
        secs(self.turn_secs)
    }

    pub fn warning_lead(&self) -> Duration {
        secs(self.warning_lead_secs)
    }

    pub fn discussion(&self) -> Duration {
        secs(self.discussion_secs)
    }

    pub fn turn_gap(&self) -> Duration {
        Duration::from_millis(self.turn_gap_ms)
    }
}

/// Tuning for the autonomous discussion mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutonomousTuning {
    pub tick_ms: u64,
    pub min_cooldown_secs: f64,
    pub max_cooldown_secs: f64,
    pub silence_timeout_secs: f64,
    pub base_probability: f64,
    pub burning_question_bonus: f64,
    pub mention_bonus: f64,
    pub rivalry_bonus: f64,
    pub underdog_bonus: f64,
    pub underdog_after_secs: f64,
    pub energy_weight: f64,
    pub frustration_weight: f64,
    pub energy_decay_per_sec: f64,
    pub energy_gain: f64,
    pub frustration_step: f64,
    /// Share of recent statements above which an agent backs off.
    pub dominance_threshold: f64,
    /// Multiplier applied when dominant.
    pub dominance_penalty: f64,
    pub max_probability: f64,
    /// Entries shown to the generator.
    pub context_window: usize,
    /// Entries scanned for mentions, challenges and questions.
    pub recent_window: usize,
    pub max_interruptions: usize,
    pub interruption_window_secs: f64,
    pub fallback_on_failure: bool,
    /// Remaining-time marks that get an announcement.
    pub time_marks_secs: Vec<u64>,
}

impl Default for AutonomousTuning {
    fn default() -> Self {
        Self {
            tick_ms: 2000,
            min_cooldown_secs: 5.0,
            max_cooldown_secs: 12.0,
            silence_timeout_secs: 8.0,
            base_probability: 0.2,
            burning_question_bonus: 0.2,
            mention_bonus: 0.6,
            rivalry_bonus: 0.3,
            underdog_bonus: 0.2,
            underdog_after_secs: 30.0,
            energy_weight: 0.1,
            frustration_weight: 0.2,
            energy_decay_per_sec: 0.005,
            energy_gain: 0.1,
            frustration_step: 0.1,
            dominance_threshold: 0.4,
            dominance_penalty: 0.5,
            max_probability: 0.95,
            context_window: 10,
            recent_window: 5,
            max_interruptions: 4,
            interruption_window_secs: 10.0,
            fallback_on_failure: true,
            time_marks_secs: vec![300, 120, 60],
        }
    }
}

impl AutonomousTuning {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub fn min_cooldown(&self) -> Duration {
        secs(self.min_cooldown_secs)
    }

    pub fn max_cooldown(&self) -> Duration {
        secs(self.max_cooldown_secs)
    }

    pub fn silence_timeout(&self) -> Duration {
        secs(self.silence_timeout_secs)
    }

    pub fn underdog_after(&self) -> Duration {
        secs(self.underdog_after_secs)
    }

    pub fn interruption_window(&self) -> Duration {
        secs(self.interruption_window_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VotingConfig {
    pub enabled: bool,
    pub duration_secs: f64,
    pub require_justification: bool,
    pub anonymous: bool,
    /// Eligible voters outside the roster.
    pub audience_size: u32,
    pub update_interval_secs: f64,
}

impl Default for VotingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            duration_secs: 60.0,
            require_justification: false,
            anonymous: false,
            audience_size: 0,
            update_interval_secs: 5.0,
        }
    }
}

impl VotingConfig {
    pub fn duration(&self) -> Duration {
        secs(self.duration_secs)
    }

    pub fn update_interval(&self) -> Duration {
        secs(self.update_interval_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub retention: usize,
    pub subscriber_capacity: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            retention: crate::message_log::DEFAULT_RETENTION,
            subscriber_capacity: crate::message_log::DEFAULT_SUBSCRIBER_CAPACITY,
        }
    }
}

/// OpenAI-compatible endpoint plus retry policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    pub base_url: String,
    pub model: String,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    /// HTTP client timeout.
    pub timeout_secs: u64,
    pub max_attempts: u32,
    pub attempt_timeout_secs: f64,
    pub backoff_ms: u64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            base_url: std::env::var("AGORA_LLM_URL")
                .unwrap_or_else(|_| "http://localhost:8080/v1".into()),
            model: std::env::var("AGORA_LLM_MODEL").unwrap_or_else(|_| "gpt-4o-mini".into()),
            api_key: std::env::var("AGORA_LLM_API_KEY")
                .or_else(|_| std::env::var("OPENAI_API_KEY"))
                .ok(),
            timeout_secs: 60,
            max_attempts: 2,
            attempt_timeout_secs: 30.0,
            backoff_ms: 500,
        }
    }
}

impl GeneratorConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::default()
            .with_max_attempts(self.max_attempts)
            .with_attempt_timeout(secs(self.attempt_timeout_secs))
            .with_backoff(Duration::from_millis(self.backoff_ms))
    }
}

fn default_moderator_name() -> String {
    "Moderator".to_string()
}

fn default_max_message_chars() -> usize {
    5000
}

/// Top-level session configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub topic: String,
    #[serde(default = "default_moderator_name")]
    pub moderator_name: String,
    #[serde(default)]
    pub mode: DiscussionMode,
    pub participants: Vec<ParticipantConfig>,
    #[serde(default)]
    pub phases: PhaseConfig,
    #[serde(default)]
    pub autonomous: AutonomousTuning,
    /// Extra or replacement personality profiles keyed by tag.
    #[serde(default)]
    pub personalities: BTreeMap<String, PersonalityProfile>,
    #[serde(default)]
    pub voting: VotingConfig,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub generator: GeneratorConfig,
    #[serde(default = "default_max_message_chars")]
    pub max_message_chars: usize,
    /// Seed for every random draw; random when unset.
    #[serde(default)]
    pub seed: Option<u64>,
}

impl SessionConfig {
    /// Minimal config with defaults everywhere else.
    pub fn new(topic: &str, participants: Vec<ParticipantConfig>) -> Self {
        Self {
            topic: topic.to_string(),
            moderator_name: default_moderator_name(),
            mode: DiscussionMode::default(),
            participants,
            phases: PhaseConfig::default(),
            autonomous: AutonomousTuning::default(),
            personalities: BTreeMap::new(),
            voting: VotingConfig::default(),
            log: LogConfig::default(),
            generator: GeneratorConfig::default(),
            max_message_chars: default_max_message_chars(),
            seed: None,
        }
    }

    /// Load and validate a config file. The format follows the extension.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let text = substitute_env(&raw)?;

        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_lowercase();
        let config: Self = match ext.as_str() {
            "yaml" | "yml" => {
                serde_yaml::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string()))?
            }
            "toml" => toml::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string()))?,
            "json" => serde_json::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string()))?,
            other => return Err(ConfigError::UnsupportedFormat(other.to_string())),
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations a session cannot run with.
    pub fn validate(&self) -> ConfigResult<()> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.topic.trim().is_empty() {
            return invalid("topic must not be empty".into());
        }
        if self.moderator_name.trim().is_empty() {
            return invalid("moderator_name must not be empty".into());
        }
        if !self.participants.iter().any(|p| !p.is_moderator()) {
            return invalid("at least one non-moderator participant is required".into());
        }

        let mut ids = HashSet::new();
        for p in &self.participants {
            if p.id.trim().is_empty() {
                return invalid("participant id must not be empty".into());
            }
            if p.id == self.moderator_name {
                return invalid(format!("participant id '{}' collides with the moderator", p.id));
            }
            if !ids.insert(p.id.as_str()) {
                return invalid(format!("duplicate participant id '{}'", p.id));
            }
            if p.is_agent() && p.stance.is_none() {
                return invalid(format!("agent '{}' needs a stance", p.id));
            }
            if !(0.0..=2.0).contains(&p.temperature) {
                return invalid(format!("temperature of '{}' must be in [0, 2]", p.id));
            }
        }

        let positive = [
            ("phases.intro_secs", self.phases.intro_secs),
            ("phases.turn_secs", self.phases.turn_secs),
            ("phases.discussion_secs", self.phases.discussion_secs),
            ("autonomous.min_cooldown_secs", self.autonomous.min_cooldown_secs),
            ("autonomous.max_cooldown_secs", self.autonomous.max_cooldown_secs),
            ("autonomous.silence_timeout_secs", self.autonomous.silence_timeout_secs),
            ("autonomous.interruption_window_secs", self.autonomous.interruption_window_secs),
            ("voting.duration_secs", self.voting.duration_secs),
            ("voting.update_interval_secs", self.voting.update_interval_secs),
            ("generator.attempt_timeout_secs", self.generator.attempt_timeout_secs),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return invalid(format!("{name} must be > 0"));
            }
        }
        let non_negative = [
            ("phases.warning_lead_secs", self.phases.warning_lead_secs),
            ("autonomous.underdog_after_secs", self.autonomous.underdog_after_secs),
            ("autonomous.energy_decay_per_sec", self.autonomous.energy_decay_per_sec),
        ];
        for (name, value) in non_negative {
            if !(value.is_finite() && value >= 0.0) {
                return invalid(format!("{name} must be >= 0"));
            }
        }

        if self.autonomous.min_cooldown_secs > self.autonomous.max_cooldown_secs {
            return invalid("autonomous.min_cooldown_secs must not exceed max_cooldown_secs".into());
        }
        if self.phases.turn_gap_ms == 0 {
            return invalid("phases.turn_gap_ms must be > 0".into());
        }
        if self.autonomous.tick_ms == 0 {
            return invalid("autonomous.tick_ms must be > 0".into());
        }

        let probabilities = [
            ("autonomous.base_probability", self.autonomous.base_probability),
            ("autonomous.max_probability", self.autonomous.max_probability),
            ("autonomous.dominance_threshold", self.autonomous.dominance_threshold),
            ("autonomous.dominance_penalty", self.autonomous.dominance_penalty),
        ];
        for (name, value) in probabilities {
            if !(0.0..=1.0).contains(&value) {
                return invalid(format!("{name} must be in [0, 1]"));
            }
        }

        if self.log.retention == 0 {
            return invalid("log.retention must be >= 1".into());
        }
        if self.log.subscriber_capacity == 0 {
            return invalid("log.subscriber_capacity must be >= 1".into());
        }
        if self.phases.max_misses == 0 {
            return invalid("phases.max_misses must be >= 1".into());
        }
        if self.generator.max_attempts == 0 {
            return invalid("generator.max_attempts must be >= 1".into());
        }
        if self.max_message_chars < 16 {
            return invalid("max_message_chars must be >= 16".into());
        }
        Ok(())
    }

    pub fn participant(&self, id: &str) -> Option<&ParticipantConfig> {
        self.participants.iter().find(|p| p.id == id)
    }

    pub fn agents(&self) -> impl Iterator<Item = &ParticipantConfig> {
        self.participants.iter().filter(|p| p.is_agent())
    }

    /// Everyone who speaks in structured turns, in roster order.
    pub fn speakers(&self) -> impl Iterator<Item = &ParticipantConfig> {
        self.participants.iter().filter(|p| !p.is_moderator())
    }

    /// Vote candidates: every non-moderator participant.
    pub fn candidates(&self) -> Vec<String> {
        self.speakers().map(|p| p.id.clone()).collect()
    }

    /// Roster minus moderators, plus the configured audience.
    pub fn eligible_voters(&self) -> u32 {
        self.speakers().count() as u32 + self.voting.audience_size
    }
}

/// Replace `${VAR}` references with environment values.
pub fn substitute_env(text: &str) -> ConfigResult<String> {
    let re = regex::Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}")
        .map_err(|e| ConfigError::Parse(e.to_string()))?;

    for caps in re.captures_iter(text) {
        let name = &caps[1];
        if std::env::var(name).is_err() {
            return Err(ConfigError::MissingEnv(name.to_string()));
        }
    }
    Ok(re
        .replace_all(text, |caps: &regex::Captures| {
            std::env::var(&caps[1]).unwrap_or_default()
        })
        .into_owned())
}

fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(Duration::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn roster() -> Vec<ParticipantConfig> {
        vec![
            ParticipantConfig::agent("ada", Stance::Pro, "analytical"),
            ParticipantConfig::agent("bob", Stance::Con, "critical"),
        ]
    }

    fn write_config(suffix: &str, contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = SessionConfig::new("Remote work", roster());
        assert!(config.validate().is_ok());
        assert_eq!(config.candidates(), vec!["ada", "bob"]);
        assert_eq!(config.eligible_voters(), 2);
    }

    #[test]
    fn test_load_yaml_with_defaults() {
        let file = write_config(
            ".yaml",
            r#"
topic: Should cities ban cars?
mode: sequential
participants:
  - id: ada
    stance: pro
    personality: passionate
    rivals: [bob]
  - id: bob
    stance: con
  - id: carol
    role: human
voting:
  audience_size: 3
"#,
        );
        let config = SessionConfig::load(file.path()).unwrap();
        assert_eq!(config.mode, DiscussionMode::Sequential);
        assert_eq!(config.participants[0].rivals, vec!["bob"]);
        assert_eq!(config.participants[1].personality, "balanced");
        assert_eq!(config.participants[2].role, ParticipantRole::Human);
        assert_eq!(config.eligible_voters(), 6);
        assert_eq!(config.phases.max_misses, 2);
    }

    #[test]
    fn test_load_toml_with_env_substitution() {
        std::env::set_var("AGORA_TEST_TOPIC", "Four-day week");
        let file = write_config(
            ".toml",
            r#"
topic = "${AGORA_TEST_TOPIC}"

[[participants]]
id = "ada"
stance = "neutral"

[autonomous]
min_cooldown_secs = 1.0
max_cooldown_secs = 2.0
"#,
        );
        let config = SessionConfig::load(file.path()).unwrap();
        assert_eq!(config.topic, "Four-day week");
        assert_eq!(config.autonomous.max_cooldown(), Duration::from_secs(2));
        assert_eq!(config.autonomous.base_probability, 0.2);
    }

    #[test]
    fn test_missing_env_and_unknown_format() {
        let err = substitute_env("topic: ${AGORA_TEST_DEFINITELY_UNSET}").unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnv(name) if name == "AGORA_TEST_DEFINITELY_UNSET"));

        let file = write_config(".ini", "topic=x");
        assert!(matches!(
            SessionConfig::load(file.path()),
            Err(ConfigError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_validation_rejects_bad_configs() {
        let mut config = SessionConfig::new("  ", roster());
        assert!(config.validate().is_err());

        config = SessionConfig::new("t", vec![]);
        assert!(config.validate().is_err());

        let mut dupes = roster();
        dupes.push(ParticipantConfig::agent("ada", Stance::Pro, "x"));
        assert!(SessionConfig::new("t", dupes).validate().is_err());

        let mut stanceless = roster();
        stanceless[0].stance = None;
        assert!(SessionConfig::new("t", stanceless).validate().is_err());

        config = SessionConfig::new("t", roster());
        config.autonomous.min_cooldown_secs = 20.0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("min_cooldown_secs"));

        config = SessionConfig::new("t", roster());
        config.autonomous.base_probability = 1.5;
        assert!(config.validate().is_err());

        config = SessionConfig::new("t", roster());
        config.phases.max_misses = 0;
        assert!(config.validate().is_err());

        config = SessionConfig::new("t", roster());
        config.log.retention = 0;
        assert!(config.validate().is_err());
    }
}
