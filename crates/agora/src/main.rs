//! Agora: run a moderated discussion in the terminal
//!
//! # Usage
//!
//! ```bash
//! # From a config file
//! agora --config debate.yaml --summary summary.json
//!
//! # Quick session, joining as a human
//! AGORA_LLM_URL=http://localhost:8000/v1 agora \
//!     --topic "Remote work beats the office" \
//!     --agent ada:pro:analytical --agent bob:con:passionate --human carol
//! ```
//!
//! While the session runs, stdin lines are posted as the human's statements.
//! `/vote <candidate> [reason]` casts a ballot and `/close` ends voting early.

mod console;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use coordination::{
    DiscussionMode, Moderator, OpenAiCompatGenerator, ParticipantConfig, SessionConfig, Stance,
    Transcript,
};
use tracing::info;

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Session config file (.yaml, .yml, .toml or .json)
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Discussion topic (overrides the config file)
    #[arg(long)]
    topic: Option<String>,

    /// Agent as ID:STANCE[:PERSONALITY]; repeatable, replaces the config roster's agents
    #[arg(long = "agent", value_name = "ID:STANCE[:PERSONALITY]")]
    agents: Vec<String>,

    /// Join the roster as a human participant with this id
    #[arg(long)]
    human: Option<String>,

    /// Discussion mode: sequential or autonomous
    #[arg(long, value_parser = parse_mode)]
    mode: Option<DiscussionMode>,

    /// Seed for reproducible agent behavior
    #[arg(long)]
    seed: Option<u64>,

    /// Write the session summary as JSON
    #[arg(long)]
    summary: Option<PathBuf>,

    /// Write the full transcript as JSON
    #[arg(long)]
    transcript: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = build_config(&args)?;
    let human = args.human.clone();

    let generator = OpenAiCompatGenerator::new(&config.generator)
        .context("Failed to set up the text generator")?;
    info!(
        endpoint = %config.generator.base_url,
        model = %generator.model(),
        topic = %config.topic,
        "Agora starting"
    );

    let moderator = Moderator::new(config, Arc::new(generator))?;
    let handle = moderator.handle();
    let log = moderator.log();

    let printer = tokio::spawn(console::print_events(moderator.bus().subscribe()));
    let input = tokio::spawn(console::read_input(handle, human));

    let summary = moderator.run().await?;
    input.abort();
    printer.await.context("Event printer failed")?;

    println!();
    println!("{}", summary.summary_line());

    if let Some(path) = &args.summary {
        std::fs::write(path, summary.to_json()?)
            .with_context(|| format!("Failed to write summary to {}", path.display()))?;
        info!(path = %path.display(), "Summary written");
    }
    if let Some(path) = &args.transcript {
        std::fs::write(path, Transcript::capture(&log).to_json()?)
            .with_context(|| format!("Failed to write transcript to {}", path.display()))?;
        info!(path = %path.display(), "Transcript written");
    }
    Ok(())
}

fn build_config(args: &Args) -> Result<SessionConfig> {
    let mut config = match &args.config {
        Some(path) => SessionConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => {
            let Some(topic) = &args.topic else {
                bail!("either --config or --topic is required");
            };
            SessionConfig::new(topic, Vec::new())
        }
    };

    if let Some(topic) = &args.topic {
        config.topic = topic.clone();
    }
    if !args.agents.is_empty() {
        config.participants.retain(|p| !p.is_agent());
        for spec in &args.agents {
            config.participants.push(parse_agent(spec)?);
        }
    }
    if let Some(human) = &args.human {
        if config.participant(human).is_none() {
            config.participants.push(ParticipantConfig::human(human));
        }
    }
    if let Some(mode) = args.mode {
        config.mode = mode;
    }
    if args.seed.is_some() {
        config.seed = args.seed;
    }

    config.validate()?;
    Ok(config)
}

fn parse_agent(spec: &str) -> Result<ParticipantConfig> {
    let mut parts = spec.split(':');
    let id = parts.next().unwrap_or_default().trim();
    if id.is_empty() {
        bail!("agent '{spec}' is missing an id");
    }
    let stance = match parts.next().map(str::trim) {
        Some("pro") => Stance::Pro,
        Some("con") => Stance::Con,
        Some("neutral") | None => Stance::Neutral,
        Some(other) => bail!("agent '{id}' has unknown stance '{other}' (pro, con or neutral)"),
    };
    let personality = parts.next().map(str::trim).unwrap_or("balanced");
    Ok(ParticipantConfig::agent(id, stance, personality))
}

fn parse_mode(value: &str) -> Result<DiscussionMode, String> {
    match value {
        "sequential" => Ok(DiscussionMode::Sequential),
        "autonomous" => Ok(DiscussionMode::Autonomous),
        other => Err(format!("unknown mode '{other}' (sequential or autonomous)")),
    }
}
