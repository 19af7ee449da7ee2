//! Terminal rendering of session events and stdin commands.

use coordination::{
    CastOutcome, EntryKind, InboundEvent, InboundReply, SessionEvent, SessionHandle,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::warn;

/// Voter id used when no `--human` was given.
const AUDIENCE: &str = "audience";

/// One line typed by the user.
#[derive(Debug, PartialEq)]
pub enum Command<'a> {
    Say(&'a str),
    Vote {
        candidate: &'a str,
        reason: Option<&'a str>,
    },
    CloseVoting,
    /// A raw inbound event as JSON, e.g. piped from another client.
    Event(InboundEvent),
}

pub fn parse_command(line: &str) -> Option<Command<'_>> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    if let Some(rest) = line.strip_prefix("/vote") {
        let rest = rest.trim();
        let (candidate, reason) = match rest.split_once(char::is_whitespace) {
            Some((candidate, reason)) => (candidate, Some(reason.trim()).filter(|r| !r.is_empty())),
            None => (rest, None),
        };
        if candidate.is_empty() {
            return None;
        }
        return Some(Command::Vote { candidate, reason });
    }
    if line == "/close" {
        return Some(Command::CloseVoting);
    }
    if line.starts_with('{') {
        if let Ok(event) = serde_json::from_str::<InboundEvent>(line) {
            return Some(Command::Event(event));
        }
    }
    Some(Command::Say(line))
}

pub fn render(event: &SessionEvent) -> Option<String> {
    match event {
        SessionEvent::EntryAppended {
            sender,
            content,
            sequence,
            kind,
            ..
        } => Some(match kind {
            // Phase entries are rendered from PhaseChanged.
            EntryKind::System if content.starts_with("Phase: ") => return None,
            EntryKind::System => format!("  [{sequence:>4}] ({content})"),
            _ => format!("  [{sequence:>4}] {sender}: {content}"),
        }),
        SessionEvent::PhaseChanged {
            phase,
            time_remaining_secs,
            ..
        } => Some(match time_remaining_secs {
            Some(secs) => format!("\n== {} ({:.0}s) ==", phase, secs),
            None => format!("\n== {} ==", phase),
        }),
        SessionEvent::TallyUpdated {
            counts,
            total,
            is_open,
            ..
        } if *is_open => {
            let counts = counts
                .iter()
                .map(|(c, v)| format!("{c} {v}"))
                .collect::<Vec<_>>()
                .join(" | ");
            Some(format!("  votes ({total}): {counts}"))
        }
        SessionEvent::TallyUpdated { .. } => None,
        SessionEvent::SessionFinished { summary, .. } => Some(format!("\n== finished: {summary} ==")),
    }
}

/// Print events until the session finishes.
pub async fn print_events(mut events: broadcast::Receiver<SessionEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => {
                if let Some(line) = render(&event) {
                    println!("{line}");
                }
                if matches!(event, SessionEvent::SessionFinished { .. }) {
                    break;
                }
            }
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "Terminal fell behind"),
            Err(RecvError::Closed) => break,
        }
    }
}

/// Turn stdin lines into posts and votes until the session finishes.
pub async fn read_input(handle: SessionHandle, human: Option<String>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let voter = human.clone().unwrap_or_else(|| AUDIENCE.to_string());
    loop {
        let line = tokio::select! {
            _ = handle.finished() => break,
            line = lines.next_line() => match line {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "Failed to read stdin");
                    break;
                }
            },
        };
        let event = match parse_command(&line) {
            None => continue,
            Some(Command::CloseVoting) => {
                match handle.close_voting_early() {
                    Some(_) => eprintln!("Voting closed."),
                    None => eprintln!("No vote is open."),
                }
                continue;
            }
            Some(Command::Event(event)) => event,
            Some(Command::Say(text)) => {
                let Some(author) = &human else {
                    eprintln!("Join with --human <id> to post statements.");
                    continue;
                };
                InboundEvent::HumanMessage {
                    author: author.clone(),
                    content: text.to_string(),
                }
            }
            Some(Command::Vote { candidate, reason }) => InboundEvent::CastVote {
                voter: voter.clone(),
                candidate: candidate.to_string(),
                justification: reason.map(str::to_string),
            },
        };
        match handle.dispatch(event) {
            Ok(InboundReply::Posted { truncated: true, .. }) => {
                eprintln!("Posted, trimmed to fit the length limit.")
            }
            Ok(InboundReply::Posted { .. }) => {}
            Ok(InboundReply::Vote { outcome }) => match outcome {
                CastOutcome::Accepted { replaced: true } => eprintln!("Vote changed."),
                CastOutcome::Accepted { .. } => eprintln!("Vote recorded."),
                CastOutcome::Rejected(reason) => eprintln!("Vote rejected: {reason}"),
            },
            Err(e) => eprintln!("Not posted: {e}"),
        }
    }
}
