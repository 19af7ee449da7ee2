//! Prompt construction for chat-style generators.

use super::{GenerationRequest, Purpose};
use crate::config::Stance;

/// System prompt: who the speaker is and how they talk.
pub fn system_prompt(request: &GenerationRequest) -> String {
    let stance = match request.stance {
        Stance::Pro => "You argue in favor of the topic.",
        Stance::Con => "You argue against the topic.",
        Stance::Neutral => "You stay neutral and probe both sides.",
    };

    let mut prompt = format!(
        "You are {}, a participant in a live moderated discussion.\n\
         Topic: {}\n\
         {}\n\
         Personality: {}. Let it show in your tone.\n\
         Keep replies short: two or three sentences, no lists, no headings.",
        request.speaker, request.topic, stance, request.personality
    );

    if !request.burning_questions.is_empty() {
        prompt.push_str("\nQuestions you care about:");
        for (i, q) in request.burning_questions.iter().enumerate() {
            prompt.push_str(&format!("\n{}. {}", i + 1, q));
        }
    }
    prompt
}

/// User prompt: recent conversation plus the instruction for this purpose.
pub fn user_prompt(request: &GenerationRequest) -> String {
    let history = if request.context.is_empty() {
        "(nothing has been said yet)".to_string()
    } else {
        request.context.join("\n")
    };

    format!(
        "## Recent conversation\n\n{}\n\n## Your task\n\n{}",
        history,
        instruction(request.purpose)
    )
}

fn instruction(purpose: Purpose) -> &'static str {
    match purpose {
        Purpose::Opening => {
            "Give your opening statement: state your position and your strongest reason."
        }
        Purpose::Response => "Respond to the discussion so far. Engage with a specific point.",
        Purpose::Closing => {
            "Give your closing statement: summarize your case and answer the best objection."
        }
        Purpose::Autonomous => {
            "Jump in with a reaction. Challenge, agree, or raise one of your questions. \
             Address people by name when replying to them."
        }
        Purpose::SilenceBreak => {
            "The room has gone quiet. Restart the conversation with a pointed question."
        }
    }
}
