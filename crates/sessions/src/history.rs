//! Transcript → chat-message conversion.

use nova_domain::tool::ChatMessage;

use crate::transcript::TranscriptTurn;

/// Keep at most `max` of the most recent turns (input is most-recent-first).
pub fn limit_transcript_turns(turns: &[TranscriptTurn], max: usize) -> &[TranscriptTurn] {
    &turns[..turns.len().min(max)]
}

/// Convert most-recent-first transcript turns into chronological chat
/// messages. Unknown roles are skipped.
pub fn transcript_to_chat_messages(turns: &[TranscriptTurn]) -> Vec<ChatMessage> {
    turns
        .iter()
        .rev()
        .filter_map(|turn| match turn.role.as_str() {
            "user" => Some(ChatMessage::user(&turn.text)),
            "assistant" => Some(ChatMessage::assistant(&turn.text)),
            _ => None,
        })
        .collect()
}
