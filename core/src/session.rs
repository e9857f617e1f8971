//! Per-session state: conversation history, token counters, and the loop's
//! state machine (§4.7). History merging (coalescing adjacent streamed text
//! deltas into one assistant message) follows the teacher's
//! `ConversationHistory`.

use cosmos_protocol::Message;
use cosmos_protocol::Role;
use uuid::Uuid;

/// States of the per-turn state machine in §4.7's diagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Sending,
    Streaming,
    ToolPending,
    Executing,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenCounters {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenCounters {
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// A conversational session: history, model selection, token accounting,
/// and the interaction id tagging the sandbox call currently in flight.
pub struct Session {
    pub session_id: Uuid,
    pub model_id: String,
    pub state: SessionState,
    pub context_window: u64,
    pub tokens: TokenCounters,
    pub current_interaction_id: Option<String>,
    message_history: Vec<Message>,
}

impl Session {
    pub fn new(session_id: Uuid, model_id: impl Into<String>, context_window: u64) -> Self {
        Self {
            session_id,
            model_id: model_id.into(),
            state: SessionState::Idle,
            context_window,
            tokens: TokenCounters::default(),
            current_interaction_id: None,
            message_history: Vec::new(),
        }
    }

    pub fn history(&self) -> &[Message] {
        &self.message_history
    }

    pub fn push_message(&mut self, message: Message) {
        self.message_history.push(message);
    }

    pub fn replace_history(&mut self, messages: Vec<Message>) {
        self.message_history = messages;
    }

    /// Append a text delta to the last assistant message, starting a new
    /// one if the last message isn't assistant-authored (e.g. first delta
    /// of a turn, or the previous entry was a user/tool message).
    pub fn append_assistant_text_delta(&mut self, delta: &str) {
        match self.message_history.last_mut() {
            Some(Message { role: Role::Assistant, text: Some(text), .. }) => {
                text.push_str(delta);
            }
            Some(Message { role: Role::Assistant, text, .. }) if text.is_none() => {
                *text = Some(delta.to_string());
            }
            _ => {
                self.message_history.push(Message::assistant_text(delta));
            }
        }
    }

    /// §4.7 context-window thresholds: 50% warns, 90% forces compaction.
    pub fn context_ratio(&self) -> f64 {
        if self.context_window == 0 {
            return 0.0;
        }
        self.tokens.total() as f64 / self.context_window as f64
    }

    pub fn needs_warning(&self) -> bool {
        self.context_ratio() >= 0.5
    }

    pub fn needs_compaction(&self) -> bool {
        self.context_ratio() >= 0.9
    }

    /// Replace history with a single synthetic user message carrying the
    /// compaction summary, and reset token counters to the estimated size
    /// of that one message.
    pub fn apply_compaction_summary(&mut self, summary: &str) {
        self.message_history = vec![Message::user_text(summary)];
        self.tokens = TokenCounters {
            input_tokens: estimate_tokens(summary),
            output_tokens: 0,
        };
    }
}

/// Fallback token estimate when the provider doesn't report usage: a
/// conservative 1.2 characters per token.
pub fn estimate_tokens(text: &str) -> u64 {
    ((text.chars().count() as f64) / 1.2).ceil() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        Session::new(Uuid::nil(), "test-model", 1000)
    }

    #[test]
    fn append_assistant_text_delta_starts_new_message() {
        let mut s = session();
        s.append_assistant_text_delta("hello");
        assert_eq!(s.history().len(), 1);
        assert_eq!(s.history()[0].text.as_deref(), Some("hello"));
    }

    #[test]
    fn append_assistant_text_delta_coalesces_into_last_assistant_message() {
        let mut s = session();
        s.append_assistant_text_delta("hello");
        s.append_assistant_text_delta(", world");
        assert_eq!(s.history().len(), 1);
        assert_eq!(s.history()[0].text.as_deref(), Some("hello, world"));
    }

    #[test]
    fn append_assistant_text_delta_does_not_merge_across_user_message() {
        let mut s = session();
        s.append_assistant_text_delta("first turn");
        s.push_message(Message::user_text("go again"));
        s.append_assistant_text_delta("second turn");
        assert_eq!(s.history().len(), 3);
        assert_eq!(s.history()[2].text.as_deref(), Some("second turn"));
    }

    #[test]
    fn needs_warning_at_half_context_window() {
        let mut s = session();
        s.tokens = TokenCounters { input_tokens: 500, output_tokens: 0 };
        assert!(s.needs_warning());
        assert!(!s.needs_compaction());
    }

    #[test]
    fn needs_compaction_at_ninety_percent() {
        let mut s = session();
        s.tokens = TokenCounters { input_tokens: 900, output_tokens: 0 };
        assert!(s.needs_compaction());
    }

    #[test]
    fn compaction_resets_history_to_single_summary_message() {
        let mut s = session();
        s.push_message(Message::user_text("a"));
        s.push_message(Message::assistant_text("b"));
        s.apply_compaction_summary("summary of the conversation so far");
        assert_eq!(s.history().len(), 1);
        assert_eq!(s.history()[0].role, Role::User);
        assert!(s.tokens.total() > 0);
    }

    #[test]
    fn estimate_tokens_uses_1_2_chars_per_token() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcdefghijkl"), 10);
    }
}
