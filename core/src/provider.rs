//! The abstract streaming LLM provider boundary (§6, §9). The wire format of
//! any particular provider is out of scope; this is the shape the
//! conversation loop programs against, generalized from the teacher's
//! `client_common.rs` (`Prompt`, `ResponseEvent`, `ResponseStream`).

use std::pin::Pin;
use std::task::Context;
use std::task::Poll;

use cosmos_protocol::Message;
use futures::Stream;
use serde::Deserialize;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::error::CosmosErr;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// `request = {model, system?, max_tokens, messages, tools?}` (§6).
#[derive(Debug, Clone)]
pub struct Prompt {
    pub model: String,
    pub system: Option<String>,
    pub max_tokens: u64,
    pub messages: Vec<Message>,
    pub tools: Option<Vec<ToolDescriptor>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// One chunk of the provider's stream. The loop treats unrecognized chunk
/// kinds as no-ops rather than failing the turn.
#[derive(Debug, Clone)]
pub enum ResponseEvent {
    TextDelta { text: String },
    ToolStart { id: String, name: String },
    ToolDelta { input_json_fragment: String },
    ToolEnd,
    MessageStop { stop_reason: StopReason },
    Metadata { usage: TokenUsage },
}

/// A finite sequence of [`ResponseEvent`]s, or a transport-level error.
pub struct ResponseStream {
    rx_event: mpsc::Receiver<Result<ResponseEvent, CosmosErr>>,
}

impl ResponseStream {
    pub fn new(rx_event: mpsc::Receiver<Result<ResponseEvent, CosmosErr>>) -> Self {
        Self { rx_event }
    }
}

impl Stream for ResponseStream {
    type Item = Result<ResponseEvent, CosmosErr>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx_event.poll_recv(cx)
    }
}

/// The collaborator named in §6: `Send(request) -> stream`.
pub trait Provider: Send + Sync {
    fn send(&self, request: Prompt) -> ResponseStream;
}

/// An in-memory provider double that replays pre-scripted event sequences,
/// one per call to `send`, in FIFO order. Used by `cosmos-core`'s own test
/// suite in place of a `wiremock`-backed HTTP provider, since no concrete
/// wire format is shipped.
pub struct ScriptedProvider {
    scripts: std::sync::Mutex<std::collections::VecDeque<Vec<ResponseEvent>>>,
}

impl Default for ScriptedProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self { scripts: std::sync::Mutex::new(std::collections::VecDeque::new()) }
    }

    pub fn push_script(&self, events: Vec<ResponseEvent>) {
        self.scripts.lock().expect("scripted provider mutex poisoned").push_back(events);
    }
}

impl Provider for ScriptedProvider {
    fn send(&self, _request: Prompt) -> ResponseStream {
        let events = self.scripts.lock().expect("scripted provider mutex poisoned").pop_front().unwrap_or_default();
        let (tx, rx) = mpsc::channel(events.len().max(1));
        tokio::spawn(async move {
            for event in events {
                if tx.send(Ok(event)).await.is_err() {
                    break;
                }
            }
        });
        ResponseStream::new(rx)
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;

    use super::*;

    fn sample_prompt() -> Prompt {
        Prompt {
            model: "test-model".to_string(),
            system: None,
            max_tokens: 1024,
            messages: vec![Message::user_text("hi")],
            tools: None,
        }
    }

    #[tokio::test]
    async fn scripted_provider_replays_queued_events_in_order() {
        let provider = ScriptedProvider::new();
        provider.push_script(vec![
            ResponseEvent::TextDelta { text: "hello".to_string() },
            ResponseEvent::MessageStop { stop_reason: StopReason::EndTurn },
        ]);

        let mut stream = provider.send(sample_prompt());
        let first = stream.next().await.expect("first event").expect("ok");
        assert!(matches!(first, ResponseEvent::TextDelta { text } if text == "hello"));
        let second = stream.next().await.expect("second event").expect("ok");
        assert!(matches!(second, ResponseEvent::MessageStop { stop_reason: StopReason::EndTurn }));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn scripts_are_consumed_fifo_across_calls() {
        let provider = ScriptedProvider::new();
        provider.push_script(vec![ResponseEvent::ToolEnd]);
        provider.push_script(vec![ResponseEvent::TextDelta { text: "second".to_string() }]);

        let mut first_stream = provider.send(sample_prompt());
        assert!(matches!(first_stream.next().await.unwrap().unwrap(), ResponseEvent::ToolEnd));

        let mut second_stream = provider.send(sample_prompt());
        let event = second_stream.next().await.unwrap().unwrap();
        assert!(matches!(event, ResponseEvent::TextDelta { text } if text == "second"));
    }

    #[tokio::test]
    async fn send_with_no_queued_script_yields_empty_stream() {
        let provider = ScriptedProvider::new();
        let mut stream = provider.send(sample_prompt());
        assert!(stream.next().await.is_none());
    }
}
