//! The conversation loop (§4.7): streaming classification, tool dispatch
//! with permission prompting and a 5-second dedupe window, context
//! tracking/compaction, and the execute phase's interaction tagging.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;
use std::time::Instant;

use cosmos_audit::AuditLog;
use cosmos_policy::Evaluator;
use cosmos_protocol::AuditRecord;
use cosmos_protocol::DecisionSource;
use cosmos_protocol::Effect;
use cosmos_protocol::Event;
use cosmos_protocol::Message;
use cosmos_protocol::PermissionRequest as ProtoPermissionRequest;
use cosmos_protocol::PermissionResponse;
use cosmos_protocol::Role;
use cosmos_protocol::ToolCall;
use cosmos_protocol::ToolResult;
use cosmos_protocol::redact_arguments;
use cosmos_sandbox::CapabilityContext;
use cosmos_sandbox::SandboxRuntime;
use cosmos_sandbox::ToolRegistry;
use cosmos_vfs::Snapshotter;
use futures::StreamExt;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::CosmosErr;
use crate::provider::Prompt;
use crate::provider::Provider;
use crate::provider::ResponseEvent;
use crate::provider::StopReason;
use crate::provider::ToolDescriptor;
use crate::session::Session;
use crate::session::SessionState;

const PROMPT_DEDUPE_WINDOW: Duration = Duration::from_secs(5);
pub const DEFAULT_PERMISSION_TIMEOUT: Duration = Duration::from_secs(120);

/// Keyed by `tool_call_id`, so a late or duplicate host response after the
/// loop's own timeout has already fired is simply ignored.
pub type PendingPermissions = Arc<Mutex<HashMap<String, mpsc::Sender<PermissionResponse>>>>;

struct PendingToolCall {
    id: String,
    name: String,
    input_json: String,
}

/// Everything the loop needs to drive one session's turns: the provider,
/// the sandbox, the policy evaluator, and the event sink the host reads
/// from. One per [`crate::host::CosmosSession`].
pub struct LoopContext {
    pub provider: Arc<dyn Provider>,
    pub registry: Arc<ToolRegistry>,
    pub sandbox: Arc<SandboxRuntime>,
    pub evaluator: Arc<Evaluator>,
    pub snapshotter: Arc<Snapshotter>,
    pub audit: Arc<AuditLog>,
    pub events: async_channel::Sender<Event>,
    pub pending_permissions: PendingPermissions,
    pub permission_timeout: Duration,
    pub cwd: std::path::PathBuf,
    pub storage_dir: std::path::PathBuf,
    recent_decisions: Mutex<HashMap<String, (Instant, Effect, DecisionSource)>>,
}

impl LoopContext {
    pub fn new(
        provider: Arc<dyn Provider>,
        registry: Arc<ToolRegistry>,
        sandbox: Arc<SandboxRuntime>,
        evaluator: Arc<Evaluator>,
        snapshotter: Arc<Snapshotter>,
        audit: Arc<AuditLog>,
        events: async_channel::Sender<Event>,
        cwd: std::path::PathBuf,
        storage_dir: std::path::PathBuf,
    ) -> Self {
        Self {
            provider,
            registry,
            sandbox,
            evaluator,
            snapshotter,
            audit,
            events,
            pending_permissions: Arc::new(Mutex::new(HashMap::new())),
            permission_timeout: DEFAULT_PERMISSION_TIMEOUT,
            cwd,
            storage_dir,
            recent_decisions: Mutex::new(HashMap::new()),
        }
    }

    async fn emit(&self, event: Event) {
        if self.events.send(event).await.is_err() {
            tracing::warn!("conversation loop: event sink is closed, dropping event");
        }
    }

    /// External cancellation resolves any pending permission wait with
    /// default-deny (§4.7, §5) by dropping every registered responder.
    pub fn cancel_pending_permissions(&self) {
        self.pending_permissions.lock().expect("pending permissions mutex poisoned").clear();
    }
}

/// Process one user message end to end: append it to history, then drive
/// send/stream/dispatch cycles until the provider stops with a non-tool-use
/// reason.
pub async fn process_user_message(ctx: &LoopContext, session: &mut Session, text: String) -> Result<(), CosmosErr> {
    session.push_message(Message::user_text(text));
    run_send_cycle(ctx, session).await
}

async fn run_send_cycle(ctx: &LoopContext, session: &mut Session) -> Result<(), CosmosErr> {
    loop {
        if session.needs_compaction() {
            compact(ctx, session).await;
        } else if session.needs_warning() {
            ctx.emit(Event::ContextWarning { used_tokens: session.tokens.total(), window: session.context_window }).await;
        }

        session.state = SessionState::Sending;
        let prompt = build_prompt(ctx, session);
        let mut stream = ctx.provider.send(prompt);
        session.state = SessionState::Streaming;

        let mut tool_call: Option<PendingToolCall> = None;
        let mut stop_reason = None;

        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(ResponseEvent::TextDelta { text }) => {
                    session.append_assistant_text_delta(&text);
                    ctx.emit(Event::Token { text }).await;
                }
                Ok(ResponseEvent::ToolStart { id, name }) => {
                    tool_call = Some(PendingToolCall { id, name, input_json: String::new() });
                }
                Ok(ResponseEvent::ToolDelta { input_json_fragment }) => {
                    if let Some(tc) = tool_call.as_mut() {
                        tc.input_json.push_str(&input_json_fragment);
                    }
                }
                Ok(ResponseEvent::ToolEnd) => {
                    if let Some(tc) = tool_call.take() {
                        run_tool(ctx, session, tc).await;
                    }
                }
                Ok(ResponseEvent::MessageStop { stop_reason: reason }) => {
                    stop_reason = Some(reason);
                }
                Ok(ResponseEvent::Metadata { usage }) => {
                    session.tokens.input_tokens = usage.input_tokens;
                    session.tokens.output_tokens = usage.output_tokens;
                    ctx.emit(Event::ContextUpdate { input_tokens: usage.input_tokens, output_tokens: usage.output_tokens }).await;
                }
                Err(e) => {
                    ctx.emit(Event::Error { message: e.to_string() }).await;
                    session.state = SessionState::Idle;
                    return Err(e);
                }
            }
        }

        match stop_reason {
            Some(StopReason::ToolUse) => continue,
            _ => break,
        }
    }

    session.state = SessionState::Idle;
    ctx.emit(Event::Completion).await;
    Ok(())
}

fn build_prompt(ctx: &LoopContext, session: &Session) -> Prompt {
    let tools = ctx
        .registry
        .function_names()
        .into_iter()
        .map(|name| ToolDescriptor {
            description: format!("tool {name}"),
            name,
            parameters: serde_json::json!({"type": "object"}),
        })
        .collect();

    Prompt {
        model: session.model_id.clone(),
        system: None,
        max_tokens: session.context_window,
        messages: session.history().to_vec(),
        tools: Some(tools),
    }
}

/// Execute one finalized tool call: resolve permissions, invoke the
/// sandbox under the agreed interaction id, and feed the result back into
/// history.
async fn run_tool(ctx: &LoopContext, session: &mut Session, tool_call: PendingToolCall) {
    let PendingToolCall { id: call_id, name, input_json } = tool_call;
    let input: Value = serde_json::from_str(&input_json).unwrap_or(Value::Null);

    session.state = SessionState::ToolPending;
    ctx.emit(Event::ToolUse { call_id: call_id.clone(), name: name.clone(), input: input.clone() }).await;

    let (content, is_error) = match execute_tool(ctx, session, &call_id, &name, &input).await {
        Ok(value) => (value.to_string(), false),
        Err(e) => (e.to_string(), true),
    };

    ctx.emit(Event::ToolResult { call_id: call_id.clone(), content: content.clone(), is_error }).await;

    session.push_message(Message {
        role: Role::Assistant,
        text: None,
        tool_calls: vec![ToolCall { id: call_id.clone(), name, input }],
        tool_results: vec![],
    });
    session.push_message(Message {
        role: Role::User,
        text: None,
        tool_calls: vec![],
        tool_results: vec![ToolResult { tool_use_id: call_id, content, is_error }],
    });
}

async fn execute_tool(ctx: &LoopContext, session: &mut Session, call_id: &str, name: &str, input: &Value) -> Result<Value, CosmosErr> {
    let spec = ctx.registry.get(name).map_err(CosmosErr::from)?;

    for rule in spec.permissions.clone() {
        resolve_permission(ctx, session.session_id, &spec.agent, name, call_id, &rule, &spec.permissions, input).await?;
    }

    let (ui_tx, mut ui_rx) = tokio::sync::mpsc::unbounded_channel::<String>();
    let forward_call_id = call_id.to_string();
    let events = ctx.events.clone();
    tokio::spawn(async move {
        while let Some(message) = ui_rx.recv().await {
            if events.send(Event::ToolProgress { call_id: forward_call_id.clone(), message }).await.is_err() {
                break;
            }
        }
    });

    let capability_ctx = CapabilityContext {
        agent: spec.agent.clone(),
        tool: name.to_string(),
        cwd: ctx.cwd.clone(),
        storage_dir: ctx.storage_dir.clone(),
        evaluator: ctx.evaluator.clone(),
        manifest_rules: spec.permissions.clone(),
        loopback_allowed: false,
        ui_sink: Some(ui_tx),
        snapshotter: ctx.snapshotter.clone(),
    };

    session.current_interaction_id = Some(call_id.to_string());
    ctx.snapshotter.begin_interaction(call_id.to_string());
    session.state = SessionState::Executing;

    let sandbox = ctx.sandbox.clone();
    let function_name = name.to_string();
    let owned_input = input.clone();
    let result = tokio::task::spawn_blocking(move || sandbox.execute(&function_name, &owned_input, &capability_ctx))
        .await
        .map_err(|e| CosmosErr::Fatal(format!("tool execution task panicked: {e}")))?
        .map_err(CosmosErr::from);

    ctx.snapshotter.end_interaction();
    session.current_interaction_id = None;

    result
}

/// Resolve one declared permission for a tool call: evaluate, and if the
/// result requires a prompt, run the request/response/timeout flow. A
/// cached decision within the dedupe window is reused without re-prompting.
#[allow(clippy::too_many_arguments)]
async fn resolve_permission(
    ctx: &LoopContext,
    session_id: uuid::Uuid,
    agent: &str,
    tool: &str,
    call_id: &str,
    rule: &cosmos_protocol::PermissionRule,
    manifest_rules: &[cosmos_protocol::PermissionRule],
    arguments: &Value,
) -> Result<(), CosmosErr> {
    let dedupe_key = format!("{agent}\u{0}{}", rule.key);

    if let Some((seen_at, effect, _)) = ctx.recent_decisions.lock().expect("recent decisions mutex poisoned").get(&dedupe_key).copied()
        && seen_at.elapsed() < PROMPT_DEDUPE_WINDOW
    {
        return apply_effect(effect, &rule.key);
    }

    let decision = ctx.evaluator.evaluate(agent, &rule.key, manifest_rules);
    record_decision(ctx, &dedupe_key, decision.effect, decision.source);
    record_audit(ctx, session_id, agent, tool, &rule.key, &decision, arguments).await;

    match decision.effect {
        Effect::Allow => Ok(()),
        Effect::Deny => Err(CosmosErr::PolicyDenied(ctx.evaluator.describe(agent, &rule.key, &decision))),
        Effect::PromptOnce | Effect::PromptAlways => {
            let approved = prompt_for_permission(ctx, agent, call_id, rule).await?;
            let effect = if approved { Effect::Allow } else { Effect::Deny };
            record_decision(ctx, &dedupe_key, effect, DecisionSource::PersistedGrant);

            if approved && decision.effect == Effect::PromptOnce {
                let raw_key = rule.key.to_string();
                if let Err(e) = ctx.evaluator.record_once_decision(agent, &raw_key, true) {
                    ctx.emit(Event::Error { message: format!("failed to persist one-time grant for {raw_key}: {e}") }).await;
                }
            }

            apply_effect(effect, &rule.key)
        }
    }
}

fn apply_effect(effect: Effect, key: &cosmos_protocol::PermissionKey) -> Result<(), CosmosErr> {
    match effect {
        Effect::Allow => Ok(()),
        _ => Err(CosmosErr::PolicyDenied(format!("denied: {key}"))),
    }
}

fn record_decision(ctx: &LoopContext, dedupe_key: &str, effect: Effect, source: DecisionSource) {
    ctx.recent_decisions
        .lock()
        .expect("recent decisions mutex poisoned")
        .insert(dedupe_key.to_string(), (Instant::now(), effect, source));
}

async fn prompt_for_permission(ctx: &LoopContext, agent: &str, call_id: &str, rule: &cosmos_protocol::PermissionRule) -> Result<bool, CosmosErr> {
    let (tx, mut rx) = mpsc::channel::<PermissionResponse>(1);
    ctx.pending_permissions.lock().expect("pending permissions mutex poisoned").insert(call_id.to_string(), tx);

    ctx.emit(Event::PermissionRequest(ProtoPermissionRequest {
        tool_call_id: call_id.to_string(),
        key: rule.key.clone(),
        agent: agent.to_string(),
        description: format!("{agent} requests {}", rule.key),
    }))
    .await;

    let outcome = tokio::select! {
        response = rx.recv() => response,
        _ = tokio::time::sleep(ctx.permission_timeout) => None,
    };

    ctx.pending_permissions.lock().expect("pending permissions mutex poisoned").remove(call_id);

    match outcome {
        Some(PermissionResponse::Approved) | Some(PermissionResponse::ApprovedForSession) => Ok(true),
        Some(PermissionResponse::Denied) => Ok(false),
        None => {
            let applied_default = cosmos_protocol::Decision::default_deny();
            ctx.emit(Event::PermissionTimeout { call_id: call_id.to_string(), applied_default }).await;
            Ok(false)
        }
    }
}

/// Summarize and replace history (§4.7, `/compact`). Also invoked directly
/// by the submission loop for the `/compact` command.
pub(crate) async fn compact(ctx: &LoopContext, session: &mut Session) {
    ctx.emit(Event::CompactionStart).await;

    let summarization_prompt = Prompt {
        model: session.model_id.clone(),
        system: Some("Summarize the conversation so far in a few sentences.".to_string()),
        max_tokens: 1024,
        messages: session.history().to_vec(),
        tools: None,
    };

    let mut stream = ctx.provider.send(summarization_prompt);
    let mut summary = String::new();
    let mut failed = false;

    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(ResponseEvent::TextDelta { text }) => summary.push_str(&text),
            Ok(ResponseEvent::MessageStop { .. }) => break,
            Ok(_) => {}
            Err(e) => {
                ctx.emit(Event::CompactionFailed { reason: e.to_string() }).await;
                failed = true;
                break;
            }
        }
        ctx.emit(Event::CompactionProgress { message: "summarizing".to_string() }).await;
    }

    if failed || summary.trim().is_empty() {
        if !failed {
            ctx.emit(Event::CompactionFailed { reason: "provider returned an empty summary".to_string() }).await;
        }
        return;
    }

    let old_tokens = session.tokens.total();
    session.apply_compaction_summary(&summary);
    ctx.emit(Event::CompactionComplete { old_tokens, new_tokens: session.tokens.total() }).await;
}

/// Build the redacted audit record for one permission evaluation and write
/// it. A persistence failure is surfaced as an error event, never fatal.
pub async fn record_audit(ctx: &LoopContext, session_id: uuid::Uuid, agent: &str, tool: &str, key: &cosmos_protocol::PermissionKey, decision: &cosmos_protocol::Decision, arguments: &Value) {
    let record = AuditRecord {
        timestamp: chrono::Utc::now(),
        session_id,
        agent: agent.to_string(),
        tool: tool.to_string(),
        permission_key: key.clone(),
        decision_effect: decision.effect,
        decision_source: decision.source,
        arguments_redacted: redact_arguments(arguments),
    };
    if let Err(e) = ctx.audit.append(&record).await {
        ctx.emit(Event::Error { message: format!("failed to write audit record: {e}") }).await;
    }
}

#[cfg(test)]
mod tests {
    use cosmos_policy::Evaluator;
    use cosmos_protocol::PermissionMode;
    use cosmos_sandbox::ToolRegistry;
    use tempfile::tempdir;
    use uuid::Uuid;

    use super::*;
    use crate::provider::ScriptedProvider;
    use crate::provider::TokenUsage;

    async fn test_context(dir: &std::path::Path) -> (LoopContext, async_channel::Receiver<Event>, Arc<ScriptedProvider>) {
        let evaluator = Arc::new(Evaluator::load(dir.join("policy.json"), dir.to_path_buf()).unwrap());
        let snapshotter = Arc::new(Snapshotter::open(dir.to_path_buf(), Uuid::nil()).unwrap());
        let registry = Arc::new(ToolRegistry::new());
        let sandbox = Arc::new(SandboxRuntime::new(registry.clone()));
        let provider = Arc::new(ScriptedProvider::new());
        let (tx, rx) = async_channel::bounded(64);

        let audit = Arc::new(AuditLog::open(dir, Uuid::nil()).await.unwrap());

        let ctx = LoopContext::new(provider.clone(), registry, sandbox, evaluator, snapshotter, audit, tx, dir.to_path_buf(), dir.join("storage"));
        (ctx, rx, provider)
    }

    #[tokio::test]
    async fn plain_text_turn_emits_tokens_then_completion() {
        let dir = tempdir().unwrap();
        let (ctx, rx, provider) = test_context(dir.path()).await;
        provider.push_script(vec![
            ResponseEvent::TextDelta { text: "hi there".to_string() },
            ResponseEvent::Metadata { usage: TokenUsage { input_tokens: 5, output_tokens: 5 } },
            ResponseEvent::MessageStop { stop_reason: StopReason::EndTurn },
        ]);

        let mut session = Session::new(Uuid::nil(), "test-model", 1000);
        process_user_message(&ctx, &mut session, "hello".to_string()).await.unwrap();

        let mut saw_completion = false;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, Event::Completion) {
                saw_completion = true;
            }
        }
        assert!(saw_completion);
        assert_eq!(session.state, SessionState::Idle);
        assert_eq!(session.history().last().unwrap().text.as_deref(), Some("hi there"));
    }

    #[test]
    fn apply_effect_allow_is_ok() {
        let key: cosmos_protocol::PermissionKey = "fs:read:/tmp".parse().unwrap();
        assert!(apply_effect(Effect::Allow, &key).is_ok());
    }

    #[test]
    fn apply_effect_non_allow_is_denied_error() {
        let key: cosmos_protocol::PermissionKey = "fs:read:/tmp".parse().unwrap();
        assert!(apply_effect(Effect::Deny, &key).is_err());
    }

    #[tokio::test]
    async fn denied_permission_surfaces_as_policy_denied_without_calling_provider() {
        let dir = tempdir().unwrap();
        let (ctx, _rx, _provider) = test_context(dir.path()).await;
        let rule = cosmos_protocol::PermissionRule { key: "fs:write:/tmp/x".parse().unwrap(), mode: PermissionMode::Deny };
        let err = resolve_permission(&ctx, Uuid::nil(), "agent-a", "write_file", "call-1", &rule, &[rule.clone()], &Value::Null).await.unwrap_err();
        assert!(matches!(err, CosmosErr::PolicyDenied(_)));
    }

    #[tokio::test]
    async fn dedupe_window_reuses_decision_without_recomputing() {
        let dir = tempdir().unwrap();
        let (ctx, _rx, _provider) = test_context(dir.path()).await;
        let rule = cosmos_protocol::PermissionRule { key: "fs:read:/tmp/x".parse().unwrap(), mode: PermissionMode::Allow };
        resolve_permission(&ctx, Uuid::nil(), "agent-a", "read_file", "call-1", &rule, &[rule.clone()], &Value::Null).await.unwrap();
        // Second call within the window must not block waiting on a prompt
        // channel that nothing will ever answer.
        resolve_permission(&ctx, Uuid::nil(), "agent-a", "read_file", "call-2", &rule, &[rule.clone()], &Value::Null).await.unwrap();
    }
}
