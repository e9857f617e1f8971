//! The host-facing submission/event queue pair (§6): submit ops in, receive
//! events out, grounded in the teacher's `Codex::spawn`/`submission_loop`
//! split, generalized from shell-exec submissions to this kernel's user
//! messages, slash commands, and permission responses.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use async_channel::Receiver;
use async_channel::Sender;
use cosmos_policy::Evaluator;
use cosmos_protocol::Command;
use cosmos_protocol::Event;
use cosmos_protocol::PermissionResponse;
use cosmos_sandbox::SandboxRuntime;
use cosmos_sandbox::ToolRegistry;
use cosmos_vfs::Snapshotter;
use uuid::Uuid;

use crate::config::Config;
use crate::error::CosmosErr;
use crate::provider::Provider;
use crate::r#loop::LoopContext;
use crate::r#loop::process_user_message;
use crate::session::Session;
use crate::session_store;
use crate::session_store::SessionStore;

/// One submission from the host, tagged with an id so replies can be
/// correlated (mirrors the teacher's `Submission { id, op }`).
pub struct Submission {
    pub id: String,
    pub op: SubmissionOp,
}

pub enum SubmissionOp {
    UserMessage(String),
    Command(Command),
    PermissionResponse { call_id: String, response: PermissionResponse },
    Shutdown,
}

/// The high-level interface a host process drives: send submissions,
/// receive events, one queue pair per conversation.
pub struct CosmosSession {
    next_id: AtomicU64,
    tx_sub: Sender<Submission>,
    rx_event: Receiver<Event>,
    pub session_id: Uuid,
}

impl CosmosSession {
    /// Build the kernel's context (policy, sandbox, snapshotter, audit,
    /// session persistence) and spawn the submission loop task.
    pub async fn spawn(config: Config, provider: Arc<dyn Provider>, registry: Arc<ToolRegistry>) -> Result<Self, CosmosErr> {
        let (tx_sub, rx_sub) = async_channel::bounded(64);
        let (tx_event, rx_event) = async_channel::bounded(64);

        let session_id = Uuid::new_v4();
        let evaluator = Arc::new(Evaluator::load_for_project(&config.project_root)?);
        let snapshotter = Arc::new(Snapshotter::open(config.project_root.clone(), session_id)?);
        let audit = Arc::new(cosmos_audit::AuditLog::open(&config.project_root, session_id).await?);
        let sandbox = Arc::new(SandboxRuntime::new(registry.clone()));
        let store = SessionStore::open(&config.project_root, session_id).await?;
        let storage_dir = config.project_root.join(".cosmos").join("storage");

        let loop_ctx = LoopContext::new(
            provider,
            registry,
            sandbox,
            evaluator,
            snapshotter,
            audit,
            tx_event.clone(),
            config.project_root.clone(),
            storage_dir,
        );
        let session = Session::new(session_id, config.model.clone(), config.context_window);

        tokio::spawn(submission_loop(loop_ctx, session, store, config.project_root, rx_sub, tx_event));

        Ok(Self { next_id: AtomicU64::new(0), tx_sub, rx_event, session_id })
    }

    /// Submit `op`, assigning it a fresh id.
    pub async fn submit(&self, op: SubmissionOp) -> Result<String, CosmosErr> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst).to_string();
        self.submit_with_id(Submission { id: id.clone(), op }).await?;
        Ok(id)
    }

    /// Use sparingly: prefer `submit` so ids stay unique per session.
    pub async fn submit_with_id(&self, sub: Submission) -> Result<(), CosmosErr> {
        self.tx_sub.send(sub).await.map_err(|_| CosmosErr::Fatal("conversation loop task is gone".to_string()))
    }

    pub async fn next_event(&self) -> Result<Event, CosmosErr> {
        self.rx_event.recv().await.map_err(|_| CosmosErr::Fatal("event channel closed".to_string()))
    }
}

async fn submission_loop(
    ctx: LoopContext,
    mut session: Session,
    store: SessionStore,
    project_root: PathBuf,
    rx_sub: Receiver<Submission>,
    tx_event: Sender<Event>,
) {
    let mut persisted = 0usize;

    while let Ok(submission) = rx_sub.recv().await {
        match submission.op {
            SubmissionOp::UserMessage(text) => {
                if let Err(e) = process_user_message(&ctx, &mut session, text).await {
                    tracing::warn!("conversation turn failed: {e}");
                }
            }
            SubmissionOp::Command(Command::Compact) => crate::r#loop::compact(&ctx, &mut session).await,
            SubmissionOp::Command(Command::Clear) => {
                session.replace_history(Vec::new());
                let _ = tx_event.send(Event::HistoryCleared).await;
            }
            SubmissionOp::Command(Command::Context) => {
                let _ = tx_event
                    .send(Event::ContextInfo { used_tokens: session.tokens.total(), window: session.context_window })
                    .await;
            }
            SubmissionOp::Command(Command::Model(model_id)) => {
                session.model_id = model_id.clone();
                let _ = tx_event.send(Event::ModelChanged { model_id }).await;
            }
            SubmissionOp::Command(Command::Restore(restore_id)) => match session_store::load(&project_root, restore_id).await {
                Ok(messages) => {
                    session.replace_history(messages);
                    persisted = session.history().len();
                    let _ = tx_event.send(Event::SessionRestored { session_id: restore_id }).await;
                }
                Err(e) => {
                    let _ = tx_event.send(Event::Error { message: format!("restore failed: {e}") }).await;
                }
            },
            SubmissionOp::PermissionResponse { call_id, response } => {
                let sender = ctx.pending_permissions.lock().expect("pending permissions mutex poisoned").remove(&call_id);
                if let Some(sender) = sender
                    && sender.send(response).await.is_err()
                {
                    tracing::warn!("permission response for {call_id} arrived after the prompt was abandoned");
                }
            }
            SubmissionOp::Shutdown => {
                ctx.sandbox.close();
                break;
            }
        }

        for message in &session.history()[persisted..] {
            if let Err(e) = store.record(message).await {
                tracing::warn!("failed to persist session message: {e}");
            }
        }
        persisted = session.history().len();
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;
    use crate::provider::ResponseEvent;
    use crate::provider::ScriptedProvider;
    use crate::provider::StopReason;

    #[tokio::test]
    async fn user_message_round_trips_through_next_event() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".cosmos")).unwrap();

        let provider: Arc<ScriptedProvider> = Arc::new(ScriptedProvider::new());
        provider.push_script(vec![
            ResponseEvent::TextDelta { text: "hi".to_string() },
            ResponseEvent::MessageStop { stop_reason: StopReason::EndTurn },
        ]);

        let config = Config::load(dir.path()).unwrap();
        let registry = Arc::new(ToolRegistry::new());
        let session = CosmosSession::spawn(config, provider.clone(), registry).await.unwrap();

        session.submit(SubmissionOp::UserMessage("hello".to_string())).await.unwrap();

        let mut saw_completion = false;
        for _ in 0..16 {
            let event = session.next_event().await.unwrap();
            if matches!(event, Event::Completion) {
                saw_completion = true;
                break;
            }
        }
        assert!(saw_completion);
    }

    #[tokio::test]
    async fn clear_command_emits_history_cleared() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".cosmos")).unwrap();

        let provider: Arc<ScriptedProvider> = Arc::new(ScriptedProvider::new());
        let config = Config::load(dir.path()).unwrap();
        let registry = Arc::new(ToolRegistry::new());
        let session = CosmosSession::spawn(config, provider, registry).await.unwrap();

        session.submit(SubmissionOp::Command(Command::Clear)).await.unwrap();
        let event = session.next_event().await.unwrap();
        assert!(matches!(event, Event::HistoryCleared));
    }
}
