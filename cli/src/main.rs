//! `cosmos`: the host-loop stand-in (§6). Loads the project config and any
//! signed tool manifests under `.cosmos/agents/`, spawns the conversation
//! kernel, and bridges its submission/event queues to a line-oriented
//! stdin/stdout terminal. Rendering, a real LLM wire format, and permission
//! UI beyond plain y/n prompts are out of scope; see [`cosmos_cli::EchoProvider`].

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use cosmos_cli::EchoProvider;
use cosmos_cli::register_manifests;
use cosmos_core::Config;
use cosmos_core::CosmosSession;
use cosmos_core::Provider;
use cosmos_core::SubmissionOp;
use cosmos_protocol::Command;
use cosmos_protocol::Event;
use cosmos_protocol::PermissionResponse;
use cosmos_sandbox::ToolRegistry;
use tokio::io::AsyncBufReadExt;
use tokio::io::BufReader;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[clap(author, version, about = "Sandbox-and-policy kernel host loop")]
struct Args {
    /// Project root holding `.cosmos/config.toml` and `.cosmos/agents/`.
    #[arg(long, default_value = ".")]
    project: PathBuf,

    /// Override the model id from config.toml.
    #[arg(long)]
    model: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .try_init();
    let args = Args::parse();

    let mut config = Config::load(&args.project)?;
    if let Some(model) = args.model {
        config.model = model;
    }

    let registry = Arc::new(ToolRegistry::new());
    let registered = register_manifests(&args.project, &config, &registry)?;
    println!("registered {registered} tool function(s) from .cosmos/agents/");

    let provider: Arc<dyn Provider> = Arc::new(EchoProvider);
    let session = Arc::new(CosmosSession::spawn(config, provider, registry).await?);
    println!("session {} ready. type a message, or /compact /clear /context /model <id> /restore <uuid>.", session.session_id);

    let printer = session.clone();
    tokio::spawn(async move {
        loop {
            match printer.next_event().await {
                Ok(event) => print_event(event),
                Err(_) => break,
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            result = lines.next_line() => match result? {
                Some(line) => line,
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                session.submit(SubmissionOp::Shutdown).await?;
                break;
            }
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(rest) = line.strip_prefix("/allow-session ") {
            respond_to_permission(&session, rest, PermissionResponse::ApprovedForSession).await;
            continue;
        }
        if let Some(rest) = line.strip_prefix("/allow ") {
            respond_to_permission(&session, rest, PermissionResponse::Approved).await;
            continue;
        }
        if let Some(rest) = line.strip_prefix("/deny ") {
            respond_to_permission(&session, rest, PermissionResponse::Denied).await;
            continue;
        }
        if line == "/quit" || line == "/exit" {
            session.submit(SubmissionOp::Shutdown).await?;
            break;
        }

        match Command::parse(line) {
            Some(Ok(command)) => {
                session.submit(SubmissionOp::Command(command)).await?;
            }
            Some(Err(message)) => println!("error: {message}"),
            None => {
                session.submit(SubmissionOp::UserMessage(line.to_string())).await?;
            }
        }
    }

    Ok(())
}

async fn respond_to_permission(session: &CosmosSession, call_id: &str, response: PermissionResponse) {
    if let Err(e) = session
        .submit(SubmissionOp::PermissionResponse { call_id: call_id.trim().to_string(), response })
        .await
    {
        println!("error: {e}");
    }
}

fn print_event(event: Event) {
    match event {
        Event::Token { text } => print!("{text}"),
        Event::ToolUse { call_id, name, input } => println!("\n[tool] {name} {call_id} <- {input}"),
        Event::ToolExecution { call_id } => println!("[tool] {call_id} executing"),
        Event::ToolResult { call_id, content, is_error } => {
            println!("[tool] {call_id} -> {} {content}", if is_error { "error" } else { "ok" });
        }
        Event::ToolProgress { call_id, message } => println!("[tool] {call_id}: {message}"),
        Event::PermissionRequest(request) => {
            println!(
                "\n[permission] {} wants {} ({}) -- reply /allow {id}, /allow-session {id}, or /deny {id}",
                request.agent,
                request.key,
                request.description,
                id = request.tool_call_id,
            );
        }
        Event::PermissionTimeout { call_id, applied_default } => {
            println!("[permission] {call_id} timed out, applied {applied_default:?}");
        }
        Event::ContextWarning { used_tokens, window } => println!("[context] {used_tokens}/{window} tokens used"),
        Event::ContextAutoCompact => println!("[context] auto-compacting"),
        Event::ContextUpdate { .. } => {}
        Event::CompactionStart => println!("[compaction] starting"),
        Event::CompactionProgress { message } => println!("[compaction] {message}"),
        Event::CompactionComplete { old_tokens, new_tokens } => println!("[compaction] {old_tokens} -> {new_tokens} tokens"),
        Event::CompactionFailed { reason } => println!("[compaction] failed: {reason}"),
        Event::FileChange(change) => println!("[vfs] {:?} {}", change.operation, change.path.display()),
        Event::ModelChanged { model_id } => println!("[model] now {model_id}"),
        Event::HistoryCleared => println!("[history] cleared"),
        Event::ContextInfo { used_tokens, window } => println!("[context] {used_tokens}/{window} tokens"),
        Event::SessionRestored { session_id } => println!("[session] restored {session_id}"),
        Event::Error { message } => println!("[error] {message}"),
        Event::Completion => println!(),
        _ => {}
    }
}
