//! Isolate lifecycle: lazy compile, hot reload on mtime change, timeout with
//! a termination-signal + grace period, and the leaked-isolate policy for
//! write-class tools (§4.5).
//!
//! Each `deno_core::JsRuntime` is `!Send`, so it lives entirely on a
//! dedicated worker thread; the runtime here only ever talks to it through a
//! channel. Lock order is always `map → isolate`, matching §5's shared-
//! resource policy, and the map lock is released before the isolate lock is
//! taken so a long-running call never blocks registration of unrelated
//! tools.

use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;
use std::time::SystemTime;

use deno_core::JsRuntime;
use deno_core::RuntimeOptions;
use deno_core::v8;
use serde_json::Value;

use crate::capability::CapabilityContext;
use crate::error::SandboxError;
use crate::invocation::build_invocation;
use crate::ops::BOOTSTRAP_JS;
use crate::ops::cosmos_capabilities;
use crate::registry::ToolRegistry;
use crate::registry::ToolSpec;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_TIMEOUT: Duration = Duration::from_secs(5 * 60);
const GRACE_PERIOD: Duration = Duration::from_secs(5);

fn write_class(rules: &[cosmos_protocol::PermissionRule]) -> bool {
    rules.iter().any(|rule| {
        (rule.key.resource == "fs" && rule.key.action == "write")
            || (rule.key.resource == "docker")
    })
}

enum WorkerMessage {
    SetContext(Arc<CapabilityContext>),
    Eval { script: String, reply: std::sync::mpsc::Sender<Result<String, String>> },
    Shutdown,
}

/// One V8 isolate and the thread that owns it.
struct Isolate {
    tx: tokio::sync::mpsc::UnboundedSender<WorkerMessage>,
    handle: Mutex<Option<std::thread::JoinHandle<()>>>,
    v8_handle: v8::IsolateHandle,
    loaded_mtime: Mutex<Option<SystemTime>>,
    leaked: AtomicBool,
}

impl Isolate {
    fn spawn() -> Self {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<WorkerMessage>();
        let (handle_tx, handle_rx) = std::sync::mpsc::channel::<v8::IsolateHandle>();

        let thread = std::thread::spawn(move || {
            let local_rt = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .build()
                .expect("failed to build per-isolate tokio runtime");
            let local_set = tokio::task::LocalSet::new();

            let mut runtime = JsRuntime::new(RuntimeOptions {
                extensions: vec![cosmos_capabilities::init()],
                ..Default::default()
            });
            runtime
                .execute_script("<cosmos-bootstrap>", BOOTSTRAP_JS.to_string().into())
                .expect("bootstrap script is valid JS");
            handle_tx.send(runtime.v8_isolate().thread_safe_handle()).ok();

            local_set.block_on(&local_rt, async {
                while let Some(message) = rx.recv().await {
                    match message {
                        WorkerMessage::SetContext(ctx) => {
                            runtime.op_state().borrow_mut().put(Rc::new((*ctx).clone()));
                        }
                        WorkerMessage::Eval { script, reply } => {
                            let result = run_script(&mut runtime, &script).await;
                            let _ = reply.send(result);
                        }
                        WorkerMessage::Shutdown => break,
                    }
                }
            });
        });

        let v8_handle = handle_rx.recv().expect("worker thread dropped before reporting its isolate handle");

        Self {
            tx,
            handle: Mutex::new(Some(thread)),
            v8_handle,
            loaded_mtime: Mutex::new(None),
            leaked: AtomicBool::new(false),
        }
    }

    fn is_leaked(&self) -> bool {
        self.leaked.load(Ordering::SeqCst)
    }
}

async fn run_script(runtime: &mut JsRuntime, script: &str) -> Result<String, String> {
    let global = runtime.execute_script("<cosmos-tool>", script.to_string().into()).map_err(|e| e.to_string())?;
    let resolved = runtime.resolve_value(global).await.map_err(|e| e.to_string())?;
    let scope = &mut runtime.handle_scope();
    let local = v8::Local::new(scope, resolved);
    Ok(local.to_rust_string_lossy(scope))
}

pub struct SandboxRuntime {
    registry: Arc<ToolRegistry>,
    isolates: Mutex<HashMap<String, Arc<Isolate>>>,
}

impl SandboxRuntime {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self { registry, isolates: Mutex::new(HashMap::new()) }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    fn get_or_create_isolate(&self, function_name: &str) -> Arc<Isolate> {
        let mut isolates = self.isolates.lock().expect("isolate map mutex poisoned");
        isolates.entry(function_name.to_string()).or_insert_with(|| Arc::new(Isolate::spawn())).clone()
    }

    fn effective_timeout(spec: &ToolSpec) -> Duration {
        let requested = spec.timeout_ms.map(Duration::from_millis).unwrap_or(DEFAULT_TIMEOUT);
        requested.min(MAX_TIMEOUT)
    }

    /// Execute `function_name` with `input`, honoring the tool's manifest
    /// timeout (clamped to 5 minutes) and the leaked-isolate policy.
    pub fn execute(&self, function_name: &str, input: &Value, ctx: &CapabilityContext) -> Result<Value, SandboxError> {
        let spec = self.registry.get(function_name)?;
        let isolate = self.get_or_create_isolate(function_name);

        if isolate.is_leaked() {
            return Err(SandboxError::Leaked(function_name.to_string()));
        }

        self.ensure_compiled(&isolate, &spec)?;

        isolate
            .tx
            .send(WorkerMessage::SetContext(Arc::new(ctx.clone())))
            .map_err(|_| SandboxError::Exception { tool: function_name.to_string(), message: "worker thread is gone".to_string() })?;

        let invocation = build_invocation(function_name, input);
        let (reply_tx, reply_rx) = std::sync::mpsc::channel();
        isolate
            .tx
            .send(WorkerMessage::Eval { script: invocation, reply: reply_tx })
            .map_err(|_| SandboxError::Exception { tool: function_name.to_string(), message: "worker thread is gone".to_string() })?;

        let timeout = Self::effective_timeout(&spec);
        match reply_rx.recv_timeout(timeout) {
            Ok(Ok(json)) => Ok(serde_json::from_str(&json)?),
            Ok(Err(message)) => Err(SandboxError::Exception { tool: function_name.to_string(), message }),
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {
                self.handle_timeout(&isolate, function_name, &spec, timeout);
                Err(SandboxError::Timeout { tool: function_name.to_string(), elapsed_ms: timeout.as_millis() as u64 })
            }
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => {
                Err(SandboxError::Exception { tool: function_name.to_string(), message: "worker thread disconnected".to_string() })
            }
        }
    }

    fn ensure_compiled(&self, isolate: &Isolate, spec: &ToolSpec) -> Result<(), SandboxError> {
        let on_disk_mtime = std::fs::metadata(&spec.source_path)?.modified()?;
        let mut loaded = isolate.loaded_mtime.lock().expect("isolate mtime mutex poisoned");
        if *loaded == Some(on_disk_mtime) {
            return Ok(());
        }

        let source = std::fs::read_to_string(&spec.source_path)?;
        let (reply_tx, reply_rx) = std::sync::mpsc::channel();
        isolate
            .tx
            .send(WorkerMessage::Eval { script: source, reply: reply_tx })
            .map_err(|_| SandboxError::Compile { tool: spec.function_name.clone(), message: "worker thread is gone".to_string() })?;

        match reply_rx.recv_timeout(DEFAULT_TIMEOUT) {
            Ok(Ok(_)) => {
                *loaded = Some(on_disk_mtime);
                Ok(())
            }
            Ok(Err(message)) => Err(SandboxError::Compile { tool: spec.function_name.clone(), message }),
            Err(_) => Err(SandboxError::Compile { tool: spec.function_name.clone(), message: "compile timed out".to_string() }),
        }
    }

    /// On timeout or cancellation: signal termination, grant a grace period,
    /// then either dispose (read-only tools) or mark leaked (write-class
    /// tools, to avoid force-disposing mid-write).
    fn handle_timeout(&self, isolate: &Isolate, function_name: &str, spec: &ToolSpec, _elapsed: Duration) {
        isolate.v8_handle.terminate_execution();
        std::thread::sleep(GRACE_PERIOD);

        let still_running = isolate.handle.lock().expect("isolate handle mutex poisoned").as_ref().map(|h| !h.is_finished()).unwrap_or(false);

        if !still_running {
            self.dispose(function_name);
            return;
        }

        if write_class(&spec.permissions) {
            tracing::warn!("sandbox: isolate for {function_name:?} leaked after timeout (write-class tool, not force-disposed)");
            isolate.leaked.store(true, Ordering::SeqCst);
        } else {
            tracing::warn!("sandbox: force-disposing unresponsive read-only isolate for {function_name:?}");
            self.dispose(function_name);
        }
    }

    fn dispose(&self, function_name: &str) {
        let removed = self.isolates.lock().expect("isolate map mutex poisoned").remove(function_name);
        if let Some(isolate) = removed {
            let _ = isolate.tx.send(WorkerMessage::Shutdown);
        }
    }

    /// `Close`: snapshot the isolate list under the map lock, then dispose
    /// each under its own isolate lock — never holding both at once.
    pub fn close(&self) {
        let names: Vec<String> = self.isolates.lock().expect("isolate map mutex poisoned").keys().cloned().collect();
        for name in names {
            self.dispose(&name);
        }
    }
}
