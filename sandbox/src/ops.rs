//! `deno_core` op bindings: the thin glue between the four JS-visible
//! namespaces and the capability logic in `capability.rs`. Every op reads
//! its [`CapabilityContext`] out of `OpState`, which `runtime.rs` refreshes
//! before each invocation.

use std::cell::RefCell;
use std::rc::Rc;

use deno_core::OpState;
use deno_core::op2;

use crate::capability;
use crate::capability::CapabilityContext;

fn ctx(state: &Rc<RefCell<OpState>>) -> Rc<CapabilityContext> {
    state.borrow().borrow::<Rc<CapabilityContext>>().clone()
}

#[op2]
#[string]
fn op_fs_read(state: &mut OpState, #[string] path: String) -> Result<String, deno_core::error::AnyError> {
    let ctx = state.borrow::<Rc<CapabilityContext>>().clone();
    capability::fs_read(&ctx, &path).map_err(Into::into)
}

#[op2]
fn op_fs_write(state: &mut OpState, #[string] path: String, #[string] content: String) -> Result<(), deno_core::error::AnyError> {
    let ctx = state.borrow::<Rc<CapabilityContext>>().clone();
    capability::fs_write(&ctx, &path, &content).map_err(Into::into)
}

#[op2]
#[serde]
fn op_fs_stat(state: &mut OpState, #[string] path: String) -> Result<capability::FsEntry, deno_core::error::AnyError> {
    let ctx = state.borrow::<Rc<CapabilityContext>>().clone();
    capability::fs_stat(&ctx, &path).map_err(Into::into)
}

#[op2]
#[serde]
fn op_fs_list(state: &mut OpState, #[string] path: String) -> Result<Vec<capability::FsEntry>, deno_core::error::AnyError> {
    let ctx = state.borrow::<Rc<CapabilityContext>>().clone();
    capability::fs_list(&ctx, &path).map_err(Into::into)
}

#[op2]
fn op_fs_unlink(state: &mut OpState, #[string] path: String) -> Result<(), deno_core::error::AnyError> {
    let ctx = state.borrow::<Rc<CapabilityContext>>().clone();
    capability::fs_unlink(&ctx, &path).map_err(Into::into)
}

#[op2(async)]
#[serde]
async fn op_http_get(
    state: Rc<RefCell<OpState>>,
    #[string] url: String,
    #[serde] headers: Option<std::collections::BTreeMap<String, String>>,
) -> Result<capability::HttpResponse, deno_core::error::AnyError> {
    let context = ctx(&state);
    capability::http_get(&context, &url, headers.as_ref()).await.map_err(Into::into)
}

#[op2(async)]
#[serde]
async fn op_http_post(
    state: Rc<RefCell<OpState>>,
    #[string] url: String,
    #[string] body: String,
    #[serde] headers: Option<std::collections::BTreeMap<String, String>>,
) -> Result<capability::HttpResponse, deno_core::error::AnyError> {
    let context = ctx(&state);
    capability::http_post(&context, &url, &body, headers.as_ref()).await.map_err(Into::into)
}

#[op2]
#[serde]
fn op_storage_get(state: &mut OpState) -> Result<serde_json::Value, deno_core::error::AnyError> {
    let ctx = state.borrow::<Rc<CapabilityContext>>().clone();
    capability::storage_get(&ctx).map_err(Into::into)
}

#[op2]
fn op_storage_set(state: &mut OpState, #[serde] value: serde_json::Value) -> Result<(), deno_core::error::AnyError> {
    let ctx = state.borrow::<Rc<CapabilityContext>>().clone();
    capability::storage_set(&ctx, &value).map_err(Into::into)
}

#[op2]
fn op_ui_emit(state: &mut OpState, #[string] message: String) {
    let ctx = state.borrow::<Rc<CapabilityContext>>().clone();
    capability::ui_emit(ctx.ui_sink.as_ref(), message);
}

deno_core::extension!(
    cosmos_capabilities,
    ops = [
        op_fs_read,
        op_fs_write,
        op_fs_stat,
        op_fs_list,
        op_fs_unlink,
        op_http_get,
        op_http_post,
        op_storage_get,
        op_storage_set,
        op_ui_emit,
    ],
);

/// Run once per isolate right after the extension registers its ops. The
/// `op2` macro only makes `Deno.core.ops.op_*` callable; tool bodies address
/// capabilities through the `fs`/`http`/`storage`/`ui` namespaces §4.6
/// promises, so this binds each namespace method to its op.
pub const BOOTSTRAP_JS: &str = r#"
((globalThis) => {
  const ops = Deno.core.ops;
  globalThis.fs = {
    read: (path) => ops.op_fs_read(path),
    write: (path, content) => ops.op_fs_write(path, content),
    stat: (path) => ops.op_fs_stat(path),
    list: (path) => ops.op_fs_list(path),
    unlink: (path) => ops.op_fs_unlink(path),
  };
  globalThis.http = {
    get: (url, headers) => ops.op_http_get(url, headers ?? null),
    post: (url, body, headers) => ops.op_http_post(url, body, headers ?? null),
  };
  globalThis.storage = {
    get: () => ops.op_storage_get(),
    set: (value) => ops.op_storage_set(value),
  };
  globalThis.ui = {
    emit: (message) => ops.op_ui_emit(message),
  };
})(globalThis);
"#;
