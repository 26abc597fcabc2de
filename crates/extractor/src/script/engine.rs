//! QuickJS sandbox that hosts the extraction script.
//!
//! The script sees exactly three host functions:
//! - `__hostFetch(requestJson)` performs one HTTP request through the shared
//!   transport and returns `{ok, status, body}` or `{ok: false, error}`.
//! - `__parseUrl(url, base?)` returns `{href, host, path, query}` or `null`.
//! - `__hostLog(level, message)` forwards a message to `tracing`.

use std::sync::Arc;

use rquickjs::function::Opt;
use rquickjs::{CatchResultExt, CaughtError, Context, Ctx, Function, Runtime};
use serde_json::json;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use crate::error::ExtractorError;
use crate::selection::PlaybackSource;
use crate::transport::{HttpRequest, HttpTransport};

const MEMORY_LIMIT: usize = 64 * 1024 * 1024;
const ENTRY: &str = "JSON.stringify(extract(JSON.parse(__input)) ?? null)";

/// Capabilities lent to one script run. Every fetch races the run's token.
pub(super) struct HostBridge {
    transport: Arc<dyn HttpTransport>,
    handle: Handle,
    token: CancellationToken,
}

impl HostBridge {
    pub(super) fn new(
        transport: Arc<dyn HttpTransport>,
        handle: Handle,
        token: CancellationToken,
    ) -> Self {
        Self {
            transport,
            handle,
            token,
        }
    }

    fn fetch(&self, request_json: &str) -> String {
        let outcome = match serde_json::from_str::<HttpRequest>(request_json) {
            Ok(request) => {
                debug!(method = ?request.method, url = %request.url, "Script fetch");
                self.handle.block_on(async {
                    tokio::select! {
                        result = self.transport.execute(request) => result,
                        _ = self.token.cancelled() => Err(ExtractorError::Cancelled),
                    }
                })
            }
            Err(e) => Err(e.into()),
        };

        match outcome {
            Ok(response) => json!({
                "ok": response.is_success(),
                "status": response.status,
                "body": response.body,
            }),
            Err(e) => json!({ "ok": false, "status": 0, "error": e.to_string() }),
        }
        .to_string()
    }
}

fn parse_url(input: &str, base: Option<&str>) -> String {
    let parsed = match base {
        Some(base) => Url::parse(base).and_then(|b| b.join(input)),
        None => Url::parse(input),
    };
    match parsed {
        Ok(url) => json!({
            "href": url.as_str(),
            "host": url.host_str(),
            "path": url.path(),
            "query": url
                .query_pairs()
                .map(|(k, v)| [k.into_owned(), v.into_owned()])
                .collect::<Vec<_>>(),
        })
        .to_string(),
        Err(_) => "null".to_owned(),
    }
}

fn script_log(level: &str, message: &str) {
    match level {
        "warn" | "error" => warn!(detail = message, "Extraction script"),
        _ => debug!(detail = message, "Extraction script"),
    }
}

fn install_globals<'js>(ctx: &Ctx<'js>, input: &str, bridge: HostBridge) -> rquickjs::Result<()> {
    let globals = ctx.globals();
    globals.set("__input", input.to_owned())?;
    globals.set(
        "__hostFetch",
        Function::new(ctx.clone(), move |request: String| bridge.fetch(&request))?,
    )?;
    globals.set(
        "__parseUrl",
        Function::new(ctx.clone(), |url: String, base: Opt<String>| {
            parse_url(&url, base.0.as_deref())
        })?,
    )?;
    globals.set(
        "__hostLog",
        Function::new(ctx.clone(), |level: String, message: String| {
            script_log(&level, &message)
        })?,
    )?;
    Ok(())
}

fn convert_caught(caught: CaughtError<'_>) -> ExtractorError {
    match caught {
        CaughtError::Exception(exc) => {
            let message = exc.message().unwrap_or_default();
            match exc.stack().filter(|s| !s.is_empty()) {
                Some(stack) => ExtractorError::ScriptError(format!("{message}\n{stack}")),
                None => ExtractorError::ScriptError(message),
            }
        }
        CaughtError::Value(value) => ExtractorError::ScriptError(format!(
            "script threw value: {:?}",
            value.as_string().and_then(|s| s.to_string().ok())
        )),
        CaughtError::Error(err) => ExtractorError::ScriptError(err.to_string()),
    }
}

fn runtime_error(err: rquickjs::Error) -> ExtractorError {
    ExtractorError::ScriptError(err.to_string())
}

/// Evaluate `script` and call its `extract(input)`. Blocking; call from a
/// blocking thread. `Ok(None)` means the script found nothing playable.
pub(super) fn run(
    script: &str,
    input: &str,
    bridge: HostBridge,
) -> Result<Option<PlaybackSource>, ExtractorError> {
    let token = bridge.token.clone();

    let runtime = Runtime::new().map_err(runtime_error)?;
    runtime.set_memory_limit(MEMORY_LIMIT);
    let interrupt = token.clone();
    runtime.set_interrupt_handler(Some(Box::new(move || interrupt.is_cancelled())));
    let context = Context::full(&runtime).map_err(runtime_error)?;

    let output = context.with(|ctx| {
        install_globals(&ctx, input, bridge)
            .and_then(|()| ctx.eval::<(), _>(script))
            .and_then(|()| ctx.eval::<String, _>(ENTRY))
            .catch(&ctx)
            .map_err(convert_caught)
    });

    let output = match output {
        Err(_) if token.is_cancelled() => return Err(ExtractorError::Cancelled),
        other => other?,
    };

    if output == "null" {
        return Ok(None);
    }
    Ok(Some(serde_json::from_str(&output)?))
}
