//! Subprocess fallback for module-graph evaluation.
//!
//! A process without the module-graph capability can still honor a graph
//! request that carries a follow-up snippet: the evaluation moves to a
//! child process started with the capability enabled. The channel is
//! newline-delimited JSON on the child's stdio — the child announces
//! readiness, the parent sends exactly one [`WorkerRequest`], and exactly
//! one [`WorkerReply`] comes back. There is no timeout and no
//! cancellation; a hung child hangs the call.
//!
//! Only plain data crosses the boundary. The parent strips every
//! non-data binding from the caller's original context overrides before
//! sending — host objects and wired bindings are re-acquired in the
//! child, never transmitted.

use std::collections::BTreeMap;
use std::io::{self, BufRead, BufReader, Write};
use std::process::Child;

use once_cell::sync::OnceCell;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sourcebox_host::{Binding, Bindings, EvalError, ScriptHost, Value};

use crate::console::ConsoleOutput;
use crate::error::Error;
use crate::ident::ModuleIdentity;
use crate::options::{ColorMode, EvalOptions, Format};
use crate::{context, graph};

/// The serializable subset of an evaluation request, sent to the worker.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkerRequest {
    pub code: String,
    pub filename: String,
    /// Data-only context overrides; see [`strip_context`].
    pub context: BTreeMap<String, Value>,
    pub include_globals: bool,
    pub env: Option<BTreeMap<String, String>>,
    pub line_offset: usize,
    pub column_offset: usize,
    pub exec: Option<String>,
    pub arg: Value,
    /// Whether the caller captures console output.
    pub capture: bool,
    pub color_mode: ColorMode,
}

/// What the worker sends back: a result or an error, plus whatever
/// console text the child captured.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct WorkerReply {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<EvalError>,
    #[serde(default)]
    pub console: CapturedConsole,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CapturedConsole {
    pub out: String,
    pub err: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct WorkerHello {
    ready: bool,
}

/// Keep only the plain-data bindings of the caller's original overrides.
/// This is the mandatory strip step: host globals are frequently not
/// serializable and are re-acquired locally by the child.
pub(crate) fn strip_context(overrides: &Bindings) -> BTreeMap<String, Value> {
    overrides
        .iter()
        .filter_map(|(name, binding)| match binding {
            Binding::Data(value) => Some((name.clone(), value.clone())),
            _ => None,
        })
        .collect()
}

/// Run a graph evaluation in a worker process and merge its captured
/// output back into the caller's descriptor.
pub(crate) fn delegate<H: ScriptHost>(
    host: &H,
    code: &str,
    identity: &ModuleIdentity,
    options: &EvalOptions,
) -> Result<Value, Error> {
    let request = WorkerRequest {
        code: code.to_string(),
        filename: identity.filename.clone(),
        context: strip_context(&options.context),
        include_globals: options.include_globals,
        env: options.env.clone(),
        line_offset: options.line_offset,
        column_offset: options.column_offset,
        exec: options.exec.clone(),
        arg: options.arg.clone(),
        capture: options.console_output.is_some(),
        color_mode: options.color_mode,
    };

    let mut child = host
        .spawn_graph_worker()
        .map_err(|err| Error::SubprocessFailure(format!("failed to spawn worker: {err}")))?;
    let reply = talk_to_child(&request, &mut child);
    if reply.is_err() {
        let _ = child.kill();
    }
    let _ = child.wait();
    let reply = reply?;

    if let Some(output) = &options.console_output {
        output.append(&reply.console.out, &reply.console.err);
    }
    match (reply.error, reply.result) {
        (Some(error), _) => Err(Error::Evaluation(error)),
        (None, Some(value)) => Ok(value),
        (None, None) => Err(Error::SubprocessFailure(
            "worker reply carried neither a result nor an error".into(),
        )),
    }
}

fn talk_to_child(request: &WorkerRequest, child: &mut Child) -> Result<WorkerReply, Error> {
    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| Error::SubprocessFailure("worker stdin is not piped".into()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| Error::SubprocessFailure("worker stdout is not piped".into()))?;
    exchange(request, &mut BufReader::new(stdout), &mut stdin)
}

/// One round trip over an already-open channel: await readiness, send
/// the request, await the reply.
pub(crate) fn exchange<R: BufRead, W: Write>(
    request: &WorkerRequest,
    reader: &mut R,
    writer: &mut W,
) -> Result<WorkerReply, Error> {
    let hello: WorkerHello = read_message(reader, "readiness signal")?;
    if !hello.ready {
        return Err(Error::SubprocessFailure("worker refused the session".into()));
    }
    send_message(writer, request)?;
    read_message(reader, "reply")
}

fn read_message<T: DeserializeOwned, R: BufRead>(reader: &mut R, what: &str) -> Result<T, Error> {
    let mut line = String::new();
    let read = reader
        .read_line(&mut line)
        .map_err(|err| Error::SubprocessFailure(format!("worker channel error: {err}")))?;
    if read == 0 {
        return Err(Error::SubprocessFailure(format!(
            "worker exited before sending its {what}"
        )));
    }
    serde_json::from_str(line.trim())
        .map_err(|err| Error::SubprocessFailure(format!("malformed worker {what}: {err}")))
}

fn send_message<T: Serialize, W: Write>(writer: &mut W, message: &T) -> Result<(), Error> {
    let line = serde_json::to_string(message)
        .map_err(|err| Error::SubprocessFailure(format!("cannot encode worker message: {err}")))?;
    writeln!(writer, "{line}")
        .and_then(|()| writer.flush())
        .map_err(|err| Error::SubprocessFailure(format!("worker channel error: {err}")))
}

/// Serve one worker session on the given streams: announce readiness,
/// evaluate exactly one request, reply, and return.
///
/// This is the child side of the protocol, public so any binary that
/// embeds a capability-enabled host can act as the worker.
pub fn serve<H: ScriptHost>(
    host: &H,
    mut reader: impl BufRead,
    mut writer: impl Write,
) -> io::Result<()> {
    let hello = serde_json::to_string(&WorkerHello { ready: true })?;
    writeln!(writer, "{hello}")?;
    writer.flush()?;

    let mut line = String::new();
    if reader.read_line(&mut line)? == 0 {
        // Parent went away before sending work.
        return Ok(());
    }
    let reply = match serde_json::from_str::<WorkerRequest>(line.trim()) {
        Ok(request) => evaluate_request(host, &request),
        Err(err) => WorkerReply {
            result: None,
            error: Some(EvalError::new(format!("malformed worker request: {err}"))),
            console: CapturedConsole::default(),
        },
    };
    writeln!(writer, "{}", serde_json::to_string(&reply)?)?;
    writer.flush()
}

fn evaluate_request<H: ScriptHost>(host: &H, request: &WorkerRequest) -> WorkerReply {
    let console_output = request.capture.then(ConsoleOutput::new);
    let options = EvalOptions {
        format: Format::Es,
        filename: Some(request.filename.clone()),
        context: request
            .context
            .iter()
            .map(|(name, value)| (name.clone(), Binding::Data(value.clone())))
            .collect(),
        include_globals: request.include_globals,
        env: request.env.clone(),
        export_var: None,
        line_offset: request.line_offset,
        column_offset: request.column_offset,
        exec: request.exec.clone(),
        arg: request.arg.clone(),
        console_output: console_output.clone(),
        color_mode: request.color_mode,
    };
    let result = eval_in_worker(host, &request.code, &options);
    let console = console_output
        .map(|output| CapturedConsole {
            out: output.out(),
            err: output.err(),
        })
        .unwrap_or_default();
    match result {
        Ok(value) => WorkerReply {
            result: Some(value),
            error: None,
            console,
        },
        Err(err) => WorkerReply {
            result: None,
            error: Some(err.into_eval()),
            console,
        },
    }
}

/// The child's evaluation path: rebuild the context locally — globals
/// are re-acquired here, not transmitted — then run the graph loader
/// directly. A worker without the capability replies with an error
/// instead of delegating onward.
fn eval_in_worker<H: ScriptHost>(
    host: &H,
    code: &str,
    options: &EvalOptions,
) -> Result<Value, Error> {
    if !host.graph_modules_supported() {
        return Err(Error::MissingCapabilityFlag);
    }
    let filename = options.filename.as_deref().ok_or(Error::MissingFilename)?;
    let identity = ModuleIdentity::resolve(filename)?;
    let base = OnceCell::new();
    let (mut ctx, capture) = context::build(host, &base, options);
    let result = graph::run(host, code, &identity, &mut ctx, options);
    // Snapshot before the reply is assembled from the descriptor.
    drop(capture);
    result
}
