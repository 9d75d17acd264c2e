//! Host-engine interface for sourcebox.
//!
//! The orchestration layer in `sourcebox-core` never talks to a script
//! engine directly. It drives the [`ScriptHost`] trait defined here, which
//! covers exactly the capabilities the loaders need: eager script
//! execution, module parsing and graph evaluation, native module
//! resolution, follow-up snippets, and spawning a capability-enabled
//! worker process.
//!
//! The crate also carries the vocabulary shared between the orchestrator
//! and hosts — [`Context`], [`Binding`], [`Namespace`], the console
//! channel — and a reference [`micro::MicroHost`] that implements a small
//! JavaScript-like subset so the CLI and the test suites have a concrete
//! engine to run against.

pub mod console;
pub mod micro;

pub use console::{CaptureSink, ConsoleChannel};

use std::collections::BTreeMap;
use std::io;
use std::path::Path;
use std::process::Child;

use serde::{Deserialize, Serialize};

/// Values that cross the host boundary. Everything evaluated code can
/// return, export, or receive as an argument is plain data.
pub type Value = serde_json::Value;

/// The exported names of an evaluated module, in stable order.
pub type Namespace = BTreeMap<String, Value>;

/// The named global bindings of a [`Context`].
pub type Bindings = BTreeMap<String, Binding>;

/// One named entry in an evaluation context.
#[derive(Clone, Debug, PartialEq)]
pub enum Binding {
    /// A plain data value, owned by the context.
    Data(Value),
    /// An opaque global supplied by the host environment — a function,
    /// class, or resource the context cannot represent as data. Host
    /// objects never cross a process boundary.
    HostObject(String),
    /// A redirect to another context path. The empty path is the context
    /// itself, which is how `global` and `globalThis` become
    /// self-referential; `["module", "exports"]` realizes the `exports`
    /// alias of the synchronous convention.
    Alias(Vec<String>),
    /// The console-like binding. Writes route to the context's channel.
    Console,
}

/// The global bindings visible to evaluated code, plus the console channel
/// they write to. Built fresh per evaluation, consumed by one loader,
/// never shared across requests.
#[derive(Debug, Default)]
pub struct Context {
    pub vars: Bindings,
    pub console: ConsoleChannel,
}

/// A unit of source text handed to the host, carrying its synthetic
/// identity and the stack-trace offsets of the unwrapped original.
#[derive(Clone, Copy, Debug)]
pub struct ScriptSource<'a> {
    pub code: &'a str,
    /// Module identity reported in stack traces and `import.meta`.
    pub identifier: &'a str,
    /// Added to the line numbers the host reports in stack traces.
    pub line_offset: usize,
    /// Added to first-line column numbers the host reports.
    pub column_offset: usize,
}

/// A module whose statically declared imports have been extracted but not
/// yet linked.
#[derive(Clone, Debug)]
pub struct ParsedModule {
    pub identifier: String,
    pub body: String,
    /// Static import specifiers, in declaration order, unresolved.
    pub imports: Vec<String>,
    pub line_offset: usize,
    pub column_offset: usize,
}

/// A link-phase stand-in exposing exactly the names of a real module the
/// evaluated graph imports. Shares the realm of the module that
/// referenced it.
#[derive(Clone, Debug)]
pub struct SyntheticModule {
    /// The specifier as the graph declared it, unrewritten.
    pub specifier: String,
    pub exports: Namespace,
}

/// An error raised by code under evaluation, including syntax errors in
/// the source text itself. Message and stack text cross the worker
/// boundary verbatim; native stack identity does not.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{message}")]
pub struct EvalError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl EvalError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stack: None,
        }
    }

    pub fn with_stack(message: impl Into<String>, stack: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stack: Some(stack.into()),
        }
    }
}

/// Module resolution anchored at the synthetic file, provided by the
/// orchestrator. Hosts call back into it when evaluated code requires or
/// dynamically imports another module.
pub trait ModuleResolver {
    /// Synchronous-convention require, using the host's native resolution
    /// rules anchored at the synthetic filename.
    fn require(&self, specifier: &str) -> Result<Value, EvalError>;

    /// Dynamic import. Relative specifiers resolve against the synthetic
    /// file's directory; everything else passes through unchanged.
    fn import(&self, specifier: &str) -> Result<Namespace, EvalError>;
}

/// The script engine as the orchestrator sees it.
///
/// Implementations wrap whatever actually executes code — the reference
/// [`micro::MicroHost`] here, or a real embedded engine. The orchestrator
/// owns format resolution, context assembly, linking order, and the
/// worker protocol; the host owns execution.
pub trait ScriptHost: Send + Sync {
    /// Version of the runtime this host embeds.
    fn runtime_version(&self) -> semver::Version;

    /// Names a fresh isolated context defines on its own — the bare
    /// language, before the host environment adds anything.
    fn intrinsic_globals(&self) -> Vec<String>;

    /// Every global visible in the ambient host environment, intrinsics
    /// included.
    fn ambient_globals(&self) -> Bindings;

    /// Compile and eagerly run script text against `ctx`, returning the
    /// completion value of the last evaluated expression.
    fn run_script(
        &self,
        source: &ScriptSource<'_>,
        ctx: &mut Context,
        modules: &dyn ModuleResolver,
    ) -> Result<Value, EvalError>;

    /// Whether this process can construct in-memory module graphs.
    fn graph_modules_supported(&self) -> bool;

    /// Parse module text and extract its statically declared imports.
    fn parse_module(&self, source: &ScriptSource<'_>) -> Result<ParsedModule, EvalError>;

    /// Evaluate a parsed module whose static imports are pre-linked to
    /// `links`. Dynamic imports go through `modules`.
    fn evaluate_module(
        &self,
        module: &ParsedModule,
        links: &[SyntheticModule],
        ctx: &mut Context,
        modules: &dyn ModuleResolver,
    ) -> Result<Namespace, EvalError>;

    /// Import a real module — disk or ecosystem — by resolved specifier.
    fn import_module(&self, specifier: &str) -> Result<Namespace, EvalError>;

    /// Resolve and load a module the way a require call issued from
    /// `from` would.
    fn require_module(&self, from: &Path, specifier: &str) -> Result<Value, EvalError>;

    /// Build and invoke one async-capable callable whose body is `body`,
    /// with `IMPORTED`, `arg`, and the console bound as its parameters.
    fn run_snippet(
        &self,
        body: &str,
        imported: &Value,
        arg: &Value,
        console: &ConsoleChannel,
    ) -> Result<Value, EvalError>;

    /// Spawn a child process of this host with the module-graph
    /// capability enabled and stdio piped for the worker protocol.
    fn spawn_graph_worker(&self) -> io::Result<Child>;
}
