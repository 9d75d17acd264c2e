//! Import or require module text from memory, rather than disk.
//!
//! Source text is evaluated as if a file at a synthetic filename had
//! been loaded: the filename's directory anchors format guessing and
//! module resolution, the context mimics what a real file would see, and
//! the result is whatever the module exposes. Two conventions are
//! supported — the eager synchronous one (export slot) and the
//! graph-based one (static imports linked before evaluation) — behind a
//! single entry point. Console output can be captured, and a follow-up
//! snippet can run against the evaluated module.
//!
//! Script execution itself belongs to a pluggable [`ScriptHost`]; this
//! crate owns everything around it. When the process cannot build module
//! graphs but a follow-up snippet was given, the evaluation moves to a
//! worker process (see [`worker`]).
//!
//! ```
//! use sourcebox_core::{EvalOptions, Evaluator, Format};
//! use sourcebox_host::micro::MicroHost;
//!
//! let evaluator = Evaluator::new(MicroHost::new());
//! let value = evaluator
//!     .evaluate(
//!         "module.exports = 40 + 2",
//!         EvalOptions {
//!             format: Format::Cjs,
//!             ..EvalOptions::for_file("/tmp/answer.js")
//!         },
//!     )
//!     .unwrap();
//! assert_eq!(value, serde_json::json!(42));
//! ```

mod console;
mod context;
mod error;
mod exec;
mod format;
mod graph;
mod ident;
mod options;
mod script;
pub mod worker;

use std::path::Path;
use std::sync::Arc;

use once_cell::sync::OnceCell;

use crate::ident::ModuleIdentity;

pub use crate::console::ConsoleOutput;
pub use crate::error::Error;
pub use crate::format::{format_cache, FormatCache};
pub use crate::options::{ColorMode, EvalOptions, Format, ModuleKind};
pub use sourcebox_host::{
    Binding, Bindings, Context, EvalError, Namespace, ScriptHost, Value,
};

/// Evaluates in-memory module text through a script host.
///
/// Holds the two pieces of cross-request state: the format cache
/// (process-wide default unless one is injected) and the lazily computed
/// base global set. Everything else is per-request, so an evaluator is
/// freely shared across threads when its host is.
pub struct Evaluator<H: ScriptHost> {
    host: H,
    cache: Arc<FormatCache>,
    base_globals: OnceCell<Bindings>,
}

impl<H: ScriptHost> Evaluator<H> {
    /// An evaluator backed by the process-wide format cache.
    pub fn new(host: H) -> Self {
        Self::with_cache(host, format_cache())
    }

    /// An evaluator with its own format cache, for callers that want
    /// isolation from the process-wide instance.
    pub fn with_cache(host: H, cache: Arc<FormatCache>) -> Self {
        Self {
            host,
            cache,
            base_globals: OnceCell::new(),
        }
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    /// Can this process build in-memory module graphs?
    pub fn graph_modules_supported(&self) -> bool {
        self.host.graph_modules_supported()
    }

    /// Forget every cached directory → format resolution.
    pub fn clear_format_cache(&self) {
        self.cache.clear();
    }

    /// The module convention a file at `filename` would load under.
    pub fn guess_format(&self, filename: impl AsRef<Path>) -> Result<ModuleKind, Error> {
        let path = std::path::absolute(filename.as_ref())?;
        format::guess_kind(&self.cache, &path)
    }

    /// Evaluate `code` as an in-memory module.
    ///
    /// Returns the module's export value (synchronous convention), its
    /// namespace as an object (graph convention), or the follow-up
    /// snippet's result when `exec` was given. Errors thrown by the code
    /// itself surface as [`Error::Evaluation`] with message and stack
    /// intact; captured console output is finalized before any return,
    /// success or failure.
    pub fn evaluate(&self, code: &str, options: EvalOptions) -> Result<Value, Error> {
        let filename = match options.filename.as_deref() {
            Some(name) if !name.is_empty() => name,
            _ => return Err(Error::MissingFilename),
        };
        let identity = ModuleIdentity::resolve(filename)?;

        let format = match options.format {
            Format::Guess => format::guess_kind(&self.cache, &identity.path)?.format(),
            format if format.is_rejected() => {
                return Err(Error::UnsupportedFormat(format.as_str().to_string()))
            }
            format => format,
        };

        // The capture guard drops at the end of this scope, after the
        // loader settles — success or failure — and snapshots exactly
        // once into the caller's descriptor.
        let (mut ctx, _capture) = context::build(&self.host, &self.base_globals, &options);
        match format.kind() {
            Some(ModuleKind::CommonJs) => {
                script::run(&self.host, code, &identity, format, &mut ctx, &options)
            }
            Some(ModuleKind::Es) => graph::run(&self.host, code, &identity, &mut ctx, &options),
            None => Err(Error::UnsupportedFormat(format.as_str().to_string())),
        }
    }
}
