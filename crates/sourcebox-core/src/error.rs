//! Evaluation error types.

use std::path::PathBuf;

use semver::Version;
use sourcebox_host::EvalError;

/// Errors that can occur while resolving, loading, or evaluating
/// in-memory module text.
///
/// Only [`Error::Evaluation`] carries text thrown by the evaluated code
/// itself (message and stack verbatim, with positions remapped by the
/// request offsets). Every other variant is raised fresh at the point of
/// detection.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The request had no synthetic filename.
    #[error("filename is required")]
    MissingFilename,

    /// The format value is outside the recognized set, or names a legacy
    /// convention that is recognized but never executed.
    #[error("unsupported module format \"{0}\"")]
    UnsupportedFormat(String),

    /// The host runtime predates in-memory module graphs.
    #[error(
        "module-graph evaluation requires a host runtime of {} or later, found {found}",
        *crate::graph::MIN_GRAPH_RUNTIME
    )]
    UnsupportedRuntime { found: Version },

    /// The process was started without the module-graph capability and no
    /// follow-up snippet was given, so the evaluation cannot move to a
    /// worker.
    #[error(
        "this process cannot build in-memory module graphs; start the host with its \
         module-graph capability enabled, or pass an exec snippet so the evaluation \
         can run in a worker process"
    )]
    MissingCapabilityFlag,

    /// The `globals` wrapping was requested without naming the exported
    /// global.
    #[error("export_var is required for the \"globals\" format")]
    MissingExportVar,

    /// The worker channel failed: spawn error, or the child went away
    /// before replying.
    #[error("module-graph worker failed: {0}")]
    SubprocessFailure(String),

    /// A project manifest existed but did not parse as JSON. Finding no
    /// manifest is not an error; finding a broken one is.
    #[error("invalid project manifest {path}: {source}")]
    InvalidManifest {
        path: PathBuf,
        source: serde_json::Error,
    },

    /// The filename could not be normalized to a module identity.
    #[error("invalid filename \"{filename}\": {reason}")]
    InvalidFilename { filename: String, reason: String },

    /// The evaluated code (or its follow-up snippet) threw. Passed
    /// through unchanged.
    #[error(transparent)]
    Evaluation(#[from] EvalError),

    /// Filesystem error during the manifest walk or identity resolution.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Flatten for the worker reply: evaluation errors keep their stack
    /// text, everything else becomes a fresh message.
    pub(crate) fn into_eval(self) -> EvalError {
        match self {
            Error::Evaluation(err) => err,
            other => EvalError::new(other.to_string()),
        }
    }
}
