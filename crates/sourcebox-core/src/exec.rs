//! Follow-up snippet execution against an evaluated module value.

use sourcebox_host::{ConsoleChannel, ScriptHost, Value};

use crate::error::Error;
use crate::options::EvalOptions;

/// Run the request's follow-up snippet as one async-capable callable
/// with three bound parameters: `IMPORTED` (the evaluated module value),
/// `arg` (the request's argument), and `console` (the context console if
/// one was wired, otherwise the host default). Errors thrown inside are
/// the call's failure.
pub(crate) fn run_followup<H: ScriptHost>(
    host: &H,
    body: &str,
    imported: Value,
    options: &EvalOptions,
    console: &ConsoleChannel,
) -> Result<Value, Error> {
    host.run_snippet(body, &imported, &options.arg, console)
        .map_err(Error::Evaluation)
}
