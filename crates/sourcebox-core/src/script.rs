//! Synchronous-convention loader: wrap, seed, run eagerly.

use serde_json::json;
use sourcebox_host::{Binding, Context, ScriptHost, ScriptSource, Value};

use crate::error::Error;
use crate::exec;
use crate::ident::{FileResolver, ModuleIdentity};
use crate::options::{EvalOptions, Format};

/// Evaluate script text as if a file at the synthetic filename had been
/// required. The wrapped text's completion value is the export slot, so
/// the host returns it no matter how the original text ends; errors from
/// compilation or execution pass through unchanged.
pub(crate) fn run<H: ScriptHost>(
    host: &H,
    code: &str,
    identity: &ModuleIdentity,
    format: Format,
    ctx: &mut Context,
    options: &EvalOptions,
) -> Result<Value, Error> {
    let wrapped = wrap(code, format, options.export_var.as_deref())?;
    seed_module(ctx, identity);
    let source = ScriptSource {
        code: &wrapped,
        identifier: &identity.filename,
        line_offset: options.line_offset,
        column_offset: options.column_offset,
    };
    let resolver = FileResolver { host, identity };
    let value = host.run_script(&source, ctx, &resolver)?;
    match &options.exec {
        Some(body) => exec::run_followup(host, body, value, options, &ctx.console),
        None => Ok(value),
    }
}

/// Append whatever trailing expression makes the evaluation yield the
/// convention's exports, regardless of how the text itself ends.
///
/// `bare` text already ends in a returnable expression and runs
/// unmodified. The legacy `globals` wrapping yields the named global
/// instead; dispatch rejects that format, but the wrapping is kept and
/// requires `export_var`.
pub(crate) fn wrap(code: &str, format: Format, export_var: Option<&str>) -> Result<String, Error> {
    match format {
        Format::Bare => Ok(code.to_string()),
        Format::Globals => {
            let var = export_var.ok_or(Error::MissingExportVar)?;
            Ok(format!("{code}\n;this.{var};\n"))
        }
        _ => Ok(format!("{code}\n;module.exports;\n")),
    }
}

/// Seed the module identity bindings: the module object with its export
/// slot, the `exports` alias, the file-anchored require, and the
/// directory/file names. Caller-supplied context entries win, so seeds
/// only fill vacant names.
fn seed_module(ctx: &mut Context, identity: &ModuleIdentity) {
    let seeds = [
        (
            "module",
            Binding::Data(json!({
                "id": identity.filename,
                "path": identity.dir.display().to_string(),
                "exports": {},
                "loaded": false,
            })),
        ),
        (
            "exports",
            Binding::Alias(vec!["module".into(), "exports".into()]),
        ),
        ("require", Binding::HostObject("require".into())),
        (
            "__dirname",
            Binding::Data(Value::String(identity.dir.display().to_string())),
        ),
        (
            "__filename",
            Binding::Data(Value::String(identity.filename.clone())),
        ),
    ];
    for (name, binding) in seeds {
        ctx.vars.entry(name.to_string()).or_insert(binding);
    }
}
