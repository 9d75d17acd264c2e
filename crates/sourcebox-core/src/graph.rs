//! Module-graph loader: link statically, evaluate, or fall back to a
//! worker process.

use once_cell::sync::Lazy;
use semver::Version;
use sourcebox_host::{Context, Namespace, ScriptHost, ScriptSource, SyntheticModule, Value};

use crate::error::Error;
use crate::exec;
use crate::ident::{resolve_if_needed, FileResolver, ModuleIdentity};
use crate::options::EvalOptions;
use crate::worker;

/// Oldest host runtime whose in-memory module graphs behave correctly.
pub(crate) static MIN_GRAPH_RUNTIME: Lazy<Version> = Lazy::new(|| Version::new(20, 8, 0));

/// Evaluate module text as if a file at the synthetic filename had been
/// imported.
///
/// Preconditions, in order: the runtime version gate, then the process
/// capability. A process without the capability can still serve the
/// request when a follow-up snippet was given — the whole evaluation
/// moves to a worker process and its captured output merges back into
/// the caller's descriptor.
pub(crate) fn run<H: ScriptHost>(
    host: &H,
    code: &str,
    identity: &ModuleIdentity,
    ctx: &mut Context,
    options: &EvalOptions,
) -> Result<Value, Error> {
    let found = host.runtime_version();
    if found < *MIN_GRAPH_RUNTIME {
        return Err(Error::UnsupportedRuntime { found });
    }
    if !host.graph_modules_supported() {
        if options.exec.is_none() {
            return Err(Error::MissingCapabilityFlag);
        }
        return worker::delegate(host, code, identity, options);
    }

    let source = ScriptSource {
        code,
        identifier: identity.file_url.as_str(),
        line_offset: options.line_offset,
        column_offset: options.column_offset,
    };
    let parsed = host.parse_module(&source)?;

    // Link phase: every statically declared specifier becomes a synthetic
    // module exposing exactly the names the real import provides, sharing
    // the graph's context.
    let mut links = Vec::with_capacity(parsed.imports.len());
    for specifier in &parsed.imports {
        let resolved = resolve_if_needed(&identity.dir_url, specifier)?;
        let exports = host.import_module(&resolved)?;
        links.push(SyntheticModule {
            specifier: specifier.clone(),
            exports,
        });
    }

    let resolver = FileResolver { host, identity };
    let namespace = host.evaluate_module(&parsed, &links, ctx, &resolver)?;
    let value = namespace_value(namespace);
    match &options.exec {
        Some(body) => exec::run_followup(host, body, value, options, &ctx.console),
        None => Ok(value),
    }
}

fn namespace_value(namespace: Namespace) -> Value {
    Value::Object(namespace.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use once_cell::sync::OnceCell;
    use serde_json::json;
    use sourcebox_host::micro::MicroHost;

    fn graph_host() -> MicroHost {
        MicroHost::new().with_graph_modules(true)
    }

    fn run_graph(host: &MicroHost, code: &str, options: &EvalOptions) -> Result<Value, Error> {
        let identity = ModuleIdentity::resolve(options.filename.as_deref().unwrap()).unwrap();
        let cell = OnceCell::new();
        let (mut ctx, _guard) = crate::context::build(host, &cell, options);
        run(host, code, &identity, &mut ctx, options)
    }

    #[test]
    fn test_namespace_with_default_export() {
        let options = EvalOptions::for_file("/tmp/five.mjs");
        let value = run_graph(&graph_host(), "export default 5", &options).unwrap();
        assert_eq!(value, json!({ "default": 5 }));
    }

    #[test]
    fn test_version_gate_precedes_capability_check() {
        let host = MicroHost::new().with_version(Version::new(18, 0, 0));
        let options = EvalOptions::for_file("/tmp/gate.mjs");
        let err = run_graph(&host, "export default 1", &options).unwrap_err();
        assert!(matches!(err, Error::UnsupportedRuntime { .. }));
    }

    #[test]
    fn test_missing_capability_without_exec() {
        let host = MicroHost::new();
        let options = EvalOptions::for_file("/tmp/nocap.mjs");
        let err = run_graph(&host, "export default 1", &options).unwrap_err();
        assert!(matches!(err, Error::MissingCapabilityFlag));
    }

    #[test]
    fn test_import_meta_reports_file_url() {
        let options = EvalOptions::for_file("/tmp/meta.mjs");
        let value = run_graph(&graph_host(), "export default import.meta.url", &options).unwrap();
        assert_eq!(value, json!({ "default": "file:///tmp/meta.mjs" }));
    }

    #[test]
    fn test_static_import_links_against_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("example.mjs"), "export const six = 6\n").unwrap();
        let options = EvalOptions::for_file(dir.path().join("main.mjs").display().to_string());
        let value = run_graph(
            &graph_host(),
            "import { six } from './example.mjs'\nexport default six",
            &options,
        )
        .unwrap();
        assert_eq!(value, json!({ "default": 6 }));
    }

    #[test]
    fn test_dynamic_import_resolves_against_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("example.mjs"), "export const six = 6\n").unwrap();
        let options = EvalOptions::for_file(dir.path().join("main.mjs").display().to_string());
        let value = run_graph(
            &graph_host(),
            "const ns = await import('./example.mjs')\nexport default ns.six",
            &options,
        )
        .unwrap();
        assert_eq!(value, json!({ "default": 6 }));
    }

    #[test]
    fn test_bare_specifier_imports_from_registry() {
        let host = graph_host().with_module("sixes", json!({ "six": 6 }));
        let options = EvalOptions::for_file("/tmp/bare.mjs");
        let value = run_graph(
            &host,
            "import { six } from 'sixes'\nexport default six",
            &options,
        )
        .unwrap();
        assert_eq!(value, json!({ "default": 6 }));
    }
}
