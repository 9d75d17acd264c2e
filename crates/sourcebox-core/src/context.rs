//! Context assembly: the base global set, override merging, environment
//! isolation, and console capture wiring.

use std::collections::{BTreeMap, BTreeSet};

use once_cell::sync::OnceCell;
use serde_json::json;
use sourcebox_host::{Binding, Bindings, CaptureSink, ConsoleChannel, Context, ScriptHost, Value};

use crate::console::CaptureGuard;
use crate::options::EvalOptions;

/// Aliases the host supplies on top of what a fresh context defines.
/// Subtracted with the intrinsics when computing the base set.
const FIXED_ALIASES: [&str; 3] = ["global", "globalThis", "sys"];

/// Globals the ambient environment provides beyond the bare language:
/// ambient set minus (intrinsics ∪ fixed aliases). Computed once per
/// evaluator and cloned per request.
pub(crate) fn base_globals<H: ScriptHost>(host: &H, cell: &OnceCell<Bindings>) -> Bindings {
    cell.get_or_init(|| {
        let mut skip: BTreeSet<String> = host.intrinsic_globals().into_iter().collect();
        skip.extend(FIXED_ALIASES.iter().map(|name| name.to_string()));
        host.ambient_globals()
            .into_iter()
            .filter(|(name, _)| !skip.contains(name))
            .collect()
    })
    .clone()
}

/// Assemble the context for one request and arm the capture guard.
///
/// Pure with respect to its inputs apart from the lazily computed base
/// set; the caller's `options.context` is copied, never mutated.
pub(crate) fn build<H: ScriptHost>(
    host: &H,
    base: &OnceCell<Bindings>,
    options: &EvalOptions,
) -> (Context, CaptureGuard) {
    let mut vars: Bindings = if options.include_globals {
        let mut merged = base_globals(host, base);
        for (name, binding) in &options.context {
            merged.insert(name.clone(), binding.clone());
        }
        merged
    } else {
        options.context.clone()
    };

    isolate_process(host, &mut vars, options);

    let mut console = ConsoleChannel::Inherit;
    let mut guard = CaptureGuard::none();
    if let Some(output) = &options.console_output {
        let sink = CaptureSink::with_color(options.color_mode.color_enabled());
        console = ConsoleChannel::Capture(sink.clone());
        vars.insert("console".into(), Binding::Console);
        guard = CaptureGuard::armed(sink, output.clone());
    }

    vars.insert("global".into(), Binding::Alias(Vec::new()));
    vars.insert("globalThis".into(), Binding::Alias(Vec::new()));

    (Context { vars, console }, guard)
}

/// Make sure mutations of the process-like binding — its environment
/// variables above all — never reach the real host process.
fn isolate_process<H: ScriptHost>(host: &H, vars: &mut Bindings, options: &EvalOptions) {
    let existing = vars.get("process").cloned();
    match existing {
        // A data process is already a per-request copy; only a requested
        // env replacement touches it.
        Some(Binding::Data(mut process)) => {
            if let Some(env) = &options.env {
                if !process.is_object() {
                    process = json!({ "version": format!("v{}", host.runtime_version()) });
                }
                process["env"] = env_value(env);
                vars.insert("process".into(), Binding::Data(process));
            }
        }
        // The ambient process is a live host object. Replace it with a
        // data clone: version, plus the requested or real environment.
        Some(_) => {
            let env = match &options.env {
                Some(env) => env_value(env),
                None => snapshot_env(),
            };
            vars.insert(
                "process".into(),
                Binding::Data(json!({
                    "version": format!("v{}", host.runtime_version()),
                    "env": env,
                })),
            );
        }
        // No process in sight: synthesize a minimal one only when the
        // caller asked for environment overrides.
        None => {
            if let Some(env) = &options.env {
                vars.insert(
                    "process".into(),
                    Binding::Data(json!({
                        "version": format!("v{}", host.runtime_version()),
                        "env": env_value(env),
                    })),
                );
            }
        }
    }
}

fn env_value(env: &BTreeMap<String, String>) -> Value {
    Value::Object(
        env.iter()
            .map(|(key, value)| (key.clone(), Value::String(value.clone())))
            .collect(),
    )
}

fn snapshot_env() -> Value {
    Value::Object(
        std::env::vars()
            .map(|(key, value)| (key, Value::String(value)))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::ConsoleOutput;
    use sourcebox_host::micro::MicroHost;

    fn build_with(options: &EvalOptions) -> Context {
        let host = MicroHost::new();
        let cell = OnceCell::new();
        let (ctx, _guard) = build(&host, &cell, options);
        ctx
    }

    #[test]
    fn test_base_set_excludes_intrinsics() {
        let host = MicroHost::new();
        let cell = OnceCell::new();
        let base = base_globals(&host, &cell);
        assert!(base.contains_key("Buffer"));
        assert!(base.contains_key("process"));
        assert!(!base.contains_key("JSON"));
        assert!(!base.contains_key("Math"));
    }

    #[test]
    fn test_overrides_win_on_collision() {
        let mut options = EvalOptions::default();
        options
            .context
            .insert("Buffer".into(), Binding::Data(json!("mine")));
        let ctx = build_with(&options);
        assert_eq!(
            ctx.vars.get("Buffer"),
            Some(&Binding::Data(json!("mine")))
        );
    }

    #[test]
    fn test_without_globals_context_is_overrides_only() {
        let mut options = EvalOptions {
            include_globals: false,
            ..EvalOptions::default()
        };
        options
            .context
            .insert("answer".into(), Binding::Data(json!(42)));
        let ctx = build_with(&options);
        assert!(!ctx.vars.contains_key("Buffer"));
        assert!(ctx.vars.contains_key("answer"));
        // Self-references are always present.
        assert_eq!(ctx.vars.get("global"), Some(&Binding::Alias(Vec::new())));
        assert_eq!(
            ctx.vars.get("globalThis"),
            Some(&Binding::Alias(Vec::new()))
        );
    }

    #[test]
    fn test_ambient_process_becomes_data_clone() {
        let options = EvalOptions::default();
        let ctx = build_with(&options);
        match ctx.vars.get("process") {
            Some(Binding::Data(process)) => {
                assert!(process["version"].as_str().unwrap().starts_with('v'));
                assert!(process["env"].is_object());
            }
            other => panic!("expected a data process binding, got {other:?}"),
        }
    }

    #[test]
    fn test_env_replaces_wholesale() {
        let options = EvalOptions {
            env: Some(BTreeMap::from([("ONLY".to_string(), "this".to_string())])),
            ..EvalOptions::default()
        };
        let ctx = build_with(&options);
        let Some(Binding::Data(process)) = ctx.vars.get("process") else {
            panic!("expected a data process binding");
        };
        assert_eq!(process["env"], json!({ "ONLY": "this" }));
    }

    #[test]
    fn test_env_without_globals_synthesizes_process() {
        let options = EvalOptions {
            include_globals: false,
            env: Some(BTreeMap::from([("A".to_string(), "b".to_string())])),
            ..EvalOptions::default()
        };
        let ctx = build_with(&options);
        let Some(Binding::Data(process)) = ctx.vars.get("process") else {
            panic!("expected a synthesized process binding");
        };
        assert_eq!(process["env"], json!({ "A": "b" }));
        assert!(process["version"].is_string());
    }

    #[test]
    fn test_caller_context_not_mutated() {
        let mut options = EvalOptions::default();
        options
            .context
            .insert("keep".into(), Binding::Data(json!(1)));
        let before = options.context.clone();
        let _ctx = build_with(&options);
        assert_eq!(options.context, before);
    }

    #[test]
    fn test_capture_wires_console_binding() {
        let options = EvalOptions {
            console_output: Some(ConsoleOutput::new()),
            ..EvalOptions::default()
        };
        let host = MicroHost::new();
        let cell = OnceCell::new();
        let (ctx, guard) = build(&host, &cell, &options);
        assert_eq!(ctx.vars.get("console"), Some(&Binding::Console));
        assert!(matches!(ctx.console, ConsoleChannel::Capture(_)));
        drop(guard);
    }
}
