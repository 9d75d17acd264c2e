//! Reference host implementing a small JavaScript-like subset.
//!
//! `MicroHost` exists so the CLI and the test suites have a concrete
//! engine behind the [`ScriptHost`] trait. It is deliberately not a
//! JavaScript engine; it accepts a line-oriented subset that covers what
//! module-shaped snippets actually need:
//!
//! - literals (strings, numbers, booleans, `null`/`undefined`, single-line
//!   object and array literals), `+`/`-`/`*`
//! - dotted-path reads and assignments, resolved through context aliases
//!   (so `global`/`globalThis` and the `exports` alias behave)
//! - `const`/`let`/`var` declarations, including `{a, b}` destructuring
//! - `module.exports`, `export default`, `export const`
//! - static `import` lists, `await import(...)`, `require(...)`
//! - `throw`, `return`, `console.log/info/warn/error`, `import.meta.url`
//!
//! Stack frames report `identifier:line` with the request's line offset
//! applied, matching what the orchestrator expects from a real engine.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};

use semver::Version;
use serde_json::json;
use url::Url;

use crate::{
    Binding, ConsoleChannel, Context, EvalError, ModuleResolver, Namespace, ParsedModule,
    ScriptHost, ScriptSource, SyntheticModule, Value,
};

/// Environment variable that enables module-graph construction for a
/// [`MicroHost::from_env`] host — the capability flag of this runtime.
pub const GRAPH_MODULES_ENV: &str = "SOURCEBOX_GRAPH_MODULES";

/// Names the bare language defines in a fresh isolated context.
const INTRINSICS: &[&str] = &[
    "Array", "Boolean", "Error", "Infinity", "JSON", "Math", "NaN", "Number", "Object", "String",
    "undefined",
];

/// Globals the ambient environment adds on top of the language.
const AMBIENT_EXTRAS: &[&str] = &[
    "Buffer",
    "clearInterval",
    "clearTimeout",
    "queueMicrotask",
    "setInterval",
    "setTimeout",
    "structuredClone",
];

const MAX_ALIAS_HOPS: usize = 32;
const MAX_IMPORT_DEPTH: usize = 32;

/// Reference script host. See the module docs for the accepted subset.
#[derive(Clone, Debug)]
pub struct MicroHost {
    version: Version,
    graph_modules: bool,
    registry: BTreeMap<String, Value>,
    worker_argv: Option<Vec<String>>,
}

impl Default for MicroHost {
    fn default() -> Self {
        Self::new()
    }
}

impl MicroHost {
    pub fn new() -> Self {
        Self {
            version: Version::new(22, 0, 0),
            graph_modules: false,
            registry: BTreeMap::new(),
            worker_argv: None,
        }
    }

    /// A host whose graph capability follows the process environment,
    /// the way a runtime started with its capability flag would.
    pub fn from_env() -> Self {
        Self {
            graph_modules: std::env::var_os(GRAPH_MODULES_ENV).is_some(),
            ..Self::new()
        }
    }

    /// Override the reported runtime version.
    pub fn with_version(mut self, version: Version) -> Self {
        self.version = version;
        self
    }

    /// Enable or disable in-memory module graphs for this process.
    pub fn with_graph_modules(mut self, enabled: bool) -> Self {
        self.graph_modules = enabled;
        self
    }

    /// Preload a bare-specifier module, the stand-in for an installed
    /// ecosystem package.
    pub fn with_module(mut self, name: impl Into<String>, exports: Value) -> Self {
        self.registry.insert(name.into(), exports);
        self
    }

    /// Command line spawned for the module-graph worker. The program must
    /// speak the sourcebox worker protocol on stdio.
    pub fn with_worker(mut self, argv: Vec<String>) -> Self {
        self.worker_argv = Some(argv);
        self
    }

    // ── Native module loading ────────────────────────────────────────

    fn require_from(&self, from: &Path, specifier: &str, depth: usize) -> Result<Value, EvalError> {
        if depth > MAX_IMPORT_DEPTH {
            return Err(EvalError::new("module require chain too deep"));
        }
        if specifier.starts_with('.') || specifier.starts_with('/') {
            let path = if specifier.starts_with('/') {
                PathBuf::from(specifier)
            } else {
                from.parent().unwrap_or(Path::new("/")).join(specifier)
            };
            if path.extension().is_some_and(|ext| ext == "mjs") {
                return Err(EvalError::new(format!(
                    "require() of ES Module {} not supported",
                    path.display()
                )));
            }
            return self.load_script_file(&path, depth);
        }
        match self.registry.get(specifier) {
            Some(exports) => Ok(exports.clone()),
            None => Err(EvalError::new(format!(
                "Cannot find module '{specifier}'"
            ))),
        }
    }

    fn import_resolved(&self, specifier: &str, depth: usize) -> Result<Namespace, EvalError> {
        if depth > MAX_IMPORT_DEPTH {
            return Err(EvalError::new("module import graph too deep"));
        }
        if let Some(path) = as_file_path(specifier) {
            if path.extension().is_some_and(|ext| ext == "cjs") {
                let exports = self.load_script_file(&path, depth)?;
                return Ok(namespace_of(exports));
            }
            return self.load_module_file(&path, depth);
        }
        match self.registry.get(specifier) {
            Some(exports) => Ok(namespace_of(exports.clone())),
            None => Err(EvalError::new(format!(
                "Cannot find module '{specifier}'"
            ))),
        }
    }

    /// Load a file under the synchronous convention and return its export
    /// slot.
    fn load_script_file(&self, path: &Path, depth: usize) -> Result<Value, EvalError> {
        let code = fs::read_to_string(path)
            .map_err(|_| EvalError::new(format!("Cannot find module '{}'", path.display())))?;
        let identifier = path.display().to_string();
        let mut ctx = Context::default();
        seed_file_context(&mut ctx, path, &identifier);
        let anchor = FileAnchor {
            host: self,
            path: path.to_path_buf(),
            depth: depth + 1,
        };
        let mut run = Run {
            ctx: &mut ctx,
            locals: BTreeMap::new(),
            resolver: &anchor,
            identifier: &identifier,
            line_offset: 0,
            meta_url: None,
            module_mode: false,
            links: &[],
            exports: Namespace::new(),
        };
        run.exec_source(&code)?;
        run.read_ctx(&[String::from("module"), String::from("exports")], 0)
    }

    /// Load a file under the graph convention and return its namespace.
    fn load_module_file(&self, path: &Path, depth: usize) -> Result<Namespace, EvalError> {
        let code = fs::read_to_string(path)
            .map_err(|_| EvalError::new(format!("Cannot find module '{}'", path.display())))?;
        let file_url = file_url_of(path)?;
        let dir_url = dir_url_of(path)?;
        let mut links = Vec::new();
        for specifier in collect_imports(&code) {
            let resolved = resolve_relative(&dir_url, &specifier)?;
            let exports = self.import_resolved(&resolved, depth + 1)?;
            links.push(SyntheticModule { specifier, exports });
        }
        let mut ctx = Context::default();
        ctx.vars.insert("console".into(), Binding::Console);
        let anchor = FileAnchor {
            host: self,
            path: path.to_path_buf(),
            depth: depth + 1,
        };
        let mut run = Run {
            ctx: &mut ctx,
            locals: BTreeMap::new(),
            resolver: &anchor,
            identifier: &file_url,
            line_offset: 0,
            meta_url: Some(file_url.clone()),
            module_mode: true,
            links: &links,
            exports: Namespace::new(),
        };
        run.exec_source(&code)?;
        Ok(run.exports)
    }
}

impl ScriptHost for MicroHost {
    fn runtime_version(&self) -> Version {
        self.version.clone()
    }

    fn intrinsic_globals(&self) -> Vec<String> {
        INTRINSICS.iter().map(|name| name.to_string()).collect()
    }

    fn ambient_globals(&self) -> crate::Bindings {
        let mut globals = crate::Bindings::new();
        for name in INTRINSICS {
            globals.insert(name.to_string(), Binding::HostObject(name.to_string()));
        }
        for name in AMBIENT_EXTRAS {
            globals.insert(name.to_string(), Binding::HostObject(name.to_string()));
        }
        globals.insert("process".into(), Binding::HostObject("process".into()));
        globals.insert("console".into(), Binding::Console);
        globals
    }

    fn run_script(
        &self,
        source: &ScriptSource<'_>,
        ctx: &mut Context,
        modules: &dyn ModuleResolver,
    ) -> Result<Value, EvalError> {
        let mut run = Run {
            ctx,
            locals: BTreeMap::new(),
            resolver: modules,
            identifier: source.identifier,
            line_offset: source.line_offset,
            meta_url: None,
            module_mode: false,
            links: &[],
            exports: Namespace::new(),
        };
        run.exec_source(source.code)
    }

    fn graph_modules_supported(&self) -> bool {
        self.graph_modules
    }

    fn parse_module(&self, source: &ScriptSource<'_>) -> Result<ParsedModule, EvalError> {
        Ok(ParsedModule {
            identifier: source.identifier.to_string(),
            body: source.code.to_string(),
            imports: collect_imports(source.code),
            line_offset: source.line_offset,
            column_offset: source.column_offset,
        })
    }

    fn evaluate_module(
        &self,
        module: &ParsedModule,
        links: &[SyntheticModule],
        ctx: &mut Context,
        modules: &dyn ModuleResolver,
    ) -> Result<Namespace, EvalError> {
        let mut run = Run {
            ctx,
            locals: BTreeMap::new(),
            resolver: modules,
            identifier: &module.identifier,
            line_offset: module.line_offset,
            meta_url: Some(module.identifier.clone()),
            module_mode: true,
            links,
            exports: Namespace::new(),
        };
        run.exec_source(&module.body)?;
        Ok(run.exports)
    }

    fn import_module(&self, specifier: &str) -> Result<Namespace, EvalError> {
        self.import_resolved(specifier, 0)
    }

    fn require_module(&self, from: &Path, specifier: &str) -> Result<Value, EvalError> {
        self.require_from(from, specifier, 0)
    }

    fn run_snippet(
        &self,
        body: &str,
        imported: &Value,
        arg: &Value,
        console: &ConsoleChannel,
    ) -> Result<Value, EvalError> {
        let mut ctx = Context {
            vars: crate::Bindings::new(),
            console: console.clone(),
        };
        ctx.vars.insert("console".into(), Binding::Console);
        let mut locals = BTreeMap::new();
        locals.insert("IMPORTED".to_string(), imported.clone());
        locals.insert("arg".to_string(), arg.clone());
        let mut run = Run {
            ctx: &mut ctx,
            locals,
            resolver: &NullResolver,
            identifier: "<exec>",
            line_offset: 0,
            meta_url: None,
            module_mode: false,
            links: &[],
            exports: Namespace::new(),
        };
        run.exec_body(body)
    }

    fn spawn_graph_worker(&self) -> io::Result<Child> {
        let argv = self.worker_argv.as_ref().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                "no module-graph worker configured for this host",
            )
        })?;
        let (program, args) = argv.split_first().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "empty worker command line")
        })?;
        Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
    }
}

/// Resolver anchored at a file the micro host loaded itself, so nested
/// require/import calls resolve against that file.
struct FileAnchor<'a> {
    host: &'a MicroHost,
    path: PathBuf,
    depth: usize,
}

impl ModuleResolver for FileAnchor<'_> {
    fn require(&self, specifier: &str) -> Result<Value, EvalError> {
        self.host.require_from(&self.path, specifier, self.depth)
    }

    fn import(&self, specifier: &str) -> Result<Namespace, EvalError> {
        let dir_url = dir_url_of(&self.path)?;
        let resolved = resolve_relative(&dir_url, specifier)?;
        self.host.import_resolved(&resolved, self.depth)
    }
}

/// Resolver for contexts with no module access, such as follow-up
/// snippets.
struct NullResolver;

impl ModuleResolver for NullResolver {
    fn require(&self, _specifier: &str) -> Result<Value, EvalError> {
        Err(EvalError::new("require is not available in this context"))
    }

    fn import(&self, _specifier: &str) -> Result<Namespace, EvalError> {
        Err(EvalError::new(
            "dynamic import is not available in this context",
        ))
    }
}

fn seed_file_context(ctx: &mut Context, path: &Path, identifier: &str) {
    let dirname = path
        .parent()
        .unwrap_or(Path::new("/"))
        .display()
        .to_string();
    ctx.vars.insert(
        "module".into(),
        Binding::Data(json!({ "id": identifier, "exports": {} })),
    );
    ctx.vars.insert(
        "exports".into(),
        Binding::Alias(vec!["module".into(), "exports".into()]),
    );
    ctx.vars
        .insert("require".into(), Binding::HostObject("require".into()));
    ctx.vars
        .insert("__dirname".into(), Binding::Data(Value::String(dirname)));
    ctx.vars.insert(
        "__filename".into(),
        Binding::Data(Value::String(identifier.to_string())),
    );
    ctx.vars.insert("console".into(), Binding::Console);
}

fn namespace_of(exports: Value) -> Namespace {
    let mut namespace = Namespace::new();
    if let Value::Object(entries) = &exports {
        for (key, value) in entries {
            namespace.insert(key.clone(), value.clone());
        }
    }
    namespace.insert("default".into(), exports);
    namespace
}

fn as_file_path(specifier: &str) -> Option<PathBuf> {
    if specifier.starts_with("file:") {
        Url::parse(specifier).ok()?.to_file_path().ok()
    } else if specifier.starts_with('/') {
        Some(PathBuf::from(specifier))
    } else {
        None
    }
}

fn file_url_of(path: &Path) -> Result<String, EvalError> {
    Url::from_file_path(path)
        .map(String::from)
        .map_err(|_| EvalError::new(format!("invalid module path {}", path.display())))
}

fn dir_url_of(path: &Path) -> Result<String, EvalError> {
    let dir = path.parent().unwrap_or(Path::new("/"));
    let mut url = file_url_of(dir)?;
    if !url.ends_with('/') {
        url.push('/');
    }
    Ok(url)
}

fn resolve_relative(dir_url: &str, specifier: &str) -> Result<String, EvalError> {
    if !specifier.starts_with('.') {
        return Ok(specifier.to_string());
    }
    let base = Url::parse(dir_url)
        .map_err(|err| EvalError::new(format!("invalid directory URL {dir_url}: {err}")))?;
    base.join(specifier)
        .map(String::from)
        .map_err(|err| EvalError::new(format!("cannot resolve specifier '{specifier}': {err}")))
}

// ── Interpreter ──────────────────────────────────────────────────────

enum Flow {
    /// Statement finished; `Some` carries a new completion value.
    Next(Option<Value>),
    /// A `return` statement ended execution early.
    Return(Value),
}

struct Run<'a> {
    ctx: &'a mut Context,
    locals: BTreeMap<String, Value>,
    resolver: &'a dyn ModuleResolver,
    identifier: &'a str,
    line_offset: usize,
    meta_url: Option<String>,
    module_mode: bool,
    links: &'a [SyntheticModule],
    exports: Namespace,
}

impl Run<'_> {
    /// Execute source text and return the completion value of the last
    /// expression statement.
    fn exec_source(&mut self, code: &str) -> Result<Value, EvalError> {
        let mut completion = Value::Null;
        for (idx, raw) in code.lines().enumerate() {
            let line = idx + 1;
            for stmt in split_statements(raw) {
                match self.exec_statement(stmt, line)? {
                    Flow::Next(Some(value)) => completion = value,
                    Flow::Next(None) => {}
                    Flow::Return(value) => return Ok(value),
                }
            }
        }
        Ok(completion)
    }

    /// Execute a callable body: the value of a `return` statement, or
    /// `null` when none runs.
    fn exec_body(&mut self, code: &str) -> Result<Value, EvalError> {
        for (idx, raw) in code.lines().enumerate() {
            let line = idx + 1;
            for stmt in split_statements(raw) {
                if let Flow::Return(value) = self.exec_statement(stmt, line)? {
                    return Ok(value);
                }
            }
        }
        Ok(Value::Null)
    }

    fn exec_statement(&mut self, stmt: &str, line: usize) -> Result<Flow, EvalError> {
        let stmt = stmt.trim();
        if stmt.is_empty() || stmt.starts_with("//") {
            return Ok(Flow::Next(None));
        }
        if stmt == "'use strict'" || stmt == "\"use strict\"" {
            return Ok(Flow::Next(None));
        }
        if let Some(after) = stmt.strip_prefix("import") {
            let continues_ident = after
                .chars()
                .next()
                .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$');
            if !continues_ident && !after.starts_with('(') && !after.starts_with('.') {
                if !self.module_mode {
                    return Err(self.raise(
                        "SyntaxError",
                        "Cannot use import statement outside a module".into(),
                        line,
                    ));
                }
                self.bind_import(stmt, line)?;
                return Ok(Flow::Next(None));
            }
        }
        if let Some(rest) = stmt.strip_prefix("export default ") {
            let value = self.eval_expr(rest, line)?;
            self.exports.insert("default".into(), value);
            return Ok(Flow::Next(None));
        }
        for keyword in ["export const ", "export let ", "export var "] {
            if let Some(rest) = stmt.strip_prefix(keyword) {
                self.declare(rest, line, true)?;
                return Ok(Flow::Next(None));
            }
        }
        for keyword in ["const ", "let ", "var "] {
            if let Some(rest) = stmt.strip_prefix(keyword) {
                self.declare(rest, line, false)?;
                return Ok(Flow::Next(None));
            }
        }
        if let Some(rest) = stmt.strip_prefix("throw ") {
            return Err(self.throw_value(rest, line)?);
        }
        if stmt == "return" {
            return Ok(Flow::Return(Value::Null));
        }
        if let Some(rest) = stmt.strip_prefix("return ") {
            let value = self.eval_expr(rest, line)?;
            return Ok(Flow::Return(value));
        }
        if let Some((target, rhs)) = parse_assignment(stmt) {
            let value = self.eval_expr(rhs, line)?;
            self.assign(&target, value.clone(), line)?;
            return Ok(Flow::Next(Some(value)));
        }
        if stmt.starts_with("console.") {
            self.console_call(stmt, line)?;
            return Ok(Flow::Next(Some(Value::Null)));
        }
        let value = self.eval_expr(stmt, line)?;
        Ok(Flow::Next(Some(value)))
    }

    // ── Statements ───────────────────────────────────────────────────

    fn declare(&mut self, rest: &str, line: usize, export: bool) -> Result<(), EvalError> {
        let Some(eq) = find_top_level(rest, |c| c == '=') else {
            return Err(self.syntax(rest, line));
        };
        let (lhs, rhs) = (rest[..eq].trim(), rest[eq + 1..].trim());
        let value = self.eval_expr(rhs, line)?;
        if let Some(inner) = lhs.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
            for name in split_top_level(inner, ',') {
                let name = name.trim();
                if name.is_empty() {
                    continue;
                }
                if !is_ident(name) {
                    return Err(self.syntax(lhs, line));
                }
                let bound = value.get(name).cloned().unwrap_or(Value::Null);
                if export {
                    self.exports.insert(name.to_string(), bound.clone());
                }
                self.locals.insert(name.to_string(), bound);
            }
            return Ok(());
        }
        if !is_ident(lhs) {
            return Err(self.syntax(lhs, line));
        }
        if export {
            self.exports.insert(lhs.to_string(), value.clone());
        }
        self.locals.insert(lhs.to_string(), value);
        Ok(())
    }

    fn bind_import(&mut self, stmt: &str, line: usize) -> Result<(), EvalError> {
        let rest = stmt["import".len()..].trim();
        let Some(from) = find_top_level_str(rest, " from ") else {
            // Side-effect import: `import './module.mjs'`.
            if parse_string_literal(rest).is_some() {
                return Ok(());
            }
            return Err(self.syntax(stmt, line));
        };
        let clause = rest[..from].trim();
        let Some(specifier) = parse_string_literal(rest[from + " from ".len()..].trim()) else {
            return Err(self.syntax(stmt, line));
        };
        let link = self
            .links
            .iter()
            .find(|link| link.specifier == specifier)
            .ok_or_else(|| EvalError::new(format!("Cannot find module '{specifier}'")))?;
        let exports = link.exports.clone();
        for part in split_top_level(clause, ',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            if let Some(names) = part.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
                for name in names.split(',') {
                    let name = name.trim();
                    if name.is_empty() {
                        continue;
                    }
                    let (source, local) = match name.split_once(" as ") {
                        Some((source, local)) => (source.trim(), local.trim()),
                        None => (name, name),
                    };
                    let value = exports.get(source).ok_or_else(|| {
                        EvalError::new(format!(
                            "The requested module '{specifier}' does not provide an export named '{source}'"
                        ))
                    })?;
                    self.locals.insert(local.to_string(), value.clone());
                }
            } else if let Some(alias) = part.strip_prefix("* as ") {
                let namespace: serde_json::Map<String, Value> =
                    exports.clone().into_iter().collect();
                self.locals
                    .insert(alias.trim().to_string(), Value::Object(namespace));
            } else if is_ident(part) {
                let value = exports.get("default").ok_or_else(|| {
                    EvalError::new(format!(
                        "The requested module '{specifier}' does not provide an export named 'default'"
                    ))
                })?;
                self.locals.insert(part.to_string(), value.clone());
            } else {
                return Err(self.syntax(stmt, line));
            }
        }
        Ok(())
    }

    fn throw_value(&mut self, rest: &str, line: usize) -> Result<EvalError, EvalError> {
        let rest = rest.trim().trim_end_matches(';');
        let (kind, message) = if let Some(ctor) = rest.strip_prefix("new ") {
            let Some(open) = ctor.find('(') else {
                return Err(self.syntax(rest, line));
            };
            let name = ctor[..open].trim();
            let Some(args) = ctor[open + 1..].strip_suffix(')') else {
                return Err(self.syntax(rest, line));
            };
            let message = if args.trim().is_empty() {
                String::new()
            } else {
                display(&self.eval_expr(args, line)?)
            };
            (name.to_string(), message)
        } else {
            ("Error".to_string(), display(&self.eval_expr(rest, line)?))
        };
        Ok(self.raise(&kind, message, line))
    }

    fn console_call(&mut self, stmt: &str, line: usize) -> Result<(), EvalError> {
        let rest = &stmt["console.".len()..];
        let Some(open) = rest.find('(') else {
            return Err(self.syntax(stmt, line));
        };
        let method = rest[..open].trim();
        let Some(args) = rest[open + 1..].trim_end().strip_suffix(')') else {
            return Err(self.syntax(stmt, line));
        };
        let mut rendered = Vec::new();
        for arg in split_top_level(args, ',') {
            let arg = arg.trim();
            if arg.is_empty() {
                continue;
            }
            rendered.push(display(&self.eval_expr(arg, line)?));
        }
        let text = rendered.join(" ");
        match method {
            "log" | "info" | "debug" => self.ctx.console.write_out(&text),
            "warn" | "error" => self.ctx.console.write_err(&text),
            other => {
                return Err(self.raise(
                    "TypeError",
                    format!("console.{other} is not a function"),
                    line,
                ))
            }
        }
        Ok(())
    }

    // ── Expressions ──────────────────────────────────────────────────

    fn eval_expr(&mut self, expr: &str, line: usize) -> Result<Value, EvalError> {
        let mut expr = expr.trim();
        while let Some(rest) = expr.strip_prefix("await ") {
            expr = rest.trim();
        }
        if expr.is_empty() {
            return Err(self.syntax(expr, line));
        }
        if let Some(at) = find_binary_op(expr, &['+', '-']) {
            let value = self.binary(expr, at, line)?;
            return Ok(value);
        }
        if let Some(at) = find_binary_op(expr, &['*']) {
            let value = self.binary(expr, at, line)?;
            return Ok(value);
        }
        self.eval_primary(expr, line)
    }

    fn binary(&mut self, expr: &str, at: usize, line: usize) -> Result<Value, EvalError> {
        let op = expr.as_bytes()[at] as char;
        let left = self.eval_expr(&expr[..at], line)?;
        let right = self.eval_expr(&expr[at + 1..], line)?;
        match op {
            '+' => match (&left, &right) {
                (Value::String(_), _) | (_, Value::String(_)) => {
                    Ok(Value::String(format!("{}{}", display(&left), display(&right))))
                }
                _ => self.arith(&left, &right, line, |a, b| a + b, |a, b| a + b),
            },
            '-' => self.arith(&left, &right, line, |a, b| a - b, |a, b| a - b),
            '*' => self.arith(&left, &right, line, |a, b| a * b, |a, b| a * b),
            _ => Err(self.syntax(expr, line)),
        }
    }

    fn arith(
        &self,
        left: &Value,
        right: &Value,
        line: usize,
        int_op: fn(i64, i64) -> i64,
        float_op: fn(f64, f64) -> f64,
    ) -> Result<Value, EvalError> {
        if let (Some(a), Some(b)) = (left.as_i64(), right.as_i64()) {
            return Ok(json!(int_op(a, b)));
        }
        match (left.as_f64(), right.as_f64()) {
            (Some(a), Some(b)) => Ok(json!(float_op(a, b))),
            _ => Err(self.raise(
                "TypeError",
                format!(
                    "unsupported operand values: {} and {}",
                    display(left),
                    display(right)
                ),
                line,
            )),
        }
    }

    fn eval_primary(&mut self, expr: &str, line: usize) -> Result<Value, EvalError> {
        if let Some(text) = parse_string_literal(expr) {
            return Ok(Value::String(text));
        }
        if let Ok(int) = expr.parse::<i64>() {
            return Ok(json!(int));
        }
        if let Ok(float) = expr.parse::<f64>() {
            return Ok(json!(float));
        }
        match expr {
            "true" => return Ok(Value::Bool(true)),
            "false" => return Ok(Value::Bool(false)),
            "null" | "undefined" => return Ok(Value::Null),
            "import.meta" => {
                return match &self.meta_url {
                    Some(url) => Ok(json!({ "url": url })),
                    None => Err(self.raise(
                        "SyntaxError",
                        "Cannot use 'import.meta' outside a module".into(),
                        line,
                    )),
                }
            }
            "import.meta.url" => {
                return match &self.meta_url {
                    Some(url) => Ok(Value::String(url.clone())),
                    None => Err(self.raise(
                        "SyntaxError",
                        "Cannot use 'import.meta' outside a module".into(),
                        line,
                    )),
                }
            }
            _ => {}
        }
        if let Some(inner) = call_argument(expr, "require") {
            let specifier = self.expect_string(inner, line)?;
            return self.resolver.require(&specifier);
        }
        if let Some(inner) = call_argument(expr, "import") {
            let specifier = self.expect_string(inner, line)?;
            let namespace = self.resolver.import(&specifier)?;
            let entries: serde_json::Map<String, Value> = namespace.into_iter().collect();
            return Ok(Value::Object(entries));
        }
        if let Some(inner) = expr.strip_prefix("new Error(").and_then(|s| s.strip_suffix(')')) {
            let message = if inner.trim().is_empty() {
                String::new()
            } else {
                display(&self.eval_expr(inner, line)?)
            };
            return Ok(json!({ "message": message }));
        }
        if let Some(inner) = wrapped(expr, '(', ')') {
            return self.eval_expr(inner, line);
        }
        if let Some(inner) = wrapped(expr, '{', '}') {
            let mut entries = serde_json::Map::new();
            for field in split_top_level(inner, ',') {
                let field = field.trim();
                if field.is_empty() {
                    continue;
                }
                match find_top_level(field, |c| c == ':') {
                    Some(colon) => {
                        let key = field[..colon].trim().trim_matches(['\'', '"']);
                        let value = self.eval_expr(&field[colon + 1..], line)?;
                        entries.insert(key.to_string(), value);
                    }
                    None if is_ident(field) => {
                        let value = self.eval_expr(field, line)?;
                        entries.insert(field.to_string(), value);
                    }
                    None => return Err(self.syntax(field, line)),
                }
            }
            return Ok(Value::Object(entries));
        }
        if let Some(inner) = wrapped(expr, '[', ']') {
            let mut items = Vec::new();
            for item in split_top_level(inner, ',') {
                let item = item.trim();
                if item.is_empty() {
                    continue;
                }
                items.push(self.eval_expr(item, line)?);
            }
            return Ok(Value::Array(items));
        }
        if let Some(path) = parse_path(expr) {
            return self.read_path(&path, line);
        }
        Err(self.syntax(expr, line))
    }

    fn expect_string(&mut self, expr: &str, line: usize) -> Result<String, EvalError> {
        match self.eval_expr(expr, line)? {
            Value::String(text) => Ok(text),
            other => Err(self.raise(
                "TypeError",
                format!("expected a string specifier, got {}", display(&other)),
                line,
            )),
        }
    }

    // ── Name resolution ──────────────────────────────────────────────

    fn read_path(&mut self, path: &[String], line: usize) -> Result<Value, EvalError> {
        if let Some(root) = self.locals.get(path[0].as_str()) {
            return Ok(index_value(root, &path[1..]));
        }
        self.read_ctx(path, line)
    }

    fn read_ctx(&self, path: &[String], line: usize) -> Result<Value, EvalError> {
        let mut path = path.to_vec();
        for _ in 0..MAX_ALIAS_HOPS {
            if path.is_empty() {
                return Ok(materialize(self.ctx));
            }
            match self.ctx.vars.get(path[0].as_str()) {
                None => {
                    return Err(self.raise(
                        "ReferenceError",
                        format!("{} is not defined", path[0]),
                        line,
                    ))
                }
                Some(Binding::Data(value)) => return Ok(index_value(value, &path[1..])),
                Some(Binding::Alias(base)) => {
                    let mut next = base.clone();
                    next.extend(path.drain(1..));
                    path = next;
                }
                Some(Binding::HostObject(name)) => {
                    return Ok(if path.len() == 1 {
                        Value::String(format!("[object {name}]"))
                    } else {
                        Value::Null
                    })
                }
                Some(Binding::Console) => {
                    return Ok(if path.len() == 1 {
                        Value::String("[object Console]".into())
                    } else {
                        Value::Null
                    })
                }
            }
        }
        Err(EvalError::new("context alias chain too deep"))
    }

    fn assign(&mut self, path: &[String], value: Value, line: usize) -> Result<(), EvalError> {
        let identifier = self.identifier;
        let line_offset = self.line_offset;
        if let Some(root) = self.locals.get_mut(path[0].as_str()) {
            if path.len() == 1 {
                *root = value;
                return Ok(());
            }
            return set_in(root, &path[1..], value)
                .map_err(|msg| raise_at(identifier, line_offset, "TypeError", msg, line));
        }
        // Resolve aliases with shared lookups first, then mutate once.
        let mut path = path.to_vec();
        for _ in 0..MAX_ALIAS_HOPS {
            if path.is_empty() {
                return Err(self.raise("SyntaxError", "invalid assignment target".into(), line));
            }
            match self.ctx.vars.get(path[0].as_str()) {
                Some(Binding::Alias(base)) => {
                    let mut next = base.clone();
                    next.extend(path.drain(1..));
                    path = next;
                }
                _ => break,
            }
        }
        if path.is_empty() {
            return Err(self.raise("SyntaxError", "invalid assignment target".into(), line));
        }
        let head = path[0].clone();
        match self.ctx.vars.get_mut(head.as_str()) {
            None if path.len() == 1 => {
                // Sloppy-mode implicit global.
                self.ctx.vars.insert(head, Binding::Data(value));
                Ok(())
            }
            None => Err(raise_at(
                identifier,
                line_offset,
                "ReferenceError",
                format!("{head} is not defined"),
                line,
            )),
            Some(Binding::Data(slot)) => {
                if path.len() == 1 {
                    *slot = value;
                    Ok(())
                } else {
                    set_in(slot, &path[1..], value)
                        .map_err(|msg| raise_at(identifier, line_offset, "TypeError", msg, line))
                }
            }
            Some(_) if path.len() == 1 => {
                self.ctx.vars.insert(head, Binding::Data(value));
                Ok(())
            }
            Some(_) => Err(raise_at(
                identifier,
                line_offset,
                "TypeError",
                format!("cannot set properties of {head}"),
                line,
            )),
        }
    }

    // ── Errors ───────────────────────────────────────────────────────

    fn raise(&self, kind: &str, message: String, line: usize) -> EvalError {
        raise_at(self.identifier, self.line_offset, kind, message, line)
    }

    fn syntax(&self, near: &str, line: usize) -> EvalError {
        self.raise("SyntaxError", format!("Unexpected token near '{near}'"), line)
    }
}

fn raise_at(
    identifier: &str,
    line_offset: usize,
    kind: &str,
    message: String,
    line: usize,
) -> EvalError {
    let stack = format!(
        "{kind}: {message}\n    at {identifier}:{}",
        line + line_offset
    );
    EvalError::with_stack(message, stack)
}

/// Data entries of the context as one object, for reads of the
/// self-referential `global`/`globalThis` bindings.
fn materialize(ctx: &Context) -> Value {
    let mut entries = serde_json::Map::new();
    for (name, binding) in &ctx.vars {
        if let Binding::Data(value) = binding {
            entries.insert(name.clone(), value.clone());
        }
    }
    Value::Object(entries)
}

fn index_value(root: &Value, path: &[String]) -> Value {
    let mut current = root;
    for key in path {
        match current.get(key.as_str()) {
            Some(next) => current = next,
            None => return Value::Null,
        }
    }
    current.clone()
}

fn set_in(root: &mut Value, path: &[String], value: Value) -> Result<(), String> {
    let Some((last, parents)) = path.split_last() else {
        return Err("invalid assignment target".to_string());
    };
    let mut current = root;
    for key in parents {
        current = match current.get_mut(key.as_str()) {
            Some(next) => next,
            None => return Err(format!("cannot set properties of undefined (setting '{key}')")),
        };
    }
    match current {
        Value::Object(entries) => {
            entries.insert(last.clone(), value);
            Ok(())
        }
        _ => Err(format!("cannot set property '{last}' of a non-object value")),
    }
}

fn display(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

// ── Micro-syntax helpers ─────────────────────────────────────────────

/// Collect statically declared import specifiers, in order.
fn collect_imports(code: &str) -> Vec<String> {
    let mut specifiers = Vec::new();
    for raw in code.lines() {
        for stmt in split_statements(raw) {
            let stmt = stmt.trim();
            let Some(rest) = stmt.strip_prefix("import") else {
                continue;
            };
            if rest.starts_with('(') || rest.starts_with('.') {
                continue; // dynamic import or import.meta
            }
            let rest = rest.trim();
            let literal = match find_top_level_str(rest, " from ") {
                Some(at) => rest[at + " from ".len()..].trim(),
                None => rest,
            };
            if let Some(specifier) = parse_string_literal(literal) {
                specifiers.push(specifier);
            }
        }
    }
    specifiers
}

fn is_ident(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

fn parse_path(s: &str) -> Option<Vec<String>> {
    let parts: Vec<&str> = s.split('.').collect();
    if parts.iter().all(|part| is_ident(part)) {
        Some(parts.into_iter().map(String::from).collect())
    } else {
        None
    }
}

fn parse_string_literal(s: &str) -> Option<String> {
    let s = s.trim();
    let mut chars = s.chars();
    let quote = match chars.next() {
        Some(q @ ('\'' | '"')) => q,
        _ => return None,
    };
    let mut text = String::new();
    let mut escaped = false;
    for (idx, c) in s.char_indices().skip(1) {
        if escaped {
            text.push(match c {
                'n' => '\n',
                't' => '\t',
                other => other,
            });
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == quote {
            // Must close at the very end to be a lone literal.
            return (idx == s.len() - 1).then_some(text);
        } else {
            text.push(c);
        }
    }
    None
}

/// `name(inner)` with the closing paren at the end of the expression.
fn call_argument<'a>(expr: &'a str, name: &str) -> Option<&'a str> {
    expr.strip_prefix(name)?
        .trim_start()
        .strip_prefix('(')?
        .strip_suffix(')')
}

/// The inside of `open...close` when the pair wraps the whole expression.
/// Rejects `{a: 1} + {b: 2}`-style strings where the opening bracket
/// closes before the end.
fn wrapped(expr: &str, open: char, close: char) -> Option<&str> {
    if !expr.starts_with(open) {
        return None;
    }
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut depth = 0usize;
    for (idx, c) in expr.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match quote {
            Some(q) => {
                if c == '\\' {
                    escaped = true;
                } else if c == q {
                    quote = None;
                }
            }
            None if c == '\'' || c == '"' => quote = Some(c),
            None if c == open => depth += 1,
            None if c == close => {
                depth -= 1;
                if depth == 0 {
                    return (idx == expr.len() - close.len_utf8())
                        .then(|| &expr[open.len_utf8()..idx]);
                }
            }
            None => {}
        }
    }
    None
}

struct Scanner {
    quote: Option<char>,
    escaped: bool,
    depth: usize,
}

impl Scanner {
    fn new() -> Self {
        Self {
            quote: None,
            escaped: false,
            depth: 0,
        }
    }

    /// Feed one character; returns true when it sits at top level.
    fn feed(&mut self, c: char) -> bool {
        if self.escaped {
            self.escaped = false;
            return false;
        }
        match (self.quote, c) {
            (Some(_), '\\') => {
                self.escaped = true;
                false
            }
            (Some(q), _) if c == q => {
                self.quote = None;
                false
            }
            (Some(_), _) => false,
            (None, '\'' | '"') => {
                self.quote = Some(c);
                false
            }
            (None, '(' | '[' | '{') => {
                self.depth += 1;
                false
            }
            (None, ')' | ']' | '}') => {
                self.depth = self.depth.saturating_sub(1);
                false
            }
            (None, _) => self.depth == 0,
        }
    }
}

/// Split one physical line into `;`-separated statements, ignoring
/// separators inside quotes or brackets.
fn split_statements(line: &str) -> Vec<&str> {
    let mut scanner = Scanner::new();
    let mut statements = Vec::new();
    let mut start = 0;
    for (idx, c) in line.char_indices() {
        if scanner.feed(c) && c == ';' {
            statements.push(&line[start..idx]);
            start = idx + c.len_utf8();
        }
    }
    statements.push(&line[start..]);
    statements
        .into_iter()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

fn split_top_level(s: &str, sep: char) -> Vec<&str> {
    let mut scanner = Scanner::new();
    let mut parts = Vec::new();
    let mut start = 0;
    for (idx, c) in s.char_indices() {
        if scanner.feed(c) && c == sep {
            parts.push(&s[start..idx]);
            start = idx + c.len_utf8();
        }
    }
    parts.push(&s[start..]);
    parts
}

fn find_top_level(s: &str, pred: impl Fn(char) -> bool) -> Option<usize> {
    let mut scanner = Scanner::new();
    for (idx, c) in s.char_indices() {
        if scanner.feed(c) && pred(c) {
            return Some(idx);
        }
    }
    None
}

fn find_top_level_str(s: &str, needle: &str) -> Option<usize> {
    let mut scanner = Scanner::new();
    for (idx, c) in s.char_indices() {
        if scanner.feed(c) && s[idx..].starts_with(needle) {
            return Some(idx);
        }
    }
    None
}

/// Rightmost top-level binary operator from `ops`, skipping unary uses.
fn find_binary_op(s: &str, ops: &[char]) -> Option<usize> {
    let mut scanner = Scanner::new();
    let mut found = None;
    let mut prev_meaningful: Option<char> = None;
    for (idx, c) in s.char_indices() {
        let top = scanner.feed(c);
        if top && ops.contains(&c) {
            let unary = match prev_meaningful {
                None => true,
                Some(p) => "+-*/%=<>!,&|(".contains(p),
            };
            if !unary {
                found = Some(idx);
            }
        }
        if !c.is_whitespace() {
            prev_meaningful = Some(c);
        }
    }
    found
}

/// `path = expr` at top level, where the left side is a dotted path and
/// the `=` is not part of a comparison.
fn parse_assignment(stmt: &str) -> Option<(Vec<String>, &str)> {
    let mut scanner = Scanner::new();
    for (idx, c) in stmt.char_indices() {
        if !scanner.feed(c) || c != '=' {
            continue;
        }
        let bytes = stmt.as_bytes();
        if idx + 1 < bytes.len() && (bytes[idx + 1] == b'=' || bytes[idx + 1] == b'>') {
            return None;
        }
        if idx > 0 && b"=!<>+-*/%".contains(&bytes[idx - 1]) {
            return None;
        }
        let path = parse_path(stmt[..idx].trim())?;
        return Some((path, stmt[idx + 1..].trim()));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CaptureSink;

    struct RegistryOnly<'a>(&'a MicroHost, PathBuf);

    impl ModuleResolver for RegistryOnly<'_> {
        fn require(&self, specifier: &str) -> Result<Value, EvalError> {
            self.0.require_from(&self.1, specifier, 0)
        }

        fn import(&self, specifier: &str) -> Result<Namespace, EvalError> {
            self.0.import_resolved(specifier, 0)
        }
    }

    fn script_context() -> Context {
        let mut ctx = Context::default();
        seed_file_context(&mut ctx, Path::new("/tmp/test.js"), "/tmp/test.js");
        ctx
    }

    fn run_script(host: &MicroHost, code: &str) -> Result<Value, EvalError> {
        let mut ctx = script_context();
        let resolver = RegistryOnly(host, PathBuf::from("/tmp/test.js"));
        host.run_script(
            &ScriptSource {
                code,
                identifier: "/tmp/test.js",
                line_offset: 0,
                column_offset: 0,
            },
            &mut ctx,
            &resolver,
        )
    }

    #[test]
    fn test_completion_value_of_export_slot() {
        let host = MicroHost::new();
        let value = run_script(&host, "module.exports = 4\n;module.exports;\n").unwrap();
        assert_eq!(value, json!(4));
    }

    #[test]
    fn test_exports_alias_reaches_export_slot() {
        let host = MicroHost::new();
        let value =
            run_script(&host, "exports.answer = 40 + 2\n;module.exports;\n").unwrap();
        assert_eq!(value, json!({ "answer": 42 }));
    }

    #[test]
    fn test_bare_expression_completion() {
        let host = MicroHost::new();
        assert_eq!(run_script(&host, "1 + 2 * 3").unwrap(), json!(7));
        assert_eq!(
            run_script(&host, "'a' + 'b'").unwrap(),
            Value::String("ab".into())
        );
    }

    #[test]
    fn test_throw_carries_stack_with_identifier_and_line() {
        let host = MicroHost::new();
        let err = run_script(&host, "const x = 1\nthrow new Error('boom')").unwrap_err();
        assert_eq!(err.message, "boom");
        let stack = err.stack.unwrap();
        assert!(stack.contains("Error: boom"), "{stack}");
        assert!(stack.contains("/tmp/test.js:2"), "{stack}");
    }

    #[test]
    fn test_reference_error_for_unknown_global() {
        let host = MicroHost::new();
        let err = run_script(&host, "Buffer").unwrap_err();
        assert_eq!(err.message, "Buffer is not defined");
    }

    #[test]
    fn test_global_self_reference() {
        let host = MicroHost::new();
        let mut ctx = script_context();
        ctx.vars
            .insert("globalThis".into(), Binding::Alias(vec![]));
        ctx.vars
            .insert("answer".into(), Binding::Data(json!(41)));
        let resolver = RegistryOnly(&host, PathBuf::from("/tmp/test.js"));
        let value = host
            .run_script(
                &ScriptSource {
                    code: "globalThis.answer + 1",
                    identifier: "/tmp/test.js",
                    line_offset: 0,
                    column_offset: 0,
                },
                &mut ctx,
                &resolver,
            )
            .unwrap();
        assert_eq!(value, json!(42));
    }

    #[test]
    fn test_module_evaluation_exports() {
        let host = MicroHost::new();
        let source = ScriptSource {
            code: "export default 5\nexport const extra = 'x'",
            identifier: "file:///tmp/mod.mjs",
            line_offset: 0,
            column_offset: 0,
        };
        let parsed = host.parse_module(&source).unwrap();
        let mut ctx = Context::default();
        let resolver = RegistryOnly(&host, PathBuf::from("/tmp/mod.mjs"));
        let namespace = host
            .evaluate_module(&parsed, &[], &mut ctx, &resolver)
            .unwrap();
        assert_eq!(namespace.get("default"), Some(&json!(5)));
        assert_eq!(namespace.get("extra"), Some(&json!("x")));
    }

    #[test]
    fn test_static_import_binding() {
        let host = MicroHost::new();
        let source = ScriptSource {
            code: "import { six } from './example.mjs'\nexport default six + 1",
            identifier: "file:///tmp/mod.mjs",
            line_offset: 0,
            column_offset: 0,
        };
        let parsed = host.parse_module(&source).unwrap();
        assert_eq!(parsed.imports, vec!["./example.mjs".to_string()]);
        let links = vec![SyntheticModule {
            specifier: "./example.mjs".into(),
            exports: Namespace::from([("six".to_string(), json!(6))]),
        }];
        let mut ctx = Context::default();
        let resolver = RegistryOnly(&host, PathBuf::from("/tmp/mod.mjs"));
        let namespace = host
            .evaluate_module(&parsed, &links, &mut ctx, &resolver)
            .unwrap();
        assert_eq!(namespace.get("default"), Some(&json!(7)));
    }

    #[test]
    fn test_missing_named_export_errors() {
        let host = MicroHost::new();
        let source = ScriptSource {
            code: "import { nope } from './example.mjs'",
            identifier: "file:///tmp/mod.mjs",
            line_offset: 0,
            column_offset: 0,
        };
        let parsed = host.parse_module(&source).unwrap();
        let links = vec![SyntheticModule {
            specifier: "./example.mjs".into(),
            exports: Namespace::new(),
        }];
        let mut ctx = Context::default();
        let resolver = RegistryOnly(&host, PathBuf::from("/tmp/mod.mjs"));
        let err = host
            .evaluate_module(&parsed, &links, &mut ctx, &resolver)
            .unwrap_err();
        assert!(err.message.contains("does not provide an export named 'nope'"));
    }

    #[test]
    fn test_import_meta_url() {
        let host = MicroHost::new();
        let source = ScriptSource {
            code: "export default import.meta.url",
            identifier: "file:///tmp/meta.mjs",
            line_offset: 0,
            column_offset: 0,
        };
        let parsed = host.parse_module(&source).unwrap();
        let mut ctx = Context::default();
        let resolver = RegistryOnly(&host, PathBuf::from("/tmp/meta.mjs"));
        let namespace = host
            .evaluate_module(&parsed, &[], &mut ctx, &resolver)
            .unwrap();
        assert_eq!(namespace.get("default"), Some(&json!("file:///tmp/meta.mjs")));
    }

    #[test]
    fn test_import_statement_rejected_in_script() {
        let host = MicroHost::new();
        let err = run_script(&host, "import { x } from './x.mjs'").unwrap_err();
        assert!(err
            .message
            .contains("Cannot use import statement outside a module"));
    }

    #[test]
    fn test_require_registry_module() {
        let host = MicroHost::new().with_module("answers", json!({ "best": 42 }));
        let value = run_script(
            &host,
            "module.exports = require('answers')\n;module.exports;\n",
        )
        .unwrap();
        assert_eq!(value, json!({ "best": 42 }));
    }

    #[test]
    fn test_require_of_relative_file() {
        let dir = tempfile::tempdir().unwrap();
        let dep = dir.path().join("dep.cjs");
        fs::write(&dep, "module.exports = { six: 6 }\n").unwrap();
        let host = MicroHost::new();
        let value = host
            .require_module(&dir.path().join("main.js"), "./dep.cjs")
            .unwrap();
        assert_eq!(value, json!({ "six": 6 }));
    }

    #[test]
    fn test_import_of_relative_module_file() {
        let dir = tempfile::tempdir().unwrap();
        let dep = dir.path().join("dep.mjs");
        fs::write(&dep, "export const six = 6\nexport default 'dep'\n").unwrap();
        let url = Url::from_file_path(&dep).unwrap();
        let host = MicroHost::new();
        let namespace = host.import_module(url.as_str()).unwrap();
        assert_eq!(namespace.get("six"), Some(&json!(6)));
        assert_eq!(namespace.get("default"), Some(&json!("dep")));
    }

    #[test]
    fn test_require_of_es_module_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let dep = dir.path().join("dep.mjs");
        fs::write(&dep, "export default 1\n").unwrap();
        let host = MicroHost::new();
        let err = host
            .require_module(&dir.path().join("main.js"), "./dep.mjs")
            .unwrap_err();
        assert!(err.message.contains("ES Module"));
    }

    #[test]
    fn test_snippet_returns_expression_value() {
        let host = MicroHost::new();
        let value = host
            .run_snippet(
                "return IMPORTED.default + arg",
                &json!({ "default": 42 }),
                &json!(3),
                &ConsoleChannel::Inherit,
            )
            .unwrap();
        assert_eq!(value, json!(45));
    }

    #[test]
    fn test_snippet_without_return_yields_null() {
        let host = MicroHost::new();
        let value = host
            .run_snippet("const x = 1", &Value::Null, &Value::Null, &ConsoleChannel::Inherit)
            .unwrap();
        assert_eq!(value, Value::Null);
    }

    #[test]
    fn test_snippet_console_goes_to_channel() {
        let host = MicroHost::new();
        let sink = CaptureSink::new();
        let channel = ConsoleChannel::Capture(sink.clone());
        host.run_snippet("console.log('from exec')", &Value::Null, &Value::Null, &channel)
            .unwrap();
        let (out, _) = sink.take();
        assert_eq!(out, "from exec\n");
    }

    #[test]
    fn test_line_offset_shifts_stack_lines() {
        let host = MicroHost::new();
        let mut ctx = script_context();
        let resolver = RegistryOnly(&host, PathBuf::from("/tmp/test.js"));
        let err = host
            .run_script(
                &ScriptSource {
                    code: "throw new Error('shifted')",
                    identifier: "/tmp/test.js",
                    line_offset: 10,
                    column_offset: 0,
                },
                &mut ctx,
                &resolver,
            )
            .unwrap_err();
        assert!(err.stack.unwrap().contains("/tmp/test.js:11"));
    }

    #[test]
    fn test_object_and_array_literals() {
        let host = MicroHost::new();
        let value = run_script(
            &host,
            "module.exports = { name: 'demo', list: [1, 2, 3] }\n;module.exports;\n",
        )
        .unwrap();
        assert_eq!(value, json!({ "name": "demo", "list": [1, 2, 3] }));
    }

    #[test]
    fn test_split_statements_respects_strings() {
        assert_eq!(split_statements("a = 'x;y'; b"), vec!["a = 'x;y'", "b"]);
    }

    #[test]
    fn test_collect_imports_skips_dynamic() {
        let code = "import { a } from './a.mjs'\nconst b = await import('./b.mjs')\nimport './c.mjs'";
        assert_eq!(
            collect_imports(code),
            vec!["./a.mjs".to_string(), "./c.mjs".to_string()]
        );
    }
}
