//! Colored terminal output for CLI results.
//!
//! Uses `termcolor` for cross-platform colored output. Respects the
//! `NO_COLOR` environment variable and the `--color` flag.

use std::io::Write;

use sourcebox_core::ConsoleOutput;
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

/// Resolve `ColorChoice` from the CLI flag and environment.
///
/// Priority: `NO_COLOR` env > `--color` flag > auto-detect TTY.
pub fn resolve_color_choice(flag: &str) -> ColorChoice {
    if std::env::var_os("NO_COLOR").is_some() {
        return ColorChoice::Never;
    }
    match flag {
        "always" => ColorChoice::Always,
        "never" => ColorChoice::Never,
        _ => ColorChoice::Auto,
    }
}

/// Styled writer for evaluation results and errors.
pub struct Reporter {
    stdout: StandardStream,
    stderr: StandardStream,
}

impl Reporter {
    pub fn new(choice: ColorChoice) -> Self {
        Self {
            stdout: StandardStream::stdout(choice),
            stderr: StandardStream::stderr(choice),
        }
    }

    /// Print the evaluated value as pretty JSON.
    pub fn result(&mut self, value: &serde_json::Value) {
        let rendered = serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string());
        let _ = writeln!(self.stdout, "{rendered}");
    }

    /// Print an error, and the thrown stack when one exists.
    pub fn error(&mut self, err: &sourcebox_core::Error) {
        let mut spec = ColorSpec::new();
        spec.set_fg(Some(Color::Red)).set_bold(true);
        let _ = self.stderr.set_color(&spec);
        let _ = write!(self.stderr, "error");
        let _ = self.stderr.reset();
        let _ = writeln!(self.stderr, ": {err}");
        if let sourcebox_core::Error::Evaluation(eval) = err {
            if let Some(stack) = &eval.stack {
                let _ = writeln!(self.stderr, "{stack}");
            }
        }
    }

    /// Print captured console text under dim headers.
    pub fn captured(&mut self, output: &ConsoleOutput) {
        let out = output.out();
        let err = output.err();
        if !out.is_empty() {
            self.header("captured stdout");
            let _ = write!(self.stdout, "{out}");
        }
        if !err.is_empty() {
            self.header("captured stderr");
            let _ = write!(self.stdout, "{err}");
        }
    }

    fn header(&mut self, title: &str) {
        let mut spec = ColorSpec::new();
        spec.set_fg(Some(Color::Cyan)).set_bold(true);
        let _ = self.stdout.set_color(&spec);
        let _ = writeln!(self.stdout, "── {title} ──");
        let _ = self.stdout.reset();
    }
}
