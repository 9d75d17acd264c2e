//! Evaluation request options.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sourcebox_host::{Bindings, Value};

use crate::console::ConsoleOutput;
use crate::error::Error;

/// Every format spelling the dispatcher recognizes.
///
/// `Amd` and `Globals` are recognized by name but never executed; `Guess`
/// resolves through the format resolver before dispatch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Format {
    Amd,
    Bare,
    Cjs,
    CommonJs,
    Es,
    Es6,
    Esm,
    Globals,
    Guess,
    Mjs,
    Module,
    Umd,
}

impl Format {
    pub const fn as_str(self) -> &'static str {
        match self {
            Format::Amd => "amd",
            Format::Bare => "bare",
            Format::Cjs => "cjs",
            Format::CommonJs => "commonjs",
            Format::Es => "es",
            Format::Es6 => "es6",
            Format::Esm => "esm",
            Format::Globals => "globals",
            Format::Guess => "guess",
            Format::Mjs => "mjs",
            Format::Module => "module",
            Format::Umd => "umd",
        }
    }

    /// Formats that are recognized but always rejected at dispatch.
    pub const fn is_rejected(self) -> bool {
        matches!(self, Format::Amd | Format::Globals)
    }

    /// The executable convention this spelling selects, if any.
    pub const fn kind(self) -> Option<ModuleKind> {
        match self {
            Format::Bare | Format::Cjs | Format::CommonJs | Format::Umd => {
                Some(ModuleKind::CommonJs)
            }
            Format::Es | Format::Es6 | Format::Esm | Format::Mjs | Format::Module => {
                Some(ModuleKind::Es)
            }
            Format::Amd | Format::Globals | Format::Guess => None,
        }
    }
}

impl Default for Format {
    fn default() -> Self {
        Format::Guess
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Format {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "amd" => Ok(Format::Amd),
            "bare" => Ok(Format::Bare),
            "cjs" => Ok(Format::Cjs),
            "commonjs" => Ok(Format::CommonJs),
            "es" => Ok(Format::Es),
            "es6" => Ok(Format::Es6),
            "esm" => Ok(Format::Esm),
            "globals" => Ok(Format::Globals),
            "guess" => Ok(Format::Guess),
            "mjs" => Ok(Format::Mjs),
            "module" => Ok(Format::Module),
            "umd" => Ok(Format::Umd),
            other => Err(Error::UnsupportedFormat(other.to_string())),
        }
    }
}

/// The two executable module conventions, once resolved.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ModuleKind {
    /// Eager evaluation through a mutable export slot.
    CommonJs,
    /// Static imports and exports, linked before any evaluation.
    Es,
}

impl ModuleKind {
    /// The canonical format spelling for this convention.
    pub const fn format(self) -> Format {
        match self {
            ModuleKind::CommonJs => Format::CommonJs,
            ModuleKind::Es => Format::Es,
        }
    }
}

impl fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.format().as_str())
    }
}

/// Color behavior for a captured console.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorMode {
    /// Follow the stream: capture buffers are not terminals, so no color.
    #[default]
    Auto,
    On,
    Off,
}

impl ColorMode {
    pub(crate) fn color_enabled(self) -> bool {
        match self {
            ColorMode::On => true,
            ColorMode::Auto | ColorMode::Off => false,
        }
    }
}

/// Options for one evaluation request.
///
/// `filename` is the synthetic identity of the text: its directory anchors
/// format guessing and module resolution, so it matters more than the
/// final path component. The dispatcher copies `context`; the caller's
/// map is never mutated.
#[derive(Clone, Debug)]
pub struct EvalOptions {
    /// How to interpret the text. `Guess` consults extensions and the
    /// nearest project manifest.
    pub format: Format,
    /// Synthetic absolute path (or `file:` URL) for the text. Required.
    pub filename: Option<String>,
    /// Extra global bindings, merged over the base set; these win on
    /// collision.
    pub context: Bindings,
    /// Start from the host's ambient globals (minus language intrinsics).
    /// When false, the context is exactly `context`.
    pub include_globals: bool,
    /// Replace the environment variables the evaluated code sees. The
    /// real process environment is never exposed mutably either way.
    pub env: Option<BTreeMap<String, String>>,
    /// Name of the global exported under the legacy `globals` wrapping.
    pub export_var: Option<String>,
    /// Added to stack-trace line numbers, for callers that embed the text
    /// in a larger document.
    pub line_offset: usize,
    /// Added to first-line stack-trace column numbers.
    pub column_offset: usize,
    /// Follow-up snippet run against the evaluated module, with
    /// `IMPORTED`, `arg`, and `console` bound.
    pub exec: Option<String>,
    /// Value bound as `arg` in the follow-up snippet.
    pub arg: Value,
    /// Capture console output here instead of inheriting the process
    /// streams. Filled in exactly once, success or failure.
    pub console_output: Option<ConsoleOutput>,
    /// Color behavior for the captured console. Ignored without
    /// `console_output`.
    pub color_mode: ColorMode,
}

impl Default for EvalOptions {
    fn default() -> Self {
        Self {
            format: Format::Guess,
            filename: None,
            context: Bindings::new(),
            include_globals: true,
            env: None,
            export_var: None,
            line_offset: 0,
            column_offset: 0,
            exec: None,
            arg: Value::Null,
            console_output: None,
            color_mode: ColorMode::Auto,
        }
    }
}

impl EvalOptions {
    /// Options for a synthetic file, everything else defaulted.
    pub fn for_file(filename: impl Into<String>) -> Self {
        Self {
            filename: Some(filename.into()),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_round_trips_all_spellings() {
        for format in [
            Format::Amd,
            Format::Bare,
            Format::Cjs,
            Format::CommonJs,
            Format::Es,
            Format::Es6,
            Format::Esm,
            Format::Globals,
            Format::Guess,
            Format::Mjs,
            Format::Module,
            Format::Umd,
        ] {
            assert_eq!(format.as_str().parse::<Format>().unwrap(), format);
        }
    }

    #[test]
    fn test_unknown_format_is_unsupported() {
        let err = "fake".parse::<Format>().unwrap_err();
        assert!(matches!(err, Error::UnsupportedFormat(name) if name == "fake"));
    }

    #[test]
    fn test_kind_classification() {
        assert_eq!(Format::Umd.kind(), Some(ModuleKind::CommonJs));
        assert_eq!(Format::Mjs.kind(), Some(ModuleKind::Es));
        assert_eq!(Format::Amd.kind(), None);
        assert!(Format::Globals.is_rejected());
        assert!(!Format::Bare.is_rejected());
    }
}
