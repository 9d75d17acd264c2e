//! Module format resolution: extension rules, the ancestor manifest
//! walk, and the shared format cache.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;

use crate::error::Error;
use crate::options::ModuleKind;

/// Manifest file consulted during the ancestor walk.
const MANIFEST: &str = "package.json";

/// Manifest `type` value that selects the graph convention.
const MODULE_TYPE: &str = "module";

/// Directory → resolved convention memo.
///
/// Shared across evaluations on purpose: the cost it amortizes — manifest
/// directory walks — is a cross-call concern. It is an explicit object
/// rather than a hidden static so callers can inject their own; the
/// process-wide default lives behind [`format_cache`]. Invalidated only
/// by [`FormatCache::clear`].
#[derive(Debug, Default)]
pub struct FormatCache {
    dirs: RwLock<HashMap<PathBuf, ModuleKind>>,
}

impl FormatCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget every resolved directory, forcing the next guess to re-read
    /// manifests.
    pub fn clear(&self) {
        self.dirs.write().clear();
    }

    fn get(&self, dir: &Path) -> Option<ModuleKind> {
        self.dirs.read().get(dir).copied()
    }

    fn fill(&self, dirs: Vec<PathBuf>, kind: ModuleKind) {
        let mut map = self.dirs.write();
        for dir in dirs {
            map.insert(dir, kind);
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.dirs.read().len()
    }
}

/// The process-wide default cache instance.
pub fn format_cache() -> Arc<FormatCache> {
    static CACHE: Lazy<Arc<FormatCache>> = Lazy::new(|| Arc::new(FormatCache::new()));
    Arc::clone(&CACHE)
}

/// Figure out the module convention for a synthetic filename.
///
/// Extension rules win outright: `.cjs` is always the synchronous
/// convention and `.mjs` always the graph convention, manifests
/// notwithstanding. Otherwise walk the directory chain upward; the first
/// cached directory or existing manifest decides, and every directory
/// visited on the way is back-filled with the answer. A missing manifest
/// means keep walking; an unreadable or malformed one is fatal. No
/// manifest all the way up means the synchronous convention.
pub fn guess_kind(cache: &FormatCache, filename: &Path) -> Result<ModuleKind, Error> {
    match filename.extension().and_then(|ext| ext.to_str()) {
        Some("cjs") => return Ok(ModuleKind::CommonJs),
        Some("mjs") => return Ok(ModuleKind::Es),
        _ => {}
    }

    let mut kind = ModuleKind::CommonJs;
    let mut pending = Vec::new();
    for dir in filename.ancestors().skip(1) {
        if let Some(cached) = cache.get(dir) {
            kind = cached;
            break;
        }
        pending.push(dir.to_path_buf());
        match std::fs::read_to_string(dir.join(MANIFEST)) {
            Ok(text) => {
                kind = parse_manifest(&text, &dir.join(MANIFEST))?;
                break;
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
            Err(err) => return Err(Error::Io(err)),
        }
    }
    cache.fill(pending, kind);
    Ok(kind)
}

fn parse_manifest(text: &str, path: &Path) -> Result<ModuleKind, Error> {
    let manifest: serde_json::Value =
        serde_json::from_str(text).map_err(|source| Error::InvalidManifest {
            path: path.to_path_buf(),
            source,
        })?;
    let kind = match manifest.get("type").and_then(|t| t.as_str()) {
        Some(MODULE_TYPE) => ModuleKind::Es,
        _ => ModuleKind::CommonJs,
    };
    Ok(kind)
}
