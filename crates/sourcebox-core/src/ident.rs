//! Module identity: the normalized forms of a synthetic filename, and
//! the file-anchored resolver handed to the host.

use std::path::{Path, PathBuf};

use sourcebox_host::{EvalError, ModuleResolver, Namespace, ScriptHost, Value};
use url::Url;

use crate::error::Error;

/// A synthetic filename normalized to every form the loaders need:
/// path and directory for manifest walks and require anchoring, URLs for
/// graph identity and specifier resolution.
#[derive(Clone, Debug)]
pub(crate) struct ModuleIdentity {
    /// The identity as evaluated code sees it: the absolutized path, or
    /// the original `file:` URL when one was given.
    pub filename: String,
    pub path: PathBuf,
    pub dir: PathBuf,
    pub file_url: Url,
    /// Directory URL with a trailing slash, the join base for relative
    /// specifiers.
    pub dir_url: Url,
}

impl ModuleIdentity {
    pub(crate) fn resolve(filename: &str) -> Result<Self, Error> {
        let (display, path, file_url) = if filename.starts_with("file:") {
            let file_url = Url::parse(filename).map_err(|err| Error::InvalidFilename {
                filename: filename.to_string(),
                reason: err.to_string(),
            })?;
            let path = file_url.to_file_path().map_err(|_| Error::InvalidFilename {
                filename: filename.to_string(),
                reason: "not a local file URL".to_string(),
            })?;
            (filename.to_string(), path, file_url)
        } else {
            let path = std::path::absolute(filename)?;
            let file_url = Url::from_file_path(&path).map_err(|_| Error::InvalidFilename {
                filename: filename.to_string(),
                reason: "cannot form a file URL".to_string(),
            })?;
            (path.display().to_string(), path, file_url)
        };
        let dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("/"));
        let dir_url = file_url
            .join(".")
            .map_err(|err| Error::InvalidFilename {
                filename: filename.to_string(),
                reason: err.to_string(),
            })?;
        Ok(Self {
            filename: display,
            path,
            dir,
            file_url,
            dir_url,
        })
    }
}

/// Rewrite a relative specifier against the synthetic directory URL.
/// Absolute paths, bare ecosystem names, and URLs pass through unchanged.
pub(crate) fn resolve_if_needed(dir_url: &Url, specifier: &str) -> Result<String, EvalError> {
    if !specifier.starts_with('.') {
        return Ok(specifier.to_string());
    }
    dir_url
        .join(specifier)
        .map(String::from)
        .map_err(|err| EvalError::new(format!("cannot resolve specifier '{specifier}': {err}")))
}

/// Module resolution anchored at the request's synthetic file, backed by
/// the host's native loading.
pub(crate) struct FileResolver<'a, H> {
    pub host: &'a H,
    pub identity: &'a ModuleIdentity,
}

impl<H: ScriptHost> ModuleResolver for FileResolver<'_, H> {
    fn require(&self, specifier: &str) -> Result<Value, EvalError> {
        self.host.require_module(&self.identity.path, specifier)
    }

    fn import(&self, specifier: &str) -> Result<Namespace, EvalError> {
        let resolved = resolve_if_needed(&self.identity.dir_url, specifier)?;
        self.host.import_module(&resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_path_is_absolutized() {
        let identity = ModuleIdentity::resolve("some/dir/mod.js").unwrap();
        assert!(identity.path.is_absolute());
        assert!(identity.filename.ends_with("some/dir/mod.js"));
        assert!(identity.file_url.as_str().starts_with("file://"));
        assert!(identity.dir_url.as_str().ends_with('/'));
    }

    #[test]
    fn test_file_url_is_kept_verbatim() {
        let identity = ModuleIdentity::resolve("file:///tmp/mod.mjs").unwrap();
        assert_eq!(identity.filename, "file:///tmp/mod.mjs");
        assert_eq!(identity.path, PathBuf::from("/tmp/mod.mjs"));
        assert_eq!(identity.dir_url.as_str(), "file:///tmp/");
    }

    #[test]
    fn test_invalid_file_url_is_rejected() {
        let err = ModuleIdentity::resolve("file://host/and/such/%%%").unwrap_err();
        assert!(matches!(err, Error::InvalidFilename { .. }));
    }

    #[test]
    fn test_relative_specifiers_resolve_against_dir() {
        let identity = ModuleIdentity::resolve("file:///srv/app/main.mjs").unwrap();
        assert_eq!(
            resolve_if_needed(&identity.dir_url, "./lib/util.mjs").unwrap(),
            "file:///srv/app/lib/util.mjs"
        );
        assert_eq!(
            resolve_if_needed(&identity.dir_url, "../shared.mjs").unwrap(),
            "file:///srv/shared.mjs"
        );
    }

    #[test]
    fn test_bare_and_absolute_specifiers_pass_through() {
        let identity = ModuleIdentity::resolve("file:///srv/app/main.mjs").unwrap();
        for specifier in ["lodash", "node:path", "file:///other/mod.mjs", "/abs/mod.mjs"] {
            assert_eq!(
                resolve_if_needed(&identity.dir_url, specifier).unwrap(),
                specifier
            );
        }
    }
}
