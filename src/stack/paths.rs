//! Path canonicalization helpers.
//!
//! Every prefix or equality check in the resolver operates on canonical form:
//! absolute, lexically normalized, and (when enabled) with symlinks resolved.

use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};

/// Canonicalizes `path` relative to `base`. Symlinks are only resolved when
/// `resolve_symlinks` is set and the path exists; otherwise normalization is
/// purely lexical so missing paths can still be canonicalized.
pub(crate) fn canonical_path(path: &Path, base: &Path, resolve_symlinks: bool) -> Result<PathBuf> {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    };

    let absolute = if joined.is_absolute() {
        joined
    } else {
        std::env::current_dir()
            .context("failed to resolve current directory")?
            .join(joined)
    };

    if resolve_symlinks {
        if let Ok(resolved) = std::fs::canonicalize(&absolute) {
            return Ok(resolved);
        }
    }

    Ok(normalize(&absolute))
}

pub(crate) fn canonical_paths(
    paths: &[PathBuf],
    base: &Path,
    resolve_symlinks: bool,
) -> Result<Vec<PathBuf>> {
    paths
        .iter()
        .map(|path| canonical_path(path, base, resolve_symlinks))
        .collect()
}

/// Whether `path` sits under `prefix` (component-wise, both canonical).
pub(crate) fn has_path_prefix(path: &Path, prefix: &Path) -> bool {
    path.starts_with(prefix)
}

/// Whether `path` sits under any of the given directories.
pub(crate) fn is_under_any(path: &Path, dirs: &[PathBuf]) -> bool {
    dirs.iter().any(|dir| has_path_prefix(path, dir))
}

fn normalize(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();

    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir | Component::Normal(_) => {
                normalized.push(component.as_os_str());
            }
            Component::CurDir => {}
            Component::ParentDir => {
                // Popping past the root is a no-op; the root stays.
                if !normalized.pop() {
                    normalized.push(component.as_os_str());
                }
            }
        }
    }

    normalized
}
