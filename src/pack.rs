//! Build-context collection.
//!
//! Walks a source tree honoring `.gitignore` (negations included), always
//! excluding `.git`. Explicit include patterns re-include files the ignore
//! rules dropped; explicit excludes and `.git` win over everything.

use crate::prelude::*;
use ignore::overrides::{Override, OverrideBuilder};
use ignore::WalkBuilder;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default)]
pub struct PackOptions {
    /// Globs re-included even when an ignore rule matches them.
    pub include: Vec<String>,
    /// Globs excluded unconditionally.
    pub exclude: Vec<String>,
}

fn build_override(dir: &Path, patterns: &[String], code: &str) -> AppResult<Override> {
    let mut builder = OverrideBuilder::new(dir);
    for pattern in patterns {
        builder
            .add(pattern)
            .map_err(|e| AppError::validation(code, e.to_string()))?;
    }
    builder
        .build()
        .map_err(|e| AppError::validation(code, e.to_string()))
}

fn files(dir: &Path, honor_gitignore: bool) -> AppResult<BTreeSet<PathBuf>> {
    let walk = WalkBuilder::new(dir)
        .hidden(false)
        .ignore(false)
        .git_global(false)
        .git_exclude(false)
        .git_ignore(honor_gitignore)
        .require_git(false)
        .build();

    let mut found = BTreeSet::new();
    for entry in walk {
        let entry = entry.map_err(|e| AppError::Internal(e.to_string()))?;
        if entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            if let Ok(relative) = entry.path().strip_prefix(dir) {
                found.insert(relative.to_path_buf());
            }
        }
    }
    Ok(found)
}

/// Collects the files a build context ships, as sorted paths relative to
/// `dir`.
pub fn collect(dir: &Path, opts: &PackOptions) -> AppResult<Vec<PathBuf>> {
    let include = build_override(dir, &opts.include, "bad-include")?;
    let exclude = build_override(dir, &opts.exclude, "bad-exclude")?;

    let kept = files(dir, true)?;
    let everything = files(dir, false)?;

    let mut collected = Vec::new();
    for path in everything {
        // .git never ships, not even via an include
        if path.starts_with(".git") {
            continue;
        }
        let absolute = dir.join(&path);
        if exclude.matched(&absolute, false).is_whitelist() {
            // exclude patterns are stored un-negated, so a match here
            // means the file is explicitly excluded
            continue;
        }
        if kept.contains(&path) || include.matched(&absolute, false).is_whitelist() {
            collected.push(path);
        }
    }
    Ok(collected)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn tree(files: &[(&str, &str)]) -> TempDir {
        let dir = TempDir::new().unwrap();
        for (name, contents) in files {
            let path = dir.path().join(name);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).unwrap();
            }
            fs::write(path, contents).unwrap();
        }
        dir
    }

    fn names(paths: &[PathBuf]) -> Vec<String> {
        paths
            .iter()
            .map(|p| p.to_string_lossy().replace('\\', "/"))
            .collect()
    }

    #[test]
    fn gitignore_and_negations_are_honored() {
        let dir = tree(&[
            (".gitignore", "*.log\n!important.log\n"),
            ("debug.log", ""),
            ("important.log", ""),
            ("src/main.rs", "fn main() {}\n"),
        ]);

        let files = names(&collect(dir.path(), &PackOptions::default()).unwrap());
        assert!(!files.contains(&"debug.log".to_string()));
        assert!(files.contains(&"important.log".to_string()));
        assert!(files.contains(&"src/main.rs".to_string()));
        assert!(files.contains(&".gitignore".to_string()));
    }

    #[test]
    fn git_directory_is_always_excluded() {
        let dir = tree(&[
            ("src/main.rs", ""),
            (".git/config", "[core]\n"),
            (".git/objects/ab/cdef", ""),
        ]);

        let files = names(&collect(dir.path(), &PackOptions::default()).unwrap());
        assert!(files.iter().all(|f| !f.starts_with(".git/")));
        assert!(files.contains(&"src/main.rs".to_string()));
    }

    #[test]
    fn includes_reinstate_ignored_files_but_not_git() {
        let dir = tree(&[
            (".gitignore", "*.log\ndist/\n"),
            ("debug.log", ""),
            ("dist/bundle.js", ""),
            ("src/main.rs", ""),
            (".git/config", ""),
        ]);

        let opts = PackOptions {
            include: vec!["*.log".to_string()],
            exclude: Vec::new(),
        };
        let files = names(&collect(dir.path(), &opts).unwrap());
        // the include re-adds the log, everything else keeps following
        // gitignore
        assert!(files.contains(&"debug.log".to_string()));
        assert!(!files.contains(&"dist/bundle.js".to_string()));
        assert!(files.contains(&"src/main.rs".to_string()));
        assert!(files.iter().all(|f| !f.starts_with(".git/")));
    }

    #[test]
    fn explicit_excludes_beat_includes() {
        let dir = tree(&[("kept.txt", ""), ("secret/key.pem", "")]);

        let opts = PackOptions {
            include: vec!["secret/**".to_string()],
            exclude: vec!["secret/**".to_string()],
        };
        let files = names(&collect(dir.path(), &opts).unwrap());
        assert!(files.contains(&"kept.txt".to_string()));
        assert!(!files.contains(&"secret/key.pem".to_string()));
    }
}
