//! Language stack detection.
//!
//! Detection runs once per source directory in a fixed order; the first
//! matcher wins. Each stack's init records advisory detection events for
//! debugging, but planning only reads the typed fields init stored, which
//! keeps build graphs deterministic.

pub mod bun;
pub mod golang;
pub mod node;
pub mod python;
pub mod ruby;
pub mod rustlang;

use crate::build::{BuildGraph, BuildOptions};
use crate::prelude::*;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionEventKind {
    Framework,
    Script,
    Lockfile,
    Layout,
    Package,
    Entrypoint,
    Version,
}

/// Advisory record of something that influenced detection. Never an input
/// to planning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionEvent {
    pub kind: DetectionEventKind,
    pub name: String,
    pub message: String,
}

impl DetectionEvent {
    pub fn new(kind: DetectionEventKind, name: &str, message: impl Into<String>) -> Self {
        DetectionEvent {
            kind,
            name: name.to_string(),
            message: message.into(),
        }
    }
}

/// A detected language/framework family: a default web command and a
/// deterministic build graph.
pub trait Stack: Send + Sync {
    fn name(&self) -> &'static str;

    fn events(&self) -> &[DetectionEvent];

    /// Default shell command for the web process, when one can be derived.
    fn web_command(&self) -> Option<String>;

    fn plan(&self, opts: &BuildOptions) -> AppResult<BuildGraph>;
}

/// Inspects a directory and returns the single matching stack.
/// Precedence: Ruby, Python, Node, Bun, Go, Rust.
pub fn detect(dir: &Path) -> AppResult<Option<Box<dyn Stack>>> {
    if let Some(stack) = ruby::RubyStack::detect(dir)? {
        return Ok(Some(Box::new(stack)));
    }
    if let Some(stack) = python::PythonStack::detect(dir)? {
        return Ok(Some(Box::new(stack)));
    }
    if let Some(stack) = node::NodeStack::detect(dir)? {
        return Ok(Some(Box::new(stack)));
    }
    if let Some(stack) = bun::BunStack::detect(dir)? {
        return Ok(Some(Box::new(stack)));
    }
    if let Some(stack) = golang::GoStack::detect(dir)? {
        return Ok(Some(Box::new(stack)));
    }
    if let Some(stack) = rustlang::RustStack::detect(dir)? {
        return Ok(Some(Box::new(stack)));
    }
    Ok(None)
}

pub(crate) fn exists(dir: &Path, name: &str) -> bool {
    dir.join(name).exists()
}

pub(crate) fn read_file(dir: &Path, name: &str) -> Option<String> {
    std::fs::read_to_string(dir.join(name)).ok()
}

/// True when the directory's Procfile declares a web process matched by
/// `pattern`.
pub(crate) fn procfile_web_matches(dir: &Path, pattern: &regex::Regex) -> bool {
    match read_file(dir, "Procfile") {
        Some(contents) => pattern.is_match(&contents),
        None => false,
    }
}
