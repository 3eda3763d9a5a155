use crate::build::images::get_bun_image;
use crate::build::{BuildGraph, BuildOptions, GraphBuilder};
use crate::prelude::*;
use crate::stack::node;
use crate::stack::{exists, procfile_web_matches, read_file, DetectionEvent, DetectionEventKind, Stack};
use lazy_static::lazy_static;
use regex::Regex;
use std::path::Path;

lazy_static! {
    static ref PROCFILE_BUN: Regex = Regex::new(r"web:\s+bun").expect("static regex");
}

pub struct BunStack {
    has_lockfile: bool,
    web_script: Option<String>,
    entry: String,
    events: Vec<DetectionEvent>,
}

impl BunStack {
    /// Matches on package.json plus either bun.lock or a Procfile web
    /// process run with bun. Checked after Node, so npm/yarn projects
    /// never land here.
    pub fn detect(dir: &Path) -> AppResult<Option<Self>> {
        if !exists(dir, "package.json") {
            return Ok(None);
        }
        let has_lockfile = exists(dir, "bun.lock");
        if !has_lockfile && !procfile_web_matches(dir, &PROCFILE_BUN) {
            return Ok(None);
        }

        let mut stack = BunStack {
            has_lockfile,
            web_script: None,
            entry: "index.ts".to_string(),
            events: Vec::new(),
        };
        stack.init(dir);
        Ok(Some(stack))
    }

    fn init(&mut self, dir: &Path) {
        if self.has_lockfile {
            self.events.push(DetectionEvent::new(
                DetectionEventKind::Lockfile,
                "bun.lock",
                "bun lockfile present",
            ));
        }

        let package: serde_json::Value = read_file(dir, "package.json")
            .and_then(|contents| serde_json::from_str(&contents).ok())
            .unwrap_or_default();

        if let Some(scripts) = package.get("scripts").and_then(|s| s.as_object()) {
            for script in node::WEB_SCRIPTS {
                if scripts.contains_key(script) {
                    self.web_script = Some(script.to_string());
                    self.events.push(DetectionEvent::new(
                        DetectionEventKind::Script,
                        script,
                        "web script in package.json",
                    ));
                    break;
                }
            }
        }

        if let Some(main) = package.get("main").and_then(|m| m.as_str()) {
            self.entry = main.to_string();
            self.events.push(DetectionEvent::new(
                DetectionEventKind::Entrypoint,
                main,
                "main entry from package.json",
            ));
        }
    }
}

impl Stack for BunStack {
    fn name(&self) -> &'static str {
        "bun"
    }

    fn events(&self) -> &[DetectionEvent] {
        &self.events
    }

    fn web_command(&self) -> Option<String> {
        match &self.web_script {
            Some(script) => Some(format!("bun run {}", script)),
            None => Some(format!("bun {}", self.entry)),
        }
    }

    fn plan(&self, opts: &BuildOptions) -> AppResult<BuildGraph> {
        let mut builder = GraphBuilder::new(opts);
        builder
            .from_image(&get_bun_image(&opts.version))
            .add_app_user()
            .apt_install(&["git"]);

        if self.has_lockfile {
            builder.copy_files(&["package.json", "bun.lock"]);
        } else {
            builder.copy_files(&["package.json"]);
        }
        let bun_cache = builder.cache("/root/.bun/install/cache");
        builder.run_with("bun install", "root", &[], vec![bun_cache]);

        builder
            .copy_app_code()
            .on_build(&opts.on_build)
            .chown_app();

        Ok(builder.finish("", self.web_command()))
    }
}
