use crate::build::images::get_node_image;
use crate::build::{BuildGraph, BuildOptions, GraphBuilder};
use crate::prelude::*;
use crate::stack::{exists, procfile_web_matches, read_file, DetectionEvent, DetectionEventKind, Stack};
use lazy_static::lazy_static;
use regex::Regex;
use std::path::Path;

lazy_static! {
    static ref PROCFILE_NODE: Regex =
        Regex::new(r"web:\s+(node|npm|yarn)").expect("static regex");
}

/// Scripts probed for a web process, in order.
pub(crate) const WEB_SCRIPTS: [&str; 3] = ["start", "serve", "server"];

pub struct NodeStack {
    yarn: bool,
    web_script: Option<String>,
    entry: String,
    events: Vec<DetectionEvent>,
}

impl NodeStack {
    /// Matches on package.json plus either a npm/yarn lockfile or a
    /// Procfile web process using node tooling.
    pub fn detect(dir: &Path) -> AppResult<Option<Self>> {
        if !exists(dir, "package.json") {
            return Ok(None);
        }
        let yarn = exists(dir, "yarn.lock");
        let npm = exists(dir, "package-lock.json");
        if !yarn && !npm && !procfile_web_matches(dir, &PROCFILE_NODE) {
            return Ok(None);
        }

        let mut stack = NodeStack {
            yarn,
            web_script: None,
            entry: "index.js".to_string(),
            events: Vec::new(),
        };
        stack.init(dir);
        Ok(Some(stack))
    }

    fn init(&mut self, dir: &Path) {
        if self.yarn {
            self.events.push(DetectionEvent::new(
                DetectionEventKind::Lockfile,
                "yarn.lock",
                "yarn lockfile present",
            ));
        } else if exists(dir, "package-lock.json") {
            self.events.push(DetectionEvent::new(
                DetectionEventKind::Lockfile,
                "package-lock.json",
                "npm lockfile present",
            ));
        }

        let package: serde_json::Value = read_file(dir, "package.json")
            .and_then(|contents| serde_json::from_str(&contents).ok())
            .unwrap_or_default();

        if let Some(scripts) = package.get("scripts").and_then(|s| s.as_object()) {
            for script in WEB_SCRIPTS {
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

impl Stack for NodeStack {
    fn name(&self) -> &'static str {
        "node"
    }

    fn events(&self) -> &[DetectionEvent] {
        &self.events
    }

    fn web_command(&self) -> Option<String> {
        if let Some(script) = &self.web_script {
            return Some(if self.yarn {
                format!("yarn {}", script)
            } else {
                format!("npm run {}", script)
            });
        }
        Some(if self.entry.ends_with(".ts") {
            format!("npx tsx {}", self.entry)
        } else {
            format!("node {}", self.entry)
        })
    }

    fn plan(&self, opts: &BuildOptions) -> AppResult<BuildGraph> {
        let mut builder = GraphBuilder::new(opts);
        builder
            .from_image(&get_node_image(&opts.version))
            .add_app_user()
            .apt_install(&["git"]);

        if self.yarn {
            builder.copy_files(&["package.json", "yarn.lock"]);
            let yarn_cache = builder.cache("/usr/local/share/.cache/yarn");
            builder.run_with("yarn install", "root", &[], vec![yarn_cache]);
        } else {
            builder.copy_files(&["package.json", "package-lock.json"]);
            let npm_cache = builder.cache("/root/.npm");
            builder.run_with("npm install", "root", &[], vec![npm_cache]);
        }

        builder
            .copy_app_code()
            .on_build(&opts.on_build)
            .chown_app();

        Ok(builder.finish("", self.web_command()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn dir_with(files: &[(&str, &str)]) -> TempDir {
        let dir = TempDir::new().unwrap();
        for (name, contents) in files {
            fs::write(dir.path().join(name), contents).unwrap();
        }
        dir
    }

    #[test]
    fn first_web_script_wins() {
        let dir = dir_with(&[
            (
                "package.json",
                r#"{"scripts":{"serve":"vite","start":"node server.js"}}"#,
            ),
            ("package-lock.json", "{}"),
        ]);
        let stack = NodeStack::detect(dir.path()).unwrap().unwrap();
        assert_eq!(stack.web_command().unwrap(), "npm run start");
    }

    #[test]
    fn yarn_lockfile_switches_runner() {
        let dir = dir_with(&[
            ("package.json", r#"{"scripts":{"serve":"vite"}}"#),
            ("yarn.lock", ""),
        ]);
        let stack = NodeStack::detect(dir.path()).unwrap().unwrap();
        assert_eq!(stack.web_command().unwrap(), "yarn serve");
    }

    #[test]
    fn entry_fallback_handles_typescript() {
        let dir = dir_with(&[
            ("package.json", r#"{"main":"src/server.ts"}"#),
            ("package-lock.json", "{}"),
        ]);
        let stack = NodeStack::detect(dir.path()).unwrap().unwrap();
        assert_eq!(stack.web_command().unwrap(), "npx tsx src/server.ts");

        let dir = dir_with(&[("package.json", "{}"), ("package-lock.json", "{}")]);
        let stack = NodeStack::detect(dir.path()).unwrap().unwrap();
        assert_eq!(stack.web_command().unwrap(), "node index.js");
    }
}
