use crate::build::images::{get_alpine_image, get_go_image};
use crate::build::{BuildGraph, BuildOptions, GraphBuilder};
use crate::prelude::*;
use crate::stack::{exists, read_file, DetectionEvent, DetectionEventKind, Stack};
use lazy_static::lazy_static;
use regex::Regex;
use std::path::Path;

lazy_static! {
    static ref GO_VERSION: Regex = Regex::new(r"(?m)^go\s+(\S+)").expect("static regex");
}

pub struct GoStack {
    go_version: String,
    vendored: bool,
    events: Vec<DetectionEvent>,
}

impl GoStack {
    /// Matches on the presence of go.mod.
    pub fn detect(dir: &Path) -> AppResult<Option<Self>> {
        if !exists(dir, "go.mod") {
            return Ok(None);
        }

        let mut stack = GoStack {
            go_version: String::new(),
            vendored: false,
            events: Vec::new(),
        };
        stack.init(dir);
        Ok(Some(stack))
    }

    fn init(&mut self, dir: &Path) {
        if let Some(gomod) = read_file(dir, "go.mod") {
            if let Some(captures) = GO_VERSION.captures(&gomod) {
                self.go_version = captures[1].to_string();
                self.events.push(DetectionEvent::new(
                    DetectionEventKind::Version,
                    &self.go_version.clone(),
                    "go directive in go.mod",
                ));
            }
        }
        if dir.join("vendor").is_dir() {
            self.vendored = true;
            self.events.push(DetectionEvent::new(
                DetectionEventKind::Layout,
                "vendor",
                "vendored dependencies present",
            ));
        }
        if dir.join("cmd").is_dir() {
            self.events.push(DetectionEvent::new(
                DetectionEventKind::Layout,
                "cmd",
                "cmd directory present",
            ));
        }
    }
}

impl Stack for GoStack {
    fn name(&self) -> &'static str {
        "go"
    }

    fn events(&self) -> &[DetectionEvent] {
        &self.events
    }

    fn web_command(&self) -> Option<String> {
        Some("/bin/app".to_string())
    }

    fn plan(&self, opts: &BuildOptions) -> AppResult<BuildGraph> {
        let mut builder = GraphBuilder::new(opts);
        builder
            .from_image(&get_go_image(&opts.version))
            .apk_install(&["git", "ca-certificates"])
            .copy_app_code();

        let build_cache = builder.cache("/root/.cache/go-build");
        let module_cache = builder.cache("/go/pkg/mod");
        if self.vendored {
            builder.run_with(
                "go build -mod=vendor -o /bin/app .",
                "root",
                &[],
                vec![build_cache],
            );
        } else {
            builder.run_with(
                "go mod download && go build -o /bin/app .",
                "root",
                &[],
                vec![build_cache, module_cache],
            );
        }

        // the runtime stage carries only the binary
        let runtime_image = if opts.alpine_image.is_empty() {
            get_alpine_image("")
        } else {
            opts.alpine_image.clone()
        };
        builder
            .from_image(&runtime_image)
            .add_app_user()
            .copy_from_stage(0, "/bin/app", "/bin/app")
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

    #[test]
    fn vendored_builds_skip_module_download() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("go.mod"),
            "module example.com/app\n\ngo 1.22.4\n",
        )
        .unwrap();
        fs::create_dir(dir.path().join("vendor")).unwrap();

        let stack = GoStack::detect(dir.path()).unwrap().unwrap();
        assert_eq!(stack.go_version, "1.22.4");
        assert!(stack.vendored);
        assert_eq!(stack.web_command().unwrap(), "/bin/app");

        let graph = stack
            .plan(&BuildOptions {
                cache_namespace: "ns".to_string(),
                ..Default::default()
            })
            .unwrap();
        let rendered = String::from_utf8(graph.marshal().unwrap()).unwrap();
        assert!(rendered.contains("-mod=vendor"));
        assert!(!rendered.contains("go mod download"));
        assert!(rendered.contains("ca-certificates"));
    }
}
