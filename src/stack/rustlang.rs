use crate::build::images::{get_alpine_image, get_rust_image};
use crate::build::{BuildGraph, BuildOptions, GraphBuilder};
use crate::prelude::*;
use crate::stack::{exists, read_file, DetectionEvent, DetectionEventKind, Stack};
use std::path::Path;

pub struct RustStack {
    package_name: String,
    edition: String,
    events: Vec<DetectionEvent>,
}

impl RustStack {
    /// Matches on the presence of Cargo.toml.
    pub fn detect(dir: &Path) -> AppResult<Option<Self>> {
        if !exists(dir, "Cargo.toml") {
            return Ok(None);
        }

        let mut stack = RustStack {
            package_name: "app".to_string(),
            edition: String::new(),
            events: Vec::new(),
        };
        stack.init(dir);
        Ok(Some(stack))
    }

    fn init(&mut self, dir: &Path) {
        let Some(manifest) = read_file(dir, "Cargo.toml") else {
            return;
        };
        let Ok(parsed) = manifest.parse::<toml::Value>() else {
            return;
        };
        let package = parsed.get("package");

        if let Some(name) = package
            .and_then(|p| p.get("name"))
            .and_then(|n| n.as_str())
        {
            self.package_name = name.to_string();
            self.events.push(DetectionEvent::new(
                DetectionEventKind::Package,
                name,
                "package name from Cargo.toml",
            ));
        }
        if let Some(edition) = package
            .and_then(|p| p.get("edition"))
            .and_then(|e| e.as_str())
        {
            self.edition = edition.to_string();
            self.events.push(DetectionEvent::new(
                DetectionEventKind::Version,
                edition,
                "edition from Cargo.toml",
            ));
        }
    }
}

impl Stack for RustStack {
    fn name(&self) -> &'static str {
        "rust"
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
            .from_image(&get_rust_image(&opts.version))
            .apt_install(&["build-essential", "git", "pkg-config"])
            .copy_app_code();

        let registry_cache = builder.cache("/usr/local/cargo/registry");
        let target_cache = builder.cache("/app/target");
        builder.run_with(
            &format!(
                "cargo build --release && cp target/release/{} /bin/app",
                self.package_name
            ),
            "root",
            &[],
            vec![registry_cache, target_cache],
        );

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
    fn package_name_feeds_the_binary_copy() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("Cargo.toml"),
            "[package]\nname = \"webapp\"\nedition = \"2021\"\n",
        )
        .unwrap();

        let stack = RustStack::detect(dir.path()).unwrap().unwrap();
        assert_eq!(stack.package_name, "webapp");
        assert_eq!(stack.edition, "2021");

        let graph = stack
            .plan(&BuildOptions {
                cache_namespace: "ns".to_string(),
                ..Default::default()
            })
            .unwrap();
        let rendered = String::from_utf8(graph.marshal().unwrap()).unwrap();
        assert!(rendered.contains("target/release/webapp"));
        assert!(rendered.contains("/usr/local/cargo/registry"));
    }
}
