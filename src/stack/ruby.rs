use crate::build::{BuildGraph, BuildOptions, GraphBuilder};
use crate::build::images::get_ruby_image;
use crate::prelude::*;
use crate::stack::{exists, read_file, DetectionEvent, DetectionEventKind, Stack};
use regex::Regex;
use std::path::Path;

pub struct RubyStack {
    rails: bool,
    puma: bool,
    puma_config: bool,
    unicorn: bool,
    rackup: bool,
    bootsnap: bool,
    assets_precompile: bool,
    has_lockfile: bool,
    events: Vec<DetectionEvent>,
}

fn gemfile_has(gemfile: &str, name: &str) -> bool {
    Regex::new(&format!(r#"(?m)^\s*gem\s+['"]{}['"]"#, regex::escape(name)))
        .map(|re| re.is_match(gemfile))
        .unwrap_or(false)
}

impl RubyStack {
    /// Matches on the presence of a Gemfile.
    pub fn detect(dir: &Path) -> AppResult<Option<Self>> {
        if !exists(dir, "Gemfile") {
            return Ok(None);
        }
        let gemfile = read_file(dir, "Gemfile").unwrap_or_default();

        let mut stack = RubyStack {
            rails: false,
            puma: false,
            puma_config: false,
            unicorn: false,
            rackup: false,
            bootsnap: false,
            assets_precompile: false,
            has_lockfile: false,
            events: Vec::new(),
        };
        stack.init(dir, &gemfile);
        Ok(Some(stack))
    }

    fn init(&mut self, dir: &Path, gemfile: &str) {
        if gemfile_has(gemfile, "rails") {
            self.rails = true;
            self.events.push(DetectionEvent::new(
                DetectionEventKind::Framework,
                "rails",
                "Gemfile declares rails",
            ));
        }
        if gemfile_has(gemfile, "puma") {
            self.puma = true;
            self.events.push(DetectionEvent::new(
                DetectionEventKind::Framework,
                "puma",
                "Gemfile declares puma",
            ));
        }
        if exists(dir, "config/puma.rb") {
            self.puma_config = true;
            self.events.push(DetectionEvent::new(
                DetectionEventKind::Layout,
                "config/puma.rb",
                "puma configuration present",
            ));
        }
        if gemfile_has(gemfile, "unicorn") {
            self.unicorn = true;
            self.events.push(DetectionEvent::new(
                DetectionEventKind::Framework,
                "unicorn",
                "Gemfile declares unicorn",
            ));
        }
        if exists(dir, "config.ru") {
            self.rackup = true;
            self.events.push(DetectionEvent::new(
                DetectionEventKind::Layout,
                "config.ru",
                "rack entrypoint present",
            ));
        }
        if gemfile_has(gemfile, "bootsnap") {
            self.bootsnap = true;
            self.events.push(DetectionEvent::new(
                DetectionEventKind::Framework,
                "bootsnap",
                "Gemfile declares bootsnap",
            ));
        }
        if self.rails && exists(dir, "Rakefile") {
            self.assets_precompile = true;
            self.events.push(DetectionEvent::new(
                DetectionEventKind::Layout,
                "Rakefile",
                "rails app with a Rakefile, will precompile assets",
            ));
        }
        if exists(dir, "Gemfile.lock") {
            self.has_lockfile = true;
            self.events.push(DetectionEvent::new(
                DetectionEventKind::Lockfile,
                "Gemfile.lock",
                "lockfile present",
            ));
        }
    }
}

impl Stack for RubyStack {
    fn name(&self) -> &'static str {
        "ruby"
    }

    fn events(&self) -> &[DetectionEvent] {
        &self.events
    }

    fn web_command(&self) -> Option<String> {
        if self.rails {
            return Some("rails server -b 0.0.0.0 -p $PORT".to_string());
        }
        if self.puma && self.puma_config {
            return Some("puma -C config/puma.rb".to_string());
        }
        if self.puma {
            return Some("puma -b tcp://0.0.0.0 -p $PORT".to_string());
        }
        if self.unicorn {
            return Some("unicorn -p $PORT".to_string());
        }
        if self.rackup {
            return Some("rackup -o 0.0.0.0 -p $PORT".to_string());
        }
        None
    }

    fn plan(&self, opts: &BuildOptions) -> AppResult<BuildGraph> {
        let mut builder = GraphBuilder::new(opts);
        builder
            .from_image(&get_ruby_image(&opts.version))
            .add_app_user()
            .apt_install(&["build-essential", "git", "pkg-config", "libyaml-dev"]);

        if self.has_lockfile {
            builder.copy_files(&["Gemfile", "Gemfile.lock"]);
        } else {
            builder.copy_files(&["Gemfile"]);
        }
        let bundle_cache = builder.cache("/usr/local/bundle/cache");
        builder.run_with(
            "bundle install",
            "root",
            &[("BUNDLE_WITHOUT", "development")],
            vec![bundle_cache],
        );

        builder
            .copy_app_code()
            .on_build(&opts.on_build)
            .chown_app();

        if self.bootsnap {
            builder.run_with(
                "bundle exec bootsnap precompile --gemfile app/ lib/",
                "app",
                &[],
                Vec::new(),
            );
        }
        if self.assets_precompile {
            builder.run_with("bundle exec rake assets:precompile", "app", &[], Vec::new());
        }

        Ok(builder.finish("bundle exec", self.web_command()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn stack_for(files: &[(&str, &str)]) -> RubyStack {
        let dir = TempDir::new().unwrap();
        for (name, contents) in files {
            let path = dir.path().join(name);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).unwrap();
            }
            fs::write(path, contents).unwrap();
        }
        RubyStack::detect(dir.path()).unwrap().unwrap()
    }

    #[test]
    fn rails_wins_over_puma() {
        let stack = stack_for(&[(
            "Gemfile",
            "gem 'rails'\ngem 'puma'\n",
        )]);
        assert_eq!(
            stack.web_command().unwrap(),
            "rails server -b 0.0.0.0 -p $PORT"
        );
    }

    #[test]
    fn puma_prefers_its_config_file() {
        let stack = stack_for(&[("Gemfile", "gem 'puma'\n"), ("config/puma.rb", "")]);
        assert_eq!(stack.web_command().unwrap(), "puma -C config/puma.rb");

        let bare = stack_for(&[("Gemfile", "gem 'puma'\n")]);
        assert_eq!(
            bare.web_command().unwrap(),
            "puma -b tcp://0.0.0.0 -p $PORT"
        );
    }

    #[test]
    fn unicorn_then_rackup_fallback() {
        let unicorn = stack_for(&[("Gemfile", "gem 'unicorn'\n")]);
        assert_eq!(unicorn.web_command().unwrap(), "unicorn -p $PORT");

        let rack = stack_for(&[("Gemfile", ""), ("config.ru", "run App\n")]);
        assert_eq!(rack.web_command().unwrap(), "rackup -o 0.0.0.0 -p $PORT");

        let nothing = stack_for(&[("Gemfile", "")]);
        assert!(nothing.web_command().is_none());
    }

    #[test]
    fn bundle_install_without_development() {
        let stack = stack_for(&[("Gemfile", "gem 'rails'\n"), ("Gemfile.lock", "")]);
        let graph = stack
            .plan(&BuildOptions {
                cache_namespace: "ns".to_string(),
                ..Default::default()
            })
            .unwrap();
        let rendered = String::from_utf8(graph.marshal().unwrap()).unwrap();
        assert!(rendered.contains("bundle install"));
        assert!(rendered.contains("BUNDLE_WITHOUT"));
        assert!(rendered.contains("Gemfile.lock"));
        assert_eq!(graph.entrypoint, "bundle exec");
    }
}
