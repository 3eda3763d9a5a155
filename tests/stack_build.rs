//! Detection and planning over realistic source trees.

use miren::build::{BuildOptions, COPY_EPOCH};
use miren::stack::detect;
use std::fs;
use tempfile::TempDir;

fn tree(files: &[(&str, &str)]) -> TempDir {
    let dir = TempDir::new().expect("tempdir");
    for (name, contents) in files {
        let path = dir.path().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("mkdir");
        }
        fs::write(path, contents).expect("write");
    }
    dir
}

fn options() -> BuildOptions {
    BuildOptions {
        name: "demo".to_string(),
        version: String::new(),
        cache_namespace: "proj-demo".to_string(),
        alpine_image: String::new(),
        on_build: vec!["echo prebuilt".to_string()],
    }
}

#[test]
fn identical_trees_plan_identical_bytes() {
    let files: &[(&str, &str)] = &[
        ("Gemfile", "source 'https://rubygems.org'\ngem 'rails'\ngem 'puma'\ngem 'bootsnap'\n"),
        ("Gemfile.lock", "GEM\n"),
        ("Rakefile", "require 'rails/tasks'\n"),
        ("config.ru", "run Rails.application\n"),
    ];

    let marshal = |dir: &TempDir| {
        let stack = detect(dir.path()).expect("detect").expect("ruby stack");
        stack.plan(&options()).expect("plan").marshal().expect("marshal")
    };

    let first = marshal(&tree(files));
    let second = marshal(&tree(files));
    assert_eq!(first, second);
}

#[test]
fn plans_embed_the_fixed_copy_epoch() {
    let dir = tree(&[("go.mod", "module example.com/app\n\ngo 1.22\n")]);
    let stack = detect(dir.path()).expect("detect").expect("go stack");
    let graph = stack.plan(&options()).expect("plan");

    let rendered = String::from_utf8(graph.marshal().expect("marshal")).expect("utf8");
    assert!(rendered.contains(&COPY_EPOCH.to_string()));
    // caches are namespaced and shared
    assert!(rendered.contains("proj-demo-/root/.cache/go-build"));
    assert!(rendered.contains("\"sharing\":\"shared\""));
    // on-build hooks ride along
    assert!(rendered.contains("echo prebuilt"));
}

#[test]
fn detection_events_do_not_change_the_plan() {
    // two trees that differ only in advisory signals (extra cmd/ dir)
    let plain = tree(&[("go.mod", "module example.com/app\n\ngo 1.22\n")]);
    let with_cmd = tree(&[
        ("go.mod", "module example.com/app\n\ngo 1.22\n"),
        ("cmd/app/main.go", "package main\n"),
    ]);

    let plan = |dir: &TempDir| {
        let stack = detect(dir.path()).expect("detect").expect("go stack");
        (
            stack.events().len(),
            stack.plan(&options()).expect("plan").marshal().expect("marshal"),
        )
    };

    let (plain_events, plain_plan) = plan(&plain);
    let (cmd_events, cmd_plan) = plan(&with_cmd);
    assert!(cmd_events > plain_events);
    assert_eq!(plain_plan, cmd_plan);
}

#[test]
fn every_stack_produces_a_web_command_or_binary() {
    let cases: Vec<(&str, Vec<(&str, &str)>, &str)> = vec![
        (
            "ruby",
            vec![("Gemfile", "gem 'rails'\n")],
            "rails server -b 0.0.0.0 -p $PORT",
        ),
        (
            "python",
            vec![("requirements.txt", "flask==3.0\n")],
            "flask run --host=0.0.0.0 --port=$PORT",
        ),
        (
            "node",
            vec![
                ("package.json", r#"{"scripts":{"start":"node index.js"}}"#),
                ("package-lock.json", "{}"),
            ],
            "npm run start",
        ),
        (
            "bun",
            vec![("package.json", r#"{"main":"index.ts"}"#), ("bun.lock", "")],
            "bun index.ts",
        ),
        (
            "go",
            vec![("go.mod", "module m\n\ngo 1.22\n")],
            "/bin/app",
        ),
        (
            "rust",
            vec![("Cargo.toml", "[package]\nname = \"app\"\n")],
            "/bin/app",
        ),
    ];

    for (name, files, expected) in cases {
        let dir = tree(&files);
        let stack = detect(dir.path()).expect("detect").expect(name);
        assert_eq!(stack.name(), name);
        assert_eq!(stack.web_command().as_deref(), Some(expected), "{}", name);
    }
}
