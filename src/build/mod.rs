//! Deterministic build graphs.
//!
//! A graph is a flat op list an external executor lowers to LLB. Identical
//! inputs must marshal to identical bytes: ops are emitted in a fixed
//! order, struct fields serialize in declaration order, and nothing in the
//! graph depends on wall-clock time.

pub mod images;

use crate::prelude::*;

/// uid/gid of the unprivileged app user baked into every image.
pub const APP_UID: u32 = 2010;
pub const APP_GID: u32 = 2011;

/// Fixed timestamp applied to copied layers, 2021-01-01T00:00:00Z, so
/// identical trees produce byte-identical layers.
pub const COPY_EPOCH: i64 = 1_609_459_200;

/// Cache sharing mode; all build caches are shared across builds.
pub const CACHE_SHARING_SHARED: &str = "shared";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BuildOptions {
    pub name: String,
    pub version: String,
    pub cache_namespace: String,
    pub alpine_image: String,
    pub on_build: Vec<String>,
}

/// A persistent cache directory mount. Never part of the output image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheMount {
    pub id: String,
    pub target: String,
    pub sharing: String,
}

/// One node of the build graph. `Run` commands execute via `sh -c` in
/// `dir` as `user`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum BuildOp {
    /// Start a new image stage.
    From { image: String },
    /// Create the app user via a busybox helper mounted read-only.
    AddAppUser {
        uid: u32,
        gid: u32,
        helper_image: String,
    },
    Run {
        command: String,
        dir: String,
        user: String,
        env: Vec<(String, String)>,
        caches: Vec<CacheMount>,
    },
    /// Copy specific files from the build context.
    CopyFiles {
        sources: Vec<String>,
        dest: String,
        epoch: i64,
    },
    /// Copy the whole application tree from the build context.
    CopyAppCode { dest: String, epoch: i64 },
    /// Copy a path out of an earlier stage (0-based `From` index).
    CopyFromStage {
        stage: usize,
        source: String,
        dest: String,
        epoch: i64,
    },
    Chown { path: String, owner: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildGraph {
    pub ops: Vec<BuildOp>,
    pub entrypoint: String,
    pub web_command: Option<String>,
}

impl BuildGraph {
    /// Stable byte encoding of the graph. Equal graphs marshal equal.
    pub fn marshal(&self) -> AppResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Assembles the op list common to every stack: base image, app user,
/// OS packages, dependency install, code copy, hooks, chown.
pub struct GraphBuilder {
    ops: Vec<BuildOp>,
    cache_namespace: String,
}

impl GraphBuilder {
    pub fn new(opts: &BuildOptions) -> Self {
        GraphBuilder {
            ops: Vec::new(),
            cache_namespace: opts.cache_namespace.clone(),
        }
    }

    pub fn from_image(&mut self, image: &str) -> &mut Self {
        self.ops.push(BuildOp::From {
            image: image.to_string(),
        });
        self
    }

    pub fn add_app_user(&mut self) -> &mut Self {
        self.ops.push(BuildOp::AddAppUser {
            uid: APP_UID,
            gid: APP_GID,
            helper_image: images::get_busybox_image(),
        });
        self
    }

    /// Cache keyed by namespace and path so distinct projects never share
    /// a directory.
    pub fn cache(&self, path: &str) -> CacheMount {
        CacheMount {
            id: format!("{}-{}", self.cache_namespace, path),
            target: path.to_string(),
            sharing: CACHE_SHARING_SHARED.to_string(),
        }
    }

    pub fn apt_install(&mut self, packages: &[&str]) -> &mut Self {
        let caches = vec![self.cache("/var/cache/apt"), self.cache("/var/lib/apt")];
        self.ops.push(BuildOp::Run {
            command: format!(
                "apt-get update && apt-get install -y --no-install-recommends {}",
                packages.join(" ")
            ),
            dir: "/".to_string(),
            user: "root".to_string(),
            env: Vec::new(),
            caches,
        });
        self
    }

    pub fn apk_install(&mut self, packages: &[&str]) -> &mut Self {
        let caches = vec![self.cache("/var/cache/apk")];
        self.ops.push(BuildOp::Run {
            command: format!("apk add {}", packages.join(" ")),
            dir: "/".to_string(),
            user: "root".to_string(),
            env: Vec::new(),
            caches,
        });
        self
    }

    pub fn run(&mut self, command: &str) -> &mut Self {
        self.run_with(command, "root", &[], Vec::new())
    }

    pub fn run_with(
        &mut self,
        command: &str,
        user: &str,
        env: &[(&str, &str)],
        caches: Vec<CacheMount>,
    ) -> &mut Self {
        self.ops.push(BuildOp::Run {
            command: command.to_string(),
            dir: "/app".to_string(),
            user: user.to_string(),
            env: env
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            caches,
        });
        self
    }

    pub fn copy_files(&mut self, sources: &[&str]) -> &mut Self {
        self.ops.push(BuildOp::CopyFiles {
            sources: sources.iter().map(|s| s.to_string()).collect(),
            dest: "/app".to_string(),
            epoch: COPY_EPOCH,
        });
        self
    }

    pub fn copy_app_code(&mut self) -> &mut Self {
        self.ops.push(BuildOp::CopyAppCode {
            dest: "/app".to_string(),
            epoch: COPY_EPOCH,
        });
        self
    }

    pub fn copy_from_stage(&mut self, stage: usize, source: &str, dest: &str) -> &mut Self {
        self.ops.push(BuildOp::CopyFromStage {
            stage,
            source: source.to_string(),
            dest: dest.to_string(),
            epoch: COPY_EPOCH,
        });
        self
    }

    /// Each hook runs as `sh -c` in /app, in the order given.
    pub fn on_build(&mut self, hooks: &[String]) -> &mut Self {
        for hook in hooks {
            self.run(hook);
        }
        self
    }

    pub fn chown_app(&mut self) -> &mut Self {
        self.ops.push(BuildOp::Chown {
            path: "/app".to_string(),
            owner: "app:app".to_string(),
        });
        self
    }

    pub fn finish(self, entrypoint: &str, web_command: Option<String>) -> BuildGraph {
        BuildGraph {
            ops: self.ops,
            entrypoint: entrypoint.to_string(),
            web_command,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn opts() -> BuildOptions {
        BuildOptions {
            name: "demo".to_string(),
            version: String::new(),
            cache_namespace: "proj-demo".to_string(),
            alpine_image: String::new(),
            on_build: vec!["echo hook".to_string()],
        }
    }

    #[test]
    fn cache_keys_combine_namespace_and_path() {
        let builder = GraphBuilder::new(&opts());
        let cache = builder.cache("/var/cache/apt");
        assert_eq!(cache.id, "proj-demo-/var/cache/apt");
        assert_eq!(cache.sharing, CACHE_SHARING_SHARED);
    }

    #[test]
    fn marshal_is_stable() {
        let build = |opts: &BuildOptions| {
            let mut builder = GraphBuilder::new(opts);
            builder
                .from_image("docker.io/library/ruby:3.3-slim")
                .add_app_user()
                .apt_install(&["build-essential"])
                .copy_app_code()
                .on_build(&opts.on_build)
                .chown_app();
            builder.finish("bundle exec", Some("puma -p $PORT".to_string()))
        };

        let opts = opts();
        let first = build(&opts).marshal().unwrap();
        let second = build(&opts).marshal().unwrap();
        assert_eq!(first, second);
    }
}
