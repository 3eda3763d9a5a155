//! Central image-reference table. Every stack resolves its base image here
//! so version pinning lives in one place.

fn image(repository: &str, version: &str, default_version: &str, suffix: &str) -> String {
    let version = if version.is_empty() {
        default_version
    } else {
        version
    };
    format!("{}:{}{}", repository, version, suffix)
}

pub fn get_ruby_image(version: &str) -> String {
    image("docker.io/library/ruby", version, "3.3", "-slim")
}

pub fn get_python_image(version: &str) -> String {
    image("docker.io/library/python", version, "3.12", "-slim")
}

pub fn get_node_image(version: &str) -> String {
    image("docker.io/library/node", version, "22", "-slim")
}

pub fn get_bun_image(version: &str) -> String {
    image("docker.io/oven/bun", version, "1", "-slim")
}

pub fn get_go_image(version: &str) -> String {
    image("docker.io/library/golang", version, "1.23", "-alpine")
}

pub fn get_rust_image(version: &str) -> String {
    image("docker.io/library/rust", version, "1.79", "-slim")
}

pub fn get_alpine_image(version: &str) -> String {
    image("docker.io/library/alpine", version, "3.20", "")
}

/// Helper image mounted read-only to create the app user on distroless-ish
/// bases.
pub fn get_busybox_image() -> String {
    "docker.io/library/busybox:1.36".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn versions_default_when_empty() {
        assert_eq!(get_ruby_image(""), "docker.io/library/ruby:3.3-slim");
        assert_eq!(get_ruby_image("3.2"), "docker.io/library/ruby:3.2-slim");
        assert_eq!(get_go_image("1.22"), "docker.io/library/golang:1.22-alpine");
        assert_eq!(get_alpine_image(""), "docker.io/library/alpine:3.20");
    }
}
