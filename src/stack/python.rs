use crate::build::images::get_python_image;
use crate::build::{BuildGraph, BuildOptions, GraphBuilder};
use crate::prelude::*;
use crate::stack::{exists, read_file, DetectionEvent, DetectionEventKind, Stack};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageManager {
    Pipenv,
    Uv,
    Poetry,
    Pip,
}

impl PackageManager {
    fn as_str(&self) -> &'static str {
        match self {
            PackageManager::Pipenv => "pipenv",
            PackageManager::Uv => "uv",
            PackageManager::Poetry => "poetry",
            PackageManager::Pip => "pip",
        }
    }

    fn entrypoint(&self) -> &'static str {
        match self {
            PackageManager::Pipenv => "pipenv run",
            PackageManager::Uv => "uv run",
            PackageManager::Poetry => "poetry run",
            PackageManager::Pip => "",
        }
    }
}

pub struct PythonStack {
    manager: PackageManager,
    fastapi: bool,
    fastapi_entry: String,
    gunicorn: bool,
    uvicorn: bool,
    flask: bool,
    django: bool,
    has_manage_py: bool,
    wsgi_module: String,
    asgi_module: String,
    lockfiles: Vec<&'static str>,
    events: Vec<DetectionEvent>,
}

impl PythonStack {
    /// Matches when any Python dependency declaration exists; the package
    /// manager follows the declaration precedence.
    pub fn detect(dir: &Path) -> AppResult<Option<Self>> {
        let manager = if exists(dir, "Pipfile") {
            PackageManager::Pipenv
        } else if exists(dir, "uv.lock") {
            PackageManager::Uv
        } else if exists(dir, "pyproject.toml") {
            PackageManager::Poetry
        } else if exists(dir, "requirements.txt") {
            PackageManager::Pip
        } else {
            return Ok(None);
        };

        let mut stack = PythonStack {
            manager,
            fastapi: false,
            fastapi_entry: String::new(),
            gunicorn: false,
            uvicorn: false,
            flask: false,
            django: false,
            has_manage_py: false,
            wsgi_module: String::new(),
            asgi_module: String::new(),
            lockfiles: Vec::new(),
            events: Vec::new(),
        };
        stack.init(dir);
        Ok(Some(stack))
    }

    fn init(&mut self, dir: &Path) {
        self.events.push(DetectionEvent::new(
            DetectionEventKind::Package,
            self.manager.as_str(),
            "package manager selected by declaration precedence",
        ));

        let declaration = match self.manager {
            PackageManager::Pipenv => read_file(dir, "Pipfile"),
            PackageManager::Uv | PackageManager::Poetry => read_file(dir, "pyproject.toml"),
            PackageManager::Pip => read_file(dir, "requirements.txt"),
        }
        .unwrap_or_default()
        .to_lowercase();

        let mut framework = |flag: &mut bool, name: &str| {
            if declaration.contains(name) {
                *flag = true;
            }
        };
        framework(&mut self.fastapi, "fastapi");
        framework(&mut self.gunicorn, "gunicorn");
        framework(&mut self.uvicorn, "uvicorn");
        framework(&mut self.flask, "flask");
        framework(&mut self.django, "django");

        for (flag, name) in [
            (self.fastapi, "fastapi"),
            (self.gunicorn, "gunicorn"),
            (self.uvicorn, "uvicorn"),
            (self.flask, "flask"),
            (self.django, "django"),
        ] {
            if flag {
                self.events.push(DetectionEvent::new(
                    DetectionEventKind::Framework,
                    name,
                    "declared as a dependency",
                ));
            }
        }

        if exists(dir, "manage.py") {
            self.has_manage_py = true;
            self.django = true;
            self.events.push(DetectionEvent::new(
                DetectionEventKind::Layout,
                "manage.py",
                "django management script present",
            ));
        }

        for lockfile in ["Pipfile.lock", "poetry.lock", "uv.lock"] {
            if exists(dir, lockfile) {
                self.lockfiles.push(match lockfile {
                    "Pipfile.lock" => "Pipfile.lock",
                    "poetry.lock" => "poetry.lock",
                    _ => "uv.lock",
                });
                self.events.push(DetectionEvent::new(
                    DetectionEventKind::Lockfile,
                    lockfile,
                    "lockfile present",
                ));
            }
        }

        if self.fastapi {
            self.fastapi_entry = fastapi_entry(dir);
            self.events.push(DetectionEvent::new(
                DetectionEventKind::Entrypoint,
                &self.fastapi_entry.clone(),
                "fastapi entrypoint",
            ));
        }

        self.wsgi_module = find_module(dir, "wsgi").unwrap_or_else(|| "wsgi".to_string());
        self.asgi_module = find_module(dir, "asgi").unwrap_or_else(|| "main:app".to_string());
    }
}

/// Entry for `fastapi run`: `[tool.fastapi] entrypoint` when set, else
/// `main.py`, else `app.py`.
fn fastapi_entry(dir: &Path) -> String {
    if let Some(pyproject) = read_file(dir, "pyproject.toml") {
        if let Ok(parsed) = pyproject.parse::<toml::Value>() {
            if let Some(entry) = parsed
                .get("tool")
                .and_then(|t| t.get("fastapi"))
                .and_then(|f| f.get("entrypoint"))
                .and_then(|e| e.as_str())
            {
                return entry.to_string();
            }
        }
    }
    if exists(dir, "main.py") {
        return "main.py".to_string();
    }
    if exists(dir, "app.py") {
        return "app.py".to_string();
    }
    "main.py".to_string()
}

/// Dotted module path for `<kind>.py`: at the root it is just `<kind>`,
/// one package down it is `<package>.<kind>`. Directories are scanned in
/// name order so detection stays deterministic.
fn find_module(dir: &Path, kind: &str) -> Option<String> {
    if exists(dir, &format!("{}.py", kind)) {
        return Some(kind.to_string());
    }

    let mut packages: Vec<String> = std::fs::read_dir(dir)
        .ok()?
        .flatten()
        .filter(|entry| entry.path().is_dir())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .collect();
    packages.sort();

    packages
        .into_iter()
        .find(|package| dir.join(package).join(format!("{}.py", kind)).exists())
        .map(|package| format!("{}.{}", package, kind))
}

impl Stack for PythonStack {
    fn name(&self) -> &'static str {
        "python"
    }

    fn events(&self) -> &[DetectionEvent] {
        &self.events
    }

    fn web_command(&self) -> Option<String> {
        if self.fastapi {
            return Some(format!(
                "fastapi run {} --host 0.0.0.0 --port $PORT",
                self.fastapi_entry
            ));
        }
        if self.gunicorn && self.django {
            return Some(format!("gunicorn {} -b 0.0.0.0:$PORT", self.wsgi_module));
        }
        if self.uvicorn {
            return Some(format!(
                "uvicorn {} --host 0.0.0.0 --port $PORT",
                self.asgi_module
            ));
        }
        if self.flask {
            return Some("flask run --host=0.0.0.0 --port=$PORT".to_string());
        }
        if self.has_manage_py {
            return Some("python manage.py runserver 0.0.0.0:$PORT".to_string());
        }
        None
    }

    fn plan(&self, opts: &BuildOptions) -> AppResult<BuildGraph> {
        let mut builder = GraphBuilder::new(opts);
        builder
            .from_image(&get_python_image(&opts.version))
            .add_app_user()
            .apt_install(&["build-essential", "git"]);

        match self.manager {
            PackageManager::Pip => {
                builder.copy_files(&["requirements.txt"]);
                // per-user cache: pip installs into the app user's home
                let pip_cache = builder.cache("/home/app/.cache/pip");
                builder.run_with(
                    "pip install --user -r requirements.txt",
                    "app",
                    &[],
                    vec![pip_cache],
                );
            }
            PackageManager::Pipenv => {
                let mut declarations = vec!["Pipfile"];
                if self.lockfiles.contains(&"Pipfile.lock") {
                    declarations.push("Pipfile.lock");
                }
                builder.copy_files(&declarations);
                let pip_cache = builder.cache("/root/.cache/pip");
                builder.run_with(
                    "pip install pipenv && pipenv install --deploy --system",
                    "root",
                    &[],
                    vec![pip_cache],
                );
            }
            PackageManager::Poetry => {
                let mut declarations = vec!["pyproject.toml"];
                if self.lockfiles.contains(&"poetry.lock") {
                    declarations.push("poetry.lock");
                }
                builder.copy_files(&declarations);
                let pip_cache = builder.cache("/root/.cache/pip");
                let poetry_cache = builder.cache("/root/.cache/pypoetry");
                builder.run_with(
                    "pip install poetry && poetry install --only main --no-root",
                    "root",
                    &[],
                    vec![pip_cache, poetry_cache],
                );
            }
            PackageManager::Uv => {
                builder.copy_files(&["pyproject.toml", "uv.lock"]);
                let uv_cache = builder.cache("/root/.cache/uv");
                builder.run_with(
                    "pip install uv && uv sync --frozen",
                    "root",
                    &[],
                    vec![uv_cache],
                );
            }
        }

        builder
            .copy_app_code()
            .on_build(&opts.on_build)
            .chown_app();

        Ok(builder.finish(self.manager.entrypoint(), self.web_command()))
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
            let path = dir.path().join(name);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).unwrap();
            }
            fs::write(path, contents).unwrap();
        }
        dir
    }

    #[test]
    fn manager_precedence() {
        let dir = dir_with(&[
            ("Pipfile", ""),
            ("pyproject.toml", ""),
            ("requirements.txt", ""),
        ]);
        let stack = PythonStack::detect(dir.path()).unwrap().unwrap();
        assert_eq!(stack.manager, PackageManager::Pipenv);

        let dir = dir_with(&[("uv.lock", ""), ("pyproject.toml", "")]);
        let stack = PythonStack::detect(dir.path()).unwrap().unwrap();
        assert_eq!(stack.manager, PackageManager::Uv);

        let dir = dir_with(&[("requirements.txt", "")]);
        let stack = PythonStack::detect(dir.path()).unwrap().unwrap();
        assert_eq!(stack.manager, PackageManager::Pip);
    }

    #[test]
    fn fastapi_entry_from_pyproject_tool_table() {
        let dir = dir_with(&[(
            "pyproject.toml",
            "[project]\ndependencies = [\"fastapi>=0.100\"]\n\n[tool.fastapi]\nentrypoint = \"src/serve.py\"\n",
        )]);
        let stack = PythonStack::detect(dir.path()).unwrap().unwrap();
        assert_eq!(
            stack.web_command().unwrap(),
            "fastapi run src/serve.py --host 0.0.0.0 --port $PORT"
        );
    }

    #[test]
    fn fastapi_entry_falls_back_to_main_py() {
        let dir = dir_with(&[
            ("requirements.txt", "fastapi==0.110\n"),
            ("app.py", ""),
        ]);
        let stack = PythonStack::detect(dir.path()).unwrap().unwrap();
        assert_eq!(
            stack.web_command().unwrap(),
            "fastapi run app.py --host 0.0.0.0 --port $PORT"
        );
    }

    #[test]
    fn gunicorn_django_uses_wsgi_module() {
        let dir = dir_with(&[
            ("requirements.txt", "django==5.0\ngunicorn==21.0\n"),
            ("manage.py", ""),
            ("mysite/wsgi.py", ""),
        ]);
        let stack = PythonStack::detect(dir.path()).unwrap().unwrap();
        assert_eq!(
            stack.web_command().unwrap(),
            "gunicorn mysite.wsgi -b 0.0.0.0:$PORT"
        );
    }

    #[test]
    fn uvicorn_flask_and_django_dev_fallbacks() {
        let dir = dir_with(&[
            ("requirements.txt", "uvicorn==0.30\n"),
            ("asgi.py", ""),
        ]);
        let stack = PythonStack::detect(dir.path()).unwrap().unwrap();
        assert_eq!(
            stack.web_command().unwrap(),
            "uvicorn asgi --host 0.0.0.0 --port $PORT"
        );

        let dir = dir_with(&[("requirements.txt", "flask==3.0\n")]);
        let stack = PythonStack::detect(dir.path()).unwrap().unwrap();
        assert_eq!(
            stack.web_command().unwrap(),
            "flask run --host=0.0.0.0 --port=$PORT"
        );

        let dir = dir_with(&[("requirements.txt", ""), ("manage.py", "")]);
        let stack = PythonStack::detect(dir.path()).unwrap().unwrap();
        assert_eq!(
            stack.web_command().unwrap(),
            "python manage.py runserver 0.0.0.0:$PORT"
        );
    }

    #[test]
    fn pip_plan_installs_as_app_user() {
        let dir = dir_with(&[("requirements.txt", "flask==3.0\n")]);
        let stack = PythonStack::detect(dir.path()).unwrap().unwrap();
        let graph = stack
            .plan(&BuildOptions {
                cache_namespace: "ns".to_string(),
                ..Default::default()
            })
            .unwrap();
        let rendered = String::from_utf8(graph.marshal().unwrap()).unwrap();
        assert!(rendered.contains("pip install --user"));
        assert!(rendered.contains("/home/app/.cache/pip"));
        assert_eq!(graph.entrypoint, "");
    }
}
