//! The workspace config file (`.gitpod.yml`).
//!
//! Only the fields needed to build and start the workspace are modelled.
//! Task definitions are passed through to the container untouched.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Image used when the config names none.
pub const DEFAULT_IMAGE: &str = "gitpod/workspace-full:latest";

/// Where the workspace image comes from.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum ImageSpec {
    /// A published image reference.
    Reference(String),
    /// A Dockerfile relative to the working directory.
    Dockerfile {
        file: String,
        #[serde(default)]
        context: Option<String>,
    },
}

/// A port the workspace exposes.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PortSpec {
    pub port: u16,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GitpodConfig {
    pub image: Option<ImageSpec>,
    pub tasks: Vec<serde_json::Value>,
    pub ports: Vec<PortSpec>,
    pub checkout_location: Option<String>,
    pub workspace_location: Option<String>,
}

impl GitpodConfig {
    /// Reads the config file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => {
                return Err(e).with_context(|| format!("cannot read {}", path.display()));
            }
        };
        Self::parse(&content).with_context(|| format!("cannot parse {}", path.display()))
    }

    pub fn parse(yaml: &str) -> Result<Self> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Directory name the sources are mounted under in `/workspace`.
    ///
    /// Defaults to the name of the working directory.
    pub fn checkout_location(&self, workdir: &Path) -> String {
        self.checkout_location
            .clone()
            .filter(|loc| !loc.is_empty())
            .unwrap_or_else(|| {
                workdir
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "workspace".to_string())
            })
    }

    /// Folder the IDE opens, inside the container.
    pub fn workspace_folder(&self, workdir: &Path) -> String {
        let location = self
            .workspace_location
            .clone()
            .filter(|loc| !loc.is_empty())
            .unwrap_or_else(|| self.checkout_location(workdir));
        format!("/workspace/{}", location.trim_start_matches('/'))
    }

    /// Tasks as the JSON the in-container supervisor expects.
    pub fn tasks_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.tasks)?)
    }

    /// Renders the Dockerfile the workspace image is built from.
    pub fn dockerfile(&self, workdir: &Path) -> Result<String> {
        let base = match &self.image {
            None => format!("FROM {DEFAULT_IMAGE}"),
            Some(ImageSpec::Reference(image)) => format!("FROM {image}"),
            Some(ImageSpec::Dockerfile { file, context }) => {
                let path = dockerfile_path(workdir, file, context.as_deref());
                std::fs::read_to_string(&path)
                    .with_context(|| format!("cannot read Dockerfile {}", path.display()))?
            }
        };
        Ok(format!(
            "{}\n\nUSER root\nRUN rm /usr/bin/gp-vncsession || true\nRUN mkdir -p /workspace && chown -R 33333:33333 /workspace\n",
            base.trim_end()
        ))
    }
}

fn dockerfile_path(workdir: &Path, file: &str, context: Option<&str>) -> PathBuf {
    match context {
        Some(context) if !context.is_empty() => workdir.join(context).join(file),
        _ => workdir.join(file),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_image_reference() {
        let config = GitpodConfig::parse("image: node:20\n").unwrap();
        assert_eq!(config.image, Some(ImageSpec::Reference("node:20".into())));
        let df = config.dockerfile(Path::new("/src/demo")).unwrap();
        assert!(df.starts_with("FROM node:20\n"));
        assert!(df.contains("USER root"));
    }

    #[test]
    fn test_default_image() {
        let df = GitpodConfig::default()
            .dockerfile(Path::new("/src/demo"))
            .unwrap();
        assert!(df.starts_with("FROM gitpod/workspace-full:latest"));
    }

    #[test]
    fn test_dockerfile_image_is_read_from_context() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join(".gitpod")).unwrap();
        std::fs::write(
            dir.path().join(".gitpod").join("Dockerfile"),
            "FROM rust:1\nRUN cargo --version\n",
        )
        .unwrap();

        let config =
            GitpodConfig::parse("image:\n  file: Dockerfile\n  context: .gitpod\n").unwrap();
        let df = config.dockerfile(dir.path()).unwrap();
        assert!(df.starts_with("FROM rust:1\nRUN cargo --version\n"));
        assert!(df.ends_with("chown -R 33333:33333 /workspace\n"));
    }

    #[test]
    fn test_missing_dockerfile_is_an_error() {
        let config = GitpodConfig::parse("image:\n  file: nope.Dockerfile\n").unwrap();
        assert!(config.dockerfile(Path::new("/nonexistent")).is_err());
    }

    #[test]
    fn test_locations_default_to_workdir_name() {
        let config = GitpodConfig::default();
        let workdir = Path::new("/home/dev/demo");
        assert_eq!(config.checkout_location(workdir), "demo");
        assert_eq!(config.workspace_folder(workdir), "/workspace/demo");
    }

    #[test]
    fn test_workspace_location_overrides_folder() {
        let config = GitpodConfig::parse(
            "checkoutLocation: app\nworkspaceLocation: app/all.code-workspace\n",
        )
        .unwrap();
        let workdir = Path::new("/home/dev/demo");
        assert_eq!(config.checkout_location(workdir), "app");
        assert_eq!(
            config.workspace_folder(workdir),
            "/workspace/app/all.code-workspace"
        );
    }

    #[test]
    fn test_tasks_and_ports() {
        let config = GitpodConfig::parse(
            "tasks:\n  - name: build\n    init: make\n  - command: npm start\nports:\n  - port: 3000\n  - port: 5432\n",
        )
        .unwrap();
        assert_eq!(config.tasks.len(), 2);
        assert_eq!(
            config.tasks_json().unwrap(),
            r#"[{"init":"make","name":"build"},{"command":"npm start"}]"#
        );
        let ports: Vec<u16> = config.ports.iter().map(|p| p.port).collect();
        assert_eq!(ports, vec![3000, 5432]);
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let config = GitpodConfig::load(&dir.path().join(".gitpod.yml")).unwrap();
        assert!(config.image.is_none());
        assert!(config.tasks.is_empty());
    }
}
