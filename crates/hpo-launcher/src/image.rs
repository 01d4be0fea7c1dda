//! Container image assembly.
//!
//! [`ImageBuilder`] only assembles data: a base layer, the files injected
//! into it, environment variables and the entrypoint name. [`publish`] hands
//! the result to an [`ImageToolchain`] which performs the actual build and
//! push.

use hpo_optimizer::ImageRef;
use hpo_types::{BuildError, HpoError, HpoResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::backend::ImageToolchain;

const MAX_TAG_LEN: usize = 128;

/// Environment variable through which the training toolkit finds the entrypoint.
pub const ENTRYPOINT_ENV: &str = "TRAINING_PROGRAM";

/// The image the custom code is layered onto.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseLayer {
    /// e.g. "rapidsai/base"
    pub repository: String,
    /// e.g. "23.08-cuda11.8-py3.10"
    pub version: String,
}

impl BaseLayer {
    pub fn new(repository: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            repository: repository.into(),
            version: version.into(),
        }
    }

    pub fn reference(&self) -> String {
        format!("{}:{}", self.repository, self.version)
    }

    /// Registry tag derived from the version string.
    ///
    /// Characters outside `[A-Za-z0-9_.-]` become `-`, leading `.`/`-` are
    /// dropped and the result is capped at 128 characters.
    pub fn derived_tag(&self) -> HpoResult<String> {
        let sanitized: String = self
            .version
            .trim()
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
                    c
                } else {
                    '-'
                }
            })
            .collect();
        let tag: String = sanitized
            .trim_start_matches(['.', '-'])
            .chars()
            .take(MAX_TAG_LEN)
            .collect();
        if tag.is_empty() {
            return Err(BuildError::Assembly {
                message: format!("base layer version {:?} yields an empty image tag", self.version),
            }
            .into());
        }
        Ok(tag)
    }
}

/// A file copied into the image. A destination ending in `/` is a directory
/// and keeps the source file name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InjectedFile {
    pub source: PathBuf,
    pub destination: String,
}

impl InjectedFile {
    pub fn new(source: impl Into<PathBuf>, destination: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
        }
    }

    /// File name the copied file has inside the image.
    pub fn target_name(&self) -> Option<String> {
        if self.destination.ends_with('/') {
            self.source
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
        } else {
            Path::new(&self.destination)
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
        }
    }
}

/// Assembled image description, ready for a toolchain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSpec {
    pub base_layer: BaseLayer,
    pub files: Vec<InjectedFile>,
    pub env: BTreeMap<String, String>,
    pub entrypoint: String,
    pub tag: String,
}

impl ImageSpec {
    /// Where this image lives once pushed.
    pub fn image_ref(&self, registry: Option<String>, repository: &str) -> ImageRef {
        ImageRef::new(registry, repository, self.tag.clone())
    }

    /// Build descriptor: base layer, environment, then files in order.
    pub fn render_build_file(&self) -> String {
        let mut lines = vec![format!("FROM {}", self.base_layer.reference())];
        for (key, value) in &self.env {
            lines.push(format!("ENV {key}={}", quote_env_value(value)));
        }
        lines.push(format!("ENV {ENTRYPOINT_ENV}={}", quote_env_value(&self.entrypoint)));
        for file in &self.files {
            lines.push(format!("COPY {} {}", file.source.display(), file.destination));
        }
        lines.push(String::new());
        lines.join("\n")
    }
}

fn quote_env_value(value: &str) -> String {
    if !value.is_empty() && !value.chars().any(|c| c.is_whitespace() || matches!(c, '"' | '\\' | '$')) {
        return value.to_string();
    }
    let escaped = value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('$', "\\$");
    format!("\"{escaped}\"")
}

fn is_env_key(key: &str) -> bool {
    let mut chars = key.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Assembles an [`ImageSpec`] from a base layer and injected files.
#[derive(Debug, Clone)]
pub struct ImageBuilder {
    base_layer: BaseLayer,
    files: Vec<InjectedFile>,
    env: BTreeMap<String, String>,
    entrypoint: String,
}

impl ImageBuilder {
    pub fn new(base_layer: BaseLayer, files: Vec<InjectedFile>) -> Self {
        Self {
            base_layer,
            files,
            env: BTreeMap::new(),
            entrypoint: "train.py".to_string(),
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_entrypoint(mut self, entrypoint: impl Into<String>) -> Self {
        self.entrypoint = entrypoint.into();
        self
    }

    pub fn build(self) -> HpoResult<ImageSpec> {
        let assembly = |message: String| HpoError::from(BuildError::Assembly { message });

        if self.base_layer.repository.trim().is_empty() {
            return Err(assembly("base layer repository must not be empty".into()));
        }
        if self.files.is_empty() {
            return Err(assembly("no files to inject; the entrypoint must be copied into the image".into()));
        }
        if let Some(key) = self.env.keys().find(|key| !is_env_key(key)) {
            return Err(assembly(format!("invalid environment variable name {key:?}")));
        }
        if self.env.contains_key(ENTRYPOINT_ENV) {
            return Err(assembly(format!("{ENTRYPOINT_ENV} is set from the entrypoint")));
        }
        let provides_entrypoint = self
            .files
            .iter()
            .any(|file| file.target_name().as_deref() == Some(self.entrypoint.as_str()));
        if !provides_entrypoint {
            return Err(assembly(format!(
                "entrypoint {:?} is not among the injected files",
                self.entrypoint
            )));
        }

        let tag = self.base_layer.derived_tag()?;
        Ok(ImageSpec {
            base_layer: self.base_layer,
            files: self.files,
            env: self.env,
            entrypoint: self.entrypoint,
            tag,
        })
    }
}

/// Build and push through `toolchain`, returning the pushed reference.
///
/// Toolchain failures are surfaced as [`BuildError`] with their original
/// message and are never retried.
pub async fn publish<T>(
    spec: &ImageSpec,
    toolchain: &T,
    registry: Option<String>,
    repository: &str,
) -> HpoResult<ImageRef>
where
    T: ImageToolchain + ?Sized,
{
    let image = spec.image_ref(registry, repository);
    info!(image = %image, base = %spec.base_layer.reference(), "building image");
    toolchain
        .build(spec, &image)
        .await
        .map_err(|e| as_build_error("build", e))?;
    info!(image = %image, "pushing image");
    toolchain
        .push(&image)
        .await
        .map_err(|e| as_build_error("push", e))?;
    Ok(image)
}

fn as_build_error(step: &str, error: HpoError) -> HpoError {
    match error {
        HpoError::Build(_) => error,
        other => BuildError::Toolchain {
            step: step.to_string(),
            message: other.to_string(),
        }
        .into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> BaseLayer {
        BaseLayer::new("rapidsai/base", "23.08-cuda11.8-py3.10")
    }

    fn files() -> Vec<InjectedFile> {
        vec![
            InjectedFile::new("code/train.py", "/opt/ml/code/"),
            InjectedFile::new("code/workflow.py", "/opt/ml/code/workflow.py"),
        ]
    }

    #[test]
    fn test_tag_derived_from_version() {
        assert_eq!(base().derived_tag().unwrap(), "23.08-cuda11.8-py3.10");
        assert_eq!(
            BaseLayer::new("r", "  .nightly build+2 ").derived_tag().unwrap(),
            "nightly-build-2"
        );
        assert!(BaseLayer::new("r", "++").derived_tag().is_err());
        let long = BaseLayer::new("r", "v".repeat(300));
        assert_eq!(long.derived_tag().unwrap().len(), 128);
    }

    #[test]
    fn test_build_assembles_spec() {
        let spec = ImageBuilder::new(base(), files())
            .with_env("PYTHONUNBUFFERED", "TRUE")
            .build()
            .unwrap();
        assert_eq!(spec.tag, "23.08-cuda11.8-py3.10");
        assert_eq!(spec.entrypoint, "train.py");
        assert_eq!(spec.files.len(), 2);
        assert_eq!(
            spec.image_ref(None, "cloud-ml-hpo").to_string(),
            "cloud-ml-hpo:23.08-cuda11.8-py3.10"
        );
    }

    #[test]
    fn test_build_requires_entrypoint_file() {
        let result = ImageBuilder::new(base(), files()).with_entrypoint("serve.py").build();
        assert!(matches!(result, Err(HpoError::Build(BuildError::Assembly { .. }))));

        let result = ImageBuilder::new(base(), Vec::new()).build();
        assert!(matches!(result, Err(HpoError::Build(BuildError::Assembly { .. }))));
    }

    #[test]
    fn test_build_rejects_bad_env() {
        assert!(ImageBuilder::new(base(), files()).with_env("1BAD", "x").build().is_err());
        assert!(ImageBuilder::new(base(), files())
            .with_env(ENTRYPOINT_ENV, "other.py")
            .build()
            .is_err());
    }

    #[test]
    fn test_render_build_file_order() {
        let spec = ImageBuilder::new(base(), files())
            .with_env("PYTHONUNBUFFERED", "TRUE")
            .with_env("GREETING", "hello world")
            .build()
            .unwrap();
        let rendered = spec.render_build_file();
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(
            lines,
            vec![
                "FROM rapidsai/base:23.08-cuda11.8-py3.10",
                "ENV GREETING=\"hello world\"",
                "ENV PYTHONUNBUFFERED=TRUE",
                "ENV TRAINING_PROGRAM=train.py",
                "COPY code/train.py /opt/ml/code/",
                "COPY code/workflow.py /opt/ml/code/workflow.py",
            ]
        );
    }
}
