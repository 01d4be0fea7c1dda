//! [`ImageToolchain`] backed by the `docker` command line.

use async_trait::async_trait;
use hpo_optimizer::ImageRef;
use hpo_types::{BuildError, HpoResult};
use std::path::PathBuf;
use tokio::process::Command;
use tracing::{debug, info};

use crate::backend::ImageToolchain;
use crate::image::ImageSpec;

pub const BUILD_FILE_NAME: &str = "Dockerfile";

/// Runs `docker build` and `docker push`. The build descriptor is written
/// into `context_dir`, which must also hold the injected source files.
#[derive(Debug, Clone)]
pub struct DockerCli {
    program: String,
    context_dir: PathBuf,
}

impl DockerCli {
    pub fn new(context_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: "docker".to_string(),
            context_dir: context_dir.into(),
        }
    }

    /// Use another compatible CLI, e.g. `podman`.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn build_file_path(&self) -> PathBuf {
        self.context_dir.join(BUILD_FILE_NAME)
    }

    pub fn build_args(&self, image: &ImageRef) -> Vec<String> {
        vec![
            "build".to_string(),
            "-f".to_string(),
            self.build_file_path().display().to_string(),
            "-t".to_string(),
            image.to_string(),
            self.context_dir.display().to_string(),
        ]
    }

    pub fn push_args(&self, image: &ImageRef) -> Vec<String> {
        vec!["push".to_string(), image.to_string()]
    }

    async fn run(&self, step: &str, args: Vec<String>) -> HpoResult<()> {
        debug!(program = %self.program, ?args, "running toolchain");
        let output = Command::new(&self.program)
            .args(&args)
            .output()
            .await
            .map_err(|e| BuildError::Toolchain {
                step: step.to_string(),
                message: format!("failed to run {}: {e}", self.program),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let message = if stderr.is_empty() {
                format!("{} exited with {}", self.program, output.status)
            } else {
                stderr
            };
            return Err(BuildError::Toolchain {
                step: step.to_string(),
                message,
            }
            .into());
        }
        Ok(())
    }
}

#[async_trait]
impl ImageToolchain for DockerCli {
    async fn build(&self, spec: &ImageSpec, image: &ImageRef) -> HpoResult<()> {
        let path = self.build_file_path();
        tokio::fs::write(&path, spec.render_build_file()).await?;
        info!(path = %path.display(), image = %image, "wrote build file");
        self.run("build", self.build_args(image)).await
    }

    async fn push(&self, image: &ImageRef) -> HpoResult<()> {
        self.run("push", self.push_args(image)).await
    }
}
