// HPO launcher: experiment resolution, image publishing, smoke test and search orchestration

pub mod backend;
pub mod config;
pub mod confirm;
pub mod docker;
pub mod image;
pub mod launcher;
pub mod local;
pub mod orchestrator;
pub mod resolver;
pub mod retry;
pub mod workflow;

pub use backend::{
    ImageToolchain, RunHandle, RunStatus, SearchHandle, SearchStatus, TrainingBackend, TuningBackend,
};
pub use config::ExperimentFile;
pub use confirm::{is_affirmative, require_confirmation, AssumeYes, Confirmation, ConsolePrompt};
pub use docker::DockerCli;
pub use image::{publish, BaseLayer, ImageBuilder, ImageSpec, InjectedFile};
pub use launcher::JobLauncher;
pub use local::{InjectedFailure, LocalBackend, LocalBackendConfig};
pub use orchestrator::SearchOrchestrator;
pub use resolver::{ConfigResolver, RawChoices, RawRange, ResolvedExperiment};
pub use retry::RetryPolicy;
pub use workflow::{Workflow, WorkflowReport};
