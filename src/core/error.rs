//! Error taxonomy for resolution, compilation, and emission.
//!
//! Every failure aborts the whole run. `Error::is_config` separates
//! configuration mistakes (fixable by editing the workspace) from I/O and
//! serialization failures so the CLI can report them with distinct exit codes.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for monoci operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while discovering targets or compiling a pipeline.
#[derive(Debug, Error)]
pub enum Error {
    /// Workspace config could not be read.
    #[error("cannot read config {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Workspace config is not valid YAML for the config schema.
    #[error("invalid config {path}: {message}")]
    ConfigParse { path: PathBuf, message: String },

    /// Workspace config parsed but failed validation.
    #[error("{} config validation error(s): {}", .0.len(), .0.join("; "))]
    ConfigInvalid(Vec<String>),

    /// The workspace root carries a `.skip-tree` marker.
    #[error("workspace root {path} is marked .skip-tree, nothing to compile")]
    RootSkipped { path: PathBuf },

    /// A definition file cannot be loaded under the argument contract.
    #[error("cannot load definition {path}: {reason}")]
    InvalidDefinition { path: PathBuf, reason: String },

    /// `meta.ci` of a target does not match the metadata schema.
    #[error("invalid CI metadata on '{label}': {message}")]
    InvalidMeta { label: String, message: String },

    /// A declared virtual target has no attribute to build.
    #[error("'{label}' declares sub-target '{name}' but has no attribute of that name")]
    MissingSubtarget { label: String, name: String },

    /// An extra step names a phase other than build or release.
    #[error("step '{step}' of '{parent}' has unknown phase '{phase}' (expected build or release)")]
    UnknownPhase {
        step: String,
        parent: String,
        phase: String,
    },

    /// A prompt was set on a step outside the release phase.
    #[error("step '{step}' of '{parent}' has a prompt but is not in the release phase")]
    PromptOutsideRelease { step: String, parent: String },

    /// `prompt: true` carries no text to show.
    #[error("step '{step}' of '{parent}': prompt must be false or a string")]
    InvalidPrompt { step: String, parent: String },

    /// An extra step has no command to run.
    #[error("step '{step}' of '{parent}' has no command")]
    MissingCommand { step: String, parent: String },

    /// `parent_override` points at a target that was not gathered.
    #[error("step '{step}' of '{parent}' overrides its parent with unknown target '{target}'")]
    UnknownParent {
        step: String,
        parent: String,
        target: String,
    },

    /// Two steps compiled to the same key.
    #[error("duplicate step key {key} ('{first}' and '{second}')")]
    DuplicateKey {
        key: String,
        first: String,
        second: String,
    },

    /// A step depends on a key that no step provides.
    #[error("step '{step}' depends on unknown key '{key}'")]
    UnknownDependency { step: String, key: String },

    /// Step dependencies form a cycle.
    #[error("dependency cycle detected involving: {}", .0.join(", "))]
    DependencyCycle(Vec<String>),

    /// A command template could not be rendered.
    #[error("template error in '{template}': {message}")]
    Template { template: String, message: String },

    /// The prior run's target map is unreadable.
    #[error("invalid target map {path}: {message}")]
    TargetMap { path: PathBuf, message: String },

    /// Filesystem failure.
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Output could not be serialized.
    #[error("serialize error: {0}")]
    Serialize(String),
}

impl Error {
    /// Wrap an I/O error with the path it concerns.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether this error is a workspace configuration mistake.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Self::ConfigRead { .. }
                | Self::ConfigParse { .. }
                | Self::ConfigInvalid(_)
                | Self::RootSkipped { .. }
                | Self::InvalidMeta { .. }
                | Self::MissingSubtarget { .. }
                | Self::UnknownPhase { .. }
                | Self::PromptOutsideRelease { .. }
                | Self::InvalidPrompt { .. }
                | Self::MissingCommand { .. }
                | Self::UnknownParent { .. }
                | Self::DuplicateKey { .. }
                | Self::UnknownDependency { .. }
                | Self::DependencyCycle(_)
                | Self::Template { .. }
        )
    }
}
