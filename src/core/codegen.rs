//! Command and identity generation for compiled steps.
//!
//! Produces:
//! - the inline script of a `needs_output` step (parent build, then the step)
//! - labels and keys of extra and global steps
//! - chunk upload commands

use super::error::Result;
use super::resolver;
use super::types::GlobalStepSpec;
use crate::backend::hasher;

/// Variables available to `build_command`.
pub const BUILD_VARS: &[&str] = &["label", "attr", "key", "descriptor"];

/// Variables available to `output_command`.
pub const OUTPUT_VARS: &[&str] = &["label", "attr", "key", "descriptor", "out_link"];

/// Variables available to `upload_command`.
pub const UPLOAD_VARS: &[&str] = &["chunk"];

/// Conventional local path where a parent's output is surfaced.
pub const OUTPUT_LINK: &str = "result";

/// Script of a step that needs its parent's output: build the parent in
/// place first, then run the step, failing if either fails.
pub fn needs_output_script(parent_output_command: &str, command: &str) -> String {
    format!(
        "set -ueo pipefail\n{}\n{}\n",
        parent_output_command.trim_end(),
        command.trim_end()
    )
}

/// Label of an extra step, naming the target it was compiled from.
pub fn extra_step_label(label: &str, parent_label: &str) -> String {
    format!("{} (from {})", label, parent_label)
}

/// Key of a global step: explicit, or derived from its label.
pub fn global_step_key(spec: &GlobalStepSpec) -> String {
    spec.key
        .clone()
        .unwrap_or_else(|| hasher::step_key(&spec.label))
}

/// Command uploading one chunk file.
pub fn upload_command(template: &str, chunk_file: &str) -> Result<String> {
    resolver::render_command(template, &[("chunk", chunk_file)])
}
