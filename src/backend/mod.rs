//! Build backend abstraction: descriptors and build commands.
//!
//! The backend turns a target into a content-addressed descriptor and the
//! commands the scheduler runs to build it. It never builds anything itself;
//! a build that cannot succeed fails when the scheduler runs its command.

pub mod hasher;

use crate::core::error::Result;
use crate::core::resolver;
use crate::core::types::{PipelineConfig, Target};
use std::path::Path;

/// Source of build descriptors and build commands.
pub trait BuildBackend {
    /// Content-addressed descriptor of a build value located in `source_dir`.
    fn descriptor(&self, source_dir: &Path, value: &serde_yaml_ng::Value) -> String;

    /// Command building the target without keeping its output.
    fn build_command(&self, target: &Target) -> Result<String>;

    /// Command building the target and linking its output at `out_link`.
    fn output_command(&self, target: &Target, out_link: &str) -> Result<String>;
}

/// Backend hashing definitions and declared sources with BLAKE3, rendering
/// commands from the pipeline's templates.
#[derive(Debug, Clone)]
pub struct TemplateBackend {
    build_command: String,
    output_command: String,
}

impl TemplateBackend {
    pub fn new(build_command: impl Into<String>, output_command: impl Into<String>) -> Self {
        Self {
            build_command: build_command.into(),
            output_command: output_command.into(),
        }
    }

    pub fn from_config(pipeline: &PipelineConfig) -> Self {
        Self::new(&pipeline.build_command, &pipeline.output_command)
    }
}

impl BuildBackend for TemplateBackend {
    fn descriptor(&self, source_dir: &Path, value: &serde_yaml_ng::Value) -> String {
        let build = value.get("build").unwrap_or(value);
        let mut components = vec![hasher::hash_string(&canonical_json(build))];

        for src in declared_sources(build) {
            let path = source_dir.join(&src);
            match hasher::hash_path(&path) {
                Ok(hash) => components.push(format!("{}={}", src, hash)),
                Err(e) => {
                    // The build itself reports the missing input.
                    tracing::warn!(source = %path.display(), error = %e, "cannot hash build input");
                    components.push(format!("{}=unavailable", src));
                }
            }
        }

        let refs: Vec<&str> = components.iter().map(String::as_str).collect();
        hasher::composite_hash(&refs)
    }

    fn build_command(&self, target: &Target) -> Result<String> {
        render(&self.build_command, target, None)
    }

    fn output_command(&self, target: &Target, out_link: &str) -> Result<String> {
        render(&self.output_command, target, Some(out_link))
    }
}

fn render(template: &str, target: &Target, out_link: Option<&str>) -> Result<String> {
    let attr = target.attr();
    let mut vars: Vec<(&str, &str)> = vec![
        ("label", target.label.as_str()),
        ("attr", attr.as_str()),
        ("key", target.key.as_str()),
        ("descriptor", target.descriptor.as_str()),
    ];
    if let Some(link) = out_link {
        vars.push(("out_link", link));
    }
    resolver::render_command(template, &vars)
}

/// Serialize a value with sorted mapping keys.
fn canonical_json(value: &serde_yaml_ng::Value) -> String {
    match serde_json::to_value(value) {
        Ok(json) => json.to_string(),
        Err(_) => format!("{:?}", value),
    }
}

/// Paths listed under `src` (a string or a list of strings).
fn declared_sources(build: &serde_yaml_ng::Value) -> Vec<String> {
    match build.get("src") {
        Some(serde_yaml_ng::Value::String(s)) => vec![s.clone()],
        Some(serde_yaml_ng::Value::Sequence(seq)) => seq
            .iter()
            .filter_map(|v| v.as_str().map(String::from))
            .collect(),
        _ => Vec::new(),
    }
}
