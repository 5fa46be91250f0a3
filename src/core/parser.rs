//! Workspace config parsing/validation and definition file loading.
//!
//! The config (`.monoci.yaml`) is validated for structural constraints:
//! - Version must be "1.0"
//! - Chunk size must be positive, phases non-empty and unique
//! - Command templates may only use the variables their renderer provides
//! - Global steps need a label and a command, and unique keys
//!
//! Definition files are YAML documents "invoked" with the standard argument
//! set: every string may reference `{{name}}`, `{{path}}`, `{{attr}}`,
//! `{{located_at}}`, and `{{params.<key>}}`.

use super::codegen;
use super::error::{Error, Result};
use super::resolver;
use super::types::*;
use std::collections::{HashMap, HashSet};
use std::path::Path;

/// Validation error.
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Load the workspace config from its root, falling back to defaults when the
/// workspace has no config file.
pub fn load_workspace_config(workspace: &Path) -> Result<WorkspaceConfig> {
    let path = workspace.join(CONFIG_FILE);
    if !path.exists() {
        tracing::info!(path = %path.display(), "no workspace config, using defaults");
        return Ok(default_config(workspace));
    }
    parse_config_file(&path)
}

/// Default config for a workspace without `.monoci.yaml`.
pub fn default_config(workspace: &Path) -> WorkspaceConfig {
    let name = workspace
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "workspace".to_string());
    WorkspaceConfig {
        version: "1.0".to_string(),
        name,
        description: None,
        params: HashMap::new(),
        pipeline: PipelineConfig::default(),
    }
}

/// Parse a workspace config file from disk.
pub fn parse_config_file(path: &Path) -> Result<WorkspaceConfig> {
    let content = std::fs::read_to_string(path).map_err(|source| Error::ConfigRead {
        path: path.to_path_buf(),
        source,
    })?;
    parse_config(&content).map_err(|message| Error::ConfigParse {
        path: path.to_path_buf(),
        message,
    })
}

/// Parse a workspace config from a string.
pub fn parse_config(yaml: &str) -> std::result::Result<WorkspaceConfig, String> {
    serde_yaml_ng::from_str(yaml).map_err(|e| format!("YAML parse error: {}", e))
}

/// Validate a parsed config. Returns a list of errors (empty = valid).
pub fn validate_config(config: &WorkspaceConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let pipeline = &config.pipeline;

    if config.version != "1.0" {
        errors.push(ValidationError {
            message: format!("version must be \"1.0\", got \"{}\"", config.version),
        });
    }

    if config.name.is_empty() {
        errors.push(ValidationError {
            message: "name must not be empty".to_string(),
        });
    }

    if pipeline.chunk_size == 0 {
        errors.push(ValidationError {
            message: "pipeline.chunk_size must be at least 1".to_string(),
        });
    }

    if pipeline.init_step_key.is_empty() {
        errors.push(ValidationError {
            message: "pipeline.init_step_key must not be empty".to_string(),
        });
    }

    if pipeline.phases.is_empty() {
        errors.push(ValidationError {
            message: "pipeline.phases must name at least one phase".to_string(),
        });
    }
    let mut seen_phases = HashSet::new();
    for phase in &pipeline.phases {
        if !seen_phases.insert(phase) {
            errors.push(ValidationError {
                message: format!("pipeline.phases lists '{}' twice", phase),
            });
        }
    }

    let templates = [
        ("build_command", &pipeline.build_command, codegen::BUILD_VARS),
        ("output_command", &pipeline.output_command, codegen::OUTPUT_VARS),
        ("upload_command", &pipeline.upload_command, codegen::UPLOAD_VARS),
    ];
    for (field, template, allowed) in templates {
        let sample: Vec<(&str, &str)> = allowed.iter().map(|v| (*v, "x")).collect();
        if let Err(e) = resolver::render_command(template, &sample) {
            errors.push(ValidationError {
                message: format!("pipeline.{}: {}", field, e),
            });
        }
    }

    let mut seen_keys: HashMap<String, &str> = HashMap::new();
    for step in &pipeline.global_steps {
        if step.label.is_empty() {
            errors.push(ValidationError {
                message: "global step has an empty label".to_string(),
            });
        }
        if step.command.trim().is_empty() {
            errors.push(ValidationError {
                message: format!("global step '{}' has no command", step.label),
            });
        }
        let key = codegen::global_step_key(step);
        if key == pipeline.init_step_key {
            errors.push(ValidationError {
                message: format!(
                    "global step '{}' reuses the init step key '{}'",
                    step.label, key
                ),
            });
        }
        if let Some(first) = seen_keys.insert(key.clone(), &step.label) {
            errors.push(ValidationError {
                message: format!(
                    "global steps '{}' and '{}' share key '{}'",
                    first, step.label, key
                ),
            });
        }
    }

    errors
}

/// Parse and validate the workspace config, folding validation errors into one.
pub fn load_and_validate(workspace: &Path) -> Result<WorkspaceConfig> {
    let config = load_workspace_config(workspace)?;
    let errors = validate_config(&config);
    if errors.is_empty() {
        return Ok(config);
    }
    Err(Error::ConfigInvalid(
        errors.into_iter().map(|e| e.message).collect(),
    ))
}

/// Arguments every definition file is invoked with.
#[derive(Debug, Clone)]
pub struct DefinitionArgs<'a> {
    /// Node path from the workspace root
    pub path: &'a [String],
    /// Definition file relative to the workspace root
    pub located_at: String,
    /// Workspace parameters
    pub params: &'a HashMap<String, serde_yaml_ng::Value>,
}

impl DefinitionArgs<'_> {
    /// Look up one argument by name.
    pub fn lookup(&self, key: &str) -> Option<String> {
        if let Some(param) = key.strip_prefix("params.") {
            return self.params.get(param).map(yaml_value_to_string);
        }
        match key {
            "name" => Some(self.path.last().cloned().unwrap_or_default()),
            "path" => Some(self.path.join("/")),
            "attr" => Some(self.path.join(".")),
            "located_at" => Some(self.located_at.clone()),
            _ => None,
        }
    }
}

/// Load a definition file, invoking it with the standard arguments.
pub fn load_definition(file: &Path, args: &DefinitionArgs<'_>) -> Result<Definition> {
    let invalid = |reason: String| Error::InvalidDefinition {
        path: file.to_path_buf(),
        reason,
    };

    let content = std::fs::read_to_string(file).map_err(|e| Error::io(file, e))?;
    let raw: serde_yaml_ng::Value =
        serde_yaml_ng::from_str(&content).map_err(|e| invalid(format!("YAML parse error: {}", e)))?;
    if raw.is_null() {
        return Err(invalid("definition is empty".to_string()));
    }

    let lookup = |key: &str| args.lookup(key);
    let value = resolver::resolve_value(&raw, &lookup).map_err(invalid)?;

    match value {
        serde_yaml_ng::Value::Mapping(map) => {
            let mut attrs = indexmap::IndexMap::with_capacity(map.len());
            for (k, v) in map {
                let serde_yaml_ng::Value::String(name) = k else {
                    return Err(invalid(format!(
                        "top-level keys must be strings, found {}",
                        yaml_value_to_string(&k)
                    )));
                };
                attrs.insert(name, v);
            }
            Ok(Definition::Mapping(attrs))
        }
        other => Ok(Definition::Leaf(other)),
    }
}
