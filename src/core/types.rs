//! Types for the workspace config, the resolved tree, targets, and steps.
//!
//! Config and metadata types derive Deserialize for YAML loading; step and
//! chunk types derive Serialize in the shape the CI scheduler ingests.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::path::PathBuf;

// ============================================================================
// Workspace config (.monoci.yaml)
// ============================================================================

/// File name of the workspace config, looked up at the workspace root.
pub const CONFIG_FILE: &str = ".monoci.yaml";

/// Root configuration of a workspace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    /// Schema version (must be "1.0")
    pub version: String,

    /// Human-readable workspace name
    pub name: String,

    /// Optional description
    #[serde(default)]
    pub description: Option<String>,

    /// Parameters passed to every definition as `{{params.<key>}}`
    #[serde(default)]
    pub params: HashMap<String, serde_yaml_ng::Value>,

    /// Pipeline generation settings
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

/// Pipeline generation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Key of the always-run anchor step every target step depends on
    #[serde(default = "default_init_step_key")]
    pub init_step_key: String,

    /// Maximum number of entries per uploaded chunk
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Phases emitted by default
    #[serde(default = "default_phases")]
    pub phases: Vec<Phase>,

    /// Command template building a target (`{{label}}`, `{{attr}}`, `{{descriptor}}`)
    #[serde(default = "default_build_command")]
    pub build_command: String,

    /// Command template building a target and linking its output at `{{out_link}}`
    #[serde(default = "default_output_command")]
    pub output_command: String,

    /// Command template uploading one chunk file (`{{chunk}}`)
    #[serde(default = "default_upload_command")]
    pub upload_command: String,

    /// Steps not attached to any target, appended to their phase as-is
    #[serde(default)]
    pub global_steps: Vec<GlobalStepSpec>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            init_step_key: default_init_step_key(),
            chunk_size: default_chunk_size(),
            phases: default_phases(),
            build_command: default_build_command(),
            output_command: default_output_command(),
            upload_command: default_upload_command(),
            global_steps: Vec::new(),
        }
    }
}

fn default_init_step_key() -> String {
    "init".to_string()
}

fn default_chunk_size() -> usize {
    192
}

fn default_phases() -> Vec<Phase> {
    Phase::ALL.to_vec()
}

fn default_build_command() -> String {
    "depot-build --no-out-link {{attr}}".to_string()
}

fn default_output_command() -> String {
    "depot-build --out-link {{out_link}} {{attr}}".to_string()
}

fn default_upload_command() -> String {
    "buildkite-agent pipeline upload {{chunk}}".to_string()
}

/// A caller-supplied step not attached to any target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalStepSpec {
    /// Step label shown by the scheduler
    pub label: String,

    /// Command to execute
    pub command: String,

    /// Explicit key (derived from the label when omitted)
    #[serde(default)]
    pub key: Option<String>,

    /// Phase the step belongs to
    #[serde(default)]
    pub phase: Phase,

    /// Keys this step waits for
    #[serde(default)]
    pub depends_on: Vec<String>,

    /// Refs the step is restricted to
    #[serde(default)]
    pub branches: Option<Vec<String>>,
}

// ============================================================================
// Phases and skip markers
// ============================================================================

/// When the scheduler should run a step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Build,
    Release,
}

impl Phase {
    /// All phases in emission order.
    pub const ALL: [Phase; 2] = [Phase::Build, Phase::Release];

    /// Parse a phase name.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "build" => Some(Self::Build),
            "release" => Some(Self::Release),
            _ => None,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Build => write!(f, "build"),
            Self::Release => write!(f, "release"),
        }
    }
}

/// Skip marker found in a directory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SkipMarker {
    #[default]
    None,
    /// `.skip-subtree`: keep the directory's own definition, drop its children
    Subtree,
    /// `.skip-tree`: drop the directory entirely
    Tree,
}

// ============================================================================
// Resolved tree
// ============================================================================

/// Loaded value of a definition file.
#[derive(Debug, Clone, PartialEq)]
pub enum Definition {
    /// Attribute mapping, merged with the node's children
    Mapping(IndexMap<String, serde_yaml_ng::Value>),
    /// Any other value; children are never merged under it
    Leaf(serde_yaml_ng::Value),
}

impl Definition {
    /// Look up a top-level attribute of a mapping definition.
    pub fn attr(&self, name: &str) -> Option<&serde_yaml_ng::Value> {
        match self {
            Self::Mapping(m) => m.get(name),
            Self::Leaf(_) => None,
        }
    }
}

/// One location in the workspace tree.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    /// Components from the workspace root
    pub path: Vec<String>,

    /// Directory or definition file the node was loaded from
    pub location: PathBuf,

    /// Skip marker of the directory (never `Tree` inside a resolved tree)
    pub skip: SkipMarker,

    /// Loaded definition, `None` for pure namespaces
    pub definition: Option<Definition>,

    /// Discovered children, in name order
    pub children: IndexMap<String, Node>,
}

impl Node {
    /// Whether this location carries a loaded definition.
    pub fn has_definition(&self) -> bool {
        self.definition.is_some()
    }

    /// Names of discovered children, in discovery order.
    pub fn child_keys(&self) -> impl Iterator<Item = &str> {
        self.children.keys().map(String::as_str)
    }

    /// Label of the node (path joined by `/`).
    pub fn label(&self) -> String {
        target_label(&self.path, None)
    }

    /// Directory holding the node's build inputs.
    pub fn source_dir(&self) -> PathBuf {
        if self.location.is_dir() {
            self.location.clone()
        } else {
            self.location
                .parent()
                .map(PathBuf::from)
                .unwrap_or_else(|| self.location.clone())
        }
    }

    /// Count this node and all its descendants.
    pub fn count(&self) -> usize {
        1 + self.children.values().map(Node::count).sum::<usize>()
    }
}

// ============================================================================
// CI metadata (`meta.ci` of a definition)
// ============================================================================

/// CI metadata attached to a definition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CiMeta {
    /// Auxiliary steps keyed by step name (declaration order preserved)
    #[serde(default)]
    pub extra_steps: IndexMap<String, ExtraStepSpec>,

    /// Attributes exposed as virtual sub-targets
    #[serde(default)]
    pub targets: Vec<String>,

    /// Emit the target, but never build it
    #[serde(default)]
    pub skip: bool,
}

/// Declaration of an auxiliary step owned by a target.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExtraStepSpec {
    /// Command to execute (required)
    #[serde(default)]
    pub command: Option<String>,

    /// Label (defaults to the step name)
    #[serde(default)]
    pub label: Option<String>,

    /// Build the parent inline and expose its output before running
    #[serde(default)]
    pub needs_output: bool,

    /// Run against a different view of the owning target
    #[serde(default, with = "serde_yaml_ng::with::singleton_map")]
    pub parent_override: Option<ParentOverride>,

    /// Refs the step is restricted to
    #[serde(default)]
    pub branches: Option<Vec<String>>,

    /// Run regardless of the parent's skip state and dependencies
    #[serde(default)]
    pub always_run: bool,

    /// `false` or the text of a manual confirmation
    #[serde(default)]
    pub prompt: Prompt,

    /// `build` or `release` (default build)
    #[serde(default)]
    pub phase: Option<String>,

    /// Explicit skip, overriding the parent's skip state
    #[serde(default)]
    pub skip: Option<bool>,
}

/// Manual confirmation setting of an extra step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Prompt {
    Flag(bool),
    Text(String),
}

impl Default for Prompt {
    fn default() -> Self {
        Self::Flag(false)
    }
}

/// Declarative replacement of an extra step's parent target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParentOverride {
    /// A virtual target of the same owner
    Subtarget(String),
    /// Any gathered target, by label
    Target(String),
}

impl ParentOverride {
    /// Label of the effective parent for a step owned by `owner`.
    pub fn resolve_label(&self, owner: &Target) -> String {
        match self {
            Self::Subtarget(name) => target_label(&owner.path, Some(name)),
            Self::Target(label) => label.clone(),
        }
    }
}

// ============================================================================
// Targets and target maps
// ============================================================================

/// A discovered buildable unit.
#[derive(Debug, Clone, PartialEq)]
pub struct Target {
    /// Path of the owning node
    pub path: Vec<String>,

    /// Sub-target name for virtual targets
    pub subtarget: Option<String>,

    /// `a/b` or `a/b:sub`
    pub label: String,

    /// Stable key derived from the label
    pub key: String,

    /// Content-addressed build descriptor
    pub descriptor: String,

    /// CI metadata of the target's own value
    pub meta: Option<CiMeta>,
}

impl Target {
    /// Build a target, deriving label and key from its position.
    pub fn new(
        path: Vec<String>,
        subtarget: Option<String>,
        descriptor: String,
        meta: Option<CiMeta>,
    ) -> Self {
        let label = target_label(&path, subtarget.as_deref());
        let key = crate::backend::hasher::step_key(&label);
        Self {
            path,
            subtarget,
            label,
            key,
            descriptor,
            meta,
        }
    }

    /// Whether this target was declared through `meta.ci.targets`.
    pub fn is_virtual(&self) -> bool {
        self.subtarget.is_some()
    }

    /// Dotted attribute path (`a.b.sub`) handed to the build backend.
    pub fn attr(&self) -> String {
        let mut parts: Vec<&str> = self.path.iter().map(String::as_str).collect();
        if let Some(ref sub) = self.subtarget {
            parts.push(sub);
        }
        parts.join(".")
    }

    /// Whether CI was explicitly disabled for this target.
    pub fn explicitly_skipped(&self) -> bool {
        self.meta.as_ref().is_some_and(|m| m.skip)
    }
}

/// Derive a target label from a node path and optional sub-target.
pub fn target_label(path: &[String], subtarget: Option<&str>) -> String {
    let base = path.join("/");
    match subtarget {
        Some(sub) => format!("{}:{}", base, sub),
        None => base,
    }
}

/// One entry of a run's target map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetMapEntry {
    /// Build descriptor recorded by the run
    pub descriptor: String,

    /// Step key recorded by the run
    #[serde(default)]
    pub key: Option<String>,
}

/// Label → descriptor map of a previous run.
pub type ParentTargetMap = IndexMap<String, TargetMapEntry>;

// ============================================================================
// Steps
// ============================================================================

/// A compiled unit of CI work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Step {
    pub label: String,

    pub key: String,

    pub command: String,

    #[serde(skip_serializing_if = "BTreeSet::is_empty")]
    pub depends_on: BTreeSet<String>,

    #[serde(rename = "skip", skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,

    #[serde(skip)]
    pub phase: Phase,

    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_branches"
    )]
    pub branches: Option<Vec<String>>,
}

/// Manual confirmation element of a gate group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockStep {
    #[serde(rename = "block")]
    pub prompt: String,

    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_branches"
    )]
    pub branches: Option<Vec<String>>,
}

/// A step guarded by a manual confirmation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GateGroup {
    #[serde(rename = "group")]
    pub label: String,

    /// Confirmation first, then the step it guards
    pub steps: (BlockStep, Step),
}

/// One entry of a phase's step list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum PipelineEntry {
    Step(Step),
    Gate(GateGroup),
}

impl PipelineEntry {
    /// The executable step of the entry.
    pub fn step(&self) -> &Step {
        match self {
            Self::Step(s) => s,
            Self::Gate(g) => &g.steps.1,
        }
    }

    /// Key of the executable step.
    pub fn key(&self) -> &str {
        &self.step().key
    }

    /// Label of the entry.
    pub fn label(&self) -> &str {
        match self {
            Self::Step(s) => &s.label,
            Self::Gate(g) => &g.label,
        }
    }
}

/// Compiled pipeline, partitioned by phase.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Pipeline {
    pub build: Vec<PipelineEntry>,
    pub release: Vec<PipelineEntry>,
}

impl Pipeline {
    /// Entries of one phase.
    pub fn entries(&self, phase: Phase) -> &[PipelineEntry] {
        match phase {
            Phase::Build => &self.build,
            Phase::Release => &self.release,
        }
    }

    /// Mutable entries of one phase.
    pub fn entries_mut(&mut self, phase: Phase) -> &mut Vec<PipelineEntry> {
        match phase {
            Phase::Build => &mut self.build,
            Phase::Release => &mut self.release,
        }
    }

    /// All entries, build phase first.
    pub fn all(&self) -> impl Iterator<Item = &PipelineEntry> {
        self.build.iter().chain(self.release.iter())
    }
}

/// A bounded slice of one phase's entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineChunk {
    #[serde(skip)]
    pub phase: Phase,

    /// 1-based position of the chunk within its phase
    #[serde(skip)]
    pub index: usize,

    pub steps: Vec<PipelineEntry>,
}

impl PipelineChunk {
    /// File name the chunk is written to.
    pub fn file_name(&self) -> String {
        format!("{}-chunk-{}.json", self.phase, self.index)
    }
}

fn serialize_branches<S: Serializer>(
    branches: &Option<Vec<String>>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match branches {
        Some(b) => serializer.serialize_str(&b.join(" ")),
        None => serializer.serialize_none(),
    }
}

// ============================================================================
// Template helper
// ============================================================================

/// Convert a serde_yaml_ng::Value to a string for template resolution.
pub fn yaml_value_to_string(val: &serde_yaml_ng::Value) -> String {
    match val {
        serde_yaml_ng::Value::String(s) => s.clone(),
        serde_yaml_ng::Value::Number(n) => n.to_string(),
        serde_yaml_ng::Value::Bool(b) => b.to_string(),
        serde_yaml_ng::Value::Null => String::new(),
        other => format!("{:?}", other),
    }
}

// ============================================================================
// Tests
// ============================================================================
