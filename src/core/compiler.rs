//! Pipeline compilation: targets + parent map → phased step lists.
//!
//! Each target becomes one build step that is skipped when its descriptor
//! matches the previous run. Extra steps declared in a target's CI metadata
//! are normalized, attached to their effective parent, and split by phase.
//! The complete graph is validated before any phase is dropped.

use super::codegen;
use super::error::{Error, Result};
use super::resolver;
use super::types::*;
use crate::backend::{hasher, BuildBackend};
use indexmap::IndexMap;
use std::collections::{BTreeSet, HashMap, HashSet};

/// Skip reason of a target whose descriptor matches the previous run.
pub const UNCHANGED: &str = "Target has not changed.";

/// Skip reason of a target with `meta.ci.skip`.
pub const TARGET_DISABLED: &str = "Target was explicitly disabled in CI.";

/// Skip reason of an extra step with `skip: true`.
pub const STEP_DISABLED: &str = "Step was explicitly disabled.";

/// Inputs of a compilation that are not targets or steps.
pub struct CompileOptions<'a> {
    /// Phases kept in the output
    pub active_phases: BTreeSet<Phase>,

    /// Key of the anchor step every target step depends on
    pub init_step_key: String,

    /// Source of build commands
    pub backend: &'a dyn BuildBackend,
}

impl<'a> CompileOptions<'a> {
    /// Options for the phases and init key of a pipeline config.
    pub fn from_config(pipeline: &PipelineConfig, backend: &'a dyn BuildBackend) -> Self {
        Self {
            active_phases: pipeline.phases.iter().copied().collect(),
            init_step_key: pipeline.init_step_key.clone(),
            backend,
        }
    }
}

/// Compile targets into a pipeline.
pub fn compile(
    targets: &[Target],
    parent_map: &ParentTargetMap,
    global_steps: &[Step],
    options: &CompileOptions<'_>,
) -> Result<Pipeline> {
    let by_label: HashMap<&str, &Target> = targets.iter().map(|t| (t.label.as_str(), t)).collect();
    let mut pipeline = Pipeline::default();

    for target in targets {
        let step = target_step(target, parent_map, options)?;
        pipeline.build.push(PipelineEntry::Step(step));

        let Some(meta) = &target.meta else {
            continue;
        };
        for (name, spec) in &meta.extra_steps {
            let ctx = ExtraContext {
                owner: target,
                name,
                by_label: &by_label,
                parent_map,
                options,
            };
            let (phase, entry) = compile_extra_step(spec, &ctx)?;
            pipeline.entries_mut(phase).push(entry);
        }
    }

    for step in global_steps {
        pipeline.entries_mut(step.phase).push(PipelineEntry::Step(step.clone()));
    }

    validate_graph(&pipeline, &options.init_step_key)?;

    for phase in Phase::ALL {
        if !options.active_phases.contains(&phase) {
            pipeline.entries_mut(phase).clear();
        }
    }

    tracing::info!(
        build = pipeline.build.len(),
        release = pipeline.release.len(),
        "compiled pipeline"
    );
    Ok(pipeline)
}

/// Convert configured global steps to compiled steps.
pub fn global_steps(specs: &[GlobalStepSpec]) -> Vec<Step> {
    specs
        .iter()
        .map(|spec| Step {
            label: spec.label.clone(),
            key: codegen::global_step_key(spec),
            command: spec.command.clone(),
            depends_on: spec.depends_on.iter().cloned().collect(),
            skip_reason: None,
            phase: spec.phase,
            branches: spec.branches.clone(),
        })
        .collect()
}

/// Skip reason of a target's own step, if any.
pub fn target_skip_reason(target: &Target, parent_map: &ParentTargetMap) -> Option<String> {
    if target.explicitly_skipped() {
        return Some(TARGET_DISABLED.to_string());
    }
    parent_map
        .get(&target.label)
        .filter(|entry| entry.descriptor == target.descriptor)
        .map(|_| UNCHANGED.to_string())
}

fn target_step(
    target: &Target,
    parent_map: &ParentTargetMap,
    options: &CompileOptions<'_>,
) -> Result<Step> {
    Ok(Step {
        label: target.label.clone(),
        key: target.key.clone(),
        command: options.backend.build_command(target)?,
        depends_on: BTreeSet::from([options.init_step_key.clone()]),
        skip_reason: target_skip_reason(target, parent_map),
        phase: Phase::Build,
        branches: None,
    })
}

struct ExtraContext<'a> {
    owner: &'a Target,
    name: &'a str,
    by_label: &'a HashMap<&'a str, &'a Target>,
    parent_map: &'a ParentTargetMap,
    options: &'a CompileOptions<'a>,
}

impl ExtraContext<'_> {
    fn step_label<'s>(&'s self, spec: &'s ExtraStepSpec) -> &'s str {
        spec.label.as_deref().unwrap_or(self.name)
    }
}

/// Normalize and compile one extra step.
fn compile_extra_step(spec: &ExtraStepSpec, ctx: &ExtraContext<'_>) -> Result<(Phase, PipelineEntry)> {
    let step = ctx.step_label(spec).to_string();
    let owner_label = ctx.owner.label.clone();

    let phase = match &spec.phase {
        None => Phase::Build,
        Some(name) => Phase::parse(name).ok_or_else(|| Error::UnknownPhase {
            step: step.clone(),
            parent: owner_label.clone(),
            phase: name.clone(),
        })?,
    };

    let prompt = match &spec.prompt {
        Prompt::Flag(false) => None,
        Prompt::Flag(true) => {
            return Err(Error::InvalidPrompt {
                step,
                parent: owner_label,
            })
        }
        Prompt::Text(text) if text.trim().is_empty() => {
            return Err(Error::InvalidPrompt {
                step,
                parent: owner_label,
            })
        }
        Prompt::Text(text) => Some(text.clone()),
    };
    if prompt.is_some() && phase == Phase::Build {
        return Err(Error::PromptOutsideRelease {
            step,
            parent: owner_label,
        });
    }

    let command = match spec.command.as_deref() {
        Some(cmd) if !cmd.trim().is_empty() => cmd,
        _ => {
            return Err(Error::MissingCommand {
                step,
                parent: owner_label,
            })
        }
    };

    let parent = match &spec.parent_override {
        None => ctx.owner,
        Some(over) => {
            let label = over.resolve_label(ctx.owner);
            match ctx.by_label.get(label.as_str()) {
                Some(target) => *target,
                None => {
                    return Err(Error::UnknownParent {
                        step,
                        parent: owner_label,
                        target: label,
                    })
                }
            }
        }
    };

    let label = codegen::extra_step_label(&step, &parent.label);
    let key = hasher::step_key(&label);

    let skip_reason = if spec.always_run {
        None
    } else {
        match spec.skip {
            Some(true) => Some(STEP_DISABLED.to_string()),
            Some(false) => None,
            None => target_skip_reason(parent, ctx.parent_map),
        }
    };

    let depends_on = if spec.always_run || spec.needs_output {
        BTreeSet::new()
    } else {
        BTreeSet::from([parent.key.clone()])
    };

    let command = if spec.needs_output {
        let build = ctx
            .options
            .backend
            .output_command(parent, codegen::OUTPUT_LINK)?;
        codegen::needs_output_script(&build, command)
    } else {
        command.to_string()
    };

    let compiled = Step {
        label,
        key,
        command,
        depends_on,
        skip_reason,
        phase,
        branches: spec.branches.clone(),
    };

    let entry = match prompt {
        None => PipelineEntry::Step(compiled),
        Some(prompt) => gate(compiled, prompt),
    };
    Ok((phase, entry))
}

/// Guard a step behind a manual confirmation.
fn gate(mut step: Step, prompt: String) -> PipelineEntry {
    step.depends_on.clear();
    PipelineEntry::Gate(GateGroup {
        label: step.label.clone(),
        steps: (
            BlockStep {
                prompt,
                branches: step.branches.clone(),
            },
            step,
        ),
    })
}

/// Reject duplicate keys, unknown dependencies and cycles.
fn validate_graph(pipeline: &Pipeline, init_step_key: &str) -> Result<()> {
    let mut graph: IndexMap<String, BTreeSet<String>> = IndexMap::new();
    let mut labels: HashMap<&str, &str> = HashMap::new();

    for entry in pipeline.all() {
        let step = entry.step();
        if let Some(first) = labels.insert(&step.key, &step.label) {
            return Err(Error::DuplicateKey {
                key: step.key.clone(),
                first: first.to_string(),
                second: step.label.clone(),
            });
        }
        graph.insert(step.key.clone(), step.depends_on.clone());
    }

    let external = HashSet::from([init_step_key]);
    resolver::dependency_order(&graph, &external)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::TemplateBackend;
    use crate::core::parser::default_config;
    use crate::core::state::target_map;
    use crate::core::{gather, tree};
    use std::path::Path;

    fn backend() -> TemplateBackend {
        TemplateBackend::new("build {{attr}}", "build --out-link {{out_link}} {{attr}}")
    }

    fn options(backend: &TemplateBackend) -> CompileOptions<'_> {
        CompileOptions {
            active_phases: Phase::ALL.into_iter().collect(),
            init_step_key: "init".to_string(),
            backend,
        }
    }

    fn meta(yaml: &str) -> Option<CiMeta> {
        Some(serde_yaml_ng::from_str(yaml).unwrap())
    }

    fn target(label_path: &[&str], sub: Option<&str>, meta: Option<CiMeta>) -> Target {
        Target::new(
            label_path.iter().map(|s| s.to_string()).collect(),
            sub.map(String::from),
            format!("blake3:{}", label_path.join("-")),
            meta,
        )
    }

    fn compile_one(t: Target) -> Result<Pipeline> {
        let b = backend();
        compile(&[t], &ParentTargetMap::new(), &[], &options(&b))
    }

    fn as_step(entry: &PipelineEntry) -> &Step {
        match entry {
            PipelineEntry::Step(s) => s,
            PipelineEntry::Gate(g) => panic!("expected step, got gate {}", g.label),
        }
    }

    #[test]
    fn test_target_step_shape() {
        let p = compile_one(target(&["a", "b"], None, None)).unwrap();
        assert_eq!(p.build.len(), 1);
        let step = as_step(&p.build[0]);
        assert_eq!(step.label, "a/b");
        assert_eq!(step.key, hasher::step_key("a/b"));
        assert_eq!(step.command, "build a.b");
        assert_eq!(step.depends_on, BTreeSet::from(["init".to_string()]));
        assert!(step.skip_reason.is_none());
    }

    #[test]
    fn test_unchanged_descriptor_skips() {
        let t = target(&["a"], None, None);
        let mut map = ParentTargetMap::new();
        map.insert(
            "a".to_string(),
            TargetMapEntry {
                descriptor: t.descriptor.clone(),
                key: None,
            },
        );
        let b = backend();
        let p = compile(&[t.clone()], &map, &[], &options(&b)).unwrap();
        assert_eq!(p.build[0].step().skip_reason.as_deref(), Some(UNCHANGED));

        map["a"].descriptor = "blake3:other".to_string();
        let p = compile(&[t], &map, &[], &options(&b)).unwrap();
        assert!(p.build[0].step().skip_reason.is_none());
    }

    #[test]
    fn test_explicitly_disabled_target_takes_precedence() {
        let t = target(&["a"], None, meta("skip: true\n"));
        let mut map = ParentTargetMap::new();
        map.insert(
            "a".to_string(),
            TargetMapEntry {
                descriptor: t.descriptor.clone(),
                key: None,
            },
        );
        let b = backend();
        let p = compile(&[t], &map, &[], &options(&b)).unwrap();
        assert_eq!(p.build[0].step().skip_reason.as_deref(), Some(TARGET_DISABLED));
    }

    #[test]
    fn test_extra_step_defaults() {
        let t = target(
            &["web"],
            None,
            meta("extra_steps:\n  lint:\n    command: ./lint.sh\n    branches: [main]\n"),
        );
        let parent_key = t.key.clone();
        let p = compile_one(t).unwrap();
        assert_eq!(p.build.len(), 2);
        let step = as_step(&p.build[1]);
        assert_eq!(step.label, "lint (from web)");
        assert_eq!(step.key, hasher::step_key("lint (from web)"));
        assert_eq!(step.depends_on, BTreeSet::from([parent_key]));
        assert_eq!(step.command, "./lint.sh");
        assert_eq!(step.branches, Some(vec!["main".to_string()]));
    }

    #[test]
    fn test_extra_step_inherits_parent_skip() {
        let t = target(&["web"], None, meta("extra_steps:\n  lint: { command: x }\n"));
        let map = target_map(std::slice::from_ref(&t));
        let b = backend();
        let p = compile(&[t], &map, &[], &options(&b)).unwrap();
        assert_eq!(p.build[1].step().skip_reason.as_deref(), Some(UNCHANGED));
    }

    #[test]
    fn test_always_run_ignores_skip_and_deps() {
        let t = target(
            &["web"],
            None,
            meta("extra_steps:\n  audit: { command: x, always_run: true, skip: true }\n"),
        );
        let map = target_map(std::slice::from_ref(&t));
        let b = backend();
        let p = compile(&[t], &map, &[], &options(&b)).unwrap();
        let step = p.build[1].step();
        assert!(step.skip_reason.is_none());
        assert!(step.depends_on.is_empty());
    }

    #[test]
    fn test_explicit_skip_overrides_parent() {
        let t = target(
            &["web"],
            None,
            meta("extra_steps:\n  off: { command: x, skip: true }\n  on: { command: y, skip: false }\n"),
        );
        let map = target_map(std::slice::from_ref(&t));
        let b = backend();
        let p = compile(&[t], &map, &[], &options(&b)).unwrap();
        assert_eq!(p.build[1].step().skip_reason.as_deref(), Some(STEP_DISABLED));
        assert!(p.build[2].step().skip_reason.is_none());
    }

    #[test]
    fn test_needs_output_builds_parent_inline() {
        let t = target(
            &["web"],
            None,
            meta("extra_steps:\n  check: { command: ./check result, needs_output: true }\n"),
        );
        let p = compile_one(t).unwrap();
        let step = p.build[1].step();
        assert!(step.depends_on.is_empty());
        assert_eq!(
            step.command,
            "set -ueo pipefail\nbuild --out-link result web\n./check result\n"
        );
    }

    #[test]
    fn test_release_prompt_becomes_gate() {
        let t = target(
            &["web"],
            None,
            meta(
                "extra_steps:\n  deploy:\n    command: ./deploy\n    phase: release\n    prompt: Ship it?\n    branches: [refs/heads/canon]\n",
            ),
        );
        let p = compile_one(t).unwrap();
        assert_eq!(p.build.len(), 1);
        assert_eq!(p.release.len(), 1);
        let PipelineEntry::Gate(gate) = &p.release[0] else {
            panic!("expected gate group");
        };
        assert_eq!(gate.label, "deploy (from web)");
        assert_eq!(gate.steps.0.prompt, "Ship it?");
        assert_eq!(gate.steps.0.branches, Some(vec!["refs/heads/canon".to_string()]));
        assert!(gate.steps.1.depends_on.is_empty());
        assert_eq!(gate.steps.1.phase, Phase::Release);
    }

    #[test]
    fn test_prompt_in_build_phase_is_error() {
        let t = target(
            &["web"],
            None,
            meta("extra_steps:\n  deploy: { command: x, prompt: sure? }\n"),
        );
        let err = compile_one(t).unwrap_err();
        assert!(matches!(err, Error::PromptOutsideRelease { .. }));
        assert!(err.to_string().contains("deploy"));
        assert!(err.to_string().contains("web"));
    }

    #[test]
    fn test_prompt_true_is_error() {
        let t = target(
            &["web"],
            None,
            meta("extra_steps:\n  deploy: { command: x, phase: release, prompt: true }\n"),
        );
        assert!(matches!(compile_one(t).unwrap_err(), Error::InvalidPrompt { .. }));
    }

    #[test]
    fn test_unknown_phase_is_error() {
        let t = target(
            &["web"],
            None,
            meta("extra_steps:\n  deploy: { command: x, phase: deploy }\n"),
        );
        let err = compile_one(t).unwrap_err();
        assert!(matches!(err, Error::UnknownPhase { ref phase, .. } if phase == "deploy"));
    }

    #[test]
    fn test_missing_command_is_error() {
        let t = target(&["web"], None, meta("extra_steps:\n  empty: { command: \"\" }\n"));
        assert!(matches!(compile_one(t).unwrap_err(), Error::MissingCommand { .. }));
        let t = target(&["web"], None, meta("extra_steps:\n  none: { label: x }\n"));
        assert!(matches!(compile_one(t).unwrap_err(), Error::MissingCommand { .. }));
    }

    #[test]
    fn test_parent_override_subtarget() {
        let owner = target(
            &["svc"],
            None,
            meta("extra_steps:\n  push:\n    command: ./push\n    parent_override: { subtarget: image }\n"),
        );
        let image = target(&["svc"], Some("image"), None);
        let image_key = image.key.clone();
        let b = backend();
        let p = compile(&[owner, image], &ParentTargetMap::new(), &[], &options(&b)).unwrap();
        let push = p
            .build
            .iter()
            .find(|e| e.label().starts_with("push"))
            .unwrap();
        assert_eq!(push.label(), "push (from svc:image)");
        assert_eq!(push.step().depends_on, BTreeSet::from([image_key]));
    }

    #[test]
    fn test_parent_override_unknown_target() {
        let t = target(
            &["svc"],
            None,
            meta("extra_steps:\n  push:\n    command: x\n    parent_override: { target: nowhere }\n"),
        );
        let err = compile_one(t).unwrap_err();
        assert!(matches!(err, Error::UnknownParent { ref target, .. } if target == "nowhere"));
    }

    #[test]
    fn test_global_steps_appended_unmodified() {
        let specs = vec![GlobalStepSpec {
            label: "publish".to_string(),
            command: "./publish".to_string(),
            key: Some("publish".to_string()),
            phase: Phase::Release,
            depends_on: vec!["init".to_string()],
            branches: Some(vec!["canon".to_string()]),
        }];
        let globals = global_steps(&specs);
        let b = backend();
        let p = compile(&[target(&["a"], None, None)], &ParentTargetMap::new(), &globals, &options(&b))
            .unwrap();
        assert_eq!(p.release.len(), 1);
        assert_eq!(p.release[0].step(), &globals[0]);
    }

    #[test]
    fn test_global_step_unknown_dependency() {
        let specs = vec![GlobalStepSpec {
            label: "late".to_string(),
            command: "x".to_string(),
            key: None,
            phase: Phase::Build,
            depends_on: vec!["ghost".to_string()],
            branches: None,
        }];
        let b = backend();
        let err = compile(&[], &ParentTargetMap::new(), &global_steps(&specs), &options(&b)).unwrap_err();
        assert!(matches!(err, Error::UnknownDependency { .. }));
    }

    #[test]
    fn test_global_step_cycle() {
        let step = |key: &str, dep: &str| Step {
            label: key.to_string(),
            key: key.to_string(),
            command: "x".to_string(),
            depends_on: BTreeSet::from([dep.to_string()]),
            skip_reason: None,
            phase: Phase::Build,
            branches: None,
        };
        let b = backend();
        let err = compile(
            &[],
            &ParentTargetMap::new(),
            &[step("a", "b"), step("b", "a")],
            &options(&b),
        )
        .unwrap_err();
        assert!(matches!(err, Error::DependencyCycle(_)));
    }

    #[test]
    fn test_duplicate_key_is_error() {
        let t = target(
            &["web"],
            None,
            meta("extra_steps:\n  a: { command: x, label: same }\n  b: { command: y, label: same }\n"),
        );
        assert!(matches!(compile_one(t).unwrap_err(), Error::DuplicateKey { .. }));
    }

    #[test]
    fn test_phase_filter_applies_after_validation() {
        let t = target(
            &["web"],
            None,
            meta("extra_steps:\n  deploy: { command: x, phase: release }\n"),
        );
        let b = backend();
        let mut opts = options(&b);
        opts.active_phases = BTreeSet::from([Phase::Release]);
        let p = compile(&[t.clone()], &ParentTargetMap::new(), &[], &opts).unwrap();
        assert!(p.build.is_empty());
        assert_eq!(p.release.len(), 1);

        let bad = target(
            &["web"],
            None,
            meta("extra_steps:\n  lint: { command: x, prompt: sure? }\n"),
        );
        assert!(compile(&[bad], &ParentTargetMap::new(), &[], &opts).is_err());
    }

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn test_end_to_end_idempotent_against_own_map() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "app/default.yaml", "build: { src: [main.c] }\n");
        write(dir.path(), "app/main.c", "int main() {}\n");
        write(
            dir.path(),
            "lib/default.yaml",
            "build: {}\nmeta: { ci: { extra_steps: { test: { command: ./test } } } }\n",
        );

        let config = default_config(dir.path());
        let b = TemplateBackend::from_config(&config.pipeline);
        let run = || {
            let root = tree::resolve_tree(dir.path(), &config).unwrap();
            gather::gather_targets(&root, &gather::is_buildable, &b).unwrap()
        };

        let targets = run();
        let first = compile(&targets, &ParentTargetMap::new(), &[], &options(&b)).unwrap();
        assert!(first.all().all(|e| e.step().skip_reason.is_none()));

        let map = target_map(&targets);
        let second = compile(&run(), &map, &[], &options(&b)).unwrap();
        assert!(second
            .all()
            .all(|e| e.step().skip_reason.as_deref() == Some(UNCHANGED)));

        write(dir.path(), "app/main.c", "int main() { return 1; }\n");
        let third = compile(&run(), &map, &[], &options(&b)).unwrap();
        let app = third.all().find(|e| e.label() == "app").unwrap();
        assert!(app.step().skip_reason.is_none());
        let lib = third.all().find(|e| e.label() == "lib").unwrap();
        assert_eq!(lib.step().skip_reason.as_deref(), Some(UNCHANGED));
    }
}
