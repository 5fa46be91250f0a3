//! CLI subcommands: init, validate, targets, plan, generate, completions.

use crate::backend::TemplateBackend;
use crate::core::error::{Error, Result};
use crate::core::types::{ParentTargetMap, Phase, Pipeline, Target, WorkspaceConfig, CONFIG_FILE};
use crate::core::{chunker, compiler, emit, gather, parser, state, tree};
use clap::{CommandFactory, Parser, Subcommand};
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(
    name = "monoci",
    version,
    about = "Monorepo CI pipeline compiler: target discovery, build avoidance, chunked upload"
)]
pub struct Cli {
    /// More log output (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Default log filter for the verbosity flags.
    pub fn log_filter(&self) -> &'static str {
        if self.quiet {
            return "error";
        }
        match self.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write a starter .monoci.yaml
    Init {
        /// Workspace root (default: current)
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Validate the workspace config and every definition
    Validate {
        /// Workspace root
        #[arg(short, long, default_value = ".")]
        workspace: PathBuf,
    },

    /// List discovered targets with their descriptors
    Targets {
        /// Workspace root
        #[arg(short, long, default_value = ".")]
        workspace: PathBuf,
    },

    /// Show which steps would run against a previous run's target map
    Plan {
        /// Workspace root
        #[arg(short, long, default_value = ".")]
        workspace: PathBuf,

        /// Target map of the previous run (missing: build everything)
        #[arg(long)]
        parent_map: Option<PathBuf>,

        /// Phases to include (default: from config)
        #[arg(long = "phase", value_parser = parse_phase)]
        phases: Vec<Phase>,
    },

    /// Compile the pipeline and write chunk files, manifest and target map
    Generate {
        /// Workspace root
        #[arg(short, long, default_value = ".")]
        workspace: PathBuf,

        /// Target map of the previous run (missing: build everything)
        #[arg(long)]
        parent_map: Option<PathBuf>,

        /// Phases to include (default: from config)
        #[arg(long = "phase", value_parser = parse_phase)]
        phases: Vec<Phase>,

        /// Output directory
        #[arg(short, long, default_value = "pipeline")]
        out: PathBuf,

        /// Maximum entries per chunk (default: from config)
        #[arg(long)]
        chunk_size: Option<usize>,
    },

    /// Print shell completions
    Completions {
        /// Target shell
        shell: clap_complete::Shell,
    },
}

fn parse_phase(s: &str) -> std::result::Result<Phase, String> {
    Phase::parse(s).ok_or_else(|| format!("unknown phase '{}' (expected build or release)", s))
}

/// Dispatch a CLI command.
pub fn dispatch(cmd: Commands) -> Result<()> {
    match cmd {
        Commands::Init { path } => cmd_init(&path),
        Commands::Validate { workspace } => cmd_validate(&workspace),
        Commands::Targets { workspace } => cmd_targets(&workspace),
        Commands::Plan {
            workspace,
            parent_map,
            phases,
        } => cmd_plan(&workspace, parent_map.as_deref(), &phases),
        Commands::Generate {
            workspace,
            parent_map,
            phases,
            out,
            chunk_size,
        } => cmd_generate(&workspace, parent_map.as_deref(), &phases, &out, chunk_size),
        Commands::Completions { shell } => {
            write_completions(shell, &mut std::io::stdout());
            Ok(())
        }
    }
}

fn cmd_init(path: &Path) -> Result<()> {
    let config_path = path.join(CONFIG_FILE);
    if config_path.exists() {
        return Err(Error::io(
            &config_path,
            std::io::Error::from(std::io::ErrorKind::AlreadyExists),
        ));
    }
    std::fs::create_dir_all(path).map_err(|e| Error::io(path, e))?;

    let name = serde_yaml_ng::to_string(&parser::default_config(path).name)
        .map_err(|e| Error::Serialize(e.to_string()))?;
    let template = format!(
        r#"version: "1.0"
name: {}
description: "CI pipeline generated by monoci"

params: {{}}

pipeline:
  init_step_key: init
  chunk_size: 192
  phases: [build, release]
  build_command: "depot-build --no-out-link {{{{attr}}}}"
  output_command: "depot-build --out-link {{{{out_link}}}} {{{{attr}}}}"
  upload_command: "buildkite-agent pipeline upload {{{{chunk}}}}"
  global_steps: []
"#,
        name.trim_end()
    );
    std::fs::write(&config_path, template).map_err(|e| Error::io(&config_path, e))?;

    println!("Initialized monoci workspace at {}", path.display());
    println!("  Created: {}", config_path.display());
    Ok(())
}

fn cmd_validate(workspace: &Path) -> Result<()> {
    let config = parser::load_workspace_config(workspace)?;
    let errors = parser::validate_config(&config);
    if !errors.is_empty() {
        for e in &errors {
            eprintln!("  ERROR: {}", e);
        }
        return Err(Error::ConfigInvalid(
            errors.into_iter().map(|e| e.message).collect(),
        ));
    }

    let targets = discover(workspace, &config)?;
    let pipeline = compile_pipeline(&config, &targets, &ParentTargetMap::new(), &[])?;
    println!(
        "OK: {} ({} targets, {} steps)",
        config.name,
        targets.len(),
        pipeline.all().count()
    );
    Ok(())
}

fn cmd_targets(workspace: &Path) -> Result<()> {
    let config = parser::load_and_validate(workspace)?;
    let targets = discover(workspace, &config)?;
    for target in &targets {
        println!("{}  {}", target.descriptor, target.label);
    }
    println!();
    println!("{} target(s)", targets.len());
    Ok(())
}

fn cmd_plan(workspace: &Path, parent_map: Option<&Path>, phases: &[Phase]) -> Result<()> {
    let config = parser::load_and_validate(workspace)?;
    let targets = discover(workspace, &config)?;
    let parent = load_parent_map(parent_map)?;
    let pipeline = compile_pipeline(&config, &targets, &parent, phases)?;
    print_plan(&config, &targets, &pipeline);
    Ok(())
}

/// Display a plan to stdout.
fn print_plan(config: &WorkspaceConfig, targets: &[Target], pipeline: &Pipeline) {
    println!("Planning: {} ({} targets)", config.name, targets.len());
    println!();

    let mut to_run = 0;
    let mut skipped = 0;
    for phase in Phase::ALL {
        let entries = pipeline.entries(phase);
        if entries.is_empty() {
            continue;
        }
        println!("{}:", phase);
        for entry in entries {
            match &entry.step().skip_reason {
                Some(reason) => {
                    skipped += 1;
                    println!("    {} ({})", entry.label(), reason);
                }
                None => {
                    to_run += 1;
                    println!("  + {}", entry.label());
                }
            }
        }
    }

    println!();
    println!("Plan: {} to run, {} skipped.", to_run, skipped);
}

fn cmd_generate(
    workspace: &Path,
    parent_map: Option<&Path>,
    phases: &[Phase],
    out: &Path,
    chunk_size: Option<usize>,
) -> Result<()> {
    let config = parser::load_and_validate(workspace)?;
    let chunk_size = chunk_size.unwrap_or(config.pipeline.chunk_size);
    if chunk_size == 0 {
        return Err(Error::ConfigInvalid(vec![
            "--chunk-size must be at least 1".to_string(),
        ]));
    }

    let targets = discover(workspace, &config)?;
    let parent = load_parent_map(parent_map)?;
    let pipeline = compile_pipeline(&config, &targets, &parent, phases)?;
    let chunks = chunker::chunk_pipeline(&pipeline, chunk_size);
    let manifest = emit::emit(out, &chunks, &targets, &config.pipeline.upload_command)?;

    for entry in &manifest.chunks {
        println!("{}", entry.upload);
    }
    println!();
    println!(
        "Generated: {} chunk(s), {} target(s) in {}",
        manifest.chunks.len(),
        targets.len(),
        out.display()
    );
    Ok(())
}

/// Resolve the tree and gather its buildable targets.
fn discover(workspace: &Path, config: &WorkspaceConfig) -> Result<Vec<Target>> {
    let root = tree::resolve_tree(workspace, config)?;
    let backend = TemplateBackend::from_config(&config.pipeline);
    gather::gather_targets(&root, &gather::is_buildable, &backend)
}

fn load_parent_map(path: Option<&Path>) -> Result<ParentTargetMap> {
    match path {
        Some(p) => state::load_target_map(p),
        None => Ok(ParentTargetMap::new()),
    }
}

/// Compile with the config's global steps; `phases` overrides the active set.
fn compile_pipeline(
    config: &WorkspaceConfig,
    targets: &[Target],
    parent: &ParentTargetMap,
    phases: &[Phase],
) -> Result<Pipeline> {
    let backend = TemplateBackend::from_config(&config.pipeline);
    let mut options = compiler::CompileOptions::from_config(&config.pipeline, &backend);
    if !phases.is_empty() {
        options.active_phases = phases.iter().copied().collect();
    }
    let globals = compiler::global_steps(&config.pipeline.global_steps);
    compiler::compile(targets, parent, &globals, &options)
}

/// Write shell completions for the `monoci` command.
pub fn write_completions(shell: clap_complete::Shell, out: &mut dyn Write) {
    clap_complete::generate(shell, &mut Cli::command(), "monoci", out);
}
