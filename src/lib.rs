//! monoci: monorepo target discovery and CI pipeline compilation.
//!
//! Resolves a workspace tree of YAML definitions, gathers buildable targets,
//! compiles them into build and release steps that skip unchanged targets,
//! and emits the result as bounded chunks for a CI scheduler.

pub mod backend;
pub mod cli;
pub mod core;
