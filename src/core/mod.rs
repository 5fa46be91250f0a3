//! Core pipeline logic: tree resolution, target gathering, compilation, emission.

pub mod chunker;
pub mod codegen;
pub mod compiler;
pub mod emit;
pub mod error;
pub mod gather;
pub mod parser;
pub mod resolver;
pub mod state;
pub mod tree;
pub mod types;
