//! Target discovery over a resolved tree.
//!
//! Depth-first in child order: an eligible node yields its own target, then
//! its children's targets, then one virtual target per name in
//! `meta.ci.targets`.

use super::error::{Error, Result};
use super::types::{target_label, CiMeta, Definition, Node, Target};
use crate::backend::BuildBackend;
use std::path::PathBuf;

/// Default eligibility: a mapping definition with a `build` attribute.
pub fn is_buildable(node: &Node) -> bool {
    node.definition
        .as_ref()
        .and_then(|def| def.attr("build"))
        .is_some()
}

/// Collect the targets of a tree in deterministic order.
///
/// The root node stands for the workspace itself and is never a target.
pub fn gather_targets(
    root: &Node,
    eligible: &dyn Fn(&Node) -> bool,
    backend: &dyn BuildBackend,
) -> Result<Vec<Target>> {
    let mut targets = Vec::new();
    for child in root.children.values() {
        visit(child, eligible, backend, &mut targets)?;
    }
    tracing::info!(count = targets.len(), "gathered targets");
    Ok(targets)
}

fn visit(
    node: &Node,
    eligible: &dyn Fn(&Node) -> bool,
    backend: &dyn BuildBackend,
    targets: &mut Vec<Target>,
) -> Result<()> {
    let mut subtargets = Vec::new();
    if eligible(node) {
        let label = node.label();
        let value = node
            .definition
            .as_ref()
            .map(definition_value)
            .unwrap_or_default();
        let meta = ci_meta(&label, &value)?;
        let descriptor = backend.descriptor(&node.source_dir(), &value);
        if let Some(m) = &meta {
            subtargets.clone_from(&m.targets);
        }

        tracing::debug!(%label, %descriptor, "target");
        targets.push(Target::new(node.path.clone(), None, descriptor, meta));
    }

    for child in node.children.values() {
        visit(child, eligible, backend, targets)?;
    }

    for name in subtargets {
        targets.push(virtual_target(node, &name, backend)?);
    }
    Ok(())
}

/// Build the virtual target `name` of `owner`.
///
/// A child node of that name takes precedence over an attribute.
fn virtual_target(owner: &Node, name: &str, backend: &dyn BuildBackend) -> Result<Target> {
    let (value, source_dir): (serde_yaml_ng::Value, PathBuf) =
        match owner.children.get(name).and_then(|c| c.definition.as_ref().map(|d| (c, d))) {
            Some((child, def)) => (definition_value(def), child.source_dir()),
            None => match owner.definition.as_ref().and_then(|d| d.attr(name)) {
                Some(attr) => (attr.clone(), owner.source_dir()),
                None => {
                    return Err(Error::MissingSubtarget {
                        label: owner.label(),
                        name: name.to_string(),
                    })
                }
            },
        };

    let label = target_label(&owner.path, Some(name));
    let meta = ci_meta(&label, &value)?;
    let descriptor = backend.descriptor(&source_dir, &value);
    tracing::debug!(%label, %descriptor, "virtual target");
    Ok(Target::new(
        owner.path.clone(),
        Some(name.to_string()),
        descriptor,
        meta,
    ))
}

/// The definition as a plain YAML value.
pub fn definition_value(def: &Definition) -> serde_yaml_ng::Value {
    match def {
        Definition::Mapping(attrs) => serde_yaml_ng::Value::Mapping(
            attrs
                .iter()
                .map(|(k, v)| (serde_yaml_ng::Value::String(k.clone()), v.clone()))
                .collect(),
        ),
        Definition::Leaf(v) => v.clone(),
    }
}

/// Parse `meta.ci` of a value, if present.
fn ci_meta(label: &str, value: &serde_yaml_ng::Value) -> Result<Option<CiMeta>> {
    let Some(ci) = value.get("meta").and_then(|m| m.get("ci")) else {
        return Ok(None);
    };
    if ci.is_null() {
        return Ok(None);
    }
    serde_yaml_ng::from_value(ci.clone())
        .map(Some)
        .map_err(|e| Error::InvalidMeta {
            label: label.to_string(),
            message: e.to_string(),
        })
}
