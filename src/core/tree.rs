//! Workspace tree resolution.
//!
//! Walks the workspace from its root, loading `default.yaml` and sibling
//! `*.yaml` definitions into a [`Node`] tree. Directories are visited in
//! byte-wise name order so the same tree always resolves the same way.

use super::error::{Error, Result};
use super::parser::{self, DefinitionArgs};
use super::types::{Definition, Node, SkipMarker, WorkspaceConfig};
use indexmap::IndexMap;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Default definition of a directory.
pub const DEFAULT_FILE: &str = "default.yaml";

/// Marker keeping a directory's own definition but none of its children.
pub const SKIP_SUBTREE: &str = ".skip-subtree";

/// Marker excluding a directory entirely.
pub const SKIP_TREE: &str = ".skip-tree";

const DEFINITION_EXT: &str = ".yaml";

/// Resolve the tree rooted at `root`.
pub fn resolve_tree(root: &Path, config: &WorkspaceConfig) -> Result<Node> {
    let walker = Walker {
        root,
        params: &config.params,
    };
    match walker.directory(root, Vec::new())? {
        Some(node) => {
            tracing::debug!(root = %root.display(), nodes = node.count(), "resolved tree");
            Ok(node)
        }
        None => Err(Error::RootSkipped {
            path: root.to_path_buf(),
        }),
    }
}

/// Entries of one directory that matter to resolution.
#[derive(Debug, Default)]
struct Listing {
    skip: SkipMarker,
    default: Option<PathBuf>,
    files: Vec<(String, PathBuf)>,
    dirs: Vec<(String, PathBuf)>,
}

struct Walker<'a> {
    root: &'a Path,
    params: &'a HashMap<String, serde_yaml_ng::Value>,
}

impl Walker<'_> {
    /// Resolve one directory; `None` when it is marked `.skip-tree`.
    fn directory(&self, dir: &Path, path: Vec<String>) -> Result<Option<Node>> {
        let listing = list(dir)?;
        if listing.skip == SkipMarker::Tree {
            tracing::debug!(dir = %dir.display(), "skipping tree");
            return Ok(None);
        }

        let definition = match &listing.default {
            Some(file) => Some(self.load(file, &path)?),
            None => None,
        };

        let mut children = IndexMap::new();
        if listing.skip == SkipMarker::Subtree {
            tracing::debug!(dir = %dir.display(), "skipping subtree");
        } else {
            match &definition {
                Some(Definition::Leaf(_)) => {}
                Some(Definition::Mapping(_)) => {
                    for (name, sub) in &listing.dirs {
                        if let Some(child) = self.directory(sub, child_path(&path, name))? {
                            children.insert(name.clone(), child);
                        }
                    }
                }
                None => {
                    for (name, file) in &listing.files {
                        let child = child_path(&path, name);
                        let def = self.load(file, &child)?;
                        children.insert(name.clone(), file_node(child, file, def));
                    }
                    for (name, sub) in &listing.dirs {
                        if children.contains_key(name) {
                            tracing::warn!(
                                file = %dir.join(format!("{}{}", name, DEFINITION_EXT)).display(),
                                dir = %sub.display(),
                                "definition file and directory share a name, using the file"
                            );
                            continue;
                        }
                        if let Some(child) = self.directory(sub, child_path(&path, name))? {
                            children.insert(name.clone(), child);
                        }
                    }
                    children.sort_keys();
                }
            }
        }

        let definition = definition.map(|def| overlay_children(def, &children, dir));

        Ok(Some(Node {
            path,
            location: dir.to_path_buf(),
            skip: listing.skip,
            definition,
            children,
        }))
    }

    fn load(&self, file: &Path, path: &[String]) -> Result<Definition> {
        let located_at = file
            .strip_prefix(self.root)
            .unwrap_or(file)
            .display()
            .to_string();
        let args = DefinitionArgs {
            path,
            located_at,
            params: self.params,
        };
        parser::load_definition(file, &args)
    }
}

/// Children win over attributes of the same name.
fn overlay_children(def: Definition, children: &IndexMap<String, Node>, dir: &Path) -> Definition {
    match def {
        Definition::Mapping(mut attrs) => {
            for name in children.keys() {
                if attrs.shift_remove(name).is_some() {
                    tracing::warn!(
                        dir = %dir.display(),
                        attr = %name,
                        "child node overrides attribute of the same name"
                    );
                }
            }
            Definition::Mapping(attrs)
        }
        leaf => leaf,
    }
}

fn file_node(path: Vec<String>, file: &Path, definition: Definition) -> Node {
    Node {
        path,
        location: file.to_path_buf(),
        skip: SkipMarker::None,
        definition: Some(definition),
        children: IndexMap::new(),
    }
}

fn child_path(path: &[String], name: &str) -> Vec<String> {
    let mut child = path.to_vec();
    child.push(name.to_string());
    child
}

fn list(dir: &Path) -> Result<Listing> {
    let mut entries: Vec<_> = std::fs::read_dir(dir)
        .map_err(|e| Error::io(dir, e))?
        .collect::<std::io::Result<Vec<_>>>()
        .map_err(|e| Error::io(dir, e))?;
    entries.sort_by_key(|e| e.file_name());

    let mut listing = Listing::default();
    for entry in entries {
        let entry_path = entry.path();
        let Some(name) = entry.file_name().to_str().map(String::from) else {
            tracing::warn!(path = %entry_path.display(), "ignoring non UTF-8 entry");
            continue;
        };
        let file_type = entry.file_type().map_err(|e| Error::io(&entry_path, e))?;

        match name.as_str() {
            SKIP_TREE => listing.skip = SkipMarker::Tree,
            SKIP_SUBTREE => {
                if listing.skip != SkipMarker::Tree {
                    listing.skip = SkipMarker::Subtree;
                }
            }
            _ if name.starts_with('.') => {}
            _ if file_type.is_symlink() => {
                tracing::debug!(path = %entry_path.display(), "ignoring symlink");
            }
            _ if file_type.is_dir() => listing.dirs.push((name.clone(), entry_path)),
            DEFAULT_FILE => listing.default = Some(entry_path),
            _ => {
                if let Some(stem) = name.strip_suffix(DEFINITION_EXT) {
                    if !stem.is_empty() {
                        listing.files.push((stem.to_string(), entry_path));
                    }
                }
            }
        }
    }
    Ok(listing)
}
