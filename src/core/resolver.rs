//! Template resolution and step dependency ordering.
//!
//! Resolves `{{name}}` placeholders against a caller-supplied lookup; used both
//! for the argument contract of definition files and for command templates.
//! Orders step keys topologically using Kahn's algorithm with deterministic
//! (alphabetical) tie-breaking.

use super::error::{Error, Result};
use indexmap::IndexMap;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

/// Resolve all template variables in a string.
///
/// `lookup` returns `None` for variables it does not know.
pub fn resolve_template<F>(template: &str, lookup: F) -> std::result::Result<String, String>
where
    F: Fn(&str) -> Option<String>,
{
    let mut result = template.to_string();
    let mut start = 0;

    while let Some(open) = result[start..].find("{{") {
        let open = start + open;
        let close = result[open..]
            .find("}}")
            .ok_or_else(|| format!("unclosed template at position {}", open))?;
        let close = open + close + 2;
        let key = result[open + 2..close - 2].trim();

        let value = lookup(key).ok_or_else(|| format!("unknown template variable: {}", key))?;

        result.replace_range(open..close, &value);
        start = open + value.len();
    }

    Ok(result)
}

/// Resolve templates in every string of a YAML value, keys included.
pub fn resolve_value<F>(
    value: &serde_yaml_ng::Value,
    lookup: &F,
) -> std::result::Result<serde_yaml_ng::Value, String>
where
    F: Fn(&str) -> Option<String>,
{
    use serde_yaml_ng::Value;
    Ok(match value {
        Value::String(s) => Value::String(resolve_template(s, lookup)?),
        Value::Sequence(seq) => Value::Sequence(
            seq.iter()
                .map(|v| resolve_value(v, lookup))
                .collect::<std::result::Result<_, _>>()?,
        ),
        Value::Mapping(map) => {
            let mut out = serde_yaml_ng::Mapping::new();
            for (k, v) in map {
                out.insert(resolve_value(k, lookup)?, resolve_value(v, lookup)?);
            }
            Value::Mapping(out)
        }
        Value::Tagged(tagged) => Value::Tagged(Box::new(serde_yaml_ng::value::TaggedValue {
            tag: tagged.tag.clone(),
            value: resolve_value(&tagged.value, lookup)?,
        })),
        other => other.clone(),
    })
}

/// Render a command template from a fixed variable table.
pub fn render_command(template: &str, vars: &[(&str, &str)]) -> Result<String> {
    resolve_template(template, |key| {
        vars.iter()
            .find(|(name, _)| *name == key)
            .map(|(_, v)| v.to_string())
    })
    .map_err(|message| Error::Template {
        template: template.to_string(),
        message,
    })
}

/// Order step keys so that every key comes after the keys it depends on.
///
/// `graph` maps each key to its dependencies. Dependencies listed in
/// `external` are satisfied outside the graph; any other unknown dependency
/// is an error.
pub fn dependency_order(
    graph: &IndexMap<String, BTreeSet<String>>,
    external: &HashSet<&str>,
) -> Result<Vec<String>> {
    let mut in_degree: HashMap<&str, usize> = HashMap::new();
    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();

    for key in graph.keys() {
        in_degree.insert(key, 0);
        adjacency.insert(key, Vec::new());
    }

    for (key, deps) in graph {
        for dep in deps {
            if external.contains(dep.as_str()) {
                continue;
            }
            let Some(successors) = adjacency.get_mut(dep.as_str()) else {
                return Err(Error::UnknownDependency {
                    step: key.clone(),
                    key: dep.clone(),
                });
            };
            successors.push(key);
            if let Some(degree) = in_degree.get_mut(key.as_str()) {
                *degree += 1;
            }
        }
    }

    // Kahn's algorithm with sorted tie-breaking
    let mut zero_degree: Vec<&str> = in_degree
        .iter()
        .filter(|(_, &d)| d == 0)
        .map(|(id, _)| *id)
        .collect();
    zero_degree.sort_unstable();
    let mut queue: VecDeque<&str> = zero_degree.into_iter().collect();

    let mut order = Vec::with_capacity(graph.len());
    while let Some(current) = queue.pop_front() {
        order.push(current.to_string());

        let mut next_ready: Vec<&str> = Vec::new();
        if let Some(neighbors) = adjacency.get(current) {
            for neighbor in neighbors {
                if let Some(degree) = in_degree.get_mut(neighbor) {
                    *degree -= 1;
                    if *degree == 0 {
                        next_ready.push(neighbor);
                    }
                }
            }
        }
        next_ready.sort_unstable();
        queue.extend(next_ready);
    }

    if order.len() != graph.len() {
        let ordered: HashSet<&str> = order.iter().map(String::as_str).collect();
        let mut cycle_members: Vec<String> = graph
            .keys()
            .filter(|k| !ordered.contains(k.as_str()))
            .cloned()
            .collect();
        cycle_members.sort();
        return Err(Error::DependencyCycle(cycle_members));
    }

    Ok(order)
}
