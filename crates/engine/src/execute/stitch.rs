use serde_json::Value;

use crate::response::PathSegment;

/// A concrete position inside the response tree, list indices included.
pub(crate) type IndexPath = Vec<Seg>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Seg {
    Key(String),
    Index(usize),
}

pub(crate) fn to_path_segments(path: &IndexPath) -> Vec<PathSegment> {
    path.iter()
        .map(|seg| match seg {
            Seg::Key(key) => PathSegment::Field(key.clone()),
            Seg::Index(index) => PathSegment::Index(*index),
        })
        .collect()
}

/// Collect every object sitting under `path`, descending through lists.
/// Null and missing branches are silently skipped: a null parent never
/// produces an entity lookup.
pub(crate) fn collect_parents<'v>(root: &'v Value, path: &[String]) -> Vec<(IndexPath, &'v Value)> {
    let mut out = Vec::new();
    descend(root, path, Vec::new(), &mut out);
    out
}

fn descend<'v>(
    value: &'v Value,
    path: &[String],
    position: IndexPath,
    out: &mut Vec<(IndexPath, &'v Value)>,
) {
    match value {
        Value::Array(items) => {
            for (index, item) in items.iter().enumerate() {
                let mut position = position.clone();
                position.push(Seg::Index(index));
                descend(item, path, position, out);
            }
        }
        Value::Object(map) => match path.split_first() {
            Some((head, rest)) => {
                if let Some(child) = map.get(head) {
                    let mut position = position;
                    position.push(Seg::Key(head.clone()));
                    descend(child, rest, position, out);
                }
            }
            None => out.push((position, value)),
        },
        _ => {}
    }
}

pub(crate) fn lookup_mut<'v>(root: &'v mut Value, path: &IndexPath) -> Option<&'v mut Value> {
    let mut current = root;
    for seg in path {
        current = match seg {
            Seg::Key(key) => current.as_object_mut()?.get_mut(key)?,
            Seg::Index(index) => current.as_array_mut()?.get_mut(*index)?,
        };
    }
    Some(current)
}

/// Merge `source` into `target`. Objects merge key-wise, equal-length arrays
/// merge element-wise, anything else replaces.
pub(crate) fn deep_merge(target: &mut Value, source: Value) {
    match (target, source) {
        (Value::Object(target), Value::Object(source)) => {
            for (key, value) in source {
                match target.get_mut(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        target.insert(key, value);
                    }
                }
            }
        }
        (Value::Array(target), Value::Array(source)) if target.len() == source.len() => {
            for (target, source) in target.iter_mut().zip(source) {
                deep_merge(target, source);
            }
        }
        (target, source) => *target = source,
    }
}
