//! The final pass over the stitched tree: re-walk the client's selection and
//! copy exactly what was asked for. Key fields and `__typename`s injected by
//! the planner never survive this pass.

use std::collections::HashMap;

use async_graphql_parser::{
    types::{FragmentDefinition, Selection, SelectionSet},
    Positioned,
};
use async_graphql_value::Name;
use composition::FederatedSchema;
use serde_json::Value;

type Fragments = HashMap<Name, Positioned<FragmentDefinition>>;

pub(crate) fn project_root(
    schema: &FederatedSchema,
    fragments: &Fragments,
    selection_set: &SelectionSet,
    root_type: &str,
    data: &Value,
) -> Value {
    project_object(schema, fragments, root_type, &selection_set.items, data)
}

fn project_object(
    schema: &FederatedSchema,
    fragments: &Fragments,
    parent_type: &str,
    items: &[Positioned<Selection>],
    data: &Value,
) -> Value {
    let Value::Object(map) = data else {
        return Value::Null;
    };

    let mut out = serde_json::Map::new();
    apply_items(schema, fragments, parent_type, items, map, &mut out);
    Value::Object(out)
}

fn apply_items(
    schema: &FederatedSchema,
    fragments: &Fragments,
    parent_type: &str,
    items: &[Positioned<Selection>],
    map: &serde_json::Map<String, Value>,
    out: &mut serde_json::Map<String, Value>,
) {
    for item in items {
        match &item.node {
            Selection::Field(field) => {
                let name = field.node.name.node.as_str();
                let key = field
                    .node
                    .alias
                    .as_ref()
                    .map(|alias| alias.node.to_string())
                    .unwrap_or_else(|| name.to_owned());

                if name == "__typename" {
                    let value = map
                        .get("__typename")
                        .cloned()
                        .unwrap_or_else(|| Value::String(parent_type.to_owned()));
                    out.insert(key, value);
                    continue;
                }

                let value = map.get(&key).cloned().unwrap_or(Value::Null);
                if field.node.selection_set.node.items.is_empty() {
                    out.insert(key, value);
                } else {
                    let base = schema
                        .field(parent_type, name)
                        .map(|definition| definition.ty.base.clone())
                        .unwrap_or_default();
                    out.insert(
                        key,
                        project_value(
                            schema,
                            fragments,
                            &base,
                            &field.node.selection_set.node.items,
                            &value,
                        ),
                    );
                }
            }
            Selection::InlineFragment(fragment) => {
                let condition = fragment
                    .node
                    .type_condition
                    .as_ref()
                    .map(|condition| condition.node.on.node.to_string())
                    .unwrap_or_else(|| parent_type.to_owned());
                if condition_applies(schema, &condition, parent_type, map) {
                    apply_items(
                        schema,
                        fragments,
                        &condition,
                        &fragment.node.selection_set.node.items,
                        map,
                        out,
                    );
                }
            }
            Selection::FragmentSpread(spread) => {
                let Some(fragment) =
                    fragments.get(&Name::new(spread.node.fragment_name.node.as_str()))
                else {
                    continue;
                };
                let condition = fragment.node.type_condition.node.on.node.to_string();
                if condition_applies(schema, &condition, parent_type, map) {
                    apply_items(
                        schema,
                        fragments,
                        &condition,
                        &fragment.node.selection_set.node.items,
                        map,
                        out,
                    );
                }
            }
        }
    }
}

fn project_value(
    schema: &FederatedSchema,
    fragments: &Fragments,
    parent_type: &str,
    items: &[Positioned<Selection>],
    data: &Value,
) -> Value {
    match data {
        Value::Array(elements) => Value::Array(
            elements
                .iter()
                .map(|element| project_value(schema, fragments, parent_type, items, element))
                .collect(),
        ),
        Value::Object(_) => project_object(schema, fragments, parent_type, items, data),
        _ => Value::Null,
    }
}

fn condition_applies(
    schema: &FederatedSchema,
    condition: &str,
    parent_type: &str,
    map: &serde_json::Map<String, Value>,
) -> bool {
    if condition == parent_type {
        return true;
    }
    match map.get("__typename").and_then(Value::as_str) {
        Some(concrete) => schema.type_condition_matches(condition, concrete),
        None => schema.type_condition_matches(condition, parent_type),
    }
}
