use std::fmt::Write as _;

use async_graphql_value::Value;
use composition::KeyField;

use super::{EntityFetch, RootKind};

/// A selection tree under construction for one step. Rendered to the
/// subgraph document once planning is complete.
#[derive(Debug, Clone)]
pub(crate) enum SelectionItem {
    Field(SelectionNode),
    Fragment {
        type_condition: String,
        selection: Vec<SelectionItem>,
    },
}

#[derive(Debug, Clone)]
pub(crate) struct SelectionNode {
    pub response_key: String,
    pub name: String,
    pub arguments: Vec<(String, Value)>,
    pub selection: Vec<SelectionItem>,
}

impl SelectionNode {
    pub(crate) fn plain(name: &str) -> Self {
        SelectionNode {
            response_key: name.to_owned(),
            name: name.to_owned(),
            arguments: Vec::new(),
            selection: Vec::new(),
        }
    }

    pub(crate) fn from_key_field(field: &KeyField) -> Self {
        SelectionNode {
            response_key: field.name.clone(),
            name: field.name.clone(),
            arguments: Vec::new(),
            selection: field.selection.iter().map(|child| SelectionItem::Field(Self::from_key_field(child))).collect(),
        }
    }
}

/// Make sure every key/requires field is present in `selection`, injecting
/// the missing ones. The injected fields never reach the client; the final
/// projection pass strips them.
pub(crate) fn ensure_fields(selection: &mut Vec<SelectionItem>, fields: &[KeyField]) {
    for field in fields {
        let existing = selection.iter_mut().find_map(|item| match item {
            SelectionItem::Field(node)
                if node.name == field.name
                    && node.response_key == field.name
                    && node.arguments.is_empty() =>
            {
                Some(node)
            }
            _ => None,
        });

        match existing {
            Some(node) => ensure_fields(&mut node.selection, &field.selection),
            None => selection.push(SelectionItem::Field(SelectionNode::from_key_field(field))),
        }
    }
}

pub(crate) fn ensure_typename(selection: &mut Vec<SelectionItem>) {
    let present = selection.iter().any(
        |item| matches!(item, SelectionItem::Field(node) if node.name == "__typename"),
    );
    if !present {
        selection.push(SelectionItem::Field(SelectionNode::plain("__typename")));
    }
}

/// Top-level response keys a selection produces, fragments included.
pub(crate) fn response_keys(selection: &[SelectionItem]) -> Vec<String> {
    let mut keys = Vec::new();
    collect_response_keys(selection, &mut keys);
    keys
}

fn collect_response_keys(selection: &[SelectionItem], keys: &mut Vec<String>) {
    for item in selection {
        match item {
            SelectionItem::Field(node) => {
                if !keys.contains(&node.response_key) {
                    keys.push(node.response_key.clone());
                }
            }
            SelectionItem::Fragment { selection, .. } => collect_response_keys(selection, keys),
        }
    }
}

/// A variable definition forwarded to a step, rendered from the client
/// operation bit-exact.
#[derive(Debug, Clone)]
pub(crate) struct VariableDef {
    pub name: String,
    pub ty: String,
    pub default: Option<String>,
}

pub(crate) fn render_document(
    root_kind: RootKind,
    variables: &[VariableDef],
    selection: &[SelectionItem],
    entity: Option<&EntityFetch>,
) -> String {
    let mut out = String::new();

    match root_kind {
        RootKind::Query | RootKind::Entities => out.push_str("query"),
        RootKind::Mutation => out.push_str("mutation"),
        RootKind::Subscription => out.push_str("subscription"),
    }

    let mut defs: Vec<String> = Vec::new();
    if root_kind == RootKind::Entities {
        defs.push("$representations: [_Any!]!".to_owned());
    }
    for variable in variables {
        let mut def = format!("${}: {}", variable.name, variable.ty);
        if let Some(default) = &variable.default {
            let _ = write!(def, " = {default}");
        }
        defs.push(def);
    }
    if !defs.is_empty() {
        let _ = write!(out, "({})", defs.join(", "));
    }

    out.push_str(" { ");
    match entity {
        Some(entity) => {
            let _ = write!(
                out,
                "_entities(representations: $representations) {{ ... on {} {{ ",
                entity.parent_type
            );
            render_selection(selection, &mut out);
            out.push_str(" } }");
        }
        None => render_selection(selection, &mut out),
    }
    out.push_str(" }");

    out
}

fn render_selection(selection: &[SelectionItem], out: &mut String) {
    for (i, item) in selection.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        match item {
            SelectionItem::Field(node) => render_field(node, out),
            SelectionItem::Fragment {
                type_condition,
                selection,
            } => {
                let _ = write!(out, "... on {type_condition} {{ ");
                render_selection(selection, out);
                out.push_str(" }");
            }
        }
    }
}

fn render_field(node: &SelectionNode, out: &mut String) {
    if node.response_key != node.name {
        let _ = write!(out, "{}: ", node.response_key);
    }
    out.push_str(&node.name);

    if !node.arguments.is_empty() {
        let rendered = node
            .arguments
            .iter()
            .map(|(name, value)| format!("{name}: {value}"))
            .collect::<Vec<_>>()
            .join(", ");
        let _ = write!(out, "({rendered})");
    }

    if !node.selection.is_empty() {
        out.push_str(" { ");
        render_selection(&node.selection, out);
        out.push_str(" }");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_an_entities_document() {
        let entity = EntityFetch {
            parent_type: "User".to_owned(),
            key_fields: vec![KeyField::leaf("id")],
            requires: Vec::new(),
        };
        let selection = vec![SelectionItem::Field(SelectionNode {
            response_key: "posts".to_owned(),
            name: "posts".to_owned(),
            arguments: vec![(
                "count".to_owned(),
                Value::Variable(async_graphql_value::Name::new("count")),
            )],
            selection: vec![SelectionItem::Field(SelectionNode::plain("pid"))],
        })];
        let variables = vec![VariableDef {
            name: "count".to_owned(),
            ty: "Int".to_owned(),
            default: None,
        }];

        let document = render_document(
            RootKind::Entities,
            &variables,
            &selection,
            Some(&entity),
        );

        assert_eq!(
            document,
            "query($representations: [_Any!]!, $count: Int) { _entities(representations: $representations) { ... on User { posts(count: $count) { pid } } } }"
        );
    }

    #[test]
    fn injects_missing_key_fields_only_once() {
        let mut selection = vec![SelectionItem::Field(SelectionNode::plain("id"))];
        ensure_fields(
            &mut selection,
            &[KeyField::leaf("id"), KeyField::leaf("sku")],
        );
        assert_eq!(response_keys(&selection), vec!["id", "sku"]);
    }
}
