use async_graphql_parser::{parse_query, types as ast};
use std::fmt::Write as _;

/// One field inside a `fields: "..."` selection string, as found in `@key`,
/// `@requires` and `@provides`. Nested selections are supported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyField {
    pub name: String,
    pub selection: Vec<KeyField>,
}

impl KeyField {
    pub fn leaf(name: impl Into<String>) -> Self {
        KeyField {
            name: name.into(),
            selection: Vec::new(),
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.selection.is_empty()
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid selection string {selection:?}: {message}")]
pub struct SelectionParseError {
    pub selection: String,
    pub message: String,
}

/// Parse a federation selection string such as `"id name author { id }"`.
pub fn parse_selection(selection: &str) -> Result<Vec<KeyField>, SelectionParseError> {
    let document = parse_query(format!("{{ {selection} }}")).map_err(|err| SelectionParseError {
        selection: selection.to_owned(),
        message: err.to_string(),
    })?;

    let operation = match &document.operations {
        ast::DocumentOperations::Single(operation) => &operation.node,
        ast::DocumentOperations::Multiple(_) => {
            return Err(SelectionParseError {
                selection: selection.to_owned(),
                message: "expected a bare selection set".to_owned(),
            })
        }
    };

    convert_selection_set(&operation.selection_set.node, selection)
}

fn convert_selection_set(
    selection_set: &ast::SelectionSet,
    source: &str,
) -> Result<Vec<KeyField>, SelectionParseError> {
    let mut fields = Vec::with_capacity(selection_set.items.len());

    for item in &selection_set.items {
        match &item.node {
            ast::Selection::Field(field) => {
                fields.push(KeyField {
                    name: field.node.name.node.to_string(),
                    selection: convert_selection_set(&field.node.selection_set.node, source)?,
                });
            }
            ast::Selection::FragmentSpread(_) | ast::Selection::InlineFragment(_) => {
                return Err(SelectionParseError {
                    selection: source.to_owned(),
                    message: "fragments are not allowed in federation selections".to_owned(),
                })
            }
        }
    }

    Ok(fields)
}

/// Render key fields back to their selection string form.
pub fn render_selection(fields: &[KeyField]) -> String {
    let mut out = String::new();
    render_into(fields, &mut out);
    out
}

fn render_into(fields: &[KeyField], out: &mut String) {
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        out.push_str(&field.name);
        if !field.selection.is_empty() {
            out.push_str(" { ");
            render_into(&field.selection, out);
            let _ = write!(out, " }}");
        }
    }
}
