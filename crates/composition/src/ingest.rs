use async_graphql_parser::types::{
    ConstDirective, FieldDefinition, InputValueDefinition, ServiceDocument, TypeDefinition,
    TypeKind as AstTypeKind, TypeSystemDefinition,
};
use async_graphql_value::ConstValue;

use crate::{
    schema::{FieldType, OperationKind, TypeKind},
    selections::{parse_selection, KeyField},
    subgraphs::{IngestError, IngestedField, IngestedType, Subgraph},
};

/// Federation machinery a subgraph exposes for the gateway's own use; none of
/// it belongs in the composed schema.
const FEDERATION_TYPES: &[&str] = &["_Service", "_Any", "_Entity", "_FieldSet"];
const FEDERATION_ROOT_FIELDS: &[&str] = &["_service", "_entities"];

pub(crate) fn ingest_subgraph(
    document: &ServiceDocument,
    name: &str,
    sdl_hash: u64,
) -> Result<Subgraph, IngestError> {
    let mut subgraph = Subgraph {
        name: name.to_owned(),
        sdl_hash,
        types: Vec::new(),
        roots: default_roots(),
    };

    // `schema { query: MyQuery }` renames roots; resolve those first.
    for definition in &document.definitions {
        if let TypeSystemDefinition::Schema(schema) = definition {
            let node = &schema.node;
            if let Some(query) = &node.query {
                set_root(&mut subgraph.roots, OperationKind::Query, &query.node);
            }
            if let Some(mutation) = &node.mutation {
                set_root(&mut subgraph.roots, OperationKind::Mutation, &mutation.node);
            }
            if let Some(subscription) = &node.subscription {
                set_root(
                    &mut subgraph.roots,
                    OperationKind::Subscription,
                    &subscription.node,
                );
            }
        }
    }

    for definition in &document.definitions {
        let TypeSystemDefinition::Type(ty) = definition else {
            // Directive definitions (including the federation set) and schema
            // definitions contribute nothing to the composed type set.
            continue;
        };

        ingest_type(&mut subgraph, &ty.node)?;
    }

    // A subgraph only has a say on the root names of the operations it
    // actually serves.
    subgraph
        .roots
        .retain(|(_, name)| subgraph.types.iter().any(|ty| ty.name == *name));

    Ok(subgraph)
}

fn default_roots() -> Vec<(OperationKind, String)> {
    vec![
        (OperationKind::Query, "Query".to_owned()),
        (OperationKind::Mutation, "Mutation".to_owned()),
        (OperationKind::Subscription, "Subscription".to_owned()),
    ]
}

fn set_root(roots: &mut [(OperationKind, String)], kind: OperationKind, name: &str) {
    for (root_kind, root_name) in roots {
        if *root_kind == kind {
            *root_name = name.to_owned();
        }
    }
}

fn ingest_type(subgraph: &mut Subgraph, definition: &TypeDefinition) -> Result<(), IngestError> {
    let type_name = definition.name.node.as_str();

    if FEDERATION_TYPES.contains(&type_name) {
        return Ok(());
    }

    let is_root = subgraph.roots.iter().any(|(_, root)| root == type_name);
    let keys = key_selections(&directives(definition, "key"))?;

    let mut ingested = IngestedType {
        name: type_name.to_owned(),
        kind: ast_kind(&definition.kind),
        keys,
        fields: Vec::new(),
        interfaces: Vec::new(),
        members: Vec::new(),
    };

    match &definition.kind {
        AstTypeKind::Object(object) => {
            ingested.interfaces = object
                .implements
                .iter()
                .map(|name| name.node.to_string())
                .collect();
            for field in &object.fields {
                if is_root && FEDERATION_ROOT_FIELDS.contains(&field.node.name.node.as_str()) {
                    continue;
                }
                ingested.fields.push(ingest_field(&field.node)?);
            }
        }
        AstTypeKind::Interface(interface) => {
            ingested.interfaces = interface
                .implements
                .iter()
                .map(|name| name.node.to_string())
                .collect();
            for field in &interface.fields {
                ingested.fields.push(ingest_field(&field.node)?);
            }
        }
        AstTypeKind::Union(union) => {
            ingested.members = union
                .members
                .iter()
                .map(|member| member.node.to_string())
                .collect();
        }
        AstTypeKind::InputObject(input) => {
            for field in &input.fields {
                ingested.fields.push(ingest_input_field(&field.node));
            }
        }
        AstTypeKind::Scalar | AstTypeKind::Enum(_) => {}
    }

    subgraph.types.push(ingested);
    Ok(())
}

fn ingest_field(field: &FieldDefinition) -> Result<IngestedField, IngestError> {
    let external = field
        .directives
        .iter()
        .any(|directive| directive.node.name.node.as_str() == "external");

    let requires = selection_argument(&field.directives, "requires")?;
    let provides = selection_argument(&field.directives, "provides")?;

    Ok(IngestedField {
        name: field.name.node.to_string(),
        ty: FieldType::new(&field.ty.node),
        arguments: field
            .arguments
            .iter()
            .map(|argument| ingest_argument(&argument.node))
            .collect(),
        external,
        requires,
        provides,
    })
}

fn ingest_input_field(field: &InputValueDefinition) -> IngestedField {
    IngestedField {
        name: field.name.node.to_string(),
        ty: FieldType::new(&field.ty.node),
        arguments: Vec::new(),
        external: false,
        requires: None,
        provides: None,
    }
}

fn ingest_argument(argument: &InputValueDefinition) -> (String, FieldType) {
    (
        argument.name.node.to_string(),
        FieldType::new(&argument.ty.node),
    )
}

fn ast_kind(kind: &AstTypeKind) -> TypeKind {
    match kind {
        AstTypeKind::Scalar => TypeKind::Scalar,
        AstTypeKind::Object(_) => TypeKind::Object,
        AstTypeKind::Interface(_) => TypeKind::Interface,
        AstTypeKind::Union(_) => TypeKind::Union,
        AstTypeKind::Enum(_) => TypeKind::Enum,
        AstTypeKind::InputObject(_) => TypeKind::InputObject,
    }
}

fn directives<'a>(definition: &'a TypeDefinition, name: &str) -> Vec<&'a ConstDirective> {
    definition
        .directives
        .iter()
        .filter(|directive| directive.node.name.node.as_str() == name)
        .map(|directive| &directive.node)
        .collect()
}

fn key_selections(keys: &[&ConstDirective]) -> Result<Vec<Vec<KeyField>>, IngestError> {
    keys.iter()
        .filter_map(|directive| fields_argument(directive))
        .map(|fields| Ok(parse_selection(&fields)?))
        .collect()
}

fn selection_argument(
    directives: &[async_graphql_parser::Positioned<ConstDirective>],
    name: &str,
) -> Result<Option<Vec<KeyField>>, IngestError> {
    let Some(directive) = directives
        .iter()
        .find(|directive| directive.node.name.node.as_str() == name)
    else {
        return Ok(None);
    };

    match fields_argument(&directive.node) {
        Some(fields) => Ok(Some(parse_selection(&fields)?)),
        None => Ok(None),
    }
}

fn fields_argument(directive: &ConstDirective) -> Option<String> {
    match &directive.get_argument("fields")?.node {
        ConstValue::String(fields) => Some(fields.clone()),
        _ => None,
    }
}
