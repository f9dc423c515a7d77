use std::collections::{BTreeMap, BTreeSet};

use itertools::Itertools;

use crate::{
    diagnostics::Diagnostics,
    schema::{
        FederatedSchema, FieldDefinition, Key, OperationKind, TypeDefinition, TypeKind,
        BUILTIN_SCALARS,
    },
    subgraphs::{IngestedField, IngestedType, Subgraph, Subgraphs},
};

pub(crate) fn merge(subgraphs: &Subgraphs, diagnostics: &mut Diagnostics) -> FederatedSchema {
    let mut schema = FederatedSchema {
        version: version_hash(&subgraphs.subgraphs),
        query_type: root_name(subgraphs, OperationKind::Query, diagnostics)
            .unwrap_or_else(|| "Query".to_owned()),
        mutation_type: root_name(subgraphs, OperationKind::Mutation, diagnostics),
        subscription_type: root_name(subgraphs, OperationKind::Subscription, diagnostics),
        types: BTreeMap::new(),
        subgraphs: subgraphs
            .subgraphs
            .iter()
            .map(|subgraph| subgraph.name.clone())
            .sorted()
            .collect(),
    };

    // Group same-named definitions across subgraphs, then merge each group.
    let mut groups: BTreeMap<&str, Vec<(&Subgraph, &IngestedType)>> = BTreeMap::new();
    for subgraph in &subgraphs.subgraphs {
        for ty in &subgraph.types {
            groups.entry(ty.name.as_str()).or_default().push((subgraph, ty));
        }
    }

    for (name, group) in groups {
        if let Some(definition) = merge_group(name, &group, diagnostics) {
            schema.types.insert(name.to_owned(), definition);
        }
    }

    // A mutation or subscription root only exists if some subgraph defines it.
    if schema
        .mutation_type
        .as_ref()
        .is_some_and(|name| !schema.types.contains_key(name))
    {
        schema.mutation_type = None;
    }
    if schema
        .subscription_type
        .as_ref()
        .is_some_and(|name| !schema.types.contains_key(name))
    {
        schema.subscription_type = None;
    }

    link_possible_types(&mut schema);
    check_type_references(&schema, diagnostics);

    schema
}

fn version_hash(subgraphs: &[Subgraph]) -> u64 {
    let pairs: Vec<(&str, u64)> = subgraphs
        .iter()
        .map(|subgraph| (subgraph.name.as_str(), subgraph.sdl_hash))
        .sorted()
        .collect();
    fxhash::hash64(&pairs)
}

/// The composed root type name for an operation kind. Subgraphs may rename
/// roots via a `schema` definition; all of them must agree.
fn root_name(
    subgraphs: &Subgraphs,
    kind: OperationKind,
    diagnostics: &mut Diagnostics,
) -> Option<String> {
    let names: BTreeSet<&str> = subgraphs
        .subgraphs
        .iter()
        .flat_map(|subgraph| {
            subgraph
                .roots
                .iter()
                .filter(|(root_kind, _)| *root_kind == kind)
                .map(|(_, name)| name.as_str())
        })
        .collect();

    if names.len() > 1 {
        diagnostics.push_fatal(format!(
            "subgraphs disagree on the {} root type name: {}",
            match kind {
                OperationKind::Query => "query",
                OperationKind::Mutation => "mutation",
                OperationKind::Subscription => "subscription",
            },
            names.iter().join(", "),
        ));
    }

    names.into_iter().next().map(str::to_owned)
}

fn merge_group(
    name: &str,
    group: &[(&Subgraph, &IngestedType)],
    diagnostics: &mut Diagnostics,
) -> Option<TypeDefinition> {
    let kind = group[0].1.kind;
    if let Some((subgraph, other)) = group.iter().find(|(_, ty)| ty.kind != kind) {
        diagnostics.push_fatal(format!(
            "type {name:?} is a {kind:?} in subgraph {:?} but a {:?} in subgraph {:?}",
            group[0].0.name, other.kind, subgraph.name,
        ));
        return None;
    }

    let mut definition = TypeDefinition {
        name: name.to_owned(),
        kind,
        fields: BTreeMap::new(),
        interfaces: BTreeSet::new(),
        possible_types: BTreeSet::new(),
        keys: Vec::new(),
        defined_in: group
            .iter()
            .map(|(subgraph, _)| subgraph.name.clone())
            .collect(),
    };

    for (subgraph, ty) in group {
        for key in &ty.keys {
            definition.keys.push(Key {
                subgraph: subgraph.name.clone(),
                fields: key.clone(),
            });
        }
        definition
            .interfaces
            .extend(ty.interfaces.iter().cloned());
        definition
            .possible_types
            .extend(ty.members.iter().cloned());

        for field in &ty.fields {
            merge_field(&mut definition, &subgraph.name, field, diagnostics);
        }
    }

    Some(definition)
}

fn merge_field(
    definition: &mut TypeDefinition,
    subgraph: &str,
    field: &IngestedField,
    diagnostics: &mut Diagnostics,
) {
    let merged = definition
        .fields
        .entry(field.name.clone())
        .or_insert_with(|| FieldDefinition {
            name: field.name.clone(),
            ty: field.ty.clone(),
            arguments: BTreeMap::new(),
            resolvable_in: BTreeSet::new(),
            external_in: BTreeSet::new(),
            requires: None,
            provides: None,
        });

    // `@external` declarations restate another subgraph's field; they are not
    // contributions and their exact shape is the owner's business.
    if field.external {
        merged.external_in.insert(subgraph.to_owned());
    } else {
        if merged.resolvable_in.is_empty() {
            // The first non-external contribution settles the signature.
            merged.ty = field.ty.clone();
        } else if merged.ty != field.ty {
            diagnostics.push_fatal(format!(
                "field {}.{} has conflicting types {:?} and {:?}",
                definition.name, field.name, merged.ty.rendered, field.ty.rendered,
            ));
        }
        merged.resolvable_in.insert(subgraph.to_owned());
    }

    for (argument, ty) in &field.arguments {
        match merged.arguments.get(argument) {
            Some(existing) if existing != ty => diagnostics.push_fatal(format!(
                "argument {}.{}({}:) has conflicting types {:?} and {:?}",
                definition.name, field.name, argument, existing.rendered, ty.rendered,
            )),
            Some(_) => {}
            None => {
                merged.arguments.insert(argument.clone(), ty.clone());
            }
        }
    }

    if let Some(requires) = &field.requires {
        match &merged.requires {
            Some(existing) if existing != requires => diagnostics.push_fatal(format!(
                "field {}.{} has conflicting @requires declarations",
                definition.name, field.name,
            )),
            _ => merged.requires = Some(requires.clone()),
        }
    }

    if let Some(provides) = &field.provides {
        match &merged.provides {
            Some(existing) if existing != provides => diagnostics.push_fatal(format!(
                "field {}.{} has conflicting @provides declarations",
                definition.name, field.name,
            )),
            _ => merged.provides = Some(provides.clone()),
        }
    }
}

/// Record, on every interface, the object types implementing it.
fn link_possible_types(schema: &mut FederatedSchema) {
    let implementations: Vec<(String, String)> = schema
        .types
        .values()
        .filter(|ty| ty.kind == TypeKind::Object)
        .flat_map(|ty| {
            ty.interfaces
                .iter()
                .map(|interface| (interface.clone(), ty.name.clone()))
        })
        .collect();

    for (interface, implementor) in implementations {
        if let Some(definition) = schema.types.get_mut(&interface) {
            definition.possible_types.insert(implementor);
        }
    }
}

fn check_type_references(schema: &FederatedSchema, diagnostics: &mut Diagnostics) {
    let known = |name: &str| {
        schema.types.contains_key(name) || BUILTIN_SCALARS.contains(&name)
    };

    for ty in schema.types.values() {
        for field in ty.fields.values() {
            if !known(&field.ty.base) {
                diagnostics.push_fatal(format!(
                    "field {}.{} references unknown type {:?}",
                    ty.name, field.name, field.ty.base,
                ));
            }
            for (argument, argument_ty) in &field.arguments {
                if !known(&argument_ty.base) {
                    diagnostics.push_fatal(format!(
                        "argument {}.{}({}:) references unknown type {:?}",
                        ty.name, field.name, argument, argument_ty.base,
                    ));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{compose, Subgraphs};

    const USER_SDL: &str = r#"
        type Query {
            me: User
            _service: _Service
        }

        type User @key(fields: "id") {
            id: ID!
            name: String
        }

        type _Service {
            sdl: String
        }
    "#;

    const POST_SDL: &str = r#"
        type Post @key(fields: "pid") {
            pid: ID!
            title: String
            author: User
        }

        type Query {
            topPosts(count: Int): [Post]
        }

        extend type User @key(fields: "id") {
            id: ID! @external
            posts(count: Int): [Post]
        }
    "#;

    fn user_and_post() -> Subgraphs {
        let mut subgraphs = Subgraphs::default();
        subgraphs.ingest_sdl("user", USER_SDL).unwrap();
        subgraphs.ingest_sdl("post", POST_SDL).unwrap();
        subgraphs
    }

    #[test]
    fn merges_entity_extensions() {
        let schema = compose(&user_and_post()).into_result().unwrap();

        let user = schema.type_definition("User").unwrap();
        assert!(user.is_entity());

        let name = user.fields.get("name").unwrap();
        assert!(name.resolvable_in.contains("user"));
        assert!(!name.resolvable_in.contains("post"));

        let posts = user.fields.get("posts").unwrap();
        assert!(posts.resolvable_in.contains("post"));

        let id = user.fields.get("id").unwrap();
        assert!(id.resolvable_in.contains("user"));
        assert!(id.external_in.contains("post"));

        // The extending subgraph declared its own key, usable for jumps.
        assert!(user.key_for("post").is_some());
    }

    #[test]
    fn strips_federation_machinery() {
        let schema = compose(&user_and_post()).into_result().unwrap();

        assert!(schema.type_definition("_Service").is_none());
        let query = schema.type_definition("Query").unwrap();
        assert!(!query.fields.contains_key("_service"));
        assert!(!query.fields.contains_key("_entities"));
    }

    #[test]
    fn conflicting_field_types_are_fatal() {
        let mut subgraphs = Subgraphs::default();
        subgraphs
            .ingest_sdl("a", "type Query { version: String }")
            .unwrap();
        subgraphs
            .ingest_sdl("b", "type Query { version: Int }")
            .unwrap();

        let diagnostics = compose(&subgraphs).into_result().unwrap_err();
        let message = diagnostics.iter_fatal().next().unwrap();
        assert!(message.contains("Query.version"), "{message}");
    }

    #[test]
    fn identical_value_types_merge() {
        let sdl = "type Query { status: Status } type Status { code: Int message: String }";
        let mut subgraphs = Subgraphs::default();
        subgraphs.ingest_sdl("a", sdl).unwrap();
        subgraphs.ingest_sdl("b", sdl).unwrap();

        let schema = compose(&subgraphs).into_result().unwrap();
        let status = schema.type_definition("Status").unwrap();
        assert!(!status.is_entity());
        assert_eq!(status.fields.get("code").unwrap().resolvable_in.len(), 2);
    }

    #[test]
    fn unknown_type_reference_is_fatal() {
        let mut subgraphs = Subgraphs::default();
        subgraphs
            .ingest_sdl("a", "type Query { thing: Thing }")
            .unwrap();

        let diagnostics = compose(&subgraphs).into_result().unwrap_err();
        assert!(diagnostics.any_fatal());
    }

    #[test]
    fn duplicate_subgraph_names_are_rejected() {
        let mut subgraphs = Subgraphs::default();
        subgraphs.ingest_sdl("a", "type Query { x: Int }").unwrap();
        let err = subgraphs.ingest_sdl("a", "type Query { y: Int }").unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn requires_and_provides_are_recorded() {
        let mut subgraphs = Subgraphs::default();
        subgraphs
            .ingest_sdl(
                "user",
                r#"
                type Query { me: User }
                type User @key(fields: "id") {
                    id: ID!
                    firstName: String
                    lastName: String
                }
                "#,
            )
            .unwrap();
        subgraphs
            .ingest_sdl(
                "review",
                r#"
                type Review @key(fields: "rid") {
                    rid: ID!
                    body: String
                    author: User @provides(fields: "firstName")
                }
                type Query { latestReview: Review }
                extend type User @key(fields: "id") {
                    id: ID! @external
                    firstName: String @external
                    lastName: String @external
                    displayName: String @requires(fields: "firstName lastName")
                }
                "#,
            )
            .unwrap();

        let schema = compose(&subgraphs).into_result().unwrap();

        let display_name = schema.field("User", "displayName").unwrap();
        let requires = display_name.requires.as_ref().unwrap();
        assert_eq!(requires.len(), 2);

        let author = schema.field("Review", "author").unwrap();
        let provides = author.provides.as_ref().unwrap();
        assert_eq!(provides[0].name, "firstName");
    }

    #[test]
    fn same_inputs_share_a_version() {
        let a = compose(&user_and_post()).into_result().unwrap();
        let b = compose(&user_and_post()).into_result().unwrap();
        assert_eq!(a.version, b.version);

        let mut changed = Subgraphs::default();
        changed.ingest_sdl("user", USER_SDL).unwrap();
        changed
            .ingest_sdl("post", &POST_SDL.replace("title", "headline"))
            .unwrap();
        let c = compose(&changed).into_result().unwrap();
        assert_ne!(a.version, c.version);
    }
}
