use std::collections::{BTreeMap, BTreeSet};

use crate::selections::KeyField;

/// The composed, immutable schema the gateway plans and executes against.
///
/// Entity types reference each other by name, never by pointer, so the graph
/// can be cyclic (`User` ↔ `Post`) without cyclic ownership.
#[derive(Debug, Clone, PartialEq)]
pub struct FederatedSchema {
    /// Content hash over the `(subgraph name, sdl hash)` pairs that produced
    /// this schema. Two compositions of identical inputs share a version.
    pub version: u64,
    pub query_type: String,
    pub mutation_type: Option<String>,
    pub subscription_type: Option<String>,
    pub types: BTreeMap<String, TypeDefinition>,
    /// Names of the subgraphs that contributed, sorted.
    pub subgraphs: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Query,
    Mutation,
    Subscription,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeKind {
    Object,
    Interface,
    Union,
    Scalar,
    Enum,
    InputObject,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypeDefinition {
    pub name: String,
    pub kind: TypeKind,
    pub fields: BTreeMap<String, FieldDefinition>,
    pub interfaces: BTreeSet<String>,
    /// Union members, or object types implementing this interface.
    pub possible_types: BTreeSet<String>,
    /// Every `@key` declared on this type, per declaring subgraph.
    pub keys: Vec<Key>,
    pub defined_in: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Key {
    pub subgraph: String,
    pub fields: Vec<KeyField>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldDefinition {
    pub name: String,
    pub ty: FieldType,
    pub arguments: BTreeMap<String, FieldType>,
    /// Subgraphs declaring this field without `@external`: the services able
    /// to resolve it. A single entry for owned entity fields, several for
    /// value types and shareable fields.
    pub resolvable_in: BTreeSet<String>,
    /// Subgraphs declaring this field `@external`.
    pub external_in: BTreeSet<String>,
    /// Sibling fields the owning resolver needs in the representation.
    pub requires: Option<Vec<KeyField>>,
    /// Fields of the target type the declaring service returns inline.
    pub provides: Option<Vec<KeyField>>,
}

/// A field type reference: the rendered form (`[Post!]`) plus the named base
/// type (`Post`) the planner recurses into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldType {
    pub rendered: String,
    pub base: String,
}

impl FieldType {
    pub fn new(ty: &async_graphql_parser::types::Type) -> Self {
        FieldType {
            rendered: ty.to_string(),
            base: base_type_name(&ty.base).to_owned(),
        }
    }
}

fn base_type_name(base: &async_graphql_parser::types::BaseType) -> &str {
    match base {
        async_graphql_parser::types::BaseType::Named(name) => name.as_str(),
        async_graphql_parser::types::BaseType::List(inner) => base_type_name(&inner.base),
    }
}

pub(crate) const BUILTIN_SCALARS: &[&str] = &["ID", "String", "Boolean", "Int", "Float"];

impl FederatedSchema {
    pub fn root_type(&self, operation: OperationKind) -> Option<&str> {
        match operation {
            OperationKind::Query => Some(self.query_type.as_str()),
            OperationKind::Mutation => self.mutation_type.as_deref(),
            OperationKind::Subscription => self.subscription_type.as_deref(),
        }
    }

    pub fn type_definition(&self, name: &str) -> Option<&TypeDefinition> {
        self.types.get(name)
    }

    pub fn field(&self, type_name: &str, field_name: &str) -> Option<&FieldDefinition> {
        self.types.get(type_name)?.fields.get(field_name)
    }

    /// Whether `concrete` satisfies the type condition `condition`: the same
    /// type, a member of the union, or an implementor of the interface.
    pub fn type_condition_matches(&self, condition: &str, concrete: &str) -> bool {
        if condition == concrete {
            return true;
        }
        self.types
            .get(condition)
            .map(|def| def.possible_types.contains(concrete))
            .unwrap_or(false)
    }
}

impl TypeDefinition {
    pub fn is_entity(&self) -> bool {
        !self.keys.is_empty()
    }

    pub fn is_composite(&self) -> bool {
        matches!(
            self.kind,
            TypeKind::Object | TypeKind::Interface | TypeKind::Union
        )
    }

    /// The key to synthesize representations with, for a jump into
    /// `subgraph`. Among the keys the target subgraph declares, the first one
    /// made of flat fields only is preferred; nested keys are a fallback.
    pub fn key_for(&self, subgraph: &str) -> Option<&Key> {
        let declared: Vec<&Key> = self
            .keys
            .iter()
            .filter(|key| key.subgraph == subgraph)
            .collect();

        declared
            .iter()
            .find(|key| key.fields.iter().all(KeyField::is_leaf))
            .or_else(|| declared.first())
            .copied()
    }
}
