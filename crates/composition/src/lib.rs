#![deny(unsafe_code, rust_2018_idioms)]

//! Subgraph schema composition.
//!
//! Takes the SDL of each subgraph, merges same-named types with federation
//! semantics (`@key`, `@extends`, `@external`, `@requires`, `@provides`) and
//! emits a [`FederatedSchema`] annotated with field ownership, so the query
//! planner knows which service resolves what.

mod diagnostics;
mod ingest;
mod merge;
mod schema;
mod selections;
mod subgraphs;

pub use self::{
    diagnostics::{Diagnostics, Severity},
    schema::{
        FederatedSchema, FieldDefinition, FieldType, Key, OperationKind, TypeDefinition, TypeKind,
    },
    selections::{parse_selection, render_selection, KeyField, SelectionParseError},
    subgraphs::{IngestError, Subgraphs},
};

/// The outcome of composing a set of subgraphs.
#[derive(Debug)]
pub struct CompositionResult {
    pub schema: Option<FederatedSchema>,
    pub diagnostics: Diagnostics,
}

impl CompositionResult {
    pub fn into_result(self) -> Result<FederatedSchema, Diagnostics> {
        match self.schema {
            Some(schema) if !self.diagnostics.any_fatal() => Ok(schema),
            _ => Err(self.diagnostics),
        }
    }
}

/// Compose the ingested subgraphs into a federated schema.
pub fn compose(subgraphs: &Subgraphs) -> CompositionResult {
    let mut diagnostics = Diagnostics::default();
    let schema = merge::merge(subgraphs, &mut diagnostics);

    if diagnostics.any_fatal() {
        CompositionResult {
            schema: None,
            diagnostics,
        }
    } else {
        CompositionResult {
            schema: Some(schema),
            diagnostics,
        }
    }
}
