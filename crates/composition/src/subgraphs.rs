use async_graphql_parser::types::ServiceDocument;

use crate::{
    schema::{FieldType, OperationKind, TypeKind},
    selections::{KeyField, SelectionParseError},
};

/// The set of subgraphs to compose, in ingestion order.
#[derive(Debug, Default)]
pub struct Subgraphs {
    pub(crate) subgraphs: Vec<Subgraph>,
}

#[derive(Debug)]
pub(crate) struct Subgraph {
    pub name: String,
    pub sdl_hash: u64,
    pub types: Vec<IngestedType>,
    /// Root operation type names, after `schema { query: ... }` resolution.
    pub roots: Vec<(OperationKind, String)>,
}

#[derive(Debug)]
pub(crate) struct IngestedType {
    pub name: String,
    pub kind: TypeKind,
    pub keys: Vec<Vec<KeyField>>,
    pub fields: Vec<IngestedField>,
    pub interfaces: Vec<String>,
    pub members: Vec<String>,
}

#[derive(Debug)]
pub(crate) struct IngestedField {
    pub name: String,
    pub ty: FieldType,
    pub arguments: Vec<(String, FieldType)>,
    pub external: bool,
    pub requires: Option<Vec<KeyField>>,
    pub provides: Option<Vec<KeyField>>,
}

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("invalid SDL: {0}")]
    Parse(String),
    #[error(transparent)]
    Selection(#[from] SelectionParseError),
    #[error("duplicate subgraph name {0:?}")]
    DuplicateName(String),
}

impl Subgraphs {
    /// Parse and ingest one subgraph's SDL.
    pub fn ingest_sdl(&mut self, name: &str, sdl: &str) -> Result<(), IngestError> {
        let document = async_graphql_parser::parse_schema(sdl)
            .map_err(|err| IngestError::Parse(err.to_string()))?;
        self.ingest(&document, name, fxhash::hash64(sdl))
    }

    /// Ingest an already parsed subgraph schema.
    pub fn ingest(
        &mut self,
        document: &ServiceDocument,
        name: &str,
        sdl_hash: u64,
    ) -> Result<(), IngestError> {
        if self.subgraphs.iter().any(|subgraph| subgraph.name == name) {
            return Err(IngestError::DuplicateName(name.to_owned()));
        }
        let subgraph = crate::ingest::ingest_subgraph(document, name, sdl_hash)?;
        self.subgraphs.push(subgraph);
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.subgraphs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.subgraphs.len()
    }
}
