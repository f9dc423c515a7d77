use async_graphql_parser::{
    parse_query,
    types::{DocumentOperations, ExecutableDocument, OperationDefinition},
};
use composition::{FederatedSchema, OperationKind};

use crate::{
    error::PrepareError,
    plan::{self, Plan},
};

/// A parsed, validated and planned operation, bound to the schema version it
/// was planned against. Cheap to share; the gateway caches these.
#[derive(Debug)]
pub struct PreparedOperation {
    pub(crate) document: ExecutableDocument,
    pub operation_name: Option<String>,
    pub kind: OperationKind,
    pub plan: Plan,
    pub schema_version: u64,
}

pub fn prepare(
    schema: &FederatedSchema,
    query: &str,
    operation_name: Option<&str>,
) -> Result<PreparedOperation, PrepareError> {
    let document = parse_query(query).map_err(|err| PrepareError::Parse(err.to_string()))?;

    let plan = {
        let operation = resolve_operation(&document, operation_name)?;
        plan::plan(schema, &document, operation)?
    };

    Ok(PreparedOperation {
        kind: plan.operation,
        plan,
        document,
        operation_name: operation_name.map(str::to_owned),
        schema_version: schema.version,
    })
}

impl PreparedOperation {
    pub(crate) fn operation(&self) -> &OperationDefinition {
        resolve_operation(&self.document, self.operation_name.as_deref())
            .expect("resolved when the operation was prepared")
    }
}

fn resolve_operation<'a>(
    document: &'a ExecutableDocument,
    name: Option<&str>,
) -> Result<&'a OperationDefinition, PrepareError> {
    match (&document.operations, name) {
        (DocumentOperations::Single(operation), _) => Ok(&operation.node),
        (DocumentOperations::Multiple(operations), Some(name)) => operations
            .get(&async_graphql_value::Name::new(name))
            .map(|operation| &operation.node)
            .ok_or_else(|| PrepareError::UnknownOperation(name.to_owned())),
        (DocumentOperations::Multiple(operations), None) if operations.len() == 1 => Ok(&operations
            .values()
            .next()
            .expect("length checked above")
            .node),
        (DocumentOperations::Multiple(_), None) => Err(PrepareError::MissingOperationName),
    }
}
