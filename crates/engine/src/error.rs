use crate::response::{GraphqlError, Response};

/// Why an operation could not be planned. Every variant maps onto a standard
/// GraphQL error message, so clients see familiar validation output.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PrepareError {
    #[error("{0}")]
    Parse(String),
    #[error("Unknown operation named {0:?}.")]
    UnknownOperation(String),
    #[error("Must provide operation name if query contains multiple operations.")]
    MissingOperationName,
    #[error("Cannot query field {field:?} on type {parent:?}.")]
    CannotQueryField { field: String, parent: String },
    #[error("Unknown fragment {0:?}.")]
    UnknownFragment(String),
    #[error("Unknown type {0:?}.")]
    UnknownTypeCondition(String),
    #[error("The schema does not support {0} operations.")]
    UnsupportedOperation(&'static str),
    #[error("Subscription operations must be resolvable by a single service.")]
    SubscriptionAcrossServices,
    #[error("No service can resolve field {field:?} on type {parent:?}.")]
    Unresolvable { field: String, parent: String },
}

impl PrepareError {
    pub fn into_response(self) -> Response {
        Response::from_errors(vec![GraphqlError::new(self.to_string())])
    }
}
