mod planner;
mod render;

pub(crate) use planner::plan;

use composition::{KeyField, OperationKind};

/// The planner's output: a DAG of subgraph requests covering the operation.
#[derive(Debug, Clone)]
pub struct Plan {
    pub operation: OperationKind,
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct StepId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootKind {
    Query,
    Mutation,
    Subscription,
    /// An `_entities(representations: ...)` lookup joined onto a parent step.
    Entities,
}

/// One subgraph request at one response position.
#[derive(Debug, Clone)]
pub struct Step {
    pub id: StepId,
    pub service: String,
    pub root_kind: RootKind,
    /// The rendered GraphQL document sent to the subgraph.
    pub query: String,
    /// Client variables this step's document references.
    pub variables: Vec<String>,
    /// Response path prefix (field keys; list positions are implicit) under
    /// which this step's output lands.
    pub path: Vec<String>,
    /// Top-level response keys this step produces, used to decide whether a
    /// cached entity fragment already covers the step.
    pub response_keys: Vec<String>,
    pub entity: Option<EntityFetch>,
    pub depends_on: Vec<StepId>,
}

/// How to synthesize `representations` for an entity-jump step.
#[derive(Debug, Clone)]
pub struct EntityFetch {
    /// Concrete type the representations claim via `__typename`.
    pub parent_type: String,
    pub key_fields: Vec<KeyField>,
    /// Extra fields demanded by `@requires` on the jumped-to fields.
    pub requires: Vec<KeyField>,
}

impl Plan {
    pub fn step(&self, id: StepId) -> &Step {
        &self.steps[id.0]
    }
}
