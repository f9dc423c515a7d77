mod collectors;
mod project;
mod stitch;

pub use collectors::Collectors;

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use composition::{FederatedSchema, KeyField};
use futures_util::{
    future::BoxFuture,
    stream::{BoxStream, FuturesUnordered},
    FutureExt, StreamExt,
};
use runtime::fetch::{
    FetchResult, GraphqlTransport, SubgraphRequest, SubgraphResponse, WireError,
};
use serde_json::Value;

use crate::{
    plan::{EntityFetch, RootKind, Step},
    prepare::PreparedOperation,
    response::{GraphqlError, PathSegment, Response},
};
use stitch::{collect_parents, deep_merge, lookup_mut, to_path_segments, IndexPath};

/// One subgraph as the engine sees it: a transport plus the per-service
/// collector switches.
#[derive(Clone)]
pub struct SubgraphHandle {
    pub name: String,
    pub transport: Arc<dyn GraphqlTransport>,
    pub collect_status_codes: bool,
    pub collect_extensions: bool,
}

#[derive(Clone, Copy)]
pub struct ExecutionContext<'a> {
    pub schema: &'a FederatedSchema,
    pub subgraphs: &'a HashMap<String, SubgraphHandle>,
    pub headers: &'a http::HeaderMap,
}

/// Run a prepared operation's plan to completion and stitch the response.
pub async fn execute(
    ctx: ExecutionContext<'_>,
    prepared: &PreparedOperation,
    variables: &serde_json::Map<String, Value>,
) -> (Response, Collectors) {
    let plan = &prepared.plan;

    let mut children: Vec<Vec<usize>> = vec![Vec::new(); plan.steps.len()];
    let mut remaining: Vec<usize> = vec![0; plan.steps.len()];
    for step in &plan.steps {
        remaining[step.id.0] = step.depends_on.len();
        for dep in &step.depends_on {
            children[dep.0].push(step.id.0);
        }
    }

    let mut state = ExecutionState {
        ctx,
        variables,
        data: Value::Object(Default::default()),
        errors: Vec::new(),
        failed: HashSet::new(),
        entity_cache: HashMap::new(),
        collectors: Collectors::default(),
    };

    let mut ready: VecDeque<usize> = plan
        .steps
        .iter()
        .filter(|step| step.depends_on.is_empty())
        .map(|step| step.id.0)
        .collect();
    let mut in_flight: FuturesUnordered<BoxFuture<'_, (usize, Launched)>> =
        FuturesUnordered::new();
    let mut completed = 0;

    while completed < plan.steps.len() {
        while let Some(idx) = ready.pop_front() {
            match state.launch(&plan.steps[idx]) {
                Launch::InFlight(future) => in_flight.push(future),
                Launch::Settled => {
                    completed += 1;
                    unblock(idx, &children, &mut remaining, &mut ready);
                }
            }
        }

        if completed >= plan.steps.len() {
            break;
        }

        let Some((idx, launched)) = in_flight.next().await else {
            break;
        };
        state.settle(&plan.steps[idx], launched);
        completed += 1;
        unblock(idx, &children, &mut remaining, &mut ready);
    }

    let operation = prepared.operation();
    let root_type = ctx
        .schema
        .root_type(prepared.kind)
        .expect("the plan was built against this schema");
    let data = project::project_root(
        ctx.schema,
        &prepared.document.fragments,
        &operation.selection_set.node,
        root_type,
        &state.data,
    );

    (
        Response {
            data: Some(data),
            errors: state.errors,
            extensions: None,
        },
        state.collectors,
    )
}

/// Proxy a subscription to its owning service. The plan is a single root
/// step; payloads are forwarded as the subgraph emits them.
pub async fn subscribe(
    ctx: ExecutionContext<'_>,
    prepared: &PreparedOperation,
    variables: &serde_json::Map<String, Value>,
) -> Result<BoxStream<'static, Response>, Box<Response>> {
    if prepared.kind != composition::OperationKind::Subscription {
        return Err(Box::new(Response::error(
            "expected a subscription operation",
        )));
    }

    let step = &prepared.plan.steps[0];
    let handle = ctx.subgraphs.get(&step.service).ok_or_else(|| {
        Box::new(Response::error(format!(
            "service {:?} is not available",
            step.service
        )))
    })?;

    let request = SubgraphRequest {
        query: step.query.clone(),
        variables: variable_subset(variables, &step.variables),
        headers: ctx.headers.clone(),
        retryable: true,
    };

    let stream = handle
        .transport
        .subscribe(request)
        .await
        .map_err(|err| Box::new(Response::error(err.to_string())))?;

    Ok(stream
        .map(|item| match item {
            Ok(payload) => {
                let response = SubgraphResponse::from_value(None, payload);
                Response {
                    data: response.data,
                    errors: response
                        .errors
                        .into_iter()
                        .map(|error| wire_to_graphql(error, Vec::new()))
                        .collect(),
                    extensions: response.extensions,
                }
            }
            Err(err) => Response::error(err.to_string()),
        })
        .boxed())
}

fn unblock(
    idx: usize,
    children: &[Vec<usize>],
    remaining: &mut [usize],
    ready: &mut VecDeque<usize>,
) {
    for &child in &children[idx] {
        remaining[child] -= 1;
        if remaining[child] == 0 {
            ready.push_back(child);
        }
    }
}

/// The entity bookkeeping a `_entities` call carries through its future.
struct EntityCall {
    /// Parent object positions still needing a fetch.
    parents: Vec<IndexPath>,
    /// `parents[i]` maps onto `reps[rep_index[i]]`: identical representations
    /// collapse into one element and fan back out.
    rep_index: Vec<usize>,
    reps: Vec<Value>,
    rep_keys: Vec<String>,
    /// Parents served from the per-request entity cache.
    cached: Vec<(IndexPath, Value)>,
}

struct Launched {
    result: FetchResult<SubgraphResponse>,
    call: Option<EntityCall>,
}

enum Launch<'a> {
    InFlight(BoxFuture<'a, (usize, Launched)>),
    Settled,
}

struct ExecutionState<'a> {
    ctx: ExecutionContext<'a>,
    variables: &'a serde_json::Map<String, Value>,
    data: Value,
    errors: Vec<GraphqlError>,
    failed: HashSet<usize>,
    /// `(service, type, representation)` → merged fragment; the dedup map
    /// guaranteeing one lookup per entity per service within a request.
    entity_cache: HashMap<(String, String, String), Value>,
    collectors: Collectors,
}

impl<'a> ExecutionState<'a> {
    fn launch(&mut self, step: &Step) -> Launch<'a> {
        let idx = step.id.0;

        // A failed dependency skips the whole entity subtree; its error is
        // already recorded and the affected paths stay null. Mutation roots
        // depend on their predecessor for ordering only and still run.
        if step.root_kind == RootKind::Entities
            && step.depends_on.iter().any(|dep| self.failed.contains(&dep.0))
        {
            self.failed.insert(idx);
            return Launch::Settled;
        }

        let Some(handle) = self.ctx.subgraphs.get(&step.service) else {
            self.errors.push(
                GraphqlError::new(format!("service {:?} is not available", step.service))
                    .at(field_path(&step.path)),
            );
            self.failed.insert(idx);
            return Launch::Settled;
        };

        let mut variables = variable_subset_map(self.variables, &step.variables);
        let call = match &step.entity {
            None => None,
            Some(entity) => {
                let call = self.collect_entity_call(step, entity);
                if call.reps.is_empty() {
                    // Everything was in the entity cache (or no parent
                    // survived); nothing to fetch.
                    for (path, fragment) in call.cached {
                        if let Some(target) = lookup_mut(&mut self.data, &path) {
                            deep_merge(target, fragment);
                        }
                    }
                    return Launch::Settled;
                }
                variables.insert(
                    "representations".to_owned(),
                    Value::Array(call.reps.clone()),
                );
                Some(call)
            }
        };

        let mut request = SubgraphRequest {
            query: step.query.clone(),
            variables: Value::Object(variables),
            headers: self.ctx.headers.clone(),
            retryable: true,
        };
        if step.root_kind == RootKind::Mutation {
            request = request.without_retries();
        }

        tracing::debug!(
            service = step.service.as_str(),
            "executing subgraph request: {}",
            step.query
        );

        let transport = Arc::clone(&handle.transport);
        Launch::InFlight(
            async move {
                let result = transport.execute(request).await;
                (idx, Launched { result, call })
            }
            .boxed(),
        )
    }

    fn collect_entity_call(&mut self, step: &Step, entity: &EntityFetch) -> EntityCall {
        let mut call = EntityCall {
            parents: Vec::new(),
            rep_index: Vec::new(),
            reps: Vec::new(),
            rep_keys: Vec::new(),
            cached: Vec::new(),
        };

        for (position, parent) in collect_parents(&self.data, &step.path) {
            let Value::Object(map) = parent else { continue };

            if let Some(type_name) = map.get("__typename").and_then(Value::as_str) {
                if type_name != entity.parent_type {
                    continue;
                }
            }

            let Some(representation) = build_representation(entity, map) else {
                tracing::debug!(
                    "skipping {} representation with missing key fields",
                    entity.parent_type
                );
                continue;
            };
            let rep_key = representation.to_string();

            let cache_key = (
                step.service.clone(),
                entity.parent_type.clone(),
                rep_key.clone(),
            );
            if let Some(fragment) = self.entity_cache.get(&cache_key) {
                if covers(fragment, &step.response_keys) {
                    call.cached.push((position, fragment.clone()));
                    continue;
                }
            }

            let rep_idx = match call.rep_keys.iter().position(|key| *key == rep_key) {
                Some(existing) => existing,
                None => {
                    call.reps.push(representation);
                    call.rep_keys.push(rep_key);
                    call.reps.len() - 1
                }
            };
            call.parents.push(position);
            call.rep_index.push(rep_idx);
        }

        call
    }

    fn settle(&mut self, step: &Step, launched: Launched) {
        let idx = step.id.0;
        let Launched { result, call } = launched;

        let response = match result {
            Ok(response) => response,
            Err(err) => {
                tracing::warn!(service = step.service.as_str(), "subgraph request failed: {err}");
                self.errors
                    .push(GraphqlError::new(err.to_string()).at(field_path(&step.path)));
                self.failed.insert(idx);
                return;
            }
        };

        if let Some(handle) = self.ctx.subgraphs.get(&step.service) {
            if handle.collect_status_codes {
                if let Some(status) = response.status {
                    self.collectors
                        .status_codes
                        .entry(step.service.clone())
                        .or_default()
                        .push(status.as_u16());
                }
            }
            if handle.collect_extensions {
                if let Some(extensions) = &response.extensions {
                    self.collectors
                        .extensions
                        .entry(step.service.clone())
                        .or_default()
                        .push(extensions.clone());
                }
            }
        }

        let Some(data) = response.data else {
            // Errors without data fail the step; dependents are skipped.
            if response.errors.is_empty() {
                self.errors.push(
                    GraphqlError::new(format!(
                        "service {:?} returned no data",
                        step.service
                    ))
                    .at(field_path(&step.path)),
                );
            } else {
                for error in response.errors {
                    let path = rewrite_path(step, call.as_ref(), &error);
                    self.errors.push(wire_to_graphql(error, path));
                }
            }
            self.failed.insert(idx);
            return;
        };

        match call {
            None => deep_merge(&mut self.data, data),
            Some(call) => {
                let entities = match data.get("_entities").and_then(Value::as_array) {
                    Some(entities) => entities.clone(),
                    None => Vec::new(),
                };
                let entity = step.entity.as_ref().expect("entity step carries a fetch");

                for (i, position) in call.parents.iter().enumerate() {
                    let fragment = entities
                        .get(call.rep_index[i])
                        .cloned()
                        .unwrap_or(Value::Null);
                    // An unresolved entity leaves its parent untouched; the
                    // requested fields project to null.
                    if fragment.is_null() {
                        continue;
                    }

                    if let Some(target) = lookup_mut(&mut self.data, position) {
                        deep_merge(target, fragment.clone());
                    }

                    let cache_key = (
                        step.service.clone(),
                        entity.parent_type.clone(),
                        call.rep_keys[call.rep_index[i]].clone(),
                    );
                    let entry = self
                        .entity_cache
                        .entry(cache_key)
                        .or_insert_with(|| Value::Object(Default::default()));
                    deep_merge(entry, fragment);
                }

                for (position, fragment) in &call.cached {
                    if let Some(target) = lookup_mut(&mut self.data, position) {
                        deep_merge(target, fragment.clone());
                    }
                }

                for error in response.errors {
                    let path = rewrite_path(step, Some(&call), &error);
                    self.errors.push(wire_to_graphql(error, path));
                }
                return;
            }
        }

        for error in response.errors {
            let path = rewrite_path(step, None, &error);
            self.errors.push(wire_to_graphql(error, path));
        }
    }
}

/// `{__typename, ...key fields, ...requires}` for one parent object, or None
/// when a key field is missing or null.
fn build_representation(
    entity: &EntityFetch,
    parent: &serde_json::Map<String, Value>,
) -> Option<Value> {
    let mut representation = serde_json::Map::new();
    representation.insert(
        "__typename".to_owned(),
        Value::String(entity.parent_type.clone()),
    );

    for field in &entity.key_fields {
        let value = extract_field(parent, field)?;
        representation.insert(field.name.clone(), value);
    }
    // `@requires` inputs ride along when present; a missing one is the
    // owner's problem to null out, not a reason to drop the lookup.
    for field in &entity.requires {
        if let Some(value) = extract_field(parent, field) {
            representation.insert(field.name.clone(), value);
        }
    }

    Some(Value::Object(representation))
}

fn extract_field(parent: &serde_json::Map<String, Value>, field: &KeyField) -> Option<Value> {
    let value = parent.get(&field.name)?;
    if value.is_null() {
        return None;
    }
    if field.selection.is_empty() {
        return Some(value.clone());
    }

    let Value::Object(child) = value else {
        return None;
    };
    let mut out = serde_json::Map::new();
    for nested in &field.selection {
        out.insert(nested.name.clone(), extract_field(child, nested)?);
    }
    Some(Value::Object(out))
}

/// Whether a cached fragment already answers every response key a step asks
/// for.
fn covers(fragment: &Value, response_keys: &[String]) -> bool {
    match fragment {
        Value::Object(map) => response_keys.iter().all(|key| map.contains_key(key)),
        _ => false,
    }
}

fn field_path(path: &[String]) -> Vec<PathSegment> {
    path.iter().map(|seg| PathSegment::Field(seg.clone())).collect()
}

/// Rewrite a subgraph error path to the client-visible response path.
/// `["_entities", 0, ...]` prefixes are mapped back onto the first parent
/// position referring to that representation.
fn rewrite_path(step: &Step, call: Option<&EntityCall>, error: &WireError) -> Vec<PathSegment> {
    let Some(path) = &error.path else {
        return field_path(&step.path);
    };

    let segments: Vec<PathSegment> = path
        .iter()
        .filter_map(|seg| match seg {
            Value::String(field) => Some(PathSegment::Field(field.clone())),
            Value::Number(index) => index.as_u64().map(|i| PathSegment::Index(i as usize)),
            _ => None,
        })
        .collect();

    let Some(call) = call else {
        return segments;
    };

    if let [PathSegment::Field(first), PathSegment::Index(rep_idx), rest @ ..] =
        segments.as_slice()
    {
        if first == "_entities" {
            if let Some(parent) = call
                .rep_index
                .iter()
                .position(|idx| idx == rep_idx)
                .map(|i| &call.parents[i])
            {
                let mut out = to_path_segments(parent);
                out.extend(rest.iter().cloned());
                return out;
            }
        }
    }

    field_path(&step.path)
}

fn wire_to_graphql(error: WireError, path: Vec<PathSegment>) -> GraphqlError {
    GraphqlError {
        message: error.message,
        path,
        extensions: error.extensions,
    }
}

fn variable_subset_map(
    variables: &serde_json::Map<String, Value>,
    names: &[String],
) -> serde_json::Map<String, Value> {
    names
        .iter()
        .filter_map(|name| {
            variables
                .get(name)
                .map(|value| (name.clone(), value.clone()))
        })
        .collect()
}

fn variable_subset(variables: &serde_json::Map<String, Value>, names: &[String]) -> Value {
    Value::Object(variable_subset_map(variables, names))
}
