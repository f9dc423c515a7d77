use std::collections::{BTreeSet, HashMap};

use async_graphql_parser::{
    types::{
        ExecutableDocument, Field, FragmentDefinition, OperationDefinition, OperationType,
        Selection, SelectionSet,
    },
    Positioned,
};
use async_graphql_value::{Name, Value};
use composition::{FederatedSchema, FieldDefinition, KeyField, OperationKind};

use super::{
    render::{self, SelectionItem, SelectionNode, VariableDef},
    EntityFetch, Plan, RootKind, Step, StepId,
};
use crate::error::PrepareError;

pub(crate) fn plan(
    schema: &FederatedSchema,
    document: &ExecutableDocument,
    operation: &OperationDefinition,
) -> Result<Plan, PrepareError> {
    let kind = operation_kind(operation.ty);

    let mut planner = Planner {
        schema,
        fragments: &document.fragments,
        steps: Vec::new(),
        jumps: HashMap::new(),
    };
    planner.plan_roots(kind, operation)?;

    if kind == OperationKind::Subscription && planner.steps.len() != 1 {
        return Err(PrepareError::SubscriptionAcrossServices);
    }

    let steps = planner
        .steps
        .into_iter()
        .enumerate()
        .map(|(idx, draft)| {
            let variables: Vec<String> = draft.variables.into_iter().collect();
            let definitions = variable_definitions(operation, &variables);
            Step {
                id: StepId(idx),
                query: render::render_document(
                    draft.root_kind,
                    &definitions,
                    &draft.selection,
                    draft.entity.as_ref(),
                ),
                response_keys: render::response_keys(&draft.selection),
                service: draft.service,
                root_kind: draft.root_kind,
                variables,
                path: draft.path,
                entity: draft.entity,
                depends_on: draft.depends_on.into_iter().map(StepId).collect(),
            }
        })
        .collect();

    Ok(Plan {
        operation: kind,
        steps,
    })
}

fn operation_kind(ty: OperationType) -> OperationKind {
    match ty {
        OperationType::Query => OperationKind::Query,
        OperationType::Mutation => OperationKind::Mutation,
        OperationType::Subscription => OperationKind::Subscription,
    }
}

/// Forward the client's variable definitions a step references, bit-exact.
fn variable_definitions(operation: &OperationDefinition, names: &[String]) -> Vec<VariableDef> {
    names
        .iter()
        .filter_map(|name| {
            operation
                .variable_definitions
                .iter()
                .find(|definition| definition.node.name.node.as_str() == name)
                .map(|definition| VariableDef {
                    name: name.clone(),
                    ty: definition.node.var_type.node.to_string(),
                    default: definition
                        .node
                        .default_value
                        .as_ref()
                        .map(|default| default.node.to_string()),
                })
        })
        .collect()
}

struct StepDraft {
    service: String,
    root_kind: RootKind,
    selection: Vec<SelectionItem>,
    path: Vec<String>,
    entity: Option<EntityFetch>,
    depends_on: Vec<usize>,
    variables: BTreeSet<String>,
}

/// Merge key for entity jumps: sibling foreign fields on the same parent,
/// aimed at the same service, share one `_entities` step.
type JumpKey = (usize, Vec<String>, String, String);

struct Planner<'a> {
    schema: &'a FederatedSchema,
    fragments: &'a HashMap<Name, Positioned<FragmentDefinition>>,
    steps: Vec<StepDraft>,
    jumps: HashMap<JumpKey, usize>,
}

impl Planner<'_> {
    fn plan_roots(
        &mut self,
        kind: OperationKind,
        operation: &OperationDefinition,
    ) -> Result<(), PrepareError> {
        let root_type = self
            .schema
            .root_type(kind)
            .filter(|name| self.schema.type_definition(name).is_some())
            .ok_or(PrepareError::UnsupportedOperation(match kind {
                OperationKind::Query => "query",
                OperationKind::Mutation => "mutation",
                OperationKind::Subscription => "subscription",
            }))?
            .to_owned();

        let root_kind = match kind {
            OperationKind::Query => RootKind::Query,
            OperationKind::Mutation => RootKind::Mutation,
            OperationKind::Subscription => RootKind::Subscription,
        };

        let fields = self.flatten_fields(&operation.selection_set.node.items, &root_type)?;

        // Mutation roots chain sequentially in source order; query and
        // subscription roots merge freely per service.
        let mut last_mutation: Option<usize> = None;

        for field in fields {
            let name = field.node.name.node.as_str();
            if name == "__typename" {
                // Filled statically by the projection pass.
                continue;
            }

            let definition = self
                .schema
                .field(&root_type, name)
                .cloned()
                .ok_or_else(|| PrepareError::CannotQueryField {
                    field: name.to_owned(),
                    parent: root_type.clone(),
                })?;

            let step_idx = match kind {
                OperationKind::Mutation => match last_mutation {
                    Some(idx) if definition.resolvable_in.contains(&self.steps[idx].service) => {
                        idx
                    }
                    _ => self.push_root_step(
                        &definition,
                        root_kind,
                        last_mutation.into_iter().collect(),
                        &root_type,
                    )?,
                },
                _ => {
                    let existing = self.steps.iter().position(|step| {
                        step.entity.is_none()
                            && definition.resolvable_in.contains(&step.service)
                    });
                    match existing {
                        Some(idx) => idx,
                        None => self.push_root_step(&definition, root_kind, Vec::new(), &root_type)?,
                    }
                }
            };

            let item = self.plan_field(step_idx, &root_type, &field, &[], &[])?;
            self.steps[step_idx].selection.push(item);

            if kind == OperationKind::Mutation {
                last_mutation = Some(step_idx);
            }
        }

        Ok(())
    }

    fn push_root_step(
        &mut self,
        definition: &FieldDefinition,
        root_kind: RootKind,
        depends_on: Vec<usize>,
        root_type: &str,
    ) -> Result<usize, PrepareError> {
        let service = definition
            .resolvable_in
            .iter()
            .next()
            .cloned()
            .ok_or_else(|| PrepareError::Unresolvable {
                field: definition.name.clone(),
                parent: root_type.to_owned(),
            })?;

        let idx = self.steps.len();
        self.steps.push(StepDraft {
            service,
            root_kind,
            selection: Vec::new(),
            path: Vec::new(),
            entity: None,
            depends_on,
            variables: BTreeSet::new(),
        });
        Ok(idx)
    }

    /// Plan one field the current step's service resolves itself.
    fn plan_field(
        &mut self,
        step_idx: usize,
        parent_type: &str,
        field: &Positioned<Field>,
        path: &[String],
        provided: &[KeyField],
    ) -> Result<SelectionItem, PrepareError> {
        let name = field.node.name.node.to_string();
        let response_key = field
            .node
            .alias
            .as_ref()
            .map(|alias| alias.node.to_string())
            .unwrap_or_else(|| name.clone());

        let definition = self
            .schema
            .field(parent_type, &name)
            .cloned()
            .ok_or_else(|| PrepareError::CannotQueryField {
                field: name.clone(),
                parent: parent_type.to_owned(),
            })?;

        for (_, value) in &field.node.arguments {
            collect_variables(&value.node, &mut self.steps[step_idx].variables);
        }

        // Fields reached through `@provides` carry their own provided
        // sub-selection; otherwise the field's own `@provides` opens one.
        let nested_provided = provided
            .iter()
            .find(|key_field| key_field.name == name)
            .map(|key_field| key_field.selection.clone())
            .unwrap_or_else(|| definition.provides.clone().unwrap_or_default());

        let selection = if field.node.selection_set.node.items.is_empty() {
            Vec::new()
        } else {
            let mut child_path = path.to_vec();
            child_path.push(response_key.clone());
            self.plan_selection_set(
                step_idx,
                &definition.ty.base,
                &field.node.selection_set.node,
                &child_path,
                &nested_provided,
            )?
        };

        Ok(SelectionItem::Field(SelectionNode {
            response_key,
            name,
            arguments: field
                .node
                .arguments
                .iter()
                .map(|(name, value)| (name.node.to_string(), value.node.clone()))
                .collect(),
            selection,
        }))
    }

    fn plan_selection_set(
        &mut self,
        step_idx: usize,
        parent_type: &str,
        selection_set: &SelectionSet,
        path: &[String],
        provided: &[KeyField],
    ) -> Result<Vec<SelectionItem>, PrepareError> {
        let mut out = Vec::new();
        self.plan_items(
            step_idx,
            parent_type,
            &selection_set.items,
            path,
            provided,
            &mut out,
        )?;
        Ok(out)
    }

    fn plan_items(
        &mut self,
        step_idx: usize,
        parent_type: &str,
        items: &[Positioned<Selection>],
        path: &[String],
        provided: &[KeyField],
        out: &mut Vec<SelectionItem>,
    ) -> Result<(), PrepareError> {
        for item in items {
            match &item.node {
                Selection::Field(field) => {
                    let name = field.node.name.node.as_str();
                    if name == "__typename" {
                        let response_key = field
                            .node
                            .alias
                            .as_ref()
                            .map(|alias| alias.node.to_string())
                            .unwrap_or_else(|| name.to_owned());
                        out.push(SelectionItem::Field(SelectionNode {
                            response_key,
                            name: name.to_owned(),
                            arguments: Vec::new(),
                            selection: Vec::new(),
                        }));
                        continue;
                    }

                    let definition = self
                        .schema
                        .field(parent_type, name)
                        .cloned()
                        .ok_or_else(|| PrepareError::CannotQueryField {
                            field: name.to_owned(),
                            parent: parent_type.to_owned(),
                        })?;

                    let local = definition
                        .resolvable_in
                        .contains(self.steps[step_idx].service.as_str())
                        || provided.iter().any(|key_field| key_field.name == name);

                    if local {
                        let item = self.plan_field(step_idx, parent_type, field, path, provided)?;
                        out.push(item);
                    } else {
                        self.plan_jump(step_idx, parent_type, &definition, field, path, out)?;
                    }
                }
                Selection::InlineFragment(fragment) => {
                    let condition = fragment
                        .node
                        .type_condition
                        .as_ref()
                        .map(|condition| condition.node.on.node.to_string());
                    self.plan_fragment(
                        step_idx,
                        parent_type,
                        condition,
                        &fragment.node.selection_set.node.items,
                        path,
                        provided,
                        out,
                    )?;
                }
                Selection::FragmentSpread(spread) => {
                    let fragment_name = spread.node.fragment_name.node.as_str();
                    let fragment = self
                        .fragments
                        .get(&Name::new(fragment_name))
                        .ok_or_else(|| {
                            PrepareError::UnknownFragment(fragment_name.to_owned())
                        })?;
                    let condition = fragment.node.type_condition.node.on.node.to_string();
                    let items = fragment.node.selection_set.node.items.clone();
                    self.plan_fragment(
                        step_idx,
                        parent_type,
                        Some(condition),
                        &items,
                        path,
                        provided,
                        out,
                    )?;
                }
            }
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn plan_fragment(
        &mut self,
        step_idx: usize,
        parent_type: &str,
        condition: Option<String>,
        items: &[Positioned<Selection>],
        path: &[String],
        provided: &[KeyField],
        out: &mut Vec<SelectionItem>,
    ) -> Result<(), PrepareError> {
        match condition {
            None => self.plan_items(step_idx, parent_type, items, path, provided, out),
            Some(condition) if condition == parent_type => {
                self.plan_items(step_idx, parent_type, items, path, provided, out)
            }
            Some(condition) => {
                if self.schema.type_definition(&condition).is_none() {
                    return Err(PrepareError::UnknownTypeCondition(condition));
                }

                let mut inner = Vec::new();
                self.plan_items(step_idx, &condition, items, path, provided, &mut inner)?;

                // The projection pass needs `__typename` to pick matching
                // branches on abstract parents.
                render::ensure_typename(out);
                out.push(SelectionItem::Fragment {
                    type_condition: condition,
                    selection: inner,
                });
                Ok(())
            }
        }
    }

    /// The current service does not resolve this field: hop to the owner via
    /// `_entities`, injecting the representation inputs into the parent step.
    fn plan_jump(
        &mut self,
        step_idx: usize,
        parent_type: &str,
        definition: &FieldDefinition,
        field: &Positioned<Field>,
        path: &[String],
        out: &mut Vec<SelectionItem>,
    ) -> Result<(), PrepareError> {
        let unresolvable = || PrepareError::Unresolvable {
            field: definition.name.clone(),
            parent: parent_type.to_owned(),
        };

        let parent_definition = self
            .schema
            .type_definition(parent_type)
            .ok_or_else(unresolvable)?;

        // The target must both resolve the field and declare a key on the
        // parent entity, otherwise its `_entities` resolver cannot be fed.
        let target = definition
            .resolvable_in
            .iter()
            .find(|service| parent_definition.key_for(service).is_some())
            .cloned()
            .ok_or_else(unresolvable)?;

        let key = parent_definition
            .key_for(&target)
            .expect("target selected for its key")
            .clone();
        let requires = definition.requires.clone().unwrap_or_default();

        let jump_key: JumpKey = (
            step_idx,
            path.to_vec(),
            target.clone(),
            parent_type.to_owned(),
        );
        let child_idx = match self.jumps.get(&jump_key) {
            Some(idx) => *idx,
            None => {
                let idx = self.steps.len();
                self.steps.push(StepDraft {
                    service: target,
                    root_kind: RootKind::Entities,
                    selection: Vec::new(),
                    path: path.to_vec(),
                    entity: Some(EntityFetch {
                        parent_type: parent_type.to_owned(),
                        key_fields: key.fields.clone(),
                        requires: Vec::new(),
                    }),
                    depends_on: vec![step_idx],
                    variables: BTreeSet::new(),
                });
                self.jumps.insert(jump_key, idx);
                idx
            }
        };

        if !requires.is_empty() {
            let entity = self.steps[child_idx]
                .entity
                .as_mut()
                .expect("entity step has a fetch");
            for required in &requires {
                if !entity.requires.iter().any(|existing| existing.name == required.name) {
                    entity.requires.push(required.clone());
                }
            }
        }

        let item = self.plan_field(child_idx, parent_type, field, path, &[])?;
        self.steps[child_idx].selection.push(item);

        render::ensure_fields(out, &key.fields);
        render::ensure_fields(out, &requires);
        render::ensure_typename(out);

        Ok(())
    }

    /// Flatten the root selection set to plain fields, resolving fragments.
    fn flatten_fields(
        &self,
        items: &[Positioned<Selection>],
        root_type: &str,
    ) -> Result<Vec<Positioned<Field>>, PrepareError> {
        let mut fields = Vec::new();
        for item in items {
            match &item.node {
                Selection::Field(field) => fields.push(field.clone()),
                Selection::InlineFragment(fragment) => {
                    if let Some(condition) = &fragment.node.type_condition {
                        let condition = condition.node.on.node.as_str();
                        if condition != root_type
                            && self.schema.type_definition(condition).is_none()
                        {
                            return Err(PrepareError::UnknownTypeCondition(
                                condition.to_owned(),
                            ));
                        }
                    }
                    fields.extend(
                        self.flatten_fields(
                            &fragment.node.selection_set.node.items,
                            root_type,
                        )?,
                    );
                }
                Selection::FragmentSpread(spread) => {
                    let fragment_name = spread.node.fragment_name.node.as_str();
                    let fragment = self
                        .fragments
                        .get(&Name::new(fragment_name))
                        .ok_or_else(|| {
                            PrepareError::UnknownFragment(fragment_name.to_owned())
                        })?;
                    fields.extend(self.flatten_fields(
                        &fragment.node.selection_set.node.items,
                        root_type,
                    )?);
                }
            }
        }
        Ok(fields)
    }
}

fn collect_variables(value: &Value, out: &mut BTreeSet<String>) {
    match value {
        Value::Variable(name) => {
            out.insert(name.to_string());
        }
        Value::List(items) => {
            for item in items {
                collect_variables(item, out);
            }
        }
        Value::Object(object) => {
            for item in object.values() {
                collect_variables(item, out);
            }
        }
        _ => {}
    }
}
