use futures::FutureExt;
use futures::future::{BoxFuture, join_all};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::introspection::resolve_meta_field;
use crate::query_planner::{
    CollectedField, INTERNAL_PREFIX, OperationKind, PreparedOperation, QueryPlan, QueryPlanner,
    SelectionSet, ServiceQuery, internal_alias, merge_selections,
};
use crate::resolvers::{Delegation, Resolve};
use crate::schema_composer::{BoundExtension, ComposedSchema};
use crate::{
    GraphQLError, GraphQLResponse, PathSegment, RequestContext, UpstreamError, UpstreamMap,
};

/// A delegated field waiting for its sub-query.
struct Pending<'r> {
    path: Vec<PathSegment>,
    extension: &'r BoundExtension,
    delegation: Delegation,
    id: i32,
    selections: Vec<&'r SelectionSet>,
}

type Completed = (Value, Vec<GraphQLError>);

/// Runs a [`QueryPlan`] for one request and assembles the client response.
pub struct QueryExecutor<'r> {
    schema: &'r ComposedSchema,
    upstreams: &'r UpstreamMap,
    operation: &'r PreparedOperation,
    context: &'r RequestContext,
}

impl<'r> QueryExecutor<'r> {
    pub(crate) fn new(
        schema: &'r ComposedSchema,
        upstreams: &'r UpstreamMap,
        operation: &'r PreparedOperation,
        context: &'r RequestContext,
    ) -> Self {
        QueryExecutor {
            schema,
            upstreams,
            operation,
            context,
        }
    }

    pub async fn execute(&self, plan: &QueryPlan) -> GraphQLResponse {
        let root_type = plan.root_type.as_str();
        let collected = match self
            .operation
            .collect_fields(&[self.operation.selection_set()], &|c| c == root_type)
        {
            Ok(collected) => collected,
            Err(e) => return GraphQLResponse::from_errors(vec![e.into()]),
        };

        let mut data = Map::new();
        let mut errors = Vec::new();

        for field in collected
            .iter()
            .filter(|f| plan.local_fields.contains(&f.response_key))
        {
            let value =
                resolve_meta_field(self.schema.document(), root_type, self.operation, field)
                    .unwrap_or_else(|e| {
                        errors.push(GraphQLError::from(e).with_path(vec![key(field)]));
                        Value::Null
                    });
            data.insert(field.response_key.clone(), value);
        }

        match plan.kind {
            OperationKind::Query => {
                let outcomes = join_all(plan.service_queries.iter().map(|q| self.send(q))).await;
                let mut completions = Vec::new();
                for (query, outcome) in plan.service_queries.iter().zip(outcomes) {
                    let absorbed = self.absorb(query, outcome, &collected, &mut data, &mut errors);
                    completions.extend(absorbed);
                }
                self.complete_roots(root_type, completions, &mut data, &mut errors)
                    .await;
            }
            // Mutation root fields run serially, in document order, and each
            // dispatch is completed before the next one is sent.
            OperationKind::Mutation => {
                for query in &plan.service_queries {
                    let outcome = self.send(query).await;
                    let completions =
                        self.absorb(query, outcome, &collected, &mut data, &mut errors);
                    self.complete_roots(root_type, completions, &mut data, &mut errors)
                        .await;
                }
            }
        }

        let mut ordered = Map::new();
        for response_key in &plan.root_keys {
            let mut value = data.remove(response_key).unwrap_or(Value::Null);
            strip_internal(&mut value);
            ordered.insert(response_key.clone(), value);
        }

        GraphQLResponse {
            data: Some(Value::Object(ordered)),
            errors,
        }
    }

    /// Files one upstream answer under its root keys and returns the fields
    /// that still need completing.
    fn absorb<'c>(
        &self,
        query: &ServiceQuery,
        outcome: Result<GraphQLResponse, UpstreamError>,
        collected: &'c [CollectedField<'r>],
        data: &mut Map<String, Value>,
        errors: &mut Vec<GraphQLError>,
    ) -> Vec<(&'c CollectedField<'r>, Value)> {
        let response = match outcome {
            Ok(response) => response,
            Err(e) => {
                warn!(service = %query.service, error = %e, "upstream operation failed");
                for response_key in &query.response_keys {
                    data.insert(response_key.clone(), Value::Null);
                    errors.push(
                        GraphQLError::new(e.to_string())
                            .with_path(vec![PathSegment::from(response_key.as_str())])
                            .with_service(&query.service),
                    );
                }
                return Vec::new();
            }
        };

        errors.extend(
            response
                .errors
                .into_iter()
                .map(|e| e.with_service(&query.service)),
        );
        let mut answered = match response.data {
            Some(Value::Object(answered)) => answered,
            _ => Map::new(),
        };
        query
            .response_keys
            .iter()
            .filter_map(|response_key| {
                let value = answered.remove(response_key).unwrap_or(Value::Null);
                collected
                    .iter()
                    .find(|f| &f.response_key == response_key)
                    .map(|field| (field, value))
            })
            .collect()
    }

    async fn complete_roots(
        &self,
        root_type: &str,
        completions: Vec<(&CollectedField<'r>, Value)>,
        data: &mut Map<String, Value>,
        errors: &mut Vec<GraphQLError>,
    ) {
        let completed = join_all(completions.into_iter().map(|(field, value)| {
            let type_name = self
                .schema
                .type_info(root_type)
                .and_then(|root| root.field(&field.name))
                .map(|info| info.type_name.clone())
                .unwrap_or_default();
            self.complete(value, type_name, field.sub_selections(), vec![key(field)])
                .map(move |completed| (field, completed))
        }))
        .await;

        for (field, (value, field_errors)) in completed {
            data.insert(field.response_key.clone(), value);
            errors.extend(field_errors);
        }
    }

    async fn send(&self, query: &ServiceQuery) -> Result<GraphQLResponse, UpstreamError> {
        debug!(service = %query.service, keys = ?query.response_keys, "dispatching");
        let upstream = self.upstream(&query.service)?;
        upstream.execute(&query.operation, self.context).await
    }

    fn upstream(&self, service: &str) -> Result<&'r dyn crate::Upstream, UpstreamError> {
        self.upstreams
            .get(service)
            .map(|upstream| upstream.as_ref())
            .ok_or_else(|| UpstreamError::Decode {
                service: service.to_string(),
                reason: "upstream is not registered".to_string(),
            })
    }

    /// Resolves extension fields inside `value`, an upstream answer for
    /// `selections` on `type_name` located at `path`.
    fn complete<'e>(
        &'e self,
        mut value: Value,
        type_name: String,
        selections: Vec<&'r SelectionSet>,
        path: Vec<PathSegment>,
    ) -> BoxFuture<'e, Completed> {
        async move {
            let mut errors = Vec::new();
            let mut pending = Vec::new();
            self.collect_pending(
                &mut value,
                &type_name,
                &selections,
                &path,
                &mut pending,
                &mut errors,
            );

            let delegated = join_all(pending.iter().map(|p| self.delegate(p))).await;
            for (pending, (resolved, delegated_errors)) in pending.iter().zip(delegated) {
                set_at(&mut value, &pending.path[path.len()..], resolved);
                errors.extend(delegated_errors);
            }

            (value, errors)
        }
        .boxed()
    }

    fn collect_pending(
        &self,
        value: &mut Value,
        type_name: &str,
        selections: &[&'r SelectionSet],
        path: &[PathSegment],
        pending: &mut Vec<Pending<'r>>,
        errors: &mut Vec<GraphQLError>,
    ) {
        let object = match value {
            Value::Array(items) => {
                for (index, item) in items.iter_mut().enumerate() {
                    let path = child_path(path, PathSegment::Index(index));
                    self.collect_pending(item, type_name, selections, &path, pending, errors);
                }
                return;
            }
            Value::Object(object) => object,
            _ => return,
        };

        let concrete = object
            .get(&internal_alias("__typename"))
            .and_then(Value::as_str)
            .unwrap_or(type_name)
            .to_string();
        let collected = match self
            .operation
            .collect_fields(selections, &|c| self.schema.fragment_applies(c, &concrete))
        {
            Ok(collected) => collected,
            Err(e) => {
                errors.push(GraphQLError::from(e).with_path(path.to_vec()));
                return;
            }
        };

        for field in &collected {
            let field_path = child_path(path, key(field));

            if let Some(extension) = self.schema.extension(&concrete, &field.name) {
                let columns = extension.source_columns(object);
                let resolved = match extension.resolve {
                    Resolve::Local(resolve) => resolve(&columns),
                    Resolve::Delegate(delegation) => {
                        match delegation.coerce_id(&columns) {
                            Ok(id) => pending.push(Pending {
                                path: field_path.clone(),
                                extension,
                                delegation,
                                id,
                                selections: field.sub_selections(),
                            }),
                            Err(reason) => errors.push(
                                GraphQLError::new(format!(
                                    "cannot resolve {concrete}.{}: {reason}",
                                    field.name
                                ))
                                .with_path(field_path.clone()),
                            ),
                        }
                        Ok(Value::Null)
                    }
                };
                let resolved = resolved.unwrap_or_else(|reason| {
                    let message = format!("cannot resolve {concrete}.{}: {reason}", field.name);
                    errors.push(GraphQLError::new(message).with_path(field_path.clone()));
                    Value::Null
                });
                object.insert(field.response_key.clone(), resolved);
                continue;
            }

            let Some(field_type) = self
                .schema
                .type_info(&concrete)
                .and_then(|info| info.field(&field.name))
                .map(|info| info.type_name.as_str())
            else {
                continue;
            };
            if self.schema.is_composite(field_type) {
                if let Some(child) = object.get_mut(&field.response_key) {
                    self.collect_pending(
                        child,
                        field_type,
                        &field.sub_selections(),
                        &field_path,
                        pending,
                        errors,
                    );
                }
            }
        }
    }

    /// Fetches one delegated field from its upstream, forwarding the caller's
    /// context unchanged.
    async fn delegate(&self, pending: &Pending<'r>) -> Completed {
        let extension = pending.extension;
        let service = pending.delegation.service;
        let failure = |message: String| {
            GraphQLError::new(message)
                .with_path(pending.path.clone())
                .with_service(service)
        };

        let selection = match QueryPlanner::new(self.schema).rewrite_selection(
            self.operation,
            &extension.output_type,
            &merge_selections(&pending.selections),
            &mut Vec::new(),
        ) {
            Ok(selection) => selection,
            Err(e) => {
                let error = GraphQLError::from(e).with_path(pending.path.clone());
                return (Value::Null, vec![error]);
            }
        };

        let request = pending.delegation.request(pending.id, self.context, selection);
        let operation = request.to_operation(self.operation);
        debug!(
            service,
            field = %format!("{}.{}", extension.type_name, extension.field_name),
            id = pending.id,
            "delegating"
        );

        let response = match self.upstream(request.service) {
            Ok(upstream) => upstream.execute(&operation, request.context).await,
            Err(e) => Err(e),
        };
        let response = match response {
            Ok(response) => response,
            Err(e) => {
                warn!(service, error = %e, "delegated query failed");
                return (Value::Null, vec![failure(e.to_string())]);
            }
        };

        let mut errors: Vec<GraphQLError> = response
            .errors
            .into_iter()
            .map(|e| reroot(e, &pending.path, service))
            .collect();
        let value = response
            .data
            .and_then(|mut data| data.get_mut(pending.delegation.field_name).map(Value::take))
            .unwrap_or(Value::Null);

        let (value, more) = self
            .complete(
                value,
                extension.output_type.clone(),
                pending.selections.clone(),
                pending.path.clone(),
            )
            .await;
        errors.extend(more);
        if value.is_null() && !extension.nullable && errors.is_empty() {
            errors.push(failure(format!(
                "Cannot return null for non-nullable field {}.{}",
                extension.type_name, extension.field_name
            )));
        }
        (value, errors)
    }
}

fn key(field: &CollectedField<'_>) -> PathSegment {
    PathSegment::Key(field.response_key.clone())
}

fn child_path(path: &[PathSegment], segment: PathSegment) -> Vec<PathSegment> {
    let mut child = path.to_vec();
    child.push(segment);
    child
}

// Moves an error from a delegated `field(...)` query under the client path.
fn reroot(mut error: GraphQLError, base: &[PathSegment], service: &str) -> GraphQLError {
    let rest = error
        .path
        .take()
        .map(|path| path.into_iter().skip(1).collect::<Vec<_>>())
        .unwrap_or_default();
    error.path = Some(base.iter().cloned().chain(rest).collect());
    error.with_service(service)
}

fn set_at(value: &mut Value, path: &[PathSegment], resolved: Value) {
    let Some((last, parents)) = path.split_last() else {
        *value = resolved;
        return;
    };
    let mut target = value;
    for segment in parents {
        target = match (segment, target) {
            (PathSegment::Key(key), Value::Object(object)) => match object.get_mut(key) {
                Some(child) => child,
                None => return,
            },
            (PathSegment::Index(index), Value::Array(items)) => match items.get_mut(*index) {
                Some(child) => child,
                None => return,
            },
            _ => return,
        };
    }
    match (last, target) {
        (PathSegment::Key(key), Value::Object(object)) => {
            object.insert(key.clone(), resolved);
        }
        (PathSegment::Index(index), Value::Array(items)) if *index < items.len() => {
            items[*index] = resolved;
        }
        _ => {}
    }
}

/// Drops the columns fetched for extension fields.
pub fn strip_internal(value: &mut Value) {
    match value {
        Value::Object(object) => {
            object.retain(|key, _| !key.starts_with(INTERNAL_PREFIX));
            object.values_mut().for_each(strip_internal);
        }
        Value::Array(items) => items.iter_mut().for_each(strip_internal),
        _ => {}
    }
}
