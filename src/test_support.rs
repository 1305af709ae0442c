//! Upstream schemas and a scripted upstream for unit tests.

use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};

use crate::error::UpstreamError;
use crate::introspection::RemoteSchema;
use crate::schema_composer::{ComposedSchema, SchemaComposer};
use crate::upstream::Upstream;
use crate::{DATA_SERVICE, GraphQLResponse, OutboundOperation, RequestContext, USERS_SERVICE};

pub fn named(kind: &str, name: &str) -> Value {
    json!({ "kind": kind, "name": name, "ofType": null })
}

pub fn non_null(inner: Value) -> Value {
    json!({ "kind": "NON_NULL", "name": null, "ofType": inner })
}

pub fn list(inner: Value) -> Value {
    json!({ "kind": "LIST", "name": null, "ofType": inner })
}

pub fn object(name: &str, fields: Vec<(&str, Value)>) -> Value {
    let fields: Vec<Value> = fields
        .into_iter()
        .map(|(field, ty)| {
            json!({
                "name": field,
                "description": null,
                "args": [],
                "type": ty,
                "isDeprecated": false,
                "deprecationReason": null,
            })
        })
        .collect();
    json!({
        "kind": "OBJECT",
        "name": name,
        "description": null,
        "fields": fields,
        "inputFields": null,
        "interfaces": [],
        "enumValues": null,
        "possibleTypes": null,
    })
}

pub fn scalar(name: &str) -> Value {
    json!({ "kind": "SCALAR", "name": name, "fields": null, "possibleTypes": null })
}

pub fn remote(
    service: &str,
    query: &str,
    mutation: Option<&str>,
    types: Vec<Value>,
) -> RemoteSchema {
    RemoteSchema::from_data(
        service,
        Some(json!({ "__schema": {
            "queryType": { "name": query },
            "mutationType": mutation.map(|name| json!({ "name": name })),
            "subscriptionType": null,
            "types": types,
            "directives": [{ "name": "include", "locations": ["FIELD"], "args": [] }],
        }})),
    )
    .unwrap()
}

/// `goals` records behind Hasura-style root names.
pub fn data_schema() -> RemoteSchema {
    let int = || named("SCALAR", "Int");
    remote(
        DATA_SERVICE,
        "query_root",
        Some("mutation_root"),
        vec![
            object(
                "query_root",
                vec![
                    ("goals", non_null(list(non_null(named("OBJECT", "goals"))))),
                    ("goals_by_pk", named("OBJECT", "goals")),
                ],
            ),
            object("mutation_root", vec![("insert_goal", named("OBJECT", "goals"))]),
            object(
                "goals",
                vec![
                    ("id", non_null(int())),
                    ("title", named("SCALAR", "String")),
                    ("created_by_id", non_null(int())),
                    ("delegated_to_id", int()),
                    ("reviewer_id", int()),
                    ("verifier_id", int()),
                ],
            ),
            scalar("Int"),
            scalar("String"),
        ],
    )
}

pub fn users_schema() -> RemoteSchema {
    users_remote(false)
}

/// The users service with a `Mutation` root exposing `update_user`.
pub fn users_schema_with_mutations() -> RemoteSchema {
    users_remote(true)
}

fn users_remote(mutations: bool) -> RemoteSchema {
    let mut types = vec![
        object(
            "Query",
            vec![
                ("user", named("OBJECT", "User")),
                ("users", list(named("OBJECT", "User"))),
            ],
        ),
        object(
            "User",
            vec![
                ("id", non_null(named("SCALAR", "Int"))),
                ("firstName", named("SCALAR", "String")),
                ("lastName", named("SCALAR", "String")),
                ("email", named("SCALAR", "String")),
            ],
        ),
        scalar("Int"),
        scalar("String"),
    ];
    if mutations {
        types.push(object("Mutation", vec![("update_user", named("OBJECT", "User"))]));
    }
    remote(USERS_SERVICE, "Query", mutations.then_some("Mutation"), types)
}

pub fn composed() -> ComposedSchema {
    composed_with(users_schema())
}

pub fn composed_with(users: RemoteSchema) -> ComposedSchema {
    SchemaComposer::new()
        .register(data_schema())
        .register(users)
        .compose()
        .unwrap()
}

type Script = dyn Fn(&OutboundOperation) -> Result<GraphQLResponse, UpstreamError> + Send + Sync;

/// Answers operations with a script and records what it was sent.
pub struct ScriptedUpstream {
    name: String,
    script: Box<Script>,
    pub received: Mutex<Vec<(OutboundOperation, RequestContext)>>,
}

impl ScriptedUpstream {
    pub fn new(
        name: &str,
        script: impl Fn(&OutboundOperation) -> Result<GraphQLResponse, UpstreamError>
        + Send
        + Sync
        + 'static,
    ) -> Arc<Self> {
        Arc::new(ScriptedUpstream {
            name: name.to_string(),
            script: Box::new(script),
            received: Mutex::new(Vec::new()),
        })
    }

    pub fn queries(&self) -> Vec<String> {
        self.received
            .lock()
            .unwrap()
            .iter()
            .map(|(operation, _)| operation.query.clone())
            .collect()
    }
}

#[async_trait]
impl Upstream for ScriptedUpstream {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(
        &self,
        operation: &OutboundOperation,
        context: &RequestContext,
    ) -> Result<GraphQLResponse, UpstreamError> {
        self.received
            .lock()
            .unwrap()
            .push((operation.clone(), context.clone()));
        (self.script)(operation)
    }
}

pub fn data(value: Value) -> Result<GraphQLResponse, UpstreamError> {
    Ok(GraphQLResponse {
        data: Some(value),
        errors: Vec::new(),
    })
}
