#![allow(dead_code)]

use serde_json::{Value, json};
use std::net::SocketAddr;
use stitchgate::{GatewayConfig, GatewayError, GatewayServer, UpstreamConfig};
use wiremock::matchers::{body_partial_json, method};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const ADMIN_SECRET: &str = "test-admin-secret";

fn named(kind: &str, name: &str) -> Value {
    json!({ "kind": kind, "name": name, "ofType": null })
}

fn non_null(inner: Value) -> Value {
    json!({ "kind": "NON_NULL", "name": null, "ofType": inner })
}

fn list(inner: Value) -> Value {
    json!({ "kind": "LIST", "name": null, "ofType": inner })
}

fn field(name: &str, ty: Value, args: Vec<(&str, Value)>) -> Value {
    let args: Vec<Value> = args
        .into_iter()
        .map(|(arg, ty)| {
            json!({ "name": arg, "description": null, "type": ty, "defaultValue": null })
        })
        .collect();
    json!({
        "name": name,
        "description": null,
        "args": args,
        "type": ty,
        "isDeprecated": false,
        "deprecationReason": null,
    })
}

fn object(name: &str, fields: Vec<Value>) -> Value {
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

fn scalar(name: &str) -> Value {
    json!({
        "kind": "SCALAR",
        "name": name,
        "description": null,
        "fields": null,
        "inputFields": null,
        "interfaces": null,
        "enumValues": null,
        "possibleTypes": null,
    })
}

fn schema(query: &str, mutation: Option<&str>, types: Vec<Value>) -> Value {
    json!({
        "queryType": { "name": query },
        "mutationType": mutation.map(|name| json!({ "name": name })),
        "subscriptionType": null,
        "types": types,
        "directives": [{
            "name": "include",
            "description": null,
            "locations": ["FIELD", "FRAGMENT_SPREAD", "INLINE_FRAGMENT"],
            "args": [{
                "name": "if",
                "description": null,
                "type": non_null(named("SCALAR", "Boolean")),
                "defaultValue": null,
            }],
        }],
    })
}

/// A Hasura-style `goals` service.
pub fn data_schema() -> Value {
    let int = || named("SCALAR", "Int");
    schema(
        "query_root",
        Some("mutation_root"),
        vec![
            object(
                "query_root",
                vec![
                    field("goals", non_null(list(non_null(named("OBJECT", "goals")))), vec![]),
                    field("goals_by_pk", named("OBJECT", "goals"), vec![("id", non_null(int()))]),
                ],
            ),
            object(
                "mutation_root",
                vec![field(
                    "insert_goal",
                    named("OBJECT", "goals"),
                    vec![("title", named("SCALAR", "String"))],
                )],
            ),
            object(
                "goals",
                vec![
                    field("id", non_null(int()), vec![]),
                    field("title", named("SCALAR", "String"), vec![]),
                    field("created_by_id", non_null(int()), vec![]),
                    field("delegated_to_id", int(), vec![]),
                    field("reviewer_id", int(), vec![]),
                    field("verifier_id", int(), vec![]),
                ],
            ),
            scalar("Int"),
            scalar("String"),
            scalar("Boolean"),
        ],
    )
}

pub fn users_schema() -> Value {
    users_schema_with(vec![])
}

/// The users service, plus any extra types it should also define.
pub fn users_schema_with(extra: Vec<Value>) -> Value {
    let mut types = vec![
        object(
            "Query",
            vec![
                field("user", named("OBJECT", "User"), vec![("id", named("SCALAR", "Int"))]),
                field("users", list(named("OBJECT", "User")), vec![]),
            ],
        ),
        object(
            "User",
            vec![
                field("id", non_null(named("SCALAR", "Int")), vec![]),
                field("firstName", named("SCALAR", "String"), vec![]),
                field("lastName", named("SCALAR", "String"), vec![]),
                field("email", named("SCALAR", "String"), vec![]),
            ],
        ),
        scalar("Int"),
        scalar("String"),
        scalar("Boolean"),
    ];
    types.extend(extra);
    schema("Query", None, types)
}

pub fn goals_type_clash() -> Value {
    object("goals", vec![field("id", named("SCALAR", "Int"), vec![])])
}

pub fn graphql(data: Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({ "data": data }))
}

pub async fn mount_introspection(server: &MockServer, schema: Value) {
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "operationName": "IntrospectionQuery" })))
        .respond_with(graphql(json!({ "__schema": schema })))
        .with_priority(1)
        .named("introspection")
        .mount(server)
        .await;
}

pub fn config(data: &MockServer, users: &MockServer) -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.listen_address = SocketAddr::from(([127, 0, 0, 1], 0));
    config.upstreams.data =
        UpstreamConfig::new(format!("{}/v1/graphql", data.uri())).with_admin_secret(ADMIN_SECRET);
    config.upstreams.users = UpstreamConfig::new(format!("{}/graphql", users.uri()));
    config
}

/// A running gateway in front of two mock upstreams.
pub struct TestFixture {
    pub server: GatewayServer,
    pub data: MockServer,
    pub users: MockServer,
    pub addr: SocketAddr,
    client: reqwest::Client,
}

impl TestFixture {
    pub async fn setup() -> Self {
        Self::try_setup(users_schema()).await.unwrap()
    }

    pub async fn try_setup(users: Value) -> Result<Self, GatewayError> {
        let data_server = MockServer::start().await;
        let users_server = MockServer::start().await;
        mount_introspection(&data_server, data_schema()).await;
        mount_introspection(&users_server, users).await;

        let server = GatewayServer::new(config(&data_server, &users_server));
        let addr = server.initialize().await?;

        Ok(TestFixture {
            server,
            data: data_server,
            users: users_server,
            addr,
            client: reqwest::Client::new(),
        })
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    pub async fn execute_query(&self, query: &str, authorization: Option<&str>) -> Value {
        let mut request = self
            .client
            .post(self.url("/graphql"))
            .json(&json!({ "query": query }));
        if let Some(token) = authorization {
            request = request.header("Authorization", token);
        }

        let response = request.send().await.unwrap();
        assert_eq!(response.status(), 200);
        response.json().await.unwrap()
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }
}
