pub mod config;
pub mod error;
pub mod gateway;
pub mod introspection;
pub mod query_executor;
pub mod query_planner;
pub mod resolvers;
pub mod schema_composer;
pub mod server;
pub mod upstream;
pub mod user_directory;

#[cfg(test)]
mod test_support;

pub use config::{GatewayConfig, UpstreamConfig};
pub use error::{GatewayError, QueryError, UpstreamError};
pub use gateway::Gateway;
pub use schema_composer::ComposedSchema;
pub use server::{GatewayServer, LifecycleState};
pub use upstream::{HttpUpstream, Upstream};
pub use user_directory::{UserDirectory, UserRecord};

use http::HeaderValue;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Name of the upstream owning the `goals` records.
pub const DATA_SERVICE: &str = "data";
/// Name of the upstream owning `User`.
pub const USERS_SERVICE: &str = "users";

type UpstreamMap = HashMap<String, Arc<dyn Upstream>>;

/// Per-request caller identity.
///
/// Built once from the inbound `Authorization` header and handed by reference
/// to every resolver and upstream call made on behalf of that request.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RequestContext {
    authorization: Option<HeaderValue>,
}

impl RequestContext {
    pub fn new(authorization: Option<HeaderValue>) -> Self {
        RequestContext { authorization }
    }

    /// A context without credentials, used for startup introspection.
    pub fn anonymous() -> Self {
        RequestContext::default()
    }

    /// The inbound header exactly as received, including non-ASCII bytes.
    pub fn authorization(&self) -> Option<&HeaderValue> {
        self.authorization.as_ref()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct GraphQLRequest {
    pub query: String,
    #[serde(default)]
    pub variables: Option<Value>,
    #[serde(default, rename = "operationName")]
    pub operation_name: Option<String>,
}

impl GraphQLRequest {
    pub fn new(query: impl Into<String>) -> Self {
        GraphQLRequest {
            query: query.into(),
            ..Default::default()
        }
    }

    pub fn with_variables(mut self, variables: Value) -> Self {
        self.variables = Some(variables);
        self
    }

    pub fn with_operation_name(mut self, name: impl Into<String>) -> Self {
        self.operation_name = Some(name.into());
        self
    }

    /// Variables as an object; anything else (including `null`) is empty.
    pub fn variables_map(&self) -> Map<String, Value> {
        match &self.variables {
            Some(Value::Object(map)) => map.clone(),
            _ => Map::new(),
        }
    }
}

/// An operation as it is sent to an upstream.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct OutboundOperation {
    pub query: String,
    #[serde(rename = "operationName", skip_serializing_if = "Option::is_none")]
    pub operation_name: Option<String>,
    pub variables: Map<String, Value>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum PathSegment {
    Index(usize),
    Key(String),
}

impl From<&str> for PathSegment {
    fn from(key: &str) -> Self {
        PathSegment::Key(key.to_string())
    }
}

impl From<usize> for PathSegment {
    fn from(index: usize) -> Self {
        PathSegment::Index(index)
    }
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSegment::Index(index) => write!(f, "{index}"),
            PathSegment::Key(key) => f.write_str(key),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct GraphQLError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locations: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<Vec<PathSegment>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Map<String, Value>>,
}

impl GraphQLError {
    pub fn new(message: impl Into<String>) -> Self {
        GraphQLError {
            message: message.into(),
            locations: None,
            path: None,
            extensions: None,
        }
    }

    pub fn with_path(mut self, path: Vec<PathSegment>) -> Self {
        self.path = Some(path);
        self
    }

    /// Tags the error with the upstream it came from.
    pub fn with_service(mut self, service: &str) -> Self {
        self.extensions
            .get_or_insert_with(Map::new)
            .insert("service".to_string(), Value::String(service.to_string()));
        self
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct GraphQLResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<GraphQLError>,
}

impl GraphQLResponse {
    pub fn from_errors(errors: Vec<GraphQLError>) -> Self {
        GraphQLResponse { data: None, errors }
    }
}
