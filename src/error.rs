use crate::GraphQLError;

/// Startup, lifecycle and server errors.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// An upstream could not be introspected
    #[error("introspecting upstream `{service}`: {reason}")]
    Introspection { service: String, reason: String },
    /// The upstream schemas and local extensions do not compose
    #[error("composing schema: {0}")]
    Composition(String),
    #[error("configuration: {0}")]
    Config(String),
    /// Cannot bind the listening socket
    #[error("binding {addr}: {source}")]
    Bind {
        addr: std::net::SocketAddr,
        #[source]
        source: std::io::Error,
    },
    /// The accept loop failed while serving
    #[error("serving: {0}")]
    Server(#[source] std::io::Error),
    /// A lifecycle operation was called in the wrong state
    #[error("cannot {operation} while {state}")]
    Lifecycle {
        operation: &'static str,
        state: &'static str,
    },
}

/// Failure talking to an upstream over HTTP.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("request to `{service}` failed: {source}")]
    Transport {
        service: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("`{service}` answered with status {status}")]
    Status {
        service: String,
        status: http::StatusCode,
    },
    #[error("invalid response from `{service}`: {reason}")]
    Decode { service: String, reason: String },
}

/// A request that cannot be executed at all.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum QueryError {
    #[error("Failed to parse query: {0}")]
    Parse(String),
    #[error("Unknown operation named \"{0}\"")]
    UnknownOperation(String),
    #[error("Must provide operation name if query contains multiple operations")]
    AmbiguousOperation,
    #[error("Document does not contain an operation")]
    MissingOperation,
    #[error("Subscriptions are not supported")]
    SubscriptionUnsupported,
    #[error("Schema does not support {0}s")]
    UnsupportedOperation(&'static str),
    #[error("Cannot query field \"{field}\" on type \"{type_name}\"")]
    UnknownField { type_name: String, field: String },
    #[error("Unknown type \"{0}\"")]
    UnknownType(String),
    #[error("Unknown fragment \"{0}\"")]
    UnknownFragment(String),
    #[error("Cannot spread fragment \"{0}\" within itself")]
    FragmentCycle(String),
    #[error("Response key \"{0}\" uses the reserved prefix \"_stitch_\"")]
    ReservedResponseKey(String),
}

impl From<QueryError> for GraphQLError {
    fn from(error: QueryError) -> Self {
        GraphQLError::new(error.to_string())
    }
}
