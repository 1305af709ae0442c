use async_trait::async_trait;
use http::header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue};
use tracing::{debug, warn};

use crate::config::UpstreamConfig;
use crate::error::{GatewayError, UpstreamError};
use crate::introspection::{INTROSPECTION_OPERATION, INTROSPECTION_QUERY, RemoteSchema};
use crate::{GraphQLResponse, OutboundOperation, RequestContext};

pub const ADMIN_SECRET_HEADER: &str = "x-hasura-admin-secret";

/// Decides which credential headers accompany an outbound operation.
pub trait HeaderPolicy: Send + Sync {
    fn headers(&self, operation_name: Option<&str>, context: &RequestContext) -> HeaderMap;
}

/// Forwards the caller's `Authorization` header verbatim, when present.
pub struct ForwardAuthorization;

impl HeaderPolicy for ForwardAuthorization {
    fn headers(&self, _operation_name: Option<&str>, context: &RequestContext) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(value) = context.authorization() {
            headers.insert(AUTHORIZATION, value.clone());
        }
        headers
    }
}

/// Authenticates introspection with an admin secret and everything else like
/// [`ForwardAuthorization`].
pub struct AdminSecretOnIntrospection {
    admin_secret: HeaderValue,
}

impl AdminSecretOnIntrospection {
    pub fn new(admin_secret: &str) -> Result<Self, GatewayError> {
        let admin_secret = HeaderValue::from_str(admin_secret)
            .map_err(|e| GatewayError::Config(format!("invalid admin_secret: {e}")))?;
        Ok(AdminSecretOnIntrospection { admin_secret })
    }
}

impl HeaderPolicy for AdminSecretOnIntrospection {
    fn headers(&self, operation_name: Option<&str>, context: &RequestContext) -> HeaderMap {
        if operation_name == Some(INTROSPECTION_OPERATION) {
            let mut headers = HeaderMap::new();
            headers.insert(HeaderName::from_static(ADMIN_SECRET_HEADER), self.admin_secret.clone());
            return headers;
        }
        ForwardAuthorization.headers(operation_name, context)
    }
}

/// A GraphQL service the gateway delegates to.
#[async_trait]
pub trait Upstream: Send + Sync {
    fn name(&self) -> &str;

    async fn execute(
        &self,
        operation: &OutboundOperation,
        context: &RequestContext,
    ) -> Result<GraphQLResponse, UpstreamError>;
}

pub struct HttpUpstream {
    name: String,
    url: String,
    client: reqwest::Client,
    headers: Box<dyn HeaderPolicy>,
}

impl HttpUpstream {
    pub fn new(
        name: impl Into<String>,
        url: impl Into<String>,
        headers: Box<dyn HeaderPolicy>,
    ) -> Self {
        HttpUpstream {
            name: name.into(),
            url: url.into(),
            client: reqwest::Client::new(),
            headers,
        }
    }

    pub fn from_config(name: &str, config: &UpstreamConfig) -> Result<Self, GatewayError> {
        let headers: Box<dyn HeaderPolicy> = match &config.admin_secret {
            Some(secret) => Box::new(AdminSecretOnIntrospection::new(secret)?),
            None => Box::new(ForwardAuthorization),
        };
        Ok(HttpUpstream::new(name, &config.routing_url, headers))
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Upstream for HttpUpstream {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(
        &self,
        operation: &OutboundOperation,
        context: &RequestContext,
    ) -> Result<GraphQLResponse, UpstreamError> {
        let headers = self
            .headers
            .headers(operation.operation_name.as_deref(), context);

        debug!(
            service = %self.name,
            operation = operation.operation_name.as_deref().unwrap_or("<anonymous>"),
            "sending upstream operation"
        );

        let response = self
            .client
            .post(&self.url)
            .headers(headers)
            .json(operation)
            .send()
            .await
            .map_err(|source| UpstreamError::Transport {
                service: self.name.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(UpstreamError::Status {
                service: self.name.clone(),
                status,
            });
        }

        response
            .json::<GraphQLResponse>()
            .await
            .map_err(|e| UpstreamError::Decode {
                service: self.name.clone(),
                reason: e.to_string(),
            })
    }
}

/// Fetches the schema of `upstream`. Any error in the response is fatal.
pub async fn introspect(upstream: &dyn Upstream) -> Result<RemoteSchema, GatewayError> {
    let service = upstream.name().to_string();
    let failed = |reason: String| GatewayError::Introspection {
        service: service.clone(),
        reason,
    };

    let operation = OutboundOperation {
        query: INTROSPECTION_QUERY.to_string(),
        operation_name: Some(INTROSPECTION_OPERATION.to_string()),
        variables: Default::default(),
    };
    let response = upstream
        .execute(&operation, &RequestContext::anonymous())
        .await
        .map_err(|e| failed(e.to_string()))?;

    if let Some(error) = response.errors.first() {
        warn!(service = %service, errors = response.errors.len(), "introspection returned errors");
        return Err(failed(error.message.clone()));
    }

    RemoteSchema::from_data(&service, response.data).map_err(failed)
}
