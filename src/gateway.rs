use futures::future::try_join_all;
use std::sync::Arc;
use tracing::{Instrument, debug, info, info_span};

use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::query_executor::QueryExecutor;
use crate::query_planner::{PreparedOperation, QueryPlanner};
use crate::schema_composer::{ComposedSchema, SchemaComposer};
use crate::upstream::{HttpUpstream, Upstream, introspect};
use crate::{GraphQLRequest, GraphQLResponse, RequestContext, UpstreamMap};

/// The composed schema together with the upstreams answering it.
#[derive(Clone)]
pub struct Gateway {
    schema: Arc<ComposedSchema>,
    upstreams: Arc<UpstreamMap>,
}

impl Gateway {
    /// Introspects every configured upstream and composes the gateway schema.
    pub async fn connect(config: &GatewayConfig) -> Result<Self, GatewayError> {
        let upstreams = config
            .upstream_configs()
            .into_iter()
            .map(|(name, upstream)| {
                HttpUpstream::from_config(name, upstream).map(|u| Arc::new(u) as Arc<dyn Upstream>)
            })
            .collect::<Result<Vec<_>, _>>()?;

        Self::from_upstreams(upstreams).await
    }

    pub async fn from_upstreams(upstreams: Vec<Arc<dyn Upstream>>) -> Result<Self, GatewayError> {
        let remotes =
            try_join_all(upstreams.iter().map(|upstream| introspect(upstream.as_ref()))).await?;

        let mut composer = SchemaComposer::new();
        for remote in remotes {
            info!(
                service = %remote.service,
                roots = ?remote.root_type_names().collect::<Vec<_>>(),
                types = remote.schema.types.len(),
                "introspected upstream"
            );
            composer = composer.register(remote);
        }
        let schema = composer.compose()?;

        let upstreams = upstreams
            .into_iter()
            .map(|upstream| (upstream.name().to_string(), upstream))
            .collect();

        Ok(Gateway {
            schema: Arc::new(schema),
            upstreams: Arc::new(upstreams),
        })
    }

    pub fn schema(&self) -> &ComposedSchema {
        &self.schema
    }

    /// Executes one client request. Failures are reported in the response.
    pub async fn execute(
        &self,
        request: GraphQLRequest,
        context: RequestContext,
    ) -> GraphQLResponse {
        let span = info_span!(
            "graphql_request",
            operation_name = request.operation_name.as_deref().unwrap_or("<anonymous>")
        );

        async move {
            let operation = match PreparedOperation::parse(&request) {
                Ok(operation) => operation,
                Err(e) => return GraphQLResponse::from_errors(vec![e.into()]),
            };
            let plan = match QueryPlanner::new(&self.schema).plan(&operation) {
                Ok(plan) => plan,
                Err(e) => return GraphQLResponse::from_errors(vec![e.into()]),
            };
            debug!(
                kind = plan.kind.as_str(),
                upstreams = plan.service_queries.len(),
                "executing plan"
            );

            QueryExecutor::new(&self.schema, &self.upstreams, &operation, &context)
                .execute(&plan)
                .await
        }
        .instrument(span)
        .await
    }
}
