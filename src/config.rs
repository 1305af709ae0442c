use serde::Deserialize;
use std::net::{Ipv4Addr, SocketAddr};
use std::{fs, path::Path};

use crate::{DATA_SERVICE, USERS_SERVICE, error::GatewayError};

pub const DEFAULT_DATA_URL: &str = "https://scalaxi-hasura.herokuapp.com/v1/graphql";
pub const DEFAULT_USERS_URL: &str = "https://scalaxi-users.herokuapp.com/graphql";
pub const DEFAULT_ADMIN_SECRET: &str = "Scalaxi1";
pub const DEFAULT_GRAPHQL_PATH: &str = "/graphql";
const DEFAULT_PORT: u16 = 4000;

/// Gateway settings, usually read from a YAML file.
///
/// ```yaml
/// listen_address: 0.0.0.0:4000
/// upstreams:
///   data:
///     routing_url: http://localhost:8080/v1/graphql
///     admin_secret: secret
///   users:
///     routing_url: http://localhost:4001/graphql
/// ```
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct GatewayConfig {
    pub listen_address: SocketAddr,
    pub graphql_path: String,
    pub upstreams: UpstreamsConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct UpstreamsConfig {
    #[serde(default = "UpstreamConfig::default_data")]
    pub data: UpstreamConfig,
    #[serde(default = "UpstreamConfig::default_users")]
    pub users: UpstreamConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct UpstreamConfig {
    pub routing_url: String,
    /// When set, introspection is authenticated with this secret instead of
    /// the caller's credential.
    #[serde(default)]
    pub admin_secret: Option<String>,
}

impl UpstreamConfig {
    pub fn new(routing_url: impl Into<String>) -> Self {
        UpstreamConfig {
            routing_url: routing_url.into(),
            admin_secret: None,
        }
    }

    pub fn with_admin_secret(mut self, secret: impl Into<String>) -> Self {
        self.admin_secret = Some(secret.into());
        self
    }

    fn default_data() -> Self {
        UpstreamConfig::new(DEFAULT_DATA_URL).with_admin_secret(DEFAULT_ADMIN_SECRET)
    }

    fn default_users() -> Self {
        UpstreamConfig::new(DEFAULT_USERS_URL)
    }
}

impl Default for UpstreamsConfig {
    fn default() -> Self {
        UpstreamsConfig {
            data: UpstreamConfig::default_data(),
            users: UpstreamConfig::default_users(),
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        GatewayConfig {
            listen_address: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            graphql_path: DEFAULT_GRAPHQL_PATH.to_string(),
            upstreams: UpstreamsConfig::default(),
        }
    }
}

impl GatewayConfig {
    pub fn from_file(path: &Path) -> Result<Self, GatewayError> {
        tracing::debug!(path = %path.display(), "reading gateway configuration");

        let contents = fs::read_to_string(path).map_err(|e| {
            GatewayError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_yaml(&contents)
    }

    pub fn from_yaml(contents: &str) -> Result<Self, GatewayError> {
        let config: GatewayConfig = serde_yaml::from_str(contents)
            .map_err(|e| GatewayError::Config(format!("failed to parse configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), GatewayError> {
        if !self.graphql_path.starts_with('/') {
            return Err(GatewayError::Config(format!(
                "graphql_path must start with '/', got {:?}",
                self.graphql_path
            )));
        }

        for (name, upstream) in self.upstream_configs() {
            let url = reqwest::Url::parse(&upstream.routing_url).map_err(|e| {
                GatewayError::Config(format!(
                    "invalid routing_url for `{name}` ({}): {e}",
                    upstream.routing_url
                ))
            })?;
            if !matches!(url.scheme(), "http" | "https") {
                return Err(GatewayError::Config(format!(
                    "routing_url for `{name}` must be http or https"
                )));
            }
        }

        Ok(())
    }

    /// Upstreams keyed by the service name the schema composer knows them by.
    pub fn upstream_configs(&self) -> [(&'static str, &UpstreamConfig); 2] {
        [
            (DATA_SERVICE, &self.upstreams.data),
            (USERS_SERVICE, &self.upstreams.users),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config = GatewayConfig::from_yaml("{}").unwrap();
        assert_eq!(config, GatewayConfig::default());
        assert_eq!(
            config.upstreams.data.admin_secret.as_deref(),
            Some(DEFAULT_ADMIN_SECRET)
        );
        assert_eq!(config.upstreams.users.admin_secret, None);
    }

    #[test]
    fn partial_upstream_override() {
        let config = GatewayConfig::from_yaml(
            r#"
listen_address: 127.0.0.1:5000
upstreams:
  users:
    routing_url: http://localhost:4001/graphql
"#,
        )
        .unwrap();

        assert_eq!(config.listen_address.port(), 5000);
        assert_eq!(config.upstreams.users.routing_url, "http://localhost:4001/graphql");
        assert_eq!(config.upstreams.data.routing_url, DEFAULT_DATA_URL);
    }

    #[test]
    fn rejects_bad_urls_and_unknown_keys() {
        let err = GatewayConfig::from_yaml(
            r#"
upstreams:
  data:
    routing_url: not a url
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("invalid routing_url for `data`"));

        assert!(GatewayConfig::from_yaml("cache: true").is_err());
        assert!(GatewayConfig::from_yaml("graphql_path: graphql").is_err());
    }
}
