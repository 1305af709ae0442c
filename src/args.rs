use std::{net::SocketAddr, path::PathBuf};

use clap::Parser;
use stitchgate::{GatewayConfig, GatewayError};

#[derive(Debug, Parser)]
#[command(name = "stitchgate", version)]
/// A GraphQL gateway stitching a data service and a users service
pub struct Args {
    /// Path to the YAML configuration file. Built-in defaults are used when omitted.
    #[arg(long, short, env = "STITCHGATE_CONFIG")]
    pub config: Option<PathBuf>,
    /// Address to listen on, overriding the configuration file
    #[arg(long, short, env = "STITCHGATE_LISTEN_ADDRESS")]
    pub listen_address: Option<SocketAddr>,
    /// Log filter, e.g. `info` or `stitchgate=debug,reqwest=warn`
    #[arg(long = "log", env = "STITCHGATE_LOG", default_value = "info")]
    pub log_filter: String,
}

impl Args {
    pub fn gateway_config(&self) -> Result<GatewayConfig, GatewayError> {
        let mut config = match &self.config {
            Some(path) => GatewayConfig::from_file(path)?,
            None => GatewayConfig::default(),
        };
        if let Some(listen_address) = self.listen_address {
            config.listen_address = listen_address;
        }
        Ok(config)
    }
}

pub fn parse() -> Args {
    Args::parse()
}
