use crate::signature::Encoding;
use reqwest::Url;
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::time::Duration;

pub const SPONSOR_SECRET_ENV: &str = "SPONSOR_SECRET_KEY";
pub const NETWORK_ENV: &str = "RELAY_NETWORK";
pub const NODE_URL_ENV: &str = "RELAY_NODE_URL";

pub const LOCAL_ENDPOINT: &str = "http://localhost:8000";

pub const DEFAULT_GAS_BUDGET: u64 = 10_000_000;
pub const DEFAULT_GAS_PRICE: u64 = 1_000;
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_PAGE_SIZE: u32 = 50;

#[derive(Debug, thiserror::Error, Eq, PartialEq)]
pub enum ConfigError {
    #[error("unknown network '{0}', expected mainnet, testnet or local")]
    UnknownNetwork(String),

    #[error("no node endpoint configured for {0}, set RELAY_NODE_URL")]
    MissingEndpoint(Network),

    #[error("invalid node endpoint '{url}': {details}")]
    InvalidEndpoint { url: String, details: String },
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Network {
    Mainnet,
    Testnet,
    Local,
}

impl Network {
    pub const fn name(&self) -> &'static str {
        match self {
            Network::Mainnet => "mainnet",
            Network::Testnet => "testnet",
            Network::Local => "local",
        }
    }

    /// Only the local network has a built-in endpoint; public networks are
    /// always configured explicitly.
    pub fn default_endpoint(&self) -> Option<&'static str> {
        match self {
            Network::Local => Some(LOCAL_ENDPOINT),
            Network::Mainnet | Network::Testnet => None,
        }
    }
}

impl Default for Network {
    fn default() -> Self {
        Network::Local
    }
}

impl Display for Network {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Network {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mainnet" | "production" | "prod" => Ok(Network::Mainnet),
            "testnet" | "test" => Ok(Network::Testnet),
            "local" | "localnet" => Ok(Network::Local),
            other => Err(ConfigError::UnknownNetwork(other.to_string())),
        }
    }
}

#[derive(Clone, Debug)]
pub struct RelayConfig {
    pub network: Network,
    pub endpoint: Url,
    pub gas_budget: u64,
    pub gas_price: u64,
    pub default_encoding: Encoding,
    pub request_timeout: Duration,
    pub page_size: u32,
}

impl RelayConfig {
    pub fn new(network: Network, endpoint: Url) -> Self {
        Self {
            network,
            endpoint,
            gas_budget: DEFAULT_GAS_BUDGET,
            gas_price: DEFAULT_GAS_PRICE,
            default_encoding: Encoding::default(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Resolve the endpoint for `network`, preferring `endpoint` when given.
    pub fn for_network(network: Network, endpoint: Option<&str>) -> Result<Self, ConfigError> {
        let url = endpoint
            .or_else(|| network.default_endpoint())
            .ok_or(ConfigError::MissingEndpoint(network))?;
        let endpoint = Url::parse(url).map_err(|e| ConfigError::InvalidEndpoint {
            url: url.to_string(),
            details: e.to_string(),
        })?;
        tracing::debug!(%network, %endpoint, "configuration loaded");
        Ok(Self::new(network, endpoint))
    }

    pub fn with_gas(mut self, budget: u64, price: u64) -> Self {
        self.gas_budget = budget;
        self.gas_price = price;
        self
    }

    pub fn with_default_encoding(mut self, encoding: Encoding) -> Self {
        self.default_encoding = encoding;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_has_a_default_endpoint() {
        let config = RelayConfig::for_network(Network::default(), None).unwrap();
        assert_eq!(config.network, Network::Local);
        assert_eq!(config.endpoint.as_str(), "http://localhost:8000/");
        assert_eq!(config.default_encoding, Encoding::Base64);
        assert_eq!(config.gas_budget, DEFAULT_GAS_BUDGET);
    }

    #[test]
    fn public_networks_need_an_endpoint() {
        assert_eq!(
            RelayConfig::for_network(Network::Mainnet, None).unwrap_err(),
            ConfigError::MissingEndpoint(Network::Mainnet)
        );
        let network: Network = "test".parse().unwrap();
        let config =
            RelayConfig::for_network(network, Some("https://node.test.local:9000")).unwrap();
        assert_eq!(config.network, Network::Testnet);
        assert_eq!(config.endpoint.port(), Some(9000));
    }

    #[test]
    fn rejects_bad_values() {
        assert!(matches!(
            "moon".parse::<Network>(),
            Err(ConfigError::UnknownNetwork(_))
        ));
        assert_eq!("PROD".parse::<Network>().unwrap(), Network::Mainnet);
        assert!(matches!(
            RelayConfig::for_network(Network::Local, Some("not a url")),
            Err(ConfigError::InvalidEndpoint { .. })
        ));
    }
}
