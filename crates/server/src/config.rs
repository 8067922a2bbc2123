//! Layered bridge configuration

use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use mifare_apdu_pcsc::PcscConfig;
use mifare_classic::EngineConfig;
use serde::{Deserialize, Serialize};

/// Config file looked up in the working directory when `--config` is not given
pub(crate) const DEFAULT_CONFIG_FILE: &str = "mifare-bridge.toml";

/// Environment variables with this prefix override the file; `__` separates nested keys
const ENV_PREFIX: &str = "MIFARE_BRIDGE_";

const DEFAULT_PORT: u16 = 3007;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct Config {
    /// HTTP listen address
    pub(crate) listen: SocketAddr,
    /// Bind the first reader whose name contains this string
    pub(crate) reader: Option<String>,
    /// Serve a simulated card instead of a PC/SC reader
    pub(crate) simulate: bool,
    pub(crate) engine: EngineConfig,
    pub(crate) pcsc: PcscConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: SocketAddr::new(Ipv4Addr::LOCALHOST.into(), DEFAULT_PORT),
            reader: None,
            simulate: false,
            engine: EngineConfig::default(),
            pcsc: PcscConfig::default(),
        }
    }
}

/// Command line values; they win over every other source
#[derive(Debug, Default, Serialize)]
pub(crate) struct Overrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) listen: Option<SocketAddr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) reader: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub(crate) simulate: bool,
}

impl Config {
    /// Defaults, then the TOML file if it exists, then the environment, then the CLI
    pub(crate) fn figment(path: &Path, overrides: &Overrides) -> Figment {
        Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .merge(Serialized::defaults(overrides))
    }

    pub(crate) fn load(path: &Path, overrides: &Overrides) -> eyre::Result<Self> {
        Ok(Self::figment(path, overrides).extract()?)
    }
}
