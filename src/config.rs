//! Simulator configuration, read once at startup.

use crate::channel::lan::MAX_LAN_ADDRS;
use crate::channel::{ChannelConfig, MAX_CHANNELS};
use crate::error::{Result, SimError};

use serde::Deserialize;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/bmcsim/sim.toml";

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SimConfig {
    /// Raw message logging level; 2 or more logs every message's bytes.
    #[serde(default)]
    pub debug: u8,

    /// Address of the telnet console listener, if any.
    #[serde(default)]
    pub console: Option<SocketAddr>,

    #[serde(default, rename = "channel")]
    pub channels: Vec<ChannelConfig>,
}

impl SimConfig {
    /// Load configuration from a file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|err| {
            SimError::Config(format!("failed to read {}: {err}", path.display()))
        })?;

        content.parse()
    }

    /// Check the limits serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.channels.len() > MAX_CHANNELS {
            return Err(SimError::Config(format!(
                "{} channels configured, at most {MAX_CHANNELS} are supported",
                self.channels.len()
            )));
        }

        for (index, channel) in self.channels.iter().enumerate() {
            if let ChannelConfig::Lan(lan) = channel
                && lan.addresses.len() > MAX_LAN_ADDRS
            {
                return Err(SimError::Config(format!(
                    "channel {index}: {} LAN addresses configured, at most {MAX_LAN_ADDRS} are supported",
                    lan.addresses.len()
                )));
            }
        }

        Ok(())
    }
}

impl FromStr for SimConfig {
    type Err = SimError;

    fn from_str(content: &str) -> Result<Self> {
        let config: SimConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }
}
