//! Daemon configuration.
//!
//! Loaded from (and, for a fresh install, written to) a TOML file. The
//! interface table maps forwarding-plane interface ids — the values carried
//! in circuit-ids — to their device and flex-id tag.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::reconcile::CalloutPolicy;
use crate::{Error, Result};

/// Top-level daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub misc: MiscConfig,
    #[serde(default)]
    pub policy: CalloutPolicy,
    #[serde(default)]
    pub ifaces: Vec<IfaceConfig>,
}

/// Process-level settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MiscConfig {
    /// Rendezvous socket the Kea hook library connects to.
    pub kea_socket: PathBuf,
}

/// One subscriber-facing interface of the forwarding plane.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IfaceConfig {
    /// Interface id as carried in circuit-ids.
    pub id: u32,
    /// Device name on the forwarding plane.
    pub link: String,
    /// Tag returned on circuit-id query callouts.
    #[serde(default)]
    pub flex_id: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            misc: MiscConfig {
                kea_socket: PathBuf::from("/run/rustbng/kea.sock"),
            },
            policy: CalloutPolicy::default(),
            ifaces: Vec::new(),
        }
    }
}

impl Config {
    /// Loads the configuration, writing the defaults first if the file does
    /// not exist yet.
    pub async fn load_or_create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if tokio::fs::try_exists(path).await? {
            let body = tokio::fs::read_to_string(path).await?;
            toml::from_str(&body).map_err(|e| Error::Config(e.to_string()))
        } else {
            let config = Config::default();
            config.save(path).await?;
            Ok(config)
        }
    }

    /// Writes the configuration as TOML.
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let body = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        tokio::fs::write(path, body).await?;
        Ok(())
    }
}
