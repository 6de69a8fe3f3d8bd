// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Configuration module.
//!
//! Handles loading and saving application settings.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::bluetooth::{AckTable, Acknowledgement};
use crate::session::SessionConfig;

/// Directory name under the user's config dir.
const APP_DIR: &str = "btremote";

/// Application configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Bluetooth settings.
    pub bluetooth: BluetoothConfig,

    /// Device protocol settings.
    pub protocol: ProtocolConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BluetoothConfig {
    /// Device to connect to when none is given on the command line.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_address: Option<String>,

    /// Fixed RFCOMM channel. When unset the serial port service is looked
    /// up through SDP.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rfcomm_channel: Option<u8>,

    /// Handshake timeout in milliseconds.
    pub connect_timeout_ms: u64,
}

impl Default for BluetoothConfig {
    fn default() -> Self {
        Self {
            default_address: None,
            rfcomm_channel: None,
            connect_timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// How long a command may wait for its acknowledgement.
    pub command_timeout_ms: u64,

    /// How long a request waits for a reply line.
    pub reply_window_ms: u64,

    /// Telemetry lines kept in history; 0 keeps only the latest one.
    pub history_limit: usize,

    /// Acknowledgement tokens sent by the device.
    pub acknowledgements: Vec<Acknowledgement>,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            command_timeout_ms: 3_000,
            reply_window_ms: 2_000,
            history_limit: 0,
            acknowledgements: AckTable::default().entries().to_vec(),
        }
    }
}

impl Config {
    /// Default location of the configuration file.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
            .join("config.toml")
    }

    /// Load configuration from the default file or create it.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::default_path())
    }

    /// Load configuration from `path`, writing defaults if it is missing.
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            let config = toml::from_str(&content)
                .with_context(|| format!("parsing {}", path.display()))?;
            Ok(config)
        } else {
            let config = Self::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    /// Save configuration to `path`.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            connect_timeout: Duration::from_millis(self.bluetooth.connect_timeout_ms),
            command_timeout: Duration::from_millis(self.protocol.command_timeout_ms),
            reply_window: Duration::from_millis(self.protocol.reply_window_ms),
            history_limit: self.protocol.history_limit,
            acknowledgements: AckTable::new(self.protocol.acknowledgements.clone()),
        }
    }
}
