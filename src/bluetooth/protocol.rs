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

//! Device command vocabulary and acknowledgement tokens.
//!
//! Commands are sent as raw single-byte ASCII with no framing. The device
//! answers with newline-terminated text lines, two of which are fixed
//! acknowledgement tokens; everything else is telemetry.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Standard SPP UUID.
pub const SPP_UUID: Uuid = Uuid::from_u128(0x00001101_0000_1000_8000_00805F9B34FB);

/// Acknowledgement for [`DeviceCommand::LedOn`].
pub const ACK_LED_ON: &str = "LED ON";

/// Acknowledgement for [`DeviceCommand::LedOff`].
pub const ACK_LED_OFF: &str = "LED OFF";

/// Commands understood by the reference firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceCommand {
    LedOn,
    LedOff,
    TelemetryOn,
    TelemetryOff,
}

impl DeviceCommand {
    pub const ALL: [DeviceCommand; 4] = [
        Self::LedOn,
        Self::LedOff,
        Self::TelemetryOn,
        Self::TelemetryOff,
    ];

    /// Parse a wire code or a friendly name.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().replace([' ', '-'], "_").as_str() {
            "a" | "on" | "led_on" => Some(Self::LedOn),
            "b" | "off" | "led_off" => Some(Self::LedOff),
            "c" | "telemetry_on" | "start" => Some(Self::TelemetryOn),
            "d" | "telemetry_off" | "stop" => Some(Self::TelemetryOff),
            _ => None,
        }
    }

    /// Wire code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::LedOn => "A",
            Self::LedOff => "B",
            Self::TelemetryOn => "C",
            Self::TelemetryOff => "D",
        }
    }

    /// Look up a command by its wire code.
    pub fn from_code(code: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.code() == code)
    }

    /// Token the device sends back once the command took effect.
    pub fn ack_token(&self) -> Option<&'static str> {
        match self {
            Self::LedOn => Some(ACK_LED_ON),
            Self::LedOff => Some(ACK_LED_OFF),
            Self::TelemetryOn | Self::TelemetryOff => None,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::LedOn => "LED on",
            Self::LedOff => "LED off",
            Self::TelemetryOn => "telemetry on",
            Self::TelemetryOff => "telemetry off",
        }
    }

    /// Text shown when the device confirms the command.
    pub fn confirmed_text(&self) -> &'static str {
        match self {
            Self::LedOn => "LED turned on",
            Self::LedOff => "LED turned off",
            Self::TelemetryOn => "Telemetry enabled",
            Self::TelemetryOff => "Telemetry disabled",
        }
    }
}

/// Text shown when no confirmation arrived for `code` in time.
pub fn unconfirmed_text(code: &str) -> String {
    match DeviceCommand::from_code(code) {
        Some(cmd @ (DeviceCommand::LedOn | DeviceCommand::LedOff)) => {
            format!("{} was not confirmed", cmd.description())
        }
        _ => "No confirmation received".to_string(),
    }
}

/// One acknowledgement token and the command it confirms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Acknowledgement {
    pub token: String,
    pub command: String,
}

impl Acknowledgement {
    pub fn new(token: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            command: command.into(),
        }
    }
}

/// Maps incoming lines to the command they acknowledge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckTable {
    entries: Vec<Acknowledgement>,
}

impl AckTable {
    pub fn new(entries: Vec<Acknowledgement>) -> Self {
        Self { entries }
    }

    /// Command acknowledged by `line`, if `line` is a known token.
    ///
    /// Tokens match exactly; the line is expected to be trimmed already.
    pub fn command_for(&self, line: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|ack| ack.token == line)
            .map(|ack| ack.command.as_str())
    }

    pub fn entries(&self) -> &[Acknowledgement] {
        &self.entries
    }
}

impl Default for AckTable {
    fn default() -> Self {
        let entries = DeviceCommand::ALL
            .iter()
            .filter_map(|cmd| cmd.ack_token().map(|token| Acknowledgement::new(token, cmd.code())))
            .collect();
        Self { entries }
    }
}
