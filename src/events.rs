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

//! Session events and their user-facing notifications.

use crate::bluetooth::{unconfirmed_text, DeviceCommand};
use crate::state::ConnectionState;

/// Events emitted by a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The connection state changed.
    StateChanged(ConnectionState),
    /// A command was requested while not connected; nothing was written.
    NotConnected { command: String },
    /// A command was written to the link.
    CommandSent { command: String },
    /// An acknowledgement token arrived.
    ///
    /// `confirmed` is set when it matched the pending command.
    Acknowledged {
        token: String,
        command: String,
        confirmed: bool,
    },
    /// The pending command timed out without acknowledgement.
    UnconfirmedCommand { command: String },
    /// A telemetry line arrived.
    MessageReceived(String),
    /// The peer closed the link.
    LinkClosed,
    /// The link failed and was torn down.
    LinkError(String),
}

impl SessionEvent {
    /// Short notification text for display, if the event deserves one.
    pub fn notification(&self) -> Option<String> {
        match self {
            SessionEvent::NotConnected { .. } => {
                Some("Error: no Bluetooth connection".to_string())
            }
            SessionEvent::CommandSent { command } => {
                Some(format!("Command sent: \"{}\"", command))
            }
            SessionEvent::Acknowledged { command, .. } => Some(
                DeviceCommand::from_code(command)
                    .map(|cmd| cmd.confirmed_text().to_string())
                    .unwrap_or_else(|| format!("Command \"{}\" confirmed", command)),
            ),
            SessionEvent::UnconfirmedCommand { command } => {
                Some(format!("Error: {}", unconfirmed_text(command)))
            }
            SessionEvent::LinkClosed => Some("Connection closed by device".to_string()),
            SessionEvent::LinkError(message) => Some(format!("Error: {}", message)),
            SessionEvent::StateChanged(_) | SessionEvent::MessageReceived(_) => None,
        }
    }
}
