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

//! Platform services the link layer depends on.

use futures::future::BoxFuture;
use std::fmt;
use uuid::Uuid;

use super::link::{BoxedStream, LinkError};

/// Name shown for devices that do not report one.
pub const UNKNOWN_DEVICE_NAME: &str = "Unknown device";

/// Separator between name and address in a device descriptor.
const DESCRIPTOR_SEPARATOR: &str = " - ";

/// A resolved remote endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Canonical address string.
    pub address: String,
    /// Raw address bytes, most significant first.
    pub bytes: [u8; 6],
    /// Display name, if the platform knows one.
    pub name: Option<String>,
}

/// A paired Bluetooth device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairedDevice {
    pub name: String,
    pub address: String,
}

impl PairedDevice {
    pub fn new(name: Option<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.unwrap_or_else(|| UNKNOWN_DEVICE_NAME.to_string()),
            address: address.into(),
        }
    }

    /// Parse a `"<name> - <address>"` descriptor.
    pub fn parse(descriptor: &str) -> Option<Self> {
        let parts: Vec<&str> = descriptor.split(DESCRIPTOR_SEPARATOR).collect();
        match parts.as_slice() {
            [name, address] if !address.trim().is_empty() => Some(Self {
                name: name.trim().to_string(),
                address: address.trim().to_string(),
            }),
            _ => None,
        }
    }
}

impl fmt::Display for PairedDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.name, DESCRIPTOR_SEPARATOR, self.address)
    }
}

/// Radio-side services consumed by the link layer.
///
/// Implemented by the BlueZ adapter for real hardware and by the loopback
/// double in tests.
pub trait Platform: Send + Sync {
    /// Resolve an address string to an endpoint.
    ///
    /// Fails with `PermissionDenied`, `TransportUnavailable` or
    /// `AddressInvalid`.
    fn resolve<'a>(&'a self, address: &'a str) -> BoxFuture<'a, Result<Endpoint, LinkError>>;

    /// Stop any running device discovery.
    fn cancel_discovery(&self) -> BoxFuture<'_, Result<(), LinkError>>;

    /// Open a stream to `endpoint` for the given service class.
    fn open_stream<'a>(
        &'a self,
        endpoint: &'a Endpoint,
        service: Uuid,
    ) -> BoxFuture<'a, Result<BoxedStream, LinkError>>;

    /// Devices already paired with the local adapter.
    fn paired_devices(&self) -> BoxFuture<'_, Result<Vec<PairedDevice>, LinkError>>;
}

/// Parse a MAC-style `AA:BB:CC:DD:EE:FF` address.
///
/// `-` is accepted as a separator as well; case is ignored.
pub fn parse_address(address: &str) -> Result<[u8; 6], LinkError> {
    let invalid = || LinkError::AddressInvalid(address.to_string());

    let parts: Vec<&str> = address.trim().split([':', '-']).collect();
    if parts.len() != 6 {
        return Err(invalid());
    }

    let mut bytes = [0u8; 6];
    for (byte, part) in bytes.iter_mut().zip(parts) {
        if part.len() != 2 {
            return Err(invalid());
        }
        *byte = u8::from_str_radix(part, 16).map_err(|_| invalid())?;
    }
    Ok(bytes)
}

/// Format address bytes as upper-case colon separated hex.
pub fn format_address(bytes: &[u8; 6]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(":")
}
