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

//! In-memory platform for tests and demos.
//!
//! Every successful `open_stream` creates a duplex pipe; the host end goes
//! to the link and the device end is delivered on the channel returned by
//! [`LoopbackPlatform::new`].

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::io::DuplexStream;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::link::{BoxedStream, LinkError};
use super::platform::{format_address, parse_address, Endpoint, PairedDevice, Platform};

const PIPE_CAPACITY: usize = 4096;

/// Device side of a loopback connection.
#[derive(Debug)]
pub struct DeviceEnd {
    pub address: String,
    pub service: Uuid,
    pub stream: DuplexStream,
}

#[derive(Debug, Clone)]
struct KnownDevice {
    name: Option<String>,
    refuse: bool,
}

/// Scriptable stand-in for the Bluetooth adapter.
pub struct LoopbackPlatform {
    devices: Mutex<HashMap<String, KnownDevice>>,
    powered: AtomicBool,
    authorized: AtomicBool,
    discovery_cancels: AtomicUsize,
    open_delay: Mutex<Duration>,
    device_tx: mpsc::UnboundedSender<DeviceEnd>,
}

impl LoopbackPlatform {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<DeviceEnd>) {
        let (device_tx, device_rx) = mpsc::unbounded_channel();
        let platform = Self {
            devices: Mutex::new(HashMap::new()),
            powered: AtomicBool::new(true),
            authorized: AtomicBool::new(true),
            discovery_cancels: AtomicUsize::new(0),
            open_delay: Mutex::new(Duration::ZERO),
            device_tx,
        };
        (platform, device_rx)
    }

    /// Register a paired device that accepts connections.
    pub fn add_device(&self, address: &str, name: Option<&str>) -> Result<(), LinkError> {
        self.insert(address, name, false)
    }

    /// Register a paired device that refuses every handshake.
    pub fn add_refusing_device(&self, address: &str, name: Option<&str>) -> Result<(), LinkError> {
        self.insert(address, name, true)
    }

    fn insert(&self, address: &str, name: Option<&str>, refuse: bool) -> Result<(), LinkError> {
        let key = format_address(&parse_address(address)?);
        self.devices.lock().insert(
            key,
            KnownDevice {
                name: name.map(str::to_string),
                refuse,
            },
        );
        Ok(())
    }

    pub fn set_powered(&self, powered: bool) {
        self.powered.store(powered, Ordering::Release);
    }

    pub fn set_authorized(&self, authorized: bool) {
        self.authorized.store(authorized, Ordering::Release);
    }

    /// Make every handshake take `delay` before it answers.
    pub fn set_open_delay(&self, delay: Duration) {
        *self.open_delay.lock() = delay;
    }

    /// How often discovery was cancelled.
    pub fn discovery_cancels(&self) -> usize {
        self.discovery_cancels.load(Ordering::Acquire)
    }
}

impl Platform for LoopbackPlatform {
    fn resolve<'a>(&'a self, address: &'a str) -> BoxFuture<'a, Result<Endpoint, LinkError>> {
        async move {
            if !self.authorized.load(Ordering::Acquire) {
                return Err(LinkError::PermissionDenied(
                    "Bluetooth permissions not granted".to_string(),
                ));
            }
            if !self.powered.load(Ordering::Acquire) {
                return Err(LinkError::TransportUnavailable(
                    "Bluetooth is powered off".to_string(),
                ));
            }

            let bytes = parse_address(address)?;
            let address = format_address(&bytes);
            let name = self
                .devices
                .lock()
                .get(&address)
                .and_then(|d| d.name.clone());

            Ok(Endpoint {
                address,
                bytes,
                name,
            })
        }
        .boxed()
    }

    fn cancel_discovery(&self) -> BoxFuture<'_, Result<(), LinkError>> {
        self.discovery_cancels.fetch_add(1, Ordering::AcqRel);
        futures::future::ready(Ok(())).boxed()
    }

    fn open_stream<'a>(
        &'a self,
        endpoint: &'a Endpoint,
        service: Uuid,
    ) -> BoxFuture<'a, Result<BoxedStream, LinkError>> {
        let delay = *self.open_delay.lock();
        async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let known = self.devices.lock().get(&endpoint.address).cloned();
            match known {
                None => Err(LinkError::ConnectFailed(format!(
                    "no device answered at {}",
                    endpoint.address
                ))),
                Some(device) if device.refuse => Err(LinkError::ConnectFailed(format!(
                    "{} refused the connection",
                    endpoint.address
                ))),
                Some(_) => {
                    let (host, device) = tokio::io::duplex(PIPE_CAPACITY);
                    self.device_tx
                        .send(DeviceEnd {
                            address: endpoint.address.clone(),
                            service,
                            stream: device,
                        })
                        .map_err(|_| {
                            LinkError::ConnectFailed("loopback device end dropped".to_string())
                        })?;
                    Ok(Box::new(host) as BoxedStream)
                }
            }
        }
        .boxed()
    }

    fn paired_devices(&self) -> BoxFuture<'_, Result<Vec<PairedDevice>, LinkError>> {
        let mut devices: Vec<PairedDevice> = self
            .devices
            .lock()
            .iter()
            .map(|(address, device)| PairedDevice::new(device.name.clone(), address.clone()))
            .collect();
        devices.sort_by(|a, b| a.address.cmp(&b.address));
        futures::future::ready(Ok(devices)).boxed()
    }
}
