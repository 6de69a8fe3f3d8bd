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

//! BlueZ backed platform using classic RFCOMM.

use bluer::rfcomm::{Profile, Role, SocketAddr, Stream};
use bluer::{Adapter, Address, ErrorKind, Session};
use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::link::{BoxedStream, LinkError};
use super::platform::{parse_address, Endpoint, PairedDevice, Platform};

/// Platform backed by the default BlueZ adapter.
pub struct BluezPlatform {
    session: Session,
    adapter: Adapter,
    rfcomm_channel: Option<u8>,
}

impl BluezPlatform {
    /// Connect to BlueZ and pick the default adapter.
    ///
    /// With `rfcomm_channel` set, streams connect to that channel directly;
    /// otherwise the service UUID is resolved through an SDP client profile.
    pub async fn new(rfcomm_channel: Option<u8>) -> Result<Self, LinkError> {
        let session = Session::new().await.map_err(map_bluer_error)?;
        debug!("BlueZ session created");

        let adapter = session.default_adapter().await.map_err(map_bluer_error)?;
        info!("Using Bluetooth adapter: {}", adapter.name());

        Ok(Self {
            session,
            adapter,
            rfcomm_channel,
        })
    }

    async fn connect_channel(&self, address: Address, channel: u8) -> Result<BoxedStream, LinkError> {
        debug!("Connecting to {} on RFCOMM channel {}", address, channel);
        let stream = Stream::connect(SocketAddr::new(address, channel))
            .await
            .map_err(|e| LinkError::ConnectFailed(e.to_string()))?;
        Ok(Box::new(stream))
    }

    async fn connect_profile(&self, address: Address, service: Uuid) -> Result<BoxedStream, LinkError> {
        debug!("Connecting to {} via service {}", address, service);

        let profile = Profile {
            uuid: service,
            role: Some(Role::Client),
            require_authentication: Some(false),
            require_authorization: Some(false),
            auto_connect: Some(false),
            ..Default::default()
        };
        let mut handle = self
            .session
            .register_profile(profile)
            .await
            .map_err(map_bluer_error)?;

        let device = self.adapter.device(address).map_err(map_bluer_error)?;
        let connect = device.connect_profile(&service);
        tokio::pin!(connect);
        let mut connect_done = false;

        loop {
            tokio::select! {
                result = &mut connect, if !connect_done => {
                    connect_done = true;
                    if let Err(e) = result {
                        return Err(LinkError::ConnectFailed(e.to_string()));
                    }
                }
                request = handle.next() => {
                    let request = request.ok_or_else(|| {
                        LinkError::ConnectFailed("profile unregistered before connecting".to_string())
                    })?;
                    let stream = request
                        .accept()
                        .map_err(|e| LinkError::ConnectFailed(e.to_string()))?;
                    return Ok(Box::new(stream));
                }
            }
        }
    }
}

impl Platform for BluezPlatform {
    fn resolve<'a>(&'a self, address: &'a str) -> BoxFuture<'a, Result<Endpoint, LinkError>> {
        async move {
            if !self.adapter.is_powered().await.map_err(map_bluer_error)? {
                return Err(LinkError::TransportUnavailable(format!(
                    "adapter {} is powered off",
                    self.adapter.name()
                )));
            }

            let bytes = parse_address(address)?;
            let remote = Address::new(bytes);
            let name = match self.adapter.device(remote) {
                Ok(device) => device.alias().await.ok(),
                Err(_) => None,
            };

            Ok(Endpoint {
                address: remote.to_string(),
                bytes,
                name,
            })
        }
        .boxed()
    }

    fn cancel_discovery(&self) -> BoxFuture<'_, Result<(), LinkError>> {
        async move {
            // Discovery sessions are owned by whoever holds the discover
            // stream; all we can do here is report that one is running.
            if self.adapter.is_discovering().await.map_err(map_bluer_error)? {
                warn!("Adapter is discovering; the handshake may be slow");
            }
            Ok(())
        }
        .boxed()
    }

    fn open_stream<'a>(
        &'a self,
        endpoint: &'a Endpoint,
        service: Uuid,
    ) -> BoxFuture<'a, Result<BoxedStream, LinkError>> {
        async move {
            let address = Address::new(endpoint.bytes);
            match self.rfcomm_channel {
                Some(channel) => self.connect_channel(address, channel).await,
                None => self.connect_profile(address, service).await,
            }
        }
        .boxed()
    }

    fn paired_devices(&self) -> BoxFuture<'_, Result<Vec<PairedDevice>, LinkError>> {
        async move {
            let mut devices = Vec::new();

            for addr in self.adapter.device_addresses().await.map_err(map_bluer_error)? {
                let device = self.adapter.device(addr).map_err(map_bluer_error)?;
                if device.is_paired().await.map_err(map_bluer_error)? {
                    let name = device.alias().await.ok();
                    devices.push(PairedDevice::new(name, addr.to_string()));
                }
            }

            Ok(devices)
        }
        .boxed()
    }
}

fn map_bluer_error(e: bluer::Error) -> LinkError {
    let message = e.to_string();
    match e.kind {
        ErrorKind::NotAuthorized | ErrorKind::NotPermitted => LinkError::PermissionDenied(message),
        ErrorKind::NotReady | ErrorKind::NotAvailable => LinkError::TransportUnavailable(message),
        ErrorKind::InvalidAddress(_) | ErrorKind::DoesNotExist | ErrorKind::InvalidArguments => {
            LinkError::AddressInvalid(message)
        }
        _ => LinkError::ConnectFailed(message),
    }
}
