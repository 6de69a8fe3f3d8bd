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

//! Byte-stream link to a single remote device.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use thiserror::Error;
use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, ReadHalf, WriteHalf,
};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::platform::Platform;
use super::protocol::SPP_UUID;

/// Longest line accepted from the device, terminator excluded.
pub const MAX_LINE_LEN: usize = 1024;

/// Errors raised by the link layer.
#[derive(Debug, Error)]
pub enum LinkError {
    /// The address cannot be resolved to a remote endpoint.
    #[error("invalid address '{0}'")]
    AddressInvalid(String),
    /// The radio is missing or powered off.
    #[error("transport unavailable: {0}")]
    TransportUnavailable(String),
    /// The caller may not use the transport.
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    /// The remote endpoint refused or timed out the handshake.
    #[error("connect failed: {0}")]
    ConnectFailed(String),
    /// Read or write fault on an established link.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The link was closed locally.
    #[error("link closed")]
    Closed,
}

/// Coarse classification of a [`LinkError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkErrorKind {
    Permission,
    Unavailable,
    InvalidAddress,
    ConnectFailed,
    Io,
}

impl LinkError {
    pub fn kind(&self) -> LinkErrorKind {
        match self {
            Self::AddressInvalid(_) => LinkErrorKind::InvalidAddress,
            Self::TransportUnavailable(_) => LinkErrorKind::Unavailable,
            Self::PermissionDenied(_) => LinkErrorKind::Permission,
            Self::ConnectFailed(_) => LinkErrorKind::ConnectFailed,
            Self::Io(_) | Self::Closed => LinkErrorKind::Io,
        }
    }

    /// Whether issuing a new connect can reasonably succeed.
    ///
    /// Connect-time failures are retryable; faults on an established link
    /// mean the link is gone and must be torn down.
    pub fn is_retryable(&self) -> bool {
        !matches!(self.kind(), LinkErrorKind::Io)
    }
}

/// Anything that can carry the link's bytes.
pub trait LinkStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> LinkStream for T {}

/// Boxed stream handed out by a [`Platform`].
pub type BoxedStream = Box<dyn LinkStream>;

/// An open byte-stream connection to one remote endpoint.
///
/// Reads and writes use independent halves. Writes are serialized through a
/// lock so concurrent senders never interleave bytes on the wire.
pub struct Link {
    address: String,
    reader: Mutex<Option<BufReader<ReadHalf<BoxedStream>>>>,
    writer: Mutex<Option<WriteHalf<BoxedStream>>>,
    closed: AtomicBool,
}

impl Link {
    /// Wrap an already connected stream.
    pub fn new(address: impl Into<String>, stream: BoxedStream) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            address: address.into(),
            reader: Mutex::new(Some(BufReader::new(reader))),
            writer: Mutex::new(Some(writer)),
            closed: AtomicBool::new(false),
        }
    }

    /// Resolve `address` and open a serial-profile stream to it.
    ///
    /// Discovery is cancelled before the handshake; a discovery that cannot
    /// be cancelled is logged and the handshake proceeds anyway.
    pub async fn open(
        platform: &dyn Platform,
        address: &str,
        connect_timeout: Duration,
    ) -> Result<Self, LinkError> {
        let endpoint = platform.resolve(address).await?;
        debug!("Resolved {} ({:?})", endpoint.address, endpoint.name);

        if let Err(e) = platform.cancel_discovery().await {
            warn!("Could not cancel discovery: {}", e);
        }

        let stream = tokio::time::timeout(
            connect_timeout,
            platform.open_stream(&endpoint, SPP_UUID),
        )
        .await
        .map_err(|_| {
            LinkError::ConnectFailed(format!(
                "handshake timed out after {} ms",
                connect_timeout.as_millis()
            ))
        })??;

        info!("Link open to {}", endpoint.address);
        Ok(Self::new(endpoint.address, stream))
    }

    /// Remote address this link is connected to.
    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn is_open(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
    }

    /// Write `bytes` and flush. No retry on failure.
    pub async fn write(&self, bytes: &[u8]) -> Result<(), LinkError> {
        if !self.is_open() {
            return Err(LinkError::Closed);
        }

        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(LinkError::Closed)?;
        writer.write_all(bytes).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Read the next line, trimmed of surrounding whitespace.
    ///
    /// Returns `Ok(None)` when the peer closed the stream. A trailing line
    /// without a terminator is returned before end of stream is reported.
    /// Invalid UTF-8 is replaced rather than rejected. Lines longer than
    /// [`MAX_LINE_LEN`] are discarded up to their terminator.
    pub async fn read_line(&self) -> Result<Option<String>, LinkError> {
        if !self.is_open() {
            return Err(LinkError::Closed);
        }

        let mut guard = self.reader.lock().await;
        let reader = guard.as_mut().ok_or(LinkError::Closed)?;

        let mut line = Vec::with_capacity(64);
        let mut oversized = false;
        loop {
            let chunk = reader.fill_buf().await?;
            if chunk.is_empty() {
                if oversized {
                    warn!("Dropping unterminated oversized line from {}", self.address);
                }
                if line.is_empty() {
                    return Ok(None);
                }
                break;
            }

            let (used, terminated) = match chunk.iter().position(|&b| b == b'\n') {
                Some(i) => (i + 1, true),
                None => (chunk.len(), false),
            };
            let content = &chunk[..used - usize::from(terminated)];
            if !oversized && line.len() + content.len() > MAX_LINE_LEN {
                oversized = true;
                line.clear();
            }
            if !oversized {
                line.extend_from_slice(content);
            }
            reader.consume(used);

            if terminated {
                if !oversized {
                    break;
                }
                warn!(
                    "Dropping line longer than {} bytes from {}",
                    MAX_LINE_LEN, self.address
                );
                oversized = false;
            }
        }

        Ok(Some(String::from_utf8_lossy(&line).trim().to_string()))
    }

    /// Release the stream. Safe to call more than once.
    ///
    /// A reader blocked in [`Link::read_line`] keeps its half until it
    /// returns; callers stop the reader before closing.
    pub async fn close(&self) -> Result<(), LinkError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let writer = self.writer.lock().await.take();
        if let Ok(mut reader) = self.reader.try_lock() {
            reader.take();
        }

        if let Some(mut writer) = writer {
            writer.shutdown().await?;
        }

        debug!("Link to {} closed", self.address);
        Ok(())
    }
}

impl std::fmt::Debug for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Link")
            .field("address", &self.address)
            .field("open", &self.is_open())
            .finish()
    }
}
