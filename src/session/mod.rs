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

//! Connection state machine.
//!
//! A [`Session`] owns at most one [`Link`] together with its reader and the
//! command tracker. State, the latest telemetry line and transient events
//! are published through watch and broadcast channels so a UI can follow
//! along from any task.

mod tracker;

pub use tracker::{CommandTracker, PendingCommand};

use chrono::{DateTime, Local};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, oneshot, watch};
use tracing::{debug, error, info, warn};

use crate::bluetooth::{
    AckTable, FrameReader, LineSink, Link, LinkError, PairedDevice, Platform,
};
use crate::events::SessionEvent;
use crate::state::ConnectionState;

/// Capacity of the event broadcast channel.
const EVENT_CAPACITY: usize = 64;

/// Tunables for a session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Upper bound for the connect handshake.
    pub connect_timeout: Duration,
    /// How long a command may stay unconfirmed.
    pub command_timeout: Duration,
    /// Default wait for a reply in [`Session::request`].
    pub reply_window: Duration,
    /// Number of telemetry lines kept in history; 0 keeps only the latest.
    pub history_limit: usize,
    /// Acknowledgement tokens and the commands they confirm.
    pub acknowledgements: AckTable,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            command_timeout: Duration::from_secs(3),
            reply_window: Duration::from_secs(2),
            history_limit: 0,
            acknowledgements: AckTable::default(),
        }
    }
}

/// Errors returned by session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("not connected")]
    NotConnected,
    #[error("cannot connect while {0}")]
    AlreadyActive(ConnectionState),
    #[error(transparent)]
    Link(#[from] LinkError),
    #[error("no reply within {0:?}")]
    NoReply(Duration),
    #[error("request replaced by a newer one")]
    Superseded,
}

/// A telemetry line kept in history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub received_at: DateTime<Local>,
    pub text: String,
}

/// Human readable cause of a failed connect.
pub fn connect_error_message(e: &LinkError) -> String {
    match e {
        LinkError::PermissionDenied(detail) => format!("Insufficient permissions: {}", detail),
        LinkError::TransportUnavailable(detail) => format!("Bluetooth unavailable: {}", detail),
        LinkError::AddressInvalid(address) => format!("Invalid address: {}", address),
        LinkError::ConnectFailed(detail) => format!("Connection error: {}", detail),
        LinkError::Io(_) | LinkError::Closed => format!("Unexpected error: {}", e),
    }
}

struct ActiveLink {
    generation: u64,
    link: Arc<Link>,
    reader: FrameReader,
}

struct ReplyWaiter {
    id: u64,
    tx: oneshot::Sender<Reply>,
}

enum Reply {
    Line(String),
    Superseded,
}

/// Why an established link went away.
enum LinkLoss {
    EndOfStream,
    Failed(String),
}

struct Inner {
    platform: Arc<dyn Platform>,
    config: SessionConfig,
    state_tx: watch::Sender<ConnectionState>,
    message_tx: watch::Sender<Option<String>>,
    events: broadcast::Sender<SessionEvent>,
    tracker: CommandTracker,
    active: Mutex<Option<ActiveLink>>,
    lifecycle: tokio::sync::Mutex<()>,
    next_generation: AtomicU64,
    next_waiter: AtomicU64,
    reply_waiter: Mutex<Option<ReplyWaiter>>,
    history: Mutex<VecDeque<HistoryEntry>>,
}

/// Connection to one remote device.
///
/// Cloning yields another handle to the same session. When the last handle
/// is dropped the reader is cancelled and the link released.
#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

impl Session {
    pub fn new(platform: Arc<dyn Platform>, config: SessionConfig) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (message_tx, _) = watch::channel(None);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let tracker = CommandTracker::new(events.clone());

        Self {
            inner: Arc::new(Inner {
                platform,
                config,
                state_tx,
                message_tx,
                events,
                tracker,
                active: Mutex::new(None),
                lifecycle: tokio::sync::Mutex::new(()),
                next_generation: AtomicU64::new(0),
                next_waiter: AtomicU64::new(0),
                reply_waiter: Mutex::new(None),
                history: Mutex::new(VecDeque::new()),
            }),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state_tx.borrow().clone()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Latest telemetry line.
    pub fn last_message(&self) -> Option<String> {
        self.inner.message_tx.borrow().clone()
    }

    pub fn subscribe_messages(&self) -> watch::Receiver<Option<String>> {
        self.inner.message_tx.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    pub fn pending_command(&self) -> Option<PendingCommand> {
        self.inner.tracker.pending()
    }

    /// Telemetry history, oldest first. Empty unless a history limit is set.
    pub fn history(&self) -> Vec<HistoryEntry> {
        self.inner.history.lock().iter().cloned().collect()
    }

    /// Address of the connected device.
    pub fn address(&self) -> Option<String> {
        self.inner
            .active
            .lock()
            .as_ref()
            .map(|active| active.link.address().to_string())
    }

    pub async fn paired_devices(&self) -> Result<Vec<PairedDevice>, LinkError> {
        self.inner.platform.paired_devices().await
    }

    /// Open a link to `address` and start reading from it.
    ///
    /// Only valid from `Disconnected` or `Error`. A failed handshake leaves
    /// the session in `Error` with a classified message.
    pub async fn connect(&self, address: &str) -> Result<(), SessionError> {
        let current = self.state();
        if !current.can_connect() {
            warn!("Ignoring connect to {} while {}", address, current);
            return Err(SessionError::AlreadyActive(current));
        }

        let _lifecycle = self.inner.lifecycle.lock().await;

        let mut rejected = None;
        let started = self.inner.state_tx.send_if_modified(|state| {
            if state.can_connect() {
                *state = ConnectionState::Connecting;
                true
            } else {
                rejected = Some(state.clone());
                false
            }
        });
        if !started {
            let state = rejected.unwrap_or_default();
            warn!("Ignoring connect to {} while {}", address, state);
            return Err(SessionError::AlreadyActive(state));
        }
        self.inner.emit(SessionEvent::StateChanged(ConnectionState::Connecting));

        info!("Connecting to {}...", address);
        match Link::open(
            self.inner.platform.as_ref(),
            address,
            self.inner.config.connect_timeout,
        )
        .await
        {
            Ok(link) => {
                self.inner.attach(link);
                Ok(())
            }
            Err(e) => {
                let message = connect_error_message(&e);
                error!("Connect to {} failed: {}", address, message);
                self.inner.set_state(ConnectionState::Error(message));
                Err(e.into())
            }
        }
    }

    /// Stop reading, close the link and return to `Disconnected`.
    ///
    /// Safe to call in any state. A connect in progress finishes first.
    pub async fn disconnect(&self) {
        let _lifecycle = self.inner.lifecycle.lock().await;

        let active = self.inner.active.lock().take();
        self.inner.tracker.clear();
        self.inner.reply_waiter.lock().take();

        if let Some(active) = active {
            info!("Disconnecting from {}", active.link.address());
            Inner::teardown(active).await;
        }

        self.inner.set_state(ConnectionState::Disconnected);
    }

    /// Write `code` and track its acknowledgement.
    ///
    /// When not connected nothing is written and a `NotConnected` event is
    /// emitted. A write failure tears the link down.
    pub async fn send_command(&self, code: &str) -> Result<(), SessionError> {
        self.write_command(code, None).await
    }

    /// Send `code`; once it is on the wire, `waiter` takes the next line.
    async fn write_command(&self, code: &str, waiter: Option<ReplyWaiter>) -> Result<(), SessionError> {
        let Some((generation, link)) = self.inner.current_link() else {
            info!("Not connected; dropping command \"{}\"", code);
            self.inner.emit(SessionEvent::NotConnected {
                command: code.to_string(),
            });
            return Err(SessionError::NotConnected);
        };

        // Armed before writing so a fast acknowledgement is never missed.
        self.inner.tracker.arm(code, self.inner.config.command_timeout);

        match link.write(code.as_bytes()).await {
            Ok(()) => {
                if let Some(waiter) = waiter {
                    self.inner.install_waiter(waiter);
                }
                info!("Command sent: \"{}\"", code);
                self.inner.emit(SessionEvent::CommandSent {
                    command: code.to_string(),
                });
                Ok(())
            }
            Err(e) => {
                error!("Failed to send \"{}\": {}", code, e);
                self.inner.tracker.clear();
                if let Some(active) = self.inner.take_active(generation) {
                    Inner::teardown(active).await;
                    self.inner.lost(LinkLoss::Failed(e.to_string()));
                }
                Err(e.into())
            }
        }
    }

    /// Send `code` and wait for the next telemetry line.
    ///
    /// Waits at most `window`, or the configured reply window. The command
    /// is acknowledged-tracked exactly like [`Session::send_command`]. Only
    /// lines read after the write count as the reply; a newer request
    /// takes over and this one fails with [`SessionError::Superseded`].
    pub async fn request(&self, code: &str, window: Option<Duration>) -> Result<String, SessionError> {
        let window = window.unwrap_or(self.inner.config.reply_window);
        let id = self.inner.next_waiter.fetch_add(1, Ordering::AcqRel);
        let (tx, rx) = oneshot::channel();

        self.write_command(code, Some(ReplyWaiter { id, tx })).await?;

        match tokio::time::timeout(window, rx).await {
            Ok(Ok(Reply::Line(line))) => Ok(line),
            Ok(Ok(Reply::Superseded)) => Err(SessionError::Superseded),
            Ok(Err(_)) => Err(SessionError::NotConnected),
            Err(_) => {
                self.inner.drop_waiter(id);
                debug!("No reply to \"{}\" within {:?}", code, window);
                Err(SessionError::NoReply(window))
            }
        }
    }
}

impl Inner {
    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    fn set_state(&self, new: ConnectionState) {
        let changed = self.state_tx.send_if_modified(|state| {
            if *state == new {
                false
            } else {
                *state = new.clone();
                true
            }
        });
        if changed {
            debug!("State: {}", new);
            self.emit(SessionEvent::StateChanged(new));
        }
    }

    fn attach(self: &Arc<Self>, link: Link) {
        let link = Arc::new(link);
        let generation = self.next_generation.fetch_add(1, Ordering::AcqRel) + 1;
        let sink = Arc::new(ReaderSink {
            inner: Arc::downgrade(self),
            generation,
        });

        let mut active = self.active.lock();
        let reader = FrameReader::spawn(link.clone(), sink);
        info!("Connected to {}", link.address());
        *active = Some(ActiveLink {
            generation,
            link,
            reader,
        });
        self.set_state(ConnectionState::Connected);
    }

    fn current_link(&self) -> Option<(u64, Arc<Link>)> {
        if !self.state_tx.borrow().is_connected() {
            return None;
        }
        self.active
            .lock()
            .as_ref()
            .map(|active| (active.generation, active.link.clone()))
    }

    fn is_current(&self, generation: u64) -> bool {
        self.active
            .lock()
            .as_ref()
            .is_some_and(|active| active.generation == generation)
    }

    fn take_active(&self, generation: u64) -> Option<ActiveLink> {
        let mut active = self.active.lock();
        match active.as_ref() {
            Some(current) if current.generation == generation => active.take(),
            _ => None,
        }
    }

    async fn teardown(active: ActiveLink) {
        let ActiveLink { link, reader, .. } = active;
        reader.cancel().await;
        if let Err(e) = link.close().await {
            warn!("Error closing link to {}: {}", link.address(), e);
        }
    }

    fn install_waiter(&self, waiter: ReplyWaiter) {
        let previous = self.reply_waiter.lock().replace(waiter);
        if let Some(previous) = previous {
            debug!("Reply waiter {} superseded", previous.id);
            let _ = previous.tx.send(Reply::Superseded);
        }
    }

    fn drop_waiter(&self, id: u64) {
        let mut waiter = self.reply_waiter.lock();
        if waiter.as_ref().is_some_and(|w| w.id == id) {
            waiter.take();
        }
    }

    fn handle_line(&self, generation: u64, line: String) {
        if !self.is_current(generation) {
            debug!("Ignoring line from a stale link: {}", line);
            return;
        }

        if let Some(command) = self.config.acknowledgements.command_for(&line) {
            let confirmed = self.tracker.confirm(command);
            info!(
                "Acknowledgement \"{}\" for \"{}\" ({})",
                line,
                command,
                if confirmed { "confirmed" } else { "nothing pending" }
            );
            self.emit(SessionEvent::Acknowledged {
                command: command.to_string(),
                token: line,
                confirmed,
            });
            return;
        }

        self.message_tx.send_replace(Some(line.clone()));

        if self.config.history_limit > 0 {
            let mut history = self.history.lock();
            while history.len() >= self.config.history_limit {
                history.pop_front();
            }
            history.push_back(HistoryEntry {
                received_at: Local::now(),
                text: line.clone(),
            });
        }

        if let Some(waiter) = self.reply_waiter.lock().take() {
            let _ = waiter.tx.send(Reply::Line(line.clone()));
        }

        self.emit(SessionEvent::MessageReceived(line));
    }

    /// The reader stopped on its own; called from the reader task.
    fn handle_reader_stop(&self, generation: u64, loss: LinkLoss) {
        let Some(active) = self.take_active(generation) else {
            return;
        };
        self.tracker.clear();

        let ActiveLink { link, reader, .. } = active;
        drop(reader);
        tokio::spawn(async move {
            if let Err(e) = link.close().await {
                warn!("Error closing link to {}: {}", link.address(), e);
            }
        });

        self.lost(loss);
    }

    fn lost(&self, loss: LinkLoss) {
        self.reply_waiter.lock().take();
        match loss {
            LinkLoss::EndOfStream => {
                self.set_state(ConnectionState::Disconnected);
                self.emit(SessionEvent::LinkClosed);
            }
            LinkLoss::Failed(cause) => {
                let message = format!("Communication error: {}", cause);
                self.set_state(ConnectionState::Error(message.clone()));
                self.emit(SessionEvent::LinkError(message));
            }
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(active) = self.active.get_mut().take() {
            debug!("Session dropped; releasing {}", active.link.address());
            active.reader.signal();
        }
    }
}

/// Routes reader callbacks into the session that spawned the reader.
struct ReaderSink {
    inner: Weak<Inner>,
    generation: u64,
}

impl LineSink for ReaderSink {
    fn on_line(&self, line: String) {
        if let Some(inner) = self.inner.upgrade() {
            inner.handle_line(self.generation, line);
        }
    }

    fn on_end_of_stream(&self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.handle_reader_stop(self.generation, LinkLoss::EndOfStream);
        }
    }

    fn on_read_error(&self, error: LinkError) {
        if let Some(inner) = self.inner.upgrade() {
            inner.handle_reader_stop(self.generation, LinkLoss::Failed(error.to_string()));
        }
    }
}
