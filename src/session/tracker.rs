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

//! Acknowledgement tracking for the most recent command.

use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::events::SessionEvent;

/// The command currently awaiting confirmation.
#[derive(Debug, Clone)]
pub struct PendingCommand {
    pub command: String,
    pub issued_at: Instant,
    id: u64,
}

#[derive(Default)]
struct TrackerState {
    pending: Option<PendingCommand>,
    timer: Option<JoinHandle<()>>,
    next_id: u64,
}

/// Tracks at most one outstanding command and its timeout.
///
/// Arming replaces whatever was pending; the replaced command is dropped
/// without any event.
pub struct CommandTracker {
    state: Arc<Mutex<TrackerState>>,
    events: broadcast::Sender<SessionEvent>,
}

impl CommandTracker {
    pub fn new(events: broadcast::Sender<SessionEvent>) -> Self {
        Self {
            state: Arc::new(Mutex::new(TrackerState::default())),
            events,
        }
    }

    /// Start tracking `command`, expiring after `timeout`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn arm(&self, command: &str, timeout: Duration) {
        let mut state = self.state.lock();
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        if let Some(previous) = state.pending.take() {
            debug!("Abandoning confirmation of \"{}\"", previous.command);
        }

        state.next_id += 1;
        let id = state.next_id;
        state.pending = Some(PendingCommand {
            command: command.to_string(),
            issued_at: Instant::now(),
            id,
        });

        let weak = Arc::downgrade(&self.state);
        let events = self.events.clone();
        state.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            Self::expire(weak, id, events);
        }));
    }

    fn expire(state: Weak<Mutex<TrackerState>>, id: u64, events: broadcast::Sender<SessionEvent>) {
        let Some(state) = state.upgrade() else {
            return;
        };

        let expired = {
            let mut state = state.lock();
            match &state.pending {
                Some(pending) if pending.id == id => {
                    state.timer = None;
                    state.pending.take()
                }
                _ => None,
            }
        };

        if let Some(pending) = expired {
            warn!(
                "No confirmation for \"{}\" after {:?}",
                pending.command,
                pending.issued_at.elapsed()
            );
            let _ = events.send(SessionEvent::UnconfirmedCommand {
                command: pending.command,
            });
        }
    }

    /// Confirm `command` if it is the one pending.
    ///
    /// Returns whether the pending command was cleared.
    pub fn confirm(&self, command: &str) -> bool {
        let mut state = self.state.lock();
        let matches = state
            .pending
            .as_ref()
            .is_some_and(|pending| pending.command == command);
        if !matches {
            return false;
        }

        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        if let Some(pending) = state.pending.take() {
            debug!(
                "\"{}\" confirmed after {:?}",
                pending.command,
                pending.issued_at.elapsed()
            );
        }
        true
    }

    /// Drop the pending command and its timer.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        state.pending = None;
    }

    pub fn pending(&self) -> Option<PendingCommand> {
        self.state.lock().pending.clone()
    }
}

impl Drop for CommandTracker {
    fn drop(&mut self) {
        self.clear();
    }
}
