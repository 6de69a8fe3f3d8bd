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

//! Background line reader for an open link.

use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::link::{Link, LinkError};

/// Receives what the reader observes on the link.
///
/// Calls happen on the reader task, one at a time, in arrival order.
pub trait LineSink: Send + Sync {
    /// A non-empty line arrived.
    fn on_line(&self, line: String);

    /// The peer closed the stream.
    fn on_end_of_stream(&self);

    /// A read failed; the reader has stopped.
    fn on_read_error(&self, error: LinkError);
}

/// How the read loop finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderExit {
    Cancelled,
    EndOfStream,
    Failed,
}

/// Handle to a running read loop.
pub struct FrameReader {
    cancel: CancellationToken,
    task: Option<JoinHandle<ReaderExit>>,
}

impl FrameReader {
    /// Start reading `link` on a new task.
    pub fn spawn(link: Arc<Link>, sink: Arc<dyn LineSink>) -> Self {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(Self::run(link, sink, cancel.clone()));
        Self {
            cancel,
            task: Some(task),
        }
    }

    async fn run(link: Arc<Link>, sink: Arc<dyn LineSink>, cancel: CancellationToken) -> ReaderExit {
        info!("Reading from {}", link.address());

        loop {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("Reader for {} cancelled", link.address());
                    return ReaderExit::Cancelled;
                }
                result = link.read_line() => result,
            };

            match result {
                Ok(Some(line)) if line.is_empty() => {}
                Ok(Some(line)) => {
                    debug!("Received: {}", line);
                    sink.on_line(line);
                }
                Ok(None) => {
                    info!("Connection closed by remote");
                    sink.on_end_of_stream();
                    return ReaderExit::EndOfStream;
                }
                Err(e) => {
                    error!("Read error: {}", e);
                    sink.on_read_error(e);
                    return ReaderExit::Failed;
                }
            }
        }
    }

    /// Whether the read loop has finished.
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, |task| task.is_finished())
    }

    /// Signal cancellation without waiting.
    pub fn signal(&self) {
        self.cancel.cancel();
    }

    /// Stop the read loop and wait for the task to end.
    pub async fn cancel(self) -> ReaderExit {
        self.cancel.cancel();
        self.join().await
    }

    /// Wait for the read loop to end on its own.
    pub async fn join(mut self) -> ReaderExit {
        let Some(task) = self.task.take() else {
            return ReaderExit::Cancelled;
        };
        match task.await {
            Ok(exit) => exit,
            Err(e) => {
                error!("Reader task ended abnormally: {}", e);
                ReaderExit::Failed
            }
        }
    }
}

impl Drop for FrameReader {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
