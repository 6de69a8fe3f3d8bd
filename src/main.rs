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

//! btremote command line front end.

use anyhow::Result;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use btremote::bluetooth::{BluezPlatform, DeviceCommand, PairedDevice};
use btremote::config::Config;
use btremote::{Session, SessionEvent};

/// A line typed by the user.
#[derive(Debug, PartialEq, Eq)]
enum Input {
    Send(String),
    Ask(String),
    Connect,
    Disconnect,
    Devices,
    Help,
    Quit,
}

impl Input {
    fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        let (word, rest) = match line.split_once(' ') {
            Some((word, rest)) => (word, rest.trim()),
            None => (line, ""),
        };

        let input = match word.to_lowercase().as_str() {
            "quit" | "exit" => Self::Quit,
            "help" | "?" => Self::Help,
            "connect" => Self::Connect,
            "disconnect" => Self::Disconnect,
            "devices" => Self::Devices,
            "ask" if !rest.is_empty() => Self::Ask(command_code(rest)),
            _ => Self::Send(command_code(line)),
        };
        Some(input)
    }
}

/// Map a friendly command name to its wire code; anything else is sent as is.
fn command_code(text: &str) -> String {
    DeviceCommand::parse(text)
        .map(|cmd| cmd.code().to_string())
        .unwrap_or_else(|| text.to_string())
}

fn print_help() {
    println!("Commands:");
    for cmd in DeviceCommand::ALL {
        println!("  {:<16} send \"{}\"", cmd.description(), cmd.code());
    }
    println!("  ask <command>    send and wait for the reply line");
    println!("  <text>           send raw text");
    println!("  connect | disconnect | devices | quit");
}

fn print_devices(devices: &[PairedDevice]) {
    if devices.is_empty() {
        println!("No paired devices");
    }
    for device in devices {
        println!("  {}", device);
    }
}

fn print_event(event: &SessionEvent) {
    match event {
        SessionEvent::StateChanged(state) => println!("[{}]", state),
        SessionEvent::MessageReceived(line) => println!("< {}", line),
        other => {
            if let Some(text) = other.notification() {
                println!("* {}", text);
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("btremote=info".parse()?),
        )
        .init();

    info!("Starting btremote v{}...", env!("CARGO_PKG_VERSION"));

    let config = Config::load()?;
    info!("Configuration loaded");

    let platform = Arc::new(BluezPlatform::new(config.bluetooth.rfcomm_channel).await?);
    let session = Session::new(platform, config.session_config());

    let address = std::env::args()
        .nth(1)
        .or_else(|| config.bluetooth.default_address.clone());
    let Some(address) = address else {
        println!("Usage: btremote <ADDRESS>");
        println!("Paired devices:");
        print_devices(&session.paired_devices().await?);
        return Ok(());
    };
    let address = PairedDevice::parse(&address)
        .map(|device| device.address)
        .unwrap_or(address);

    // Print session events
    let mut events = session.subscribe_events();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => print_event(&event),
                Err(RecvError::Lagged(n)) => error!("Dropped {} session events", n),
                Err(RecvError::Closed) => break,
            }
        }
    });

    if let Err(e) = session.connect(&address).await {
        error!("Connect failed: {}", e);
    }
    print_help();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                let Some(input) = Input::parse(&line) else {
                    continue;
                };

                match input {
                    Input::Quit => break,
                    Input::Help => print_help(),
                    Input::Devices => match session.paired_devices().await {
                        Ok(devices) => print_devices(&devices),
                        Err(e) => error!("Could not list devices: {}", e),
                    },
                    Input::Connect => {
                        let session = session.clone();
                        let address = address.clone();
                        tokio::spawn(async move {
                            if let Err(e) = session.connect(&address).await {
                                error!("Connect failed: {}", e);
                            }
                        });
                    }
                    Input::Disconnect => session.disconnect().await,
                    Input::Send(code) => {
                        let session = session.clone();
                        tokio::spawn(async move {
                            let _ = session.send_command(&code).await;
                        });
                    }
                    Input::Ask(code) => {
                        let session = session.clone();
                        tokio::spawn(async move {
                            match session.request(&code, None).await {
                                Ok(reply) => println!("> {}", reply),
                                Err(e) => println!("* {}", e),
                            }
                        });
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    session.disconnect().await;
    info!("btremote stopped");
    Ok(())
}
