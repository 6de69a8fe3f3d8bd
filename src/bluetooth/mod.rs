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

//! Bluetooth communication module.
//!
//! Handles the RFCOMM link to the device and the line reader on top of it.

mod adapter;
mod link;
pub mod loopback;
mod platform;
mod protocol;
mod reader;

pub use adapter::BluezPlatform;
pub use link::{BoxedStream, Link, LinkError, LinkErrorKind, LinkStream, MAX_LINE_LEN};
pub use platform::{
    format_address, parse_address, Endpoint, PairedDevice, Platform, UNKNOWN_DEVICE_NAME,
};
pub use protocol::{
    unconfirmed_text, AckTable, Acknowledgement, DeviceCommand, ACK_LED_OFF, ACK_LED_ON, SPP_UUID,
};
pub use reader::{FrameReader, LineSink, ReaderExit};
