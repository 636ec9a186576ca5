// Copyright 2025 The Drasi Authors.
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

//! Control message handling: `{"enable": <bool>}` documents drive the output.

use embedded_hal::digital::{OutputPin, PinState};
use log::{error, info, warn};
use serde_json::Value;

/// Field carrying the desired output state.
pub const ENABLE_FIELD: &str = "enable";

/// Extracts the `enable` flag from a raw JSON payload.
///
/// Booleans are taken as-is and numbers are true when non-zero. A missing
/// field, `null`, or any other JSON type reads as `false`.
pub fn enable_from_payload(payload: &[u8]) -> Result<bool, serde_json::Error> {
    let json: Value = serde_json::from_slice(payload)?;

    let enable = match json.get(ENABLE_FIELD) {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|v| v != 0.0),
        _ => false,
    };

    Ok(enable)
}

/// Applies control messages to a digital output.
pub struct ControlHandler<P> {
    pin: P,
    active_low: bool,
    client_id: String,
    messages: u64,
}

impl<P: OutputPin> ControlHandler<P> {
    pub fn new(pin: P, active_low: bool, client_id: impl Into<String>) -> Self {
        Self {
            pin,
            active_low,
            client_id: client_id.into(),
            messages: 0,
        }
    }

    /// Handles one arrived message and returns the flag that was applied.
    ///
    /// Unparsable payloads are treated as `enable: false`.
    pub fn apply(&mut self, topic: &str, payload: &[u8]) -> bool {
        let client_id = &self.client_id;
        self.messages += 1;

        info!(
            "[{client_id}] Message arrived [{topic}] {}",
            String::from_utf8_lossy(payload)
        );

        let enable = enable_from_payload(payload).unwrap_or_else(|e| {
            warn!("[{client_id}] Failed to parse control payload on topic '{topic}': {e}");
            false
        });
        info!("[{client_id}] To enable: {enable}");

        let level = PinState::from(enable != self.active_low);
        if let Err(e) = self.pin.set_state(level) {
            error!("[{client_id}] Failed to drive output: {e:?}");
        }

        enable
    }

    /// Number of control messages handled so far.
    pub fn messages(&self) -> u64 {
        self.messages
    }

    pub fn pin(&self) -> &P {
        &self.pin
    }
}
