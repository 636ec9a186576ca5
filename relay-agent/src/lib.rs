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

//! MQTT relay agent.
//!
//! Joins a network, keeps a broker connection alive, publishes a numbered
//! heartbeat, and drives a digital output from `{"enable": <bool>}` control
//! messages. Lost connections are retried forever with a fixed delay, and the
//! control subscription is restored after every reconnect.
//!
//! # Example
//!
//! ```ignore
//! use relay_agent::{network, Agent, AgentConfig, HostNetwork, MemoryPin, RumqttSession};
//!
//! let config = AgentConfig::builder("workshop", "broker.local", "relay/status", "relay/control")
//!     .port(1883)
//!     .build();
//!
//! let mut net = HostNetwork::new(&config.broker_host, config.port);
//! network::join(&mut net, &config.ssid, None, config.join_poll_interval()).await?;
//!
//! let client_id = config.resolve_client_id(net.hardware_address());
//! let session = RumqttSession::new(&config, &client_id);
//! let agent = Agent::new(&config, client_id, session, MemoryPin::new())?;
//! agent.run(async { let _ = tokio::signal::ctrl_c().await; }).await?;
//! ```

pub mod agent;
pub mod config;
pub mod control;
pub mod heartbeat;
pub mod link;
pub mod network;
pub mod output;
pub mod session;

#[cfg(test)]
pub(crate) mod testing;

pub use agent::Agent;
pub use config::{AgentConfig, AgentConfigBuilder};
pub use link::LinkState;
pub use network::{HostNetwork, NetworkLink, NetworkStatus};
pub use output::{FilePin, MemoryPin, RelayPin};
pub use session::{Poller, Requests, RumqttRequests, RumqttSession, Session, SessionEvent};
