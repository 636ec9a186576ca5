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

use anyhow::Result;
use log::info;
use relay_agent::{
    network, Agent, AgentConfig, FilePin, HostNetwork, MemoryPin, NetworkLink, RelayPin,
    RumqttSession,
};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    info!("Starting relay node...");

    // 1. Load connectivity parameters (environment first, then build-time values)
    let config = AgentConfig::from_env()?;

    // 2. Join the network before touching the broker
    let mut net = HostNetwork::new(&config.broker_host, config.port);
    network::join(
        &mut net,
        &config.ssid,
        config.passphrase.as_deref(),
        config.join_poll_interval(),
    )
    .await?;

    // 3. Pick the output: a GPIO value file when configured, memory otherwise
    let pin = match &config.output_path {
        Some(path) => {
            info!("Driving output through {}", path.display());
            RelayPin::File(FilePin::new(path.clone()))
        }
        None => {
            info!("RELAY_GPIO_VALUE_PATH not set, output is kept in memory");
            RelayPin::Memory(MemoryPin::new())
        }
    };

    // 4. Build the session and run until Ctrl-C
    let client_id = config.resolve_client_id(net.hardware_address());
    let session = RumqttSession::new(&config, &client_id);
    let agent = Agent::new(&config, client_id, session, pin)?;

    info!(
        "[{}] Agent configured (broker={}:{}, publish={}, control={})",
        agent.client_id(),
        config.broker_host,
        config.port,
        config.publish_topic,
        config.subscribe_topic
    );

    agent
        .run(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
}
