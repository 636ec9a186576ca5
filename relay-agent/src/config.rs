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

//! Configuration types for the relay agent.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;

pub const DEFAULT_PORT: u16 = 1883;
pub const DEFAULT_ANNOUNCEMENT: &str = "hello world";
pub const DEFAULT_HEARTBEAT_TEMPLATE: &str = "hello world #{{count}}";

/// Configuration for the relay agent.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Network identity to join before talking to the broker.
    pub ssid: String,
    /// Optional network passphrase.
    pub passphrase: Option<String>,
    /// MQTT broker hostname or IP.
    pub broker_host: String,
    /// MQTT broker port (default: 1883).
    #[serde(default = "default_port")]
    pub port: u16,
    /// Optional MQTT username for authentication.
    pub username: Option<String>,
    /// Optional MQTT password for authentication.
    pub password: Option<String>,
    /// MQTT client ID. Falls back to the hardware address, then to a random id.
    pub client_id: Option<String>,
    /// Topic receiving the announcement and heartbeats.
    pub publish_topic: String,
    /// Control topic carrying `{"enable": <bool>}` documents.
    pub subscribe_topic: String,
    /// Retained message published after every successful connect.
    #[serde(default = "default_announcement")]
    pub announcement: String,
    /// Handlebars template for heartbeats. Variables: `count`, `client_id`.
    #[serde(default = "default_heartbeat_template")]
    pub heartbeat_template: String,
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    /// Fixed delay between failed connect attempts.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
    /// How often the network status is polled while joining.
    #[serde(default = "default_join_poll_ms")]
    pub join_poll_ms: u64,
    /// Drive the output low when enabled.
    #[serde(default)]
    pub active_low: bool,
    /// Value file driving the output (e.g. a sysfs GPIO `value`). Without
    /// one the output state is kept in memory.
    pub output_path: Option<PathBuf>,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_announcement() -> String {
    DEFAULT_ANNOUNCEMENT.to_string()
}

fn default_heartbeat_template() -> String {
    DEFAULT_HEARTBEAT_TEMPLATE.to_string()
}

fn default_heartbeat_interval_ms() -> u64 {
    5_000
}

fn default_retry_delay_ms() -> u64 {
    5_000
}

fn default_keep_alive_secs() -> u64 {
    15
}

fn default_join_poll_ms() -> u64 {
    500
}

/// Values baked in at build time, used when the environment does not
/// provide a key.
fn compiled(key: &str) -> Option<&'static str> {
    match key {
        "RELAY_WIFI_SSID" => option_env!("RELAY_WIFI_SSID"),
        "RELAY_WIFI_PASSWORD" => option_env!("RELAY_WIFI_PASSWORD"),
        "RELAY_MQTT_HOST" => option_env!("RELAY_MQTT_HOST"),
        "RELAY_MQTT_PORT" => option_env!("RELAY_MQTT_PORT"),
        "RELAY_MQTT_USERNAME" => option_env!("RELAY_MQTT_USERNAME"),
        "RELAY_MQTT_PASSWORD" => option_env!("RELAY_MQTT_PASSWORD"),
        "RELAY_MQTT_CLIENT_ID" => option_env!("RELAY_MQTT_CLIENT_ID"),
        "RELAY_PUBLISH_TOPIC" => option_env!("RELAY_PUBLISH_TOPIC"),
        "RELAY_SUBSCRIBE_TOPIC" => option_env!("RELAY_SUBSCRIBE_TOPIC"),
        "RELAY_GPIO_VALUE_PATH" => option_env!("RELAY_GPIO_VALUE_PATH"),
        _ => None,
    }
}

impl AgentConfig {
    /// Start building a new config with the required fields.
    pub fn builder(
        ssid: impl Into<String>,
        broker_host: impl Into<String>,
        publish_topic: impl Into<String>,
        subscribe_topic: impl Into<String>,
    ) -> AgentConfigBuilder {
        AgentConfigBuilder {
            ssid: ssid.into(),
            passphrase: None,
            broker_host: broker_host.into(),
            port: DEFAULT_PORT,
            username: None,
            password: None,
            client_id: None,
            publish_topic: publish_topic.into(),
            subscribe_topic: subscribe_topic.into(),
            announcement: default_announcement(),
            heartbeat_template: default_heartbeat_template(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            retry_delay_ms: default_retry_delay_ms(),
            keep_alive_secs: default_keep_alive_secs(),
            join_poll_ms: default_join_poll_ms(),
            active_low: false,
            output_path: None,
        }
    }

    /// Load the config from `RELAY_*` environment variables, falling back to
    /// values compiled into the binary.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| {
            std::env::var(key)
                .ok()
                .or_else(|| compiled(key).map(str::to_string))
        })
    }

    /// Load the config through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| lookup(key).ok_or_else(|| anyhow!("{key} not set"));

        let mut builder = Self::builder(
            required("RELAY_WIFI_SSID")?,
            required("RELAY_MQTT_HOST")?,
            required("RELAY_PUBLISH_TOPIC")?,
            required("RELAY_SUBSCRIBE_TOPIC")?,
        );

        if let Some(passphrase) = lookup("RELAY_WIFI_PASSWORD") {
            builder = builder.passphrase(passphrase);
        }
        if let Some(port) = parsed(&lookup, "RELAY_MQTT_PORT")? {
            builder = builder.port(port);
        }
        if let Some(username) = lookup("RELAY_MQTT_USERNAME") {
            builder = builder.username(username);
        }
        if let Some(password) = lookup("RELAY_MQTT_PASSWORD") {
            builder = builder.password(password);
        }
        if let Some(client_id) = lookup("RELAY_MQTT_CLIENT_ID") {
            builder = builder.client_id(client_id);
        }
        if let Some(announcement) = lookup("RELAY_ANNOUNCEMENT") {
            builder = builder.announcement(announcement);
        }
        if let Some(template) = lookup("RELAY_HEARTBEAT_TEMPLATE") {
            builder = builder.heartbeat_template(template);
        }
        if let Some(ms) = positive(&lookup, "RELAY_HEARTBEAT_MS")? {
            builder = builder.heartbeat_interval(Duration::from_millis(ms));
        }
        if let Some(ms) = parsed(&lookup, "RELAY_RETRY_MS")? {
            builder = builder.retry_delay(Duration::from_millis(ms));
        }
        if let Some(secs) = parsed(&lookup, "RELAY_KEEP_ALIVE_SECS")? {
            builder = builder.keep_alive(Duration::from_secs(secs));
        }
        if let Some(ms) = positive(&lookup, "RELAY_JOIN_POLL_MS")? {
            builder = builder.join_poll_interval(Duration::from_millis(ms));
        }
        if let Some(active_low) = parsed(&lookup, "RELAY_ACTIVE_LOW")? {
            builder = builder.active_low(active_low);
        }
        if let Some(path) = lookup("RELAY_GPIO_VALUE_PATH") {
            builder = builder.output_path(path);
        }

        Ok(builder.build())
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    pub fn join_poll_interval(&self) -> Duration {
        Duration::from_millis(self.join_poll_ms)
    }

    /// Pick the MQTT client id: configured id, then the device hardware
    /// address, then `relay-agent-<uuid>`.
    pub fn resolve_client_id(&self, hardware_address: Option<String>) -> String {
        let usable = |id: &String| !id.trim().is_empty();
        self.client_id
            .clone()
            .filter(usable)
            .or(hardware_address.filter(usable))
            .unwrap_or_else(|| format!("relay-agent-{}", uuid::Uuid::new_v4().simple()))
    }
}

fn parsed<F, T>(lookup: &F, key: &str) -> Result<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    lookup(key)
        .map(|raw| raw.trim().parse::<T>())
        .transpose()
        .with_context(|| format!("Invalid {key}"))
}

fn positive<F>(lookup: &F, key: &str) -> Result<Option<u64>>
where
    F: Fn(&str) -> Option<String>,
{
    match parsed::<F, u64>(lookup, key)? {
        Some(0) => Err(anyhow!("Invalid {key}: must be greater than zero")),
        value => Ok(value),
    }
}

/// Whole milliseconds, saturating at `u64::MAX`.
fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Builder for [`AgentConfig`].
pub struct AgentConfigBuilder {
    ssid: String,
    passphrase: Option<String>,
    broker_host: String,
    port: u16,
    username: Option<String>,
    password: Option<String>,
    client_id: Option<String>,
    publish_topic: String,
    subscribe_topic: String,
    announcement: String,
    heartbeat_template: String,
    heartbeat_interval_ms: u64,
    retry_delay_ms: u64,
    keep_alive_secs: u64,
    join_poll_ms: u64,
    active_low: bool,
    output_path: Option<PathBuf>,
}

impl AgentConfigBuilder {
    pub fn passphrase(mut self, passphrase: impl Into<String>) -> Self {
        self.passphrase = Some(passphrase.into());
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    pub fn announcement(mut self, announcement: impl Into<String>) -> Self {
        self.announcement = announcement.into();
        self
    }

    pub fn heartbeat_template(mut self, template: impl Into<String>) -> Self {
        self.heartbeat_template = template.into();
        self
    }

    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval_ms = millis(interval);
        self
    }

    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay_ms = millis(delay);
        self
    }

    pub fn keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive_secs = keep_alive.as_secs();
        self
    }

    pub fn join_poll_interval(mut self, interval: Duration) -> Self {
        self.join_poll_ms = millis(interval);
        self
    }

    pub fn active_low(mut self, active_low: bool) -> Self {
        self.active_low = active_low;
        self
    }

    pub fn output_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_path = Some(path.into());
        self
    }

    /// Build the config.
    pub fn build(self) -> AgentConfig {
        AgentConfig {
            ssid: self.ssid,
            passphrase: self.passphrase,
            broker_host: self.broker_host,
            port: self.port,
            username: self.username,
            password: self.password,
            client_id: self.client_id,
            publish_topic: self.publish_topic,
            subscribe_topic: self.subscribe_topic,
            announcement: self.announcement,
            heartbeat_template: self.heartbeat_template,
            heartbeat_interval_ms: self.heartbeat_interval_ms,
            retry_delay_ms: self.retry_delay_ms,
            keep_alive_secs: self.keep_alive_secs,
            join_poll_ms: self.join_poll_ms,
            active_low: self.active_low,
            output_path: self.output_path,
        }
    }
}
