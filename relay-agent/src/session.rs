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

//! Broker session abstraction and its `rumqttc` implementation.

use std::future::Future;
use std::pin::Pin;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, Incoming, MqttOptions, Outgoing, QoS};

use crate::config::AgentConfig;

/// Capacity of the request channel between the client and its event loop.
const REQUEST_CAPACITY: usize = 16;

/// What a single [`Session::poll`] produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The broker accepted the connection.
    Connected,
    /// A message arrived on a subscribed topic.
    Message { topic: String, payload: Vec<u8> },
    /// A queued disconnect was written to the broker.
    Closed,
    /// Any other protocol traffic (pings, acks, outgoing packets).
    Other,
}

/// Request side of a session.
///
/// Requests are only queued; they go out on a later [`Session::poll`].
pub trait Requests: Send {
    fn publish(&self, topic: &str, payload: Vec<u8>, qos: QoS, retain: bool) -> Result<()>;

    fn subscribe(&self, filter: &str, qos: QoS) -> Result<()>;

    fn disconnect(&self) -> Result<()>;
}

/// A connection to the broker driven by repeated polling.
///
/// A `poll` after an error attempts to reconnect.
#[async_trait]
pub trait Session: Send + 'static {
    type Requests: Requests;

    /// A handle queueing requests for this session.
    fn requests(&self) -> Self::Requests;

    async fn poll(&mut self) -> Result<SessionEvent>;
}

type PendingPoll<S> = Pin<Box<dyn Future<Output = (S, Result<SessionEvent>)> + Send>>;

/// Owns a [`Session`] and keeps an unfinished poll alive across calls.
///
/// Dropping the future returned by [`Poller::next`] does not drop the poll
/// underneath: the next call resumes it, so a session is never interrupted
/// halfway through writing to the broker.
pub struct Poller<S> {
    session: Option<S>,
    pending: Option<PendingPoll<S>>,
}

impl<S: Session> Poller<S> {
    pub fn new(session: S) -> Self {
        Self {
            session: Some(session),
            pending: None,
        }
    }

    /// Resume the unfinished poll, or start a new one.
    pub async fn next(&mut self) -> Result<SessionEvent> {
        let pending = match self.pending {
            Some(ref mut pending) => pending,
            None => {
                let mut session = self
                    .session
                    .take()
                    .ok_or_else(|| anyhow!("Session lost by an earlier poll"))?;
                self.pending.insert(Box::pin(async move {
                    let event = session.poll().await;
                    (session, event)
                }))
            }
        };

        let (session, event) = pending.await;
        self.pending = None;
        self.session = Some(session);
        event
    }
}

/// [`Requests`] for a [`RumqttSession`], queued without waiting on the
/// request channel.
#[derive(Clone)]
pub struct RumqttRequests(AsyncClient);

impl Requests for RumqttRequests {
    fn publish(&self, topic: &str, payload: Vec<u8>, qos: QoS, retain: bool) -> Result<()> {
        self.0
            .try_publish(topic, qos, retain, payload)
            .map_err(|e| anyhow!("MQTT publish failed: {e}"))
    }

    fn subscribe(&self, filter: &str, qos: QoS) -> Result<()> {
        self.0
            .try_subscribe(filter, qos)
            .map_err(|e| anyhow!("MQTT subscribe failed: {e}"))
    }

    fn disconnect(&self) -> Result<()> {
        self.0
            .try_disconnect()
            .map_err(|e| anyhow!("MQTT disconnect failed: {e}"))
    }
}

/// [`Session`] backed by a `rumqttc` client and event loop.
pub struct RumqttSession {
    client: AsyncClient,
    eventloop: EventLoop,
}

impl RumqttSession {
    pub fn new(config: &AgentConfig, client_id: &str) -> Self {
        let mut mqtt_opts = MqttOptions::new(client_id, &config.broker_host, config.port);
        mqtt_opts.set_keep_alive(config.keep_alive());

        if let (Some(user), Some(pass)) = (&config.username, &config.password) {
            mqtt_opts.set_credentials(user, pass);
        }

        let (client, eventloop) = AsyncClient::new(mqtt_opts, REQUEST_CAPACITY);
        Self { client, eventloop }
    }
}

#[async_trait]
impl Session for RumqttSession {
    type Requests = RumqttRequests;

    fn requests(&self) -> RumqttRequests {
        RumqttRequests(self.client.clone())
    }

    async fn poll(&mut self) -> Result<SessionEvent> {
        let event = match self.eventloop.poll().await? {
            Event::Incoming(Incoming::ConnAck(_)) => SessionEvent::Connected,
            Event::Incoming(Incoming::Publish(publish)) => SessionEvent::Message {
                topic: publish.topic,
                payload: publish.payload.to_vec(),
            },
            Event::Outgoing(Outgoing::Disconnect) => SessionEvent::Closed,
            _ => SessionEvent::Other,
        };
        Ok(event)
    }
}
