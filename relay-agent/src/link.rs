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

//! Broker link supervision.
//!
//! A failed connect attempt is retried after a fixed delay, forever. A link
//! that drops after being up is retried at once; only attempts that fail
//! while connecting wait out the delay. Every successful connect is followed
//! by the announcement and a fresh subscription to the control topic.

use std::time::Duration;

use anyhow::Result;
use rumqttc::QoS;
use tokio::time::Instant;

use crate::session::Requests;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LinkState {
    /// The next poll attempts a connection.
    #[default]
    Connecting,
    Up,
    /// Waiting for the retry deadline.
    Down,
}

/// Tracks the broker link and when the next connect attempt may happen.
#[derive(Debug)]
pub struct LinkSupervisor {
    state: LinkState,
    retry_delay: Duration,
    retry_at: Option<Instant>,
    failed_attempts: u64,
    connects: u64,
}

impl LinkSupervisor {
    pub fn new(retry_delay: Duration) -> Self {
        Self {
            state: LinkState::Connecting,
            retry_delay,
            retry_at: None,
            failed_attempts: 0,
            connects: 0,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn is_up(&self) -> bool {
        self.state == LinkState::Up
    }

    /// Deadline of the pending retry, if the link is waiting for one.
    pub fn retry_deadline(&self) -> Option<Instant> {
        self.retry_at
    }

    /// Failed attempts since the last successful connect.
    pub fn failed_attempts(&self) -> u64 {
        self.failed_attempts
    }

    /// Successful connects, the first one included.
    pub fn connects(&self) -> u64 {
        self.connects
    }

    pub fn on_connected(&mut self) {
        self.state = LinkState::Up;
        self.retry_at = None;
        self.failed_attempts = 0;
        self.connects += 1;
    }

    /// Record a failure observed at `now` and return the retry deadline, if
    /// the next attempt has to wait.
    pub fn on_failure(&mut self, now: Instant) -> Option<Instant> {
        if self.state == LinkState::Up {
            self.state = LinkState::Connecting;
            self.retry_at = None;
        } else {
            self.failed_attempts += 1;
            self.state = LinkState::Down;
            self.retry_at = Some(now + self.retry_delay);
        }
        self.retry_at
    }

    pub fn retry_elapsed(&mut self) {
        self.state = LinkState::Connecting;
        self.retry_at = None;
    }
}

/// Topics and the announcement used when (re)establishing the link.
#[derive(Debug, Clone)]
pub struct LinkTopics {
    pub publish_topic: String,
    pub subscribe_topic: String,
    pub announcement: String,
}

/// Announce on the publish topic (retained) and subscribe to the control
/// topic. Called after every successful connect.
pub fn establish<R>(requests: &R, topics: &LinkTopics) -> Result<()>
where
    R: Requests + ?Sized,
{
    requests.publish(
        &topics.publish_topic,
        topics.announcement.clone().into_bytes(),
        QoS::AtMostOnce,
        true,
    )?;
    requests.subscribe(&topics.subscribe_topic, QoS::AtMostOnce)
}
