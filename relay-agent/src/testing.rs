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

//! Scripted broker session for tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use rumqttc::QoS;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::session::{Requests, Session, SessionEvent};

/// One scripted outcome of `poll`.
#[derive(Debug, Clone)]
pub(crate) enum Step {
    Connect,
    Fail(&'static str),
    Message(&'static str, &'static str),
    /// Keep the current poll busy for a while before the next step.
    Pause(Duration),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Recorded {
    Poll(Instant),
    Publish {
        topic: String,
        payload: String,
        retain: bool,
    },
    Subscribe(String),
    Disconnect,
}

pub(crate) type Log = Arc<Mutex<Vec<Recorded>>>;

/// Replays `steps` from `poll`. Once the script runs out, a poll waits until
/// a disconnect is queued and then reports [`SessionEvent::Closed`].
/// Only polls that produce an event are recorded.
pub(crate) struct ScriptedSession {
    steps: VecDeque<Step>,
    requests: ScriptedRequests,
}

#[derive(Clone)]
pub(crate) struct ScriptedRequests {
    log: Log,
    closing: Arc<AtomicBool>,
    wake: Arc<Notify>,
}

impl ScriptedSession {
    pub(crate) fn new(steps: Vec<Step>) -> (Self, Log) {
        let log = Log::default();
        let session = Self {
            steps: steps.into(),
            requests: ScriptedRequests {
                log: log.clone(),
                closing: Arc::new(AtomicBool::new(false)),
                wake: Arc::new(Notify::new()),
            },
        };
        (session, log)
    }

    fn record_poll(&self) {
        self.requests
            .log
            .lock()
            .unwrap()
            .push(Recorded::Poll(Instant::now()));
    }
}

#[async_trait]
impl Session for ScriptedSession {
    type Requests = ScriptedRequests;

    fn requests(&self) -> ScriptedRequests {
        self.requests.clone()
    }

    async fn poll(&mut self) -> Result<SessionEvent> {
        loop {
            if self.requests.closing.load(Ordering::SeqCst) {
                self.record_poll();
                return Ok(SessionEvent::Closed);
            }

            let event = match self.steps.pop_front() {
                Some(Step::Pause(duration)) => {
                    tokio::time::sleep(duration).await;
                    continue;
                }
                Some(Step::Connect) => Ok(SessionEvent::Connected),
                Some(Step::Fail(reason)) => Err(anyhow!("{reason}")),
                Some(Step::Message(topic, payload)) => Ok(SessionEvent::Message {
                    topic: topic.to_string(),
                    payload: payload.as_bytes().to_vec(),
                }),
                None => {
                    self.requests.wake.notified().await;
                    continue;
                }
            };
            self.record_poll();
            return event;
        }
    }
}

impl Requests for ScriptedRequests {
    fn publish(&self, topic: &str, payload: Vec<u8>, _qos: QoS, retain: bool) -> Result<()> {
        self.log.lock().unwrap().push(Recorded::Publish {
            topic: topic.to_string(),
            payload: String::from_utf8(payload)?,
            retain,
        });
        Ok(())
    }

    fn subscribe(&self, filter: &str, _qos: QoS) -> Result<()> {
        self.log
            .lock()
            .unwrap()
            .push(Recorded::Subscribe(filter.to_string()));
        Ok(())
    }

    fn disconnect(&self) -> Result<()> {
        self.log.lock().unwrap().push(Recorded::Disconnect);
        self.closing.store(true, Ordering::SeqCst);
        self.wake.notify_one();
        Ok(())
    }
}

pub(crate) fn polls(log: &Log) -> Vec<Instant> {
    log.lock()
        .unwrap()
        .iter()
        .filter_map(|r| match r {
            Recorded::Poll(at) => Some(*at),
            _ => None,
        })
        .collect()
}

/// Everything except polls, in order.
pub(crate) fn requests(log: &Log) -> Vec<Recorded> {
    log.lock()
        .unwrap()
        .iter()
        .filter(|r| !matches!(r, Recorded::Poll(_)))
        .cloned()
        .collect()
}
