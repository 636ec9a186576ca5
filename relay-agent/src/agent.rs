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

//! The agent's cooperative main loop.

use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use embedded_hal::digital::OutputPin;
use log::{debug, error, info, warn};
use rumqttc::QoS;
use tokio::sync::watch;
use tokio::time::{sleep_until, timeout, Instant};

use crate::config::AgentConfig;
use crate::control::ControlHandler;
use crate::heartbeat::Heartbeat;
use crate::link::{self, LinkState, LinkSupervisor, LinkTopics};
use crate::session::{Poller, Requests, Session, SessionEvent};

/// Device agent.
///
/// Keeps one broker session alive, answers control messages by driving the
/// output pin, and publishes heartbeats while the link is up. Everything
/// runs on a single task inside [`Agent::run`].
pub struct Agent<S: Session, P> {
    client_id: String,
    poller: Poller<S>,
    requests: S::Requests,
    link: LinkSupervisor,
    topics: LinkTopics,
    control: ControlHandler<P>,
    heartbeat: Heartbeat,
    close_timeout: Duration,
    state_tx: watch::Sender<LinkState>,
}

impl<S, P> Agent<S, P>
where
    S: Session,
    P: OutputPin,
{
    /// Create a new agent from the given config.
    pub fn new(
        config: &AgentConfig,
        client_id: impl Into<String>,
        session: S,
        pin: P,
    ) -> Result<Self> {
        let client_id = client_id.into();
        let heartbeat = Heartbeat::new(
            &config.publish_topic,
            &config.heartbeat_template,
            config.heartbeat_interval(),
            &client_id,
        )?;
        let (state_tx, _) = watch::channel(LinkState::Connecting);

        Ok(Self {
            requests: session.requests(),
            poller: Poller::new(session),
            link: LinkSupervisor::new(config.retry_delay()),
            topics: LinkTopics {
                publish_topic: config.publish_topic.clone(),
                subscribe_topic: config.subscribe_topic.clone(),
                announcement: config.announcement.clone(),
            },
            control: ControlHandler::new(pin, config.active_low, &client_id),
            heartbeat,
            close_timeout: config.keep_alive(),
            state_tx,
            client_id,
        })
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Watch the broker link state.
    pub fn link_state(&self) -> watch::Receiver<LinkState> {
        self.state_tx.subscribe()
    }

    /// Run until `shutdown` completes, then disconnect from the broker.
    ///
    /// A poll interrupted by a timer is resumed on the next iteration, never
    /// restarted.
    pub async fn run<F>(mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        info!("[{}] Attempting MQTT connection...", self.client_id);

        loop {
            let retry_at = self.link.retry_deadline();
            let heartbeat_at = self.heartbeat.next_due();
            let up = self.link.is_up();

            tokio::select! {
                _ = &mut shutdown => {
                    info!("[{}] Shutdown signal received", self.client_id);
                    break;
                }
                _ = sleep_until(retry_at.unwrap_or(heartbeat_at)), if retry_at.is_some() => {
                    self.link.retry_elapsed();
                    self.publish_state();
                    info!("[{}] Attempting MQTT connection...", self.client_id);
                }
                event = self.poller.next(), if retry_at.is_none() => {
                    self.handle_event(event);
                }
                _ = sleep_until(heartbeat_at), if up => {
                    self.publish_heartbeat();
                }
            }
        }

        self.close().await;
        info!(
            "[{}] Agent stopped after {} connects and {} control messages",
            self.client_id,
            self.link.connects(),
            self.control.messages()
        );
        Ok(())
    }

    /// Queue a disconnect and, while the link is up, keep polling until it
    /// has been written or `close_timeout` runs out.
    async fn close(&mut self) {
        if let Err(e) = self.requests.disconnect() {
            warn!("[{}] {e}", self.client_id);
            return;
        }
        if !self.link.is_up() {
            return;
        }

        let poller = &mut self.poller;
        let flushed = timeout(self.close_timeout, async {
            loop {
                match poller.next().await {
                    Ok(SessionEvent::Closed) => return Ok(()),
                    Ok(_) => {}
                    Err(e) => return Err(e),
                }
            }
        })
        .await;

        match flushed {
            Ok(Ok(())) => info!("[{}] Disconnected", self.client_id),
            Ok(Err(e)) => warn!("[{}] Connection closed before disconnect: {e}", self.client_id),
            Err(_) => warn!(
                "[{}] Disconnect not sent within {:?}",
                self.client_id, self.close_timeout
            ),
        }
    }

    fn handle_event(&mut self, event: Result<SessionEvent>) {
        match event {
            Ok(SessionEvent::Connected) => {
                info!("[{}] Connected", self.client_id);
                self.link.on_connected();
                self.publish_state();
                if let Err(e) = link::establish(&self.requests, &self.topics) {
                    error!(
                        "[{}] Failed to announce and resubscribe: {e}",
                        self.client_id
                    );
                }
            }
            Ok(SessionEvent::Message { topic, payload }) => {
                self.control.apply(&topic, &payload);
            }
            Ok(SessionEvent::Closed | SessionEvent::Other) => {}
            Err(e) => match self.link.on_failure(Instant::now()) {
                Some(retry_at) => {
                    let wait = retry_at.saturating_duration_since(Instant::now());
                    warn!(
                        "[{}] failed, rc={e}, try again in {} seconds",
                        self.client_id,
                        wait.as_secs()
                    );
                    self.publish_state();
                }
                None => {
                    warn!("[{}] Connection lost: {e}", self.client_id);
                    self.publish_state();
                    info!("[{}] Attempting MQTT connection...", self.client_id);
                }
            },
        }
    }

    fn publish_heartbeat(&mut self) {
        let text = match self.heartbeat.tick(Instant::now()) {
            Ok(text) => text,
            Err(e) => {
                error!("[{}] {e:#}", self.client_id);
                return;
            }
        };

        info!("[{}] Publish message: {text}", self.client_id);
        if let Err(e) = self.requests.publish(
            self.heartbeat.topic(),
            text.into_bytes(),
            QoS::AtMostOnce,
            false,
        ) {
            error!("[{}] {e}", self.client_id);
        }
    }

    fn publish_state(&self) {
        let state = self.link.state();
        debug!("[{}] Link state: {state:?}", self.client_id);
        self.state_tx.send_replace(state);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::output::MemoryPin;
    use crate::testing::{polls, requests, Log, Recorded, ScriptedSession, Step};

    const CONTROL: &str = "devices/relay-1/control";
    const STATUS: &str = "devices/relay-1/status";

    fn config() -> AgentConfig {
        AgentConfig::builder("workshop", "broker.local", STATUS, CONTROL).build()
    }

    fn announcement() -> Recorded {
        Recorded::Publish {
            topic: STATUS.into(),
            payload: "hello world".into(),
            retain: true,
        }
    }

    fn heartbeat(n: u64) -> Recorded {
        Recorded::Publish {
            topic: STATUS.into(),
            payload: format!("hello world #{n}"),
            retain: false,
        }
    }

    fn agent(steps: Vec<Step>) -> (Agent<ScriptedSession, MemoryPin>, Log, MemoryPin) {
        let (session, log) = ScriptedSession::new(steps);
        let pin = MemoryPin::new();
        let agent = Agent::new(&config(), "relay-test", session, pin.clone()).unwrap();
        (agent, log, pin)
    }

    fn assert_gap(earlier: Instant, later: Instant, expected: Duration) {
        let gap = later - earlier;
        assert!(
            gap >= expected && gap < expected + Duration::from_millis(10),
            "gap was {gap:?}, expected {expected:?}"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnects_at_fixed_interval() {
        let (agent, log, _) = agent(vec![
            Step::Fail("refused"),
            Step::Fail("refused"),
            Step::Connect,
        ]);

        agent
            .run(tokio::time::sleep(Duration::from_secs(12)))
            .await
            .unwrap();

        // The fourth poll writes the disconnect.
        let polls = polls(&log);
        assert_eq!(polls.len(), 4);
        assert_gap(polls[0], polls[1], Duration::from_secs(5));
        assert_gap(polls[1], polls[2], Duration::from_secs(5));

        // The heartbeat came due at 5s while the link was down and goes out
        // as soon as the link is back.
        assert_eq!(
            requests(&log),
            vec![
                announcement(),
                Recorded::Subscribe(CONTROL.into()),
                heartbeat(1),
                Recorded::Disconnect,
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_resubscribes_after_every_reconnect() {
        let (agent, log, _) = agent(vec![
            Step::Connect,
            Step::Fail("connection reset"),
            Step::Connect,
            Step::Fail("ping timeout"),
            Step::Fail("refused"),
            Step::Connect,
        ]);

        agent
            .run(tokio::time::sleep(Duration::from_secs(6)))
            .await
            .unwrap();

        let polls = polls(&log);
        assert_eq!(polls.len(), 7);
        // Lost links are retried at once, the refused attempt waits.
        assert_gap(polls[0], polls[4], Duration::ZERO);
        assert_gap(polls[4], polls[5], Duration::from_secs(5));

        let subscribes = requests(&log)
            .into_iter()
            .filter(|r| *r == Recorded::Subscribe(CONTROL.into()))
            .count();
        assert_eq!(subscribes, 3);

        let reqs = requests(&log);
        for (i, r) in reqs.iter().enumerate() {
            if *r == announcement() {
                assert_eq!(reqs[i + 1], Recorded::Subscribe(CONTROL.into()));
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeats_count_up_every_interval() {
        let (agent, log, _) = agent(vec![Step::Connect]);

        agent
            .run(tokio::time::sleep(Duration::from_secs(16)))
            .await
            .unwrap();

        assert_eq!(
            requests(&log),
            vec![
                announcement(),
                Recorded::Subscribe(CONTROL.into()),
                heartbeat(1),
                heartbeat(2),
                heartbeat(3),
                Recorded::Disconnect,
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_heartbeat_while_disconnected() {
        let (agent, log, _) = agent(vec![Step::Fail("refused")]);
        let mut state = agent.link_state();

        agent
            .run(tokio::time::sleep(Duration::from_secs(12)))
            .await
            .unwrap();

        assert_eq!(requests(&log), vec![Recorded::Disconnect]);
        assert_eq!(polls(&log).len(), 1);
        assert_eq!(*state.borrow_and_update(), LinkState::Connecting);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_is_flushed_on_shutdown() {
        let (agent, log, _) = agent(vec![Step::Connect]);
        let started = Instant::now();

        agent
            .run(tokio::time::sleep(Duration::from_secs(1)))
            .await
            .unwrap();

        let log = log.lock().unwrap();
        let tail = &log[log.len() - 2..];
        assert_eq!(tail[0], Recorded::Disconnect);
        match tail[1] {
            Recorded::Poll(at) => assert_gap(started, at, Duration::from_secs(1)),
            ref other => panic!("expected a poll after the disconnect, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_count_survives_reconnect() {
        let (agent, log, _) = agent(vec![
            Step::Connect,
            Step::Pause(Duration::from_secs(6)),
            Step::Fail("connection reset"),
            Step::Connect,
        ]);

        agent
            .run(tokio::time::sleep(Duration::from_secs(12)))
            .await
            .unwrap();

        assert_eq!(
            requests(&log),
            vec![
                announcement(),
                Recorded::Subscribe(CONTROL.into()),
                heartbeat(1),
                announcement(),
                Recorded::Subscribe(CONTROL.into()),
                heartbeat(2),
                Recorded::Disconnect,
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_output_follows_latest_enable() {
        let (agent, _, pin) = agent(vec![
            Step::Connect,
            Step::Message(CONTROL, r#"{"enable": true}"#),
            Step::Message(CONTROL, r#"{"enable": false}"#),
            Step::Message(CONTROL, r#"{"enable": true}"#),
        ]);

        agent
            .run(tokio::time::sleep(Duration::from_secs(1)))
            .await
            .unwrap();
        assert!(pin.is_high());
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_control_drives_low() {
        let (agent, _, pin) = agent(vec![
            Step::Connect,
            Step::Message(CONTROL, r#"{"enable": true}"#),
            Step::Message(CONTROL, "garbage"),
        ]);

        agent
            .run(tokio::time::sleep(Duration::from_secs(1)))
            .await
            .unwrap();
        assert!(!pin.is_high());
    }

    #[tokio::test(start_paused = true)]
    async fn test_link_state_is_published() {
        let (agent, _, _) = agent(vec![Step::Connect]);
        let mut state = agent.link_state();
        assert_eq!(*state.borrow(), LinkState::Connecting);

        agent
            .run(tokio::time::sleep(Duration::from_secs(1)))
            .await
            .unwrap();

        assert_eq!(*state.borrow_and_update(), LinkState::Up);
    }
}
