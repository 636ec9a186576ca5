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

//! Fixed-period heartbeat messages.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use handlebars::Handlebars;
use tokio::time::Instant;

/// Heartbeats never exceed this many bytes.
pub const MAX_HEARTBEAT_LEN: usize = 49;

const TEMPLATE_NAME: &str = "heartbeat";

const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Produces numbered heartbeat texts on a fixed interval.
pub struct Heartbeat {
    topic: String,
    client_id: String,
    registry: Handlebars<'static>,
    interval: Duration,
    last: Instant,
    count: u64,
}

impl Heartbeat {
    /// The first heartbeat comes due one `interval` after construction.
    pub fn new(
        topic: impl Into<String>,
        template: &str,
        interval: Duration,
        client_id: impl Into<String>,
    ) -> Result<Self> {
        if interval.is_zero() {
            bail!("Heartbeat interval must be greater than zero");
        }

        let mut registry = Handlebars::new();
        registry.register_escape_fn(handlebars::no_escape);
        registry
            .register_template_string(TEMPLATE_NAME, template)
            .with_context(|| format!("Invalid heartbeat template '{template}'"))?;

        Ok(Self {
            topic: topic.into(),
            client_id: client_id.into(),
            registry,
            interval,
            last: Instant::now(),
            count: 0,
        })
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    /// Saturates at roughly thirty years out for very long intervals.
    pub fn next_due(&self) -> Instant {
        self.last
            .checked_add(self.interval)
            .unwrap_or_else(|| self.last + FAR_FUTURE)
    }

    pub fn is_due(&self, now: Instant) -> bool {
        now >= self.next_due()
    }

    /// Advance the counter, restart the period at `now` and render the text.
    pub fn tick(&mut self, now: Instant) -> Result<String> {
        self.last = now;
        self.count += 1;
        self.render(self.count)
    }

    fn render(&self, count: u64) -> Result<String> {
        let data = serde_json::json!({
            "count": count,
            "client_id": self.client_id,
        });
        let text = self
            .registry
            .render(TEMPLATE_NAME, &data)
            .context("Failed to render heartbeat")?;
        Ok(truncate(text, MAX_HEARTBEAT_LEN))
    }
}

fn truncate(mut text: String, max: usize) -> String {
    if text.len() > max {
        let mut end = max;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        text.truncate(end);
    }
    text
}
