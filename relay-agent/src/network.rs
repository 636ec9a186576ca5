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

//! One-time network join.

use std::fs;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use log::{debug, info};
use tokio::net::UdpSocket;

/// Association status reported by a [`NetworkLink`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkStatus {
    Disconnected,
    Connected(IpAddr),
}

/// A network interface the agent must join before reaching the broker.
#[async_trait]
pub trait NetworkLink: Send {
    /// Start associating with the given network.
    async fn begin(&mut self, ssid: &str, passphrase: Option<&str>) -> Result<()>;

    /// Current association status.
    async fn status(&mut self) -> NetworkStatus;

    /// Hardware address of the interface, if known.
    fn hardware_address(&self) -> Option<String> {
        None
    }
}

/// Join `ssid` and wait until the link reports an address.
///
/// The status is polled every `poll_interval` with no upper bound. Only a
/// failure to start the association is reported as an error.
pub async fn join<L>(
    link: &mut L,
    ssid: &str,
    passphrase: Option<&str>,
    poll_interval: Duration,
) -> Result<IpAddr>
where
    L: NetworkLink + ?Sized,
{
    info!("Connecting to {ssid}");
    link.begin(ssid, passphrase).await?;

    let mut polls: u64 = 0;
    loop {
        if let NetworkStatus::Connected(ip) = link.status().await {
            info!("Network connected, IP address: {ip}");
            return Ok(ip);
        }
        polls += 1;
        debug!("Waiting for {ssid} ({polls} polls)");
        tokio::time::sleep(poll_interval).await;
    }
}

/// Where Linux exposes interface hardware addresses.
const SYS_CLASS_NET: &str = "/sys/class/net";

/// First non-zero hardware address under `net_dir` (`<iface>/address`),
/// skipping loopback. Interfaces are visited in name order.
fn first_hardware_address(net_dir: &Path) -> Option<String> {
    let mut interfaces: Vec<_> = fs::read_dir(net_dir).ok()?.flatten().collect();
    interfaces.sort_by_key(|entry| entry.file_name());

    interfaces
        .iter()
        .filter(|entry| entry.file_name() != "lo")
        .filter_map(|entry| fs::read_to_string(entry.path().join("address")).ok())
        .map(|mac| mac.trim().to_string())
        .find(|mac| !mac.is_empty() && mac != "00:00:00:00:00:00")
}

/// Network link for hosted targets where the operating system owns the
/// interface. The link counts as connected once a route to the broker
/// exists.
pub struct HostNetwork {
    host: String,
    port: u16,
    ssid: Option<String>,
}

impl HostNetwork {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ssid: None,
        }
    }

    async fn route_to_broker(&self) -> Result<IpAddr> {
        let target = tokio::net::lookup_host((self.host.as_str(), self.port))
            .await?
            .next()
            .ok_or_else(|| anyhow!("{} did not resolve", self.host))?;

        let bind: SocketAddr = match target {
            SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
            SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
        };
        let socket = UdpSocket::bind(bind).await?;
        socket.connect(target).await?;

        let local = socket.local_addr()?.ip();
        if local.is_unspecified() {
            return Err(anyhow!("no local address routes to {target}"));
        }
        Ok(local)
    }
}

#[async_trait]
impl NetworkLink for HostNetwork {
    async fn begin(&mut self, ssid: &str, _passphrase: Option<&str>) -> Result<()> {
        debug!("Host network manages association for {ssid}");
        self.ssid = Some(ssid.to_string());
        Ok(())
    }

    async fn status(&mut self) -> NetworkStatus {
        match self.route_to_broker().await {
            Ok(ip) => NetworkStatus::Connected(ip),
            Err(e) => {
                debug!(
                    "No route to {}:{} on {}: {e}",
                    self.host,
                    self.port,
                    self.ssid.as_deref().unwrap_or("host network")
                );
                NetworkStatus::Disconnected
            }
        }
    }

    fn hardware_address(&self) -> Option<String> {
        first_hardware_address(Path::new(SYS_CLASS_NET))
    }
}
