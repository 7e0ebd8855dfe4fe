//! Advertisement transports.
//!
//! A transport sends advertisements best-effort and feeds received ones into
//! a bounded queue that the planner drains at the start of each tick. A full
//! queue drops the advertisement; senders never block on a slow planner.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use rand::prelude::*;
use rand::rngs::StdRng;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use swarm_kernel::{AdvertError, Advertisement, AgentId};

use crate::config::BroadcastConfig;

/// Largest datagram accepted by the receiver.
const MAX_DATAGRAM: usize = 512;

/// Outbound side of a broadcast medium.
#[async_trait]
pub trait AdvertTransport: Send + Sync {
    async fn broadcast(&self, advert: &Advertisement) -> Result<()>;
}

/// Queue a received advertisement. Returns `false` once the planner is gone.
fn deliver(inbox: &mpsc::Sender<Advertisement>, advert: Advertisement) -> bool {
    match inbox.try_send(advert) {
        Ok(()) => true,
        Err(TrySendError::Full(advert)) => {
            warn!(peer = advert.agent, "Advertisement queue full, dropping");
            true
        }
        Err(TrySendError::Closed(_)) => false,
    }
}

/// Decode one datagram and queue it. Malformed datagrams are dropped.
fn receive(
    inbox: &mpsc::Sender<Advertisement>,
    bytes: &[u8],
    from: SocketAddr,
) -> Result<bool, AdvertError> {
    let advert = Advertisement::decode(bytes)?;
    trace!(from = %from, advert = %advert, "Advertisement received");
    Ok(deliver(inbox, advert))
}

/// UDP multicast medium.
pub struct UdpMulticast {
    socket: UdpSocket,
    group: SocketAddrV4,
}

impl std::fmt::Debug for UdpMulticast {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UdpMulticast")
            .field("group", &self.group)
            .finish()
    }
}

impl UdpMulticast {
    /// Join the multicast group and start the receiver task.
    ///
    /// The receiver pushes decoded advertisements into `inbox` until the
    /// inbox is closed.
    pub async fn join(
        config: &BroadcastConfig,
        inbox: mpsc::Sender<Advertisement>,
    ) -> Result<(Self, JoinHandle<()>)> {
        let group = SocketAddrV4::new(config.group, config.port);

        let send = UdpSocket::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0))
            .await
            .context("Failed to bind advertisement send socket")?;
        send.set_multicast_ttl_v4(config.ttl)
            .context("Failed to set multicast TTL")?;

        let recv = UdpSocket::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, config.port))
            .await
            .with_context(|| format!("Failed to bind advertisement port {}", config.port))?;
        recv.join_multicast_v4(config.group, Ipv4Addr::UNSPECIFIED)
            .with_context(|| format!("Failed to join multicast group {}", config.group))?;

        info!(group = %group, ttl = config.ttl, "Joined advertisement group");
        let receiver = tokio::spawn(Self::receive_loop(recv, inbox));
        Ok((Self { socket: send, group }, receiver))
    }

    async fn receive_loop(socket: UdpSocket, inbox: mpsc::Sender<Advertisement>) {
        let mut buf = [0u8; MAX_DATAGRAM];
        loop {
            let (len, from) = match socket.recv_from(&mut buf).await {
                Ok(received) => received,
                Err(e) => {
                    warn!(error = %e, "Advertisement receive failed");
                    continue;
                }
            };
            match receive(&inbox, &buf[..len], from) {
                Ok(true) => {}
                Ok(false) => {
                    debug!("Advertisement queue closed, receiver stopping");
                    return;
                }
                Err(e) => debug!(from = %from, error = %e, "Dropping malformed advertisement"),
            }
        }
    }
}

#[async_trait]
impl AdvertTransport for UdpMulticast {
    async fn broadcast(&self, advert: &Advertisement) -> Result<()> {
        self.socket
            .send_to(advert.encode().as_bytes(), self.group)
            .await
            .with_context(|| format!("Failed to send advertisement to {}", self.group))?;
        Ok(())
    }
}

/// In-process broadcast medium with optional random loss.
///
/// Every member receives every advertisement (its own included, as with
/// multicast loopback) unless the loss roll drops that copy. A deferred bus
/// holds everything published until [`LocalBus::flush`], so agents ticking
/// one after another in the same step see the same messages.
pub struct LocalBus {
    members: DashMap<AgentId, mpsc::Sender<Advertisement>>,
    loss_rate: f64,
    rng: Mutex<StdRng>,
    held: Option<Mutex<Vec<Advertisement>>>,
}

impl std::fmt::Debug for LocalBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalBus")
            .field("members", &self.members.len())
            .field("loss_rate", &self.loss_rate)
            .field("deferred", &self.held.is_some())
            .finish()
    }
}

impl LocalBus {
    /// Create a bus delivering on publish, dropping each delivered copy with
    /// probability `loss_rate`, rolled from a seeded RNG.
    pub fn new(loss_rate: f64, seed: u64) -> Arc<Self> {
        Self::build(loss_rate, seed, None)
    }

    /// Create a bus that delivers only on [`LocalBus::flush`].
    pub fn deferred(loss_rate: f64, seed: u64) -> Arc<Self> {
        Self::build(loss_rate, seed, Some(Mutex::new(Vec::new())))
    }

    fn build(loss_rate: f64, seed: u64, held: Option<Mutex<Vec<Advertisement>>>) -> Arc<Self> {
        Arc::new(Self {
            members: DashMap::new(),
            loss_rate: loss_rate.clamp(0.0, 1.0),
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            held,
        })
    }

    /// Deliver everything held since the last flush, in publish order.
    /// Returns how many advertisements were released.
    pub fn flush(&self) -> usize {
        let Some(held) = &self.held else {
            return 0;
        };
        let pending = std::mem::take(&mut *held.lock().unwrap_or_else(PoisonError::into_inner));
        for advert in &pending {
            self.deliver_all(advert);
        }
        pending.len()
    }

    /// Attach an agent; returns its transport and inbound queue.
    pub fn join(
        self: &Arc<Self>,
        agent: AgentId,
        capacity: usize,
    ) -> (LocalBusPort, mpsc::Receiver<Advertisement>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        self.members.insert(agent, tx);
        (
            LocalBusPort { bus: self.clone() },
            rx,
        )
    }

    fn dropped(&self) -> bool {
        if self.loss_rate <= 0.0 {
            return false;
        }
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        rng.random_bool(self.loss_rate)
    }

    fn publish(&self, advert: &Advertisement) {
        match &self.held {
            Some(held) => held
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(*advert),
            None => self.deliver_all(advert),
        }
    }

    fn deliver_all(&self, advert: &Advertisement) {
        // Sorted so the loss pattern only depends on the seed.
        let mut members: Vec<(AgentId, mpsc::Sender<Advertisement>)> = self
            .members
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();
        members.sort_by_key(|(id, _)| *id);

        for (id, inbox) in members {
            if self.dropped() {
                trace!(from = advert.agent, to = id, "Advertisement lost");
                continue;
            }
            if !deliver(&inbox, *advert) {
                self.members.remove(&id);
            }
        }
    }
}

/// One agent's attachment to a [`LocalBus`].
#[derive(Debug, Clone)]
pub struct LocalBusPort {
    bus: Arc<LocalBus>,
}

#[async_trait]
impl AdvertTransport for LocalBusPort {
    async fn broadcast(&self, advert: &Advertisement) -> Result<()> {
        self.bus.publish(advert);
        Ok(())
    }
}
