//! Network reachability tracking and the effective online/offline mode.

use async_trait::async_trait;
use log::{debug, info};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::models::PlaybackMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityEvent {
    /// Raw reachability changed
    Reachability(bool),
    /// Effective mode changed, either through reachability or the user
    ModeChanged(PlaybackMode),
}

#[derive(Debug, Clone, Copy)]
struct State {
    connected: bool,
    forced_offline: bool,
}

impl State {
    fn mode(&self) -> PlaybackMode {
        if self.connected && !self.forced_offline {
            PlaybackMode::Online
        } else {
            PlaybackMode::Offline
        }
    }
}

/// Last known reachability plus the user's forced-offline switch
///
/// Events fire only on transitions; repeating the same status is silent.
pub struct ConnectivityMonitor {
    state: Mutex<State>,
    events: broadcast::Sender<ConnectivityEvent>,
}

impl ConnectivityMonitor {
    pub fn new(connected: bool, forced_offline: bool) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            state: Mutex::new(State {
                connected,
                forced_offline,
            }),
            events,
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConnectivityEvent> {
        self.events.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.lock().connected
    }

    pub fn is_forced_offline(&self) -> bool {
        self.lock().forced_offline
    }

    /// Effective mode: online only when reachable and not forced offline
    pub fn mode(&self) -> PlaybackMode {
        self.lock().mode()
    }

    /// Record a reachability observation, returning whether it changed
    pub fn set_connected(&self, connected: bool) -> bool {
        self.update(|state| state.connected = connected)
    }

    pub fn set_forced_offline(&self, forced_offline: bool) -> bool {
        self.update(|state| state.forced_offline = forced_offline)
    }

    fn update(&self, change: impl FnOnce(&mut State)) -> bool {
        let mut state = self.lock();
        let before = *state;
        change(&mut state);
        let after = *state;

        // Sent under the lock so subscribers see transitions in order
        if before.connected != after.connected {
            info!(
                "Network {}",
                if after.connected { "reachable" } else { "unreachable" }
            );
            let _ = self.events.send(ConnectivityEvent::Reachability(after.connected));
        }
        if before.mode() != after.mode() {
            info!("Mode changed to {:?}", after.mode());
            let _ = self.events.send(ConnectivityEvent::ModeChanged(after.mode()));
        }

        before.connected != after.connected || before.forced_offline != after.forced_offline
    }

    /// Probe once and record the result
    pub async fn check(&self, probe: &dyn ReachabilityProbe) -> bool {
        let reachable = probe.is_reachable().await;
        self.set_connected(reachable);
        reachable
    }

    /// Probe periodically on a background task
    pub fn spawn_polling(
        self: Arc<Self>,
        probe: Arc<dyn ReachabilityProbe>,
        every: Duration,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let reachable = self.check(probe.as_ref()).await;
                debug!("Reachability probe: {}", reachable);
            }
        })
    }
}

/// Path-reachability primitive
#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    async fn is_reachable(&self) -> bool;
}

/// Reachable when a TCP connection to a well-known host succeeds in time
pub struct TcpProbe {
    address: String,
    timeout: Duration,
}

impl TcpProbe {
    pub fn new(address: impl Into<String>, timeout: Duration) -> Self {
        Self {
            address: address.into(),
            timeout,
        }
    }
}

#[async_trait]
impl ReachabilityProbe for TcpProbe {
    async fn is_reachable(&self) -> bool {
        match tokio::time::timeout(self.timeout, TcpStream::connect(&self.address)).await {
            Ok(Ok(_)) => true,
            Ok(Err(err)) => {
                debug!("Probe to {} failed: {}", self.address, err);
                false
            }
            Err(_) => {
                debug!("Probe to {} timed out", self.address);
                false
            }
        }
    }
}
