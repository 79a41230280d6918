use crate::config::ConnectorConfig;
use crate::gateway::SimGateway;
use crate::net::{ConnectStatus, RelayTransport, TransportState};
use crate::protocol::{InboundMsg, RelayReply, INBOUND_CAP};
use crate::relay::{CommandRelay, Control};
use crate::sim::{SimLink, SimNotice, SimSession};
use crate::watchdog::ParentWatch;
use crossbeam_channel::{bounded, select, tick, Receiver};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    SimulatorHandshaking,
    SimulatorReady,
    RelayAwaitingPeer,
    RelayReady,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    PeerRequestedClose,
    ParentGone,
    RunLimitReached,
}

/// Owns both links and runs the host loop: relay messages are handled as they
/// arrive, the simulator is pumped and the parent checked on every tick.
pub struct ConnectionSupervisor {
    config: ConnectorConfig,
    transport: RelayTransport,
    inbound_rx: Receiver<InboundMsg>,
    sim: SimSession,
    relay: CommandRelay,
    watch: ParentWatch,
}

impl ConnectionSupervisor {
    pub fn new(config: ConnectorConfig, gateway: Box<dyn SimGateway>) -> Self {
        let (in_tx, inbound_rx) = bounded(INBOUND_CAP);
        let sim = SimSession::new(gateway, &config.client_name);
        let watch = ParentWatch::new(config.parent_process.clone());
        Self {
            config,
            transport: RelayTransport::new(in_tx),
            inbound_rx,
            sim,
            relay: CommandRelay::new(),
            watch,
        }
    }

    pub fn sim(&self) -> &SimSession {
        &self.sim
    }

    pub fn simulator_state(&self) -> ConnectionState {
        match self.sim.link() {
            SimLink::Disconnected => ConnectionState::Disconnected,
            SimLink::Handshaking => ConnectionState::SimulatorHandshaking,
            SimLink::Ready => ConnectionState::SimulatorReady,
        }
    }

    pub fn relay_state(&self) -> ConnectionState {
        match self.transport.state() {
            TransportState::Open if self.relay.peer_confirmed() => ConnectionState::RelayReady,
            TransportState::Open => ConnectionState::RelayAwaitingPeer,
            _ => ConnectionState::Disconnected,
        }
    }

    pub fn peer_confirmed(&self) -> bool {
        self.relay.peer_confirmed()
    }

    pub fn is_ready(&self) -> bool {
        self.simulator_state() == ConnectionState::SimulatorReady
            && self.relay_state() == ConnectionState::RelayReady
    }

    /// Starts both handshakes. Failures are logged; neither side retries on
    /// its own.
    pub fn start(&mut self) {
        if let Err(e) = self.sim.connect() {
            warn!("simulator connect failed: {e}");
        }
        self.connect_relay();
    }

    pub fn connect_relay(&mut self) -> bool {
        match self
            .transport
            .connect(&self.config.relay_url, &RelayReply::Handshake)
        {
            Ok(ConnectStatus::Connected) => {
                self.relay.reset_peer();
                true
            }
            Ok(ConnectStatus::AlreadyOpen) => true,
            Err(e) => {
                warn!(url = %self.config.relay_url, "can't connect to relay: {e}");
                false
            }
        }
    }

    pub fn run(&mut self) -> ExitReason {
        self.start();

        let inbound = self.inbound_rx.clone();
        let ticker = tick(self.config.poll_interval);
        let deadline = self.config.run_for.map(|d| Instant::now() + d);
        info!(
            interval_ms = self.config.poll_interval.as_millis() as u64,
            parent = self.watch.process_name().unwrap_or("<none>"),
            "host loop started"
        );

        let reason = loop {
            select! {
                recv(inbound) -> msg => {
                    if let Ok(msg) = msg {
                        if let Some(reason) = self.handle_inbound(msg) {
                            break reason;
                        }
                    }
                }
                recv(ticker) -> _ => {
                    if let Some(reason) = self.tick() {
                        break reason;
                    }
                }
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                break ExitReason::RunLimitReached;
            }
        };

        self.shutdown();
        info!(?reason, "host loop stopped");
        reason
    }

    /// One poll step: liveness check, then simulator pump.
    pub fn tick(&mut self) -> Option<ExitReason> {
        if !self.watch.parent_alive() {
            error!(
                parent = self.watch.process_name().unwrap_or_default(),
                "parent process is gone, shutting down"
            );
            return Some(ExitReason::ParentGone);
        }

        for notice in self.sim.poll() {
            match notice {
                SimNotice::Connected => {
                    if self.relay.peer_confirmed() {
                        self.sim.refresh_lvars();
                    }
                }
                SimNotice::ConnectionLost => warn!("simulator connection lost"),
                SimNotice::LVarsUpdated(count) => info!(count, "lvar list updated"),
                SimNotice::AircraftChanged(title) => info!(title = %title, "aircraft changed"),
            }
        }
        None
    }

    /// Waits up to `wait` for one relay message and handles it.
    pub fn handle_pending(&mut self, wait: Duration) -> Option<ExitReason> {
        let msg = self.inbound_rx.recv_timeout(wait).ok()?;
        self.handle_inbound(msg)
    }

    pub fn handle_inbound(&mut self, msg: InboundMsg) -> Option<ExitReason> {
        match msg {
            InboundMsg::Text(text) => {
                let outcome = self.relay.handle(&text, &mut self.sim);
                if let Some(reply) = outcome.reply {
                    if let Err(e) = self.transport.send(reply) {
                        warn!("relay reply dropped: {e}");
                    }
                }
                if outcome.control == Control::Shutdown {
                    return Some(ExitReason::PeerRequestedClose);
                }
                None
            }
            InboundMsg::PeerClosed => {
                warn!("relay connection lost");
                self.transport.disconnect();
                self.relay.reset_peer();
                None
            }
        }
    }

    pub fn shutdown(&mut self) {
        self.sim.disconnect();
        self.transport.disconnect();
        self.relay.reset_peer();
    }
}
