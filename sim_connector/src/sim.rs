use crate::error::GatewayError;
use crate::gateway::{decode_c_string, ClientChannel, ConnectOutcome, GatewayEvent, SimGateway};
use crate::protocol::GATEWAY_EVENT_CAP;
use crate::registry::{SlotKind, SlotRef, SlotValue, VariableRegistry};
use crossbeam_channel::{bounded, Receiver, Sender};
use tracing::{debug, info, warn};

const APP_NAME: &str = "SimConnector";
const MAX_VARS_PER_FRAME: u32 = 30;

const PONG: &str = "MF.Pong";
const LVARS_LIST_START: &str = "MF.LVars.List.Start";
const LVARS_LIST_END: &str = "MF.LVars.List.End";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimLink {
    Disconnected,
    Handshaking,
    Ready,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SimNotice {
    Connected,
    ConnectionLost,
    LVarsUpdated(usize),
    AircraftChanged(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AircraftIdentity {
    pub title: String,
    pub file: String,
}

impl AircraftIdentity {
    /// Title when known, otherwise the loaded aircraft file.
    pub fn label(&self) -> &str {
        if self.title.is_empty() {
            &self.file
        } else {
            &self.title
        }
    }
}

/// The simulator side of the connector: session handshake, the client
/// module's command vocabulary, and the registry the delivered values land in.
pub struct SimSession {
    gateway: Box<dyn SimGateway>,
    registry: VariableRegistry,
    init_client: ClientChannel,
    runtime_client: ClientChannel,
    events_tx: Sender<GatewayEvent>,
    events_rx: Receiver<GatewayEvent>,
    link: SimLink,
    session_open: bool,
    aircraft: AircraftIdentity,
}

impl SimSession {
    pub fn new(gateway: Box<dyn SimGateway>, host_identity: &str) -> Self {
        let (events_tx, events_rx) = bounded(GATEWAY_EVENT_CAP);
        Self {
            gateway,
            registry: VariableRegistry::new(),
            init_client: ClientChannel::init(),
            runtime_client: ClientChannel::runtime(host_identity),
            events_tx,
            events_rx,
            link: SimLink::Disconnected,
            session_open: false,
            aircraft: AircraftIdentity::default(),
        }
    }

    pub fn link(&self) -> SimLink {
        self.link
    }

    pub fn is_ready(&self) -> bool {
        self.link == SimLink::Ready
    }

    pub fn registry(&self) -> &VariableRegistry {
        &self.registry
    }

    pub fn aircraft(&self) -> &AircraftIdentity {
        &self.aircraft
    }

    pub fn runtime_client(&self) -> &ClientChannel {
        &self.runtime_client
    }

    /// Opens the simulator session. If the session is already open but the
    /// client module has not answered yet, the ping is repeated instead.
    pub fn connect(&mut self) -> Result<ConnectOutcome, GatewayError> {
        if self.session_open {
            if self.link != SimLink::Ready {
                let init = self.init_client.clone();
                self.gateway.send_command(&init, "MF.Ping")?;
            }
            return Ok(ConnectOutcome::AlreadyConnected);
        }

        let outcome = self.gateway.open(APP_NAME, self.events_tx.clone())?;
        self.link = SimLink::Handshaking;
        info!(?outcome, "simulator session opening");
        Ok(outcome)
    }

    pub fn disconnect(&mut self) {
        let was_connected = self.link != SimLink::Disconnected;
        self.teardown();
        if was_connected {
            info!("simulator session closed");
        }
    }

    /// Dispatches pending simulator messages and applies them. Any gateway
    /// failure is treated as a lost session.
    pub fn poll(&mut self) -> Vec<SimNotice> {
        let mut notices = Vec::new();
        if !self.gateway.is_open() {
            return notices;
        }

        if let Err(e) = self.gateway.pump() {
            warn!("simulator pump failed: {e}");
            self.teardown();
            notices.push(SimNotice::ConnectionLost);
            return notices;
        }

        let events: Vec<GatewayEvent> = self.events_rx.try_iter().collect();
        for event in events {
            match self.apply_event(event) {
                Ok(Some(notice)) => {
                    let lost = notice == SimNotice::ConnectionLost;
                    notices.push(notice);
                    if lost {
                        break;
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    warn!("simulator request failed: {e}");
                    self.teardown();
                    notices.push(SimNotice::ConnectionLost);
                    break;
                }
            }
        }
        notices
    }

    fn apply_event(&mut self, event: GatewayEvent) -> Result<Option<SimNotice>, GatewayError> {
        match event {
            GatewayEvent::Opened => {
                debug!("simulator session open");
                self.session_open = true;
                let init = self.init_client.clone();
                self.gateway.create_client_areas(&init)?;
                self.gateway.send_command(&init, "MF.Ping")?;
                Ok(None)
            }
            GatewayEvent::ClientData {
                request_id,
                payload,
            } => {
                if request_id == self.init_client.response_request_id() {
                    self.on_init_response(&decode_c_string(&payload))
                } else if request_id == self.runtime_client.response_request_id() {
                    Ok(self.on_runtime_response(&decode_c_string(&payload)))
                } else {
                    self.registry.update_value(request_id, &payload);
                    Ok(None)
                }
            }
            GatewayEvent::AircraftTitle(title) => {
                self.aircraft.title = title.clone();
                self.gateway.request_aircraft_loaded()?;
                Ok(Some(SimNotice::AircraftChanged(title)))
            }
            GatewayEvent::AircraftLoaded(file) => {
                if !file.is_empty() {
                    debug!(file = %file, "aircraft loaded");
                    self.aircraft.file = file;
                }
                Ok(None)
            }
            GatewayEvent::Exception(code) => {
                warn!(code, "simulator reported exception");
                Ok(None)
            }
            GatewayEvent::Quit => {
                info!("simulator quit");
                self.teardown();
                Ok(Some(SimNotice::ConnectionLost))
            }
        }
    }

    fn on_init_response(&mut self, text: &str) -> Result<Option<SimNotice>, GatewayError> {
        if self.link == SimLink::Ready {
            return Ok(None);
        }

        if text == PONG {
            debug!("client module answered ping");
            let init = self.init_client.clone();
            let add = format!("MF.Clients.Add.{}", self.runtime_client.name);
            self.gateway.send_command(&init, &add)?;
            return Ok(None);
        }

        if text.contains(&self.runtime_client.name) {
            let runtime = self.runtime_client.clone();
            self.gateway.create_client_areas(&runtime)?;
            self.gateway.send_command(
                &runtime,
                &format!("MF.Config.MAX_VARS_PER_FRAME.{MAX_VARS_PER_FRAME}"),
            )?;
            self.link = SimLink::Ready;
            info!(client = %runtime.name, "simulator ready");
            return Ok(Some(SimNotice::Connected));
        }

        Ok(None)
    }

    fn on_runtime_response(&mut self, text: &str) -> Option<SimNotice> {
        match text {
            LVARS_LIST_START => {
                self.registry.begin_lvar_list();
                None
            }
            LVARS_LIST_END => self.registry.finish_lvar_list().map(SimNotice::LVarsUpdated),
            name => {
                if !self.registry.push_lvar(name) {
                    debug!(response = name, "unsolicited runtime response");
                }
                None
            }
        }
    }

    /// Resolves `name`, subscribing it on first use, and returns the cached
    /// value. A freshly registered variable reports its default until the
    /// simulator delivers a value on a later poll.
    pub fn read_variable(&mut self, name: &str) -> SlotValue {
        if !self.is_ready() {
            return SlotValue::Numeric(0.0);
        }

        // Only the numeric space can run out, so the default is numeric.
        let Some(resolved) = self.registry.resolve(name) else {
            return SlotValue::Numeric(0.0);
        };
        if resolved.newly_registered {
            if let Err(e) = self.subscribe(name, resolved.slot) {
                warn!(name, "variable registration failed: {e}");
                self.teardown();
                return SlotValue::Numeric(0.0);
            }
        }

        self.registry
            .value(resolved.slot)
            .unwrap_or(SlotValue::Numeric(0.0))
    }

    fn subscribe(&mut self, name: &str, slot: SlotRef) -> Result<(), GatewayError> {
        let runtime = self.runtime_client.clone();
        self.gateway.subscribe(&runtime, slot.subscription())?;
        let command = match slot.kind {
            SlotKind::Numeric => format!("MF.SimVars.Add.{name}"),
            SlotKind::Text => format!("MF.SimVars.AddString.{name}"),
        };
        self.gateway.send_command(&runtime, &command)
    }

    /// Momentary button: `0` then `1` written to the LVar.
    pub fn pulse(&mut self, lvar: &str) {
        self.write_expression(&format!("0 (>L:{lvar})"));
        self.write_expression(&format!("1 (>L:{lvar})"));
    }

    pub fn press(&mut self, lvar: &str) {
        self.write_expression(&format!("1 (>L:{lvar})"));
    }

    pub fn release(&mut self, lvar: &str) {
        self.write_expression(&format!("0 (>L:{lvar})"));
    }

    pub fn write_expression(&mut self, expr: &str) {
        if !self.is_ready() {
            debug!(expr, "simulator not ready, write dropped");
            return;
        }
        let runtime = self.runtime_client.clone();
        if let Err(e) = self
            .gateway
            .send_command(&runtime, &format!("MF.SimVars.Set.{expr}"))
        {
            warn!(expr, "simulator write failed: {e}");
            self.teardown();
        }
    }

    pub fn refresh_lvars(&mut self) {
        if !self.is_ready() {
            return;
        }
        let runtime = self.runtime_client.clone();
        if let Err(e) = self.gateway.send_command(&runtime, "MF.LVars.List") {
            warn!("lvar list request failed: {e}");
            self.teardown();
        }
    }

    fn teardown(&mut self) {
        self.gateway.close();
        // Anything still queued belongs to the dead session.
        self.events_rx.try_iter().for_each(drop);
        self.registry.reset();
        self.session_open = false;
        self.link = SimLink::Disconnected;
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::mock_gateway::MockGateway;
    use crate::registry::NUMERIC_MAX_SLOTS;

    pub(crate) fn ready_session(mock: &MockGateway) -> SimSession {
        let mut session = SimSession::new(Box::new(mock.clone()), "TEST-HOST");
        session.connect().unwrap();
        for _ in 0..10 {
            session.poll();
            if session.is_ready() {
                break;
            }
        }
        assert!(session.is_ready(), "mock handshake should complete");
        session
    }

    #[test]
    fn handshake_walks_ping_then_runtime_client() {
        let mock = MockGateway::new();
        let mut session = SimSession::new(Box::new(mock.clone()), "TEST-HOST");
        assert_eq!(session.connect().unwrap(), ConnectOutcome::Opened);
        assert_eq!(session.link(), SimLink::Handshaking);

        let mut notices = Vec::new();
        for _ in 0..5 {
            notices.extend(session.poll());
        }
        assert!(session.is_ready());
        assert_eq!(notices, vec![SimNotice::Connected]);

        let state = mock.state();
        let state = state.lock().unwrap();
        let commands: Vec<&str> = state.commands.iter().map(|(_, c)| c.as_str()).collect();
        assert_eq!(
            commands,
            vec![
                "MF.Ping",
                "MF.Clients.Add.Client_TEST-HOST",
                "MF.Config.MAX_VARS_PER_FRAME.30"
            ]
        );
        assert!(state
            .created_areas
            .contains(&"Client_TEST-HOST.StringVars".to_string()));
    }

    #[test]
    fn connect_while_handshaking_repings() {
        let mock = MockGateway::new();
        let mut session = SimSession::new(Box::new(mock.clone()), "H");
        session.connect().unwrap();
        session.poll();
        assert_eq!(session.connect().unwrap(), ConnectOutcome::AlreadyConnected);

        let state = mock.state();
        let pings = state
            .lock()
            .unwrap()
            .commands
            .iter()
            .filter(|(_, c)| c == "MF.Ping")
            .count();
        assert_eq!(pings, 2);
    }

    #[test]
    fn values_arrive_on_a_later_poll() {
        let mock = MockGateway::new();
        let mut session = ready_session(&mock);

        assert_eq!(session.read_variable("L:FLAPS"), SlotValue::Numeric(0.0));
        mock.set_numeric("L:FLAPS", 2.0);
        session.poll();
        assert_eq!(session.read_variable("L:FLAPS"), SlotValue::Numeric(2.0));

        assert_eq!(
            session.read_variable("(A:ATC ID, String)"),
            SlotValue::Text("0".to_string())
        );
        mock.set_text("(A:ATC ID, String)", "D-AIRB");
        session.poll();
        assert_eq!(
            session.read_variable("(A:ATC ID, String)"),
            SlotValue::Text("D-AIRB".to_string())
        );

        let state = mock.state();
        let state = state.lock().unwrap();
        assert_eq!(state.registered_numeric(), ["L:FLAPS"]);
        assert_eq!(state.registered_text(), ["(A:ATC ID, String)"]);
        assert_eq!(state.subscription_count(), 2);
    }

    #[test]
    fn quit_tears_down_and_clears_registry() {
        let mock = MockGateway::new();
        let mut session = ready_session(&mock);
        session.read_variable("L:A");
        assert_eq!(session.registry().len(), 1);

        mock.state().lock().unwrap().quit_next_pump = true;
        let notices = session.poll();
        assert_eq!(notices, vec![SimNotice::ConnectionLost]);
        assert_eq!(session.link(), SimLink::Disconnected);
        assert!(session.registry().is_empty());
        assert!(session.poll().is_empty());
    }

    #[test]
    fn pump_failure_is_session_loss() {
        let mock = MockGateway::new();
        let mut session = ready_session(&mock);
        mock.state().lock().unwrap().fail_next_pump = true;
        assert_eq!(session.poll(), vec![SimNotice::ConnectionLost]);
        assert!(!session.is_ready());

        // A later reconnect starts a fresh session.
        assert_eq!(session.connect().unwrap(), ConnectOutcome::Opened);
        assert_eq!(mock.state().lock().unwrap().open_count, 2);
    }

    #[test]
    fn reads_before_ready_do_not_register() {
        let mock = MockGateway::new();
        let mut session = SimSession::new(Box::new(mock.clone()), "H");
        assert_eq!(session.read_variable("L:X"), SlotValue::Numeric(0.0));
        assert!(session.registry().is_empty());
    }

    #[test]
    fn full_numeric_space_replies_default_without_registering() {
        let mock = MockGateway::new();
        let mut session = ready_session(&mock);
        for i in 0..NUMERIC_MAX_SLOTS {
            session.read_variable(&format!("L:V{i}"));
        }
        let subscribed = mock.state().lock().unwrap().subscription_count();

        assert_eq!(session.read_variable("L:OVERFLOW"), SlotValue::Numeric(0.0));
        assert_eq!(session.registry().lookup("L:OVERFLOW"), None);
        assert_eq!(session.registry().len(), NUMERIC_MAX_SLOTS);
        assert_eq!(mock.state().lock().unwrap().subscription_count(), subscribed);
        assert!(session.is_ready());
    }

    #[test]
    fn aircraft_title_then_file() {
        let mock = MockGateway::new();
        mock.set_aircraft("FlyByWire A320neo", "SimObjects/Airplanes/A320/aircraft.cfg");
        let mut session = ready_session(&mock);
        session.poll();
        assert_eq!(session.aircraft().title, "FlyByWire A320neo");
        assert_eq!(
            session.aircraft().file,
            "SimObjects/Airplanes/A320/aircraft.cfg"
        );
        assert_eq!(session.aircraft().label(), "FlyByWire A320neo");
    }

    #[test]
    fn lvar_list_is_streamed_into_registry() {
        let mock = MockGateway::new();
        mock.set_lvars(&["A32NX_ELEC_AC_1_BUS_IS_POWERED", "A32NX_FCU_SPD"]);
        let mut session = ready_session(&mock);
        session.refresh_lvars();
        let notices = session.poll();
        assert!(notices.contains(&SimNotice::LVarsUpdated(2)));
        assert_eq!(
            session.registry().lvars(),
            ["A32NX_ELEC_AC_1_BUS_IS_POWERED", "A32NX_FCU_SPD"]
        );
    }
}
