//! In-process stand-in for the simulator and its in-sim client module.
//!
//! Answers the ping / add-client handshake, records every expression written
//! through `MF.SimVars.Set.`, streams a configurable LVar list and publishes
//! values for subscribed variables on the next pump.

use crate::error::GatewayError;
use crate::gateway::{
    encode_c_string, ClientChannel, ClientRole, ConnectOutcome, DataArea, GatewayEvent,
    SimGateway, SlotSubscription, AIRCRAFT_TITLE_REQUEST, MESSAGE_SIZE, STRING_VALUE_SIZE,
};
use crossbeam_channel::Sender;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Default)]
pub struct MockSimState {
    pub writes: Vec<String>,
    pub commands: Vec<(String, String)>,
    pub created_areas: Vec<String>,
    pub lvars: Vec<String>,
    pub aircraft_title: String,
    pub aircraft_file: String,
    pub numeric_values: HashMap<String, f32>,
    pub text_values: HashMap<String, String>,
    pub open_count: usize,
    pub fail_open: bool,
    pub fail_next_pump: bool,
    pub quit_next_pump: bool,

    numeric_names: Vec<String>,
    text_names: Vec<String>,
    subscriptions: HashMap<(DataArea, u32), SlotSubscription>,
    published: HashMap<u32, Vec<u8>>,
    announced_title: Option<String>,
}

impl MockSimState {
    pub fn registered_numeric(&self) -> &[String] {
        &self.numeric_names
    }

    pub fn registered_text(&self) -> &[String] {
        &self.text_names
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }
}

#[derive(Clone, Default)]
pub struct MockGateway {
    state: Arc<Mutex<MockSimState>>,
    events: Option<Sender<GatewayEvent>>,
    pending: Vec<GatewayEvent>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared view for tests and the mock binary to steer the simulator.
    pub fn state(&self) -> Arc<Mutex<MockSimState>> {
        Arc::clone(&self.state)
    }

    pub fn set_numeric(&self, name: &str, value: f32) {
        if let Ok(mut s) = self.state.lock() {
            s.numeric_values.insert(name.to_string(), value);
        }
    }

    pub fn set_text(&self, name: &str, value: &str) {
        if let Ok(mut s) = self.state.lock() {
            s.text_values.insert(name.to_string(), value.to_string());
        }
    }

    pub fn set_aircraft(&self, title: &str, file: &str) {
        if let Ok(mut s) = self.state.lock() {
            s.aircraft_title = title.to_string();
            s.aircraft_file = file.to_string();
        }
    }

    pub fn set_lvars(&self, names: &[&str]) {
        if let Ok(mut s) = self.state.lock() {
            s.lvars = names.iter().map(|n| n.to_string()).collect();
        }
    }

    pub fn writes(&self) -> Vec<String> {
        self.state
            .lock()
            .map(|s| s.writes.clone())
            .unwrap_or_default()
    }

    fn respond(&mut self, request_id: u32, text: &str) {
        self.pending.push(GatewayEvent::ClientData {
            request_id,
            payload: encode_c_string(text, MESSAGE_SIZE as usize),
        });
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MockSimState>, GatewayError> {
        self.state
            .lock()
            .map_err(|_| GatewayError::Unavailable("mock state poisoned".to_string()))
    }
}

impl SimGateway for MockGateway {
    fn open(
        &mut self,
        _app_name: &str,
        events: Sender<GatewayEvent>,
    ) -> Result<ConnectOutcome, GatewayError> {
        if self.events.is_some() {
            return Ok(ConnectOutcome::AlreadyConnected);
        }
        {
            let mut s = self.lock()?;
            if s.fail_open {
                return Err(GatewayError::Unavailable("simulator not running".to_string()));
            }
            s.open_count += 1;
            s.numeric_names.clear();
            s.text_names.clear();
            s.subscriptions.clear();
            s.published.clear();
            s.announced_title = None;
        }
        self.events = Some(events);
        self.pending.push(GatewayEvent::Opened);
        Ok(ConnectOutcome::Opened)
    }

    fn close(&mut self) {
        self.events = None;
        self.pending.clear();
    }

    fn is_open(&self) -> bool {
        self.events.is_some()
    }

    fn pump(&mut self) -> Result<(), GatewayError> {
        let Some(events) = self.events.clone() else {
            return Err(GatewayError::NotOpen);
        };

        {
            let mut s = self.lock()?;
            if s.fail_next_pump {
                s.fail_next_pump = false;
                return Err(GatewayError::SessionLost("mock pump failure".to_string()));
            }
            if s.quit_next_pump {
                s.quit_next_pump = false;
                drop(s);
                self.pending.push(GatewayEvent::Quit);
            } else {
                let mut fresh = Vec::new();

                if !s.aircraft_title.is_empty()
                    && s.announced_title.as_deref() != Some(s.aircraft_title.as_str())
                {
                    s.announced_title = Some(s.aircraft_title.clone());
                    fresh.push(GatewayEvent::AircraftTitle(s.aircraft_title.clone()));
                }

                let numeric: Vec<(u32, Vec<u8>)> = s
                    .numeric_names
                    .iter()
                    .enumerate()
                    .filter_map(|(i, name)| {
                        let value = s.numeric_values.get(name)?;
                        let sub = s.subscriptions.get(&(DataArea::LVars, i as u32 * 4))?;
                        Some((sub.request_id, value.to_le_bytes().to_vec()))
                    })
                    .collect();
                let text: Vec<(u32, Vec<u8>)> = s
                    .text_names
                    .iter()
                    .enumerate()
                    .filter_map(|(i, name)| {
                        let value = s.text_values.get(name)?;
                        let sub = s
                            .subscriptions
                            .get(&(DataArea::StringVars, i as u32 * STRING_VALUE_SIZE))?;
                        Some((
                            sub.request_id,
                            encode_c_string(value, STRING_VALUE_SIZE as usize),
                        ))
                    })
                    .collect();

                for (request_id, payload) in numeric.into_iter().chain(text) {
                    if s.published.get(&request_id) == Some(&payload) {
                        continue;
                    }
                    s.published.insert(request_id, payload.clone());
                    fresh.push(GatewayEvent::ClientData {
                        request_id,
                        payload,
                    });
                }
                drop(s);
                self.pending.extend(fresh);
            }
        }

        for event in self.pending.drain(..) {
            if events.try_send(event).is_err() {
                return Err(GatewayError::SessionLost("event queue overflow".to_string()));
            }
        }
        Ok(())
    }

    fn create_client_areas(&mut self, channel: &ClientChannel) -> Result<(), GatewayError> {
        if self.events.is_none() {
            return Err(GatewayError::NotOpen);
        }
        let mut s = self.lock()?;
        for area in DataArea::ALL {
            s.created_areas.push(channel.area_name(area));
        }
        Ok(())
    }

    fn send_command(
        &mut self,
        channel: &ClientChannel,
        command: &str,
    ) -> Result<(), GatewayError> {
        if self.events.is_none() {
            return Err(GatewayError::NotOpen);
        }

        let lvars = {
            let mut s = self.lock()?;
            s.commands.push((channel.name.clone(), command.to_string()));
            if channel.role == ClientRole::Runtime {
                if let Some(expr) = command.strip_prefix("MF.SimVars.Set.") {
                    s.writes.push(expr.to_string());
                } else if let Some(name) = command.strip_prefix("MF.SimVars.AddString.") {
                    s.text_names.push(name.to_string());
                } else if let Some(name) = command.strip_prefix("MF.SimVars.Add.") {
                    s.numeric_names.push(name.to_string());
                }
            }
            s.lvars.clone()
        };

        let request_id = channel.response_request_id();
        match (channel.role, command) {
            (ClientRole::Init, "MF.Ping") => self.respond(request_id, "MF.Pong"),
            (ClientRole::Init, cmd) if cmd.starts_with("MF.Clients.Add.") => {
                let reply = format!("{cmd}.Finished");
                self.respond(request_id, &reply);
            }
            (ClientRole::Runtime, "MF.LVars.List") => {
                self.respond(request_id, "MF.LVars.List.Start");
                for name in &lvars {
                    self.respond(request_id, name);
                }
                self.respond(request_id, "MF.LVars.List.End");
            }
            _ => {}
        }
        Ok(())
    }

    fn subscribe(
        &mut self,
        _channel: &ClientChannel,
        slot: SlotSubscription,
    ) -> Result<(), GatewayError> {
        if self.events.is_none() {
            return Err(GatewayError::NotOpen);
        }
        if slot.request_id == AIRCRAFT_TITLE_REQUEST {
            return Ok(());
        }
        let mut s = self.lock()?;
        s.subscriptions.insert((slot.area, slot.offset), slot);
        Ok(())
    }

    fn request_aircraft_loaded(&mut self) -> Result<(), GatewayError> {
        if self.events.is_none() {
            return Err(GatewayError::NotOpen);
        }
        let file = self.lock()?.aircraft_file.clone();
        self.pending.push(GatewayEvent::AircraftLoaded(file));
        Ok(())
    }
}
