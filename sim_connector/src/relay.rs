use crate::gateway::ConnectOutcome;
use crate::protocol::{ReconnectOutcome, RelayCommand, RelayReply};
use crate::sim::SimSession;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Continue,
    Shutdown,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub reply: Option<RelayReply>,
    pub control: Control,
}

impl Outcome {
    fn silent() -> Self {
        Self {
            reply: None,
            control: Control::Continue,
        }
    }

    fn reply(reply: RelayReply) -> Self {
        Self {
            reply: Some(reply),
            control: Control::Continue,
        }
    }
}

/// Turns one inbound relay message into at most one reply.
#[derive(Default)]
pub struct CommandRelay {
    peer_confirmed: bool,
}

impl CommandRelay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn peer_confirmed(&self) -> bool {
        self.peer_confirmed
    }

    /// Forgets the peer confirmation, e.g. when the relay link drops.
    pub fn reset_peer(&mut self) {
        self.peer_confirmed = false;
    }

    pub fn handle(&mut self, text: &str, sim: &mut SimSession) -> Outcome {
        let Some(cmd) = RelayCommand::parse(text) else {
            debug!(inbound = text, "ignored relay message");
            return Outcome::silent();
        };

        let outcome = self.dispatch(cmd, sim);
        match &outcome.reply {
            Some(reply) => debug!(inbound = text, outbound = %reply, "relay message"),
            None => debug!(inbound = text, "relay message"),
        }
        outcome
    }

    fn dispatch(&mut self, cmd: RelayCommand, sim: &mut SimSession) -> Outcome {
        match cmd {
            RelayCommand::Connected => {
                info!("relay peer confirmed");
                self.peer_confirmed = true;
                sim.refresh_lvars();
                Outcome::silent()
            }
            RelayCommand::Close => {
                info!("relay peer requested shutdown");
                sim.disconnect();
                Outcome {
                    reply: None,
                    control: Control::Shutdown,
                }
            }
            RelayCommand::Status => Outcome::reply(RelayReply::Status {
                ready: sim.is_ready(),
            }),
            RelayCommand::Reconnect => {
                if sim.is_ready() {
                    return Outcome::reply(RelayReply::Reconnect(ReconnectOutcome::Connected));
                }
                match sim.connect() {
                    Ok(ConnectOutcome::Opened) => info!("simulator reconnect started"),
                    Ok(ConnectOutcome::AlreadyConnected) => {
                        debug!("simulator session already open, waiting for client module")
                    }
                    Err(e) => warn!("simulator reconnect failed: {e}"),
                }
                Outcome::reply(RelayReply::Reconnect(ReconnectOutcome::Ok))
            }
            RelayCommand::ButtonPulse { name } => {
                sim.pulse(&name);
                Outcome::silent()
            }
            RelayCommand::ButtonPress { name } => {
                sim.press(&name);
                Outcome::silent()
            }
            RelayCommand::ButtonRelease { name } => {
                sim.release(&name);
                Outcome::silent()
            }
            RelayCommand::CustomWasm { expr } => {
                sim.write_expression(&expr);
                Outcome::silent()
            }
            RelayCommand::GetAircraft => {
                Outcome::reply(RelayReply::Aircraft(sim.aircraft().label().to_uppercase()))
            }
            RelayCommand::GetVar { name } => {
                let value = sim.read_variable(&name);
                Outcome::reply(RelayReply::Var(value.to_string()))
            }
            RelayCommand::VarList => match sim.registry().snapshot_json() {
                Ok(json) => Outcome::reply(RelayReply::vars_from_json(&json)),
                Err(e) => {
                    warn!("variable snapshot failed: {e}");
                    Outcome::silent()
                }
            },
        }
    }
}
