use crate::error::GatewayError;
use crossbeam_channel::Sender;

/// Response channel of the init client ("MobiFlight").
pub const INIT_CLIENT_REQUEST: u32 = 0;
/// Response channel of the per-host runtime client.
pub const RUNTIME_CLIENT_REQUEST: u32 = 1;
/// Built-in aircraft title subscription.
pub const AIRCRAFT_TITLE_REQUEST: u32 = 2;

/// Size of a client command or response area.
pub const MESSAGE_SIZE: u32 = 1024;
pub const LVAR_AREA_SIZE: u32 = 4096;
pub const STRING_VALUE_SIZE: u32 = 128;
pub const STRING_VALUE_MAX_SLOTS: u32 = 64;

const INIT_CLIENT_NAME: &str = "MobiFlight";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataArea {
    LVars,
    Command,
    Response,
    StringVars,
}

impl DataArea {
    pub const ALL: [DataArea; 4] = [
        DataArea::LVars,
        DataArea::Command,
        DataArea::Response,
        DataArea::StringVars,
    ];

    pub fn suffix(self) -> &'static str {
        match self {
            DataArea::LVars => "LVars",
            DataArea::Command => "Command",
            DataArea::Response => "Response",
            DataArea::StringVars => "StringVars",
        }
    }

    pub fn size(self) -> u32 {
        match self {
            DataArea::LVars => LVAR_AREA_SIZE,
            DataArea::Command | DataArea::Response => MESSAGE_SIZE,
            DataArea::StringVars => STRING_VALUE_SIZE * STRING_VALUE_MAX_SLOTS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientRole {
    Init,
    Runtime,
}

/// A named client of the in-sim module, owning its own set of data areas.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientChannel {
    pub name: String,
    pub role: ClientRole,
}

impl ClientChannel {
    pub fn init() -> Self {
        Self {
            name: INIT_CLIENT_NAME.to_string(),
            role: ClientRole::Init,
        }
    }

    pub fn runtime(host_identity: &str) -> Self {
        Self {
            name: format!("Client_{host_identity}"),
            role: ClientRole::Runtime,
        }
    }

    pub fn area_name(&self, area: DataArea) -> String {
        format!("{}.{}", self.name, area.suffix())
    }

    pub fn response_request_id(&self) -> u32 {
        match self.role {
            ClientRole::Init => INIT_CLIENT_REQUEST,
            ClientRole::Runtime => RUNTIME_CLIENT_REQUEST,
        }
    }
}

/// Where a single variable's value lives inside a client's data areas, and
/// the request id its change notifications arrive under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotSubscription {
    pub request_id: u32,
    pub area: DataArea,
    pub offset: u32,
    pub size: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    Opened,
    AlreadyConnected,
}

/// Everything the simulator delivers asynchronously. Gateways push these on
/// the channel handed to [`SimGateway::open`] while pumping.
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayEvent {
    Opened,
    ClientData { request_id: u32, payload: Vec<u8> },
    AircraftTitle(String),
    AircraftLoaded(String),
    Exception(u32),
    Quit,
}

pub trait SimGateway {
    fn open(
        &mut self,
        app_name: &str,
        events: Sender<GatewayEvent>,
    ) -> Result<ConnectOutcome, GatewayError>;
    fn close(&mut self);
    fn is_open(&self) -> bool;

    /// Dispatches pending simulator messages onto the event channel.
    fn pump(&mut self) -> Result<(), GatewayError>;

    fn create_client_areas(&mut self, channel: &ClientChannel) -> Result<(), GatewayError>;
    fn send_command(&mut self, channel: &ClientChannel, command: &str)
        -> Result<(), GatewayError>;
    fn subscribe(
        &mut self,
        channel: &ClientChannel,
        slot: SlotSubscription,
    ) -> Result<(), GatewayError>;
    fn request_aircraft_loaded(&mut self) -> Result<(), GatewayError>;
}

/// Reads a NUL-terminated string out of a fixed-size buffer.
pub fn decode_c_string(buf: &[u8]) -> String {
    let end = buf.iter().position(|b| *b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..end]).to_string()
}

/// Inverse of [`decode_c_string`], padding with NULs up to `size`.
pub fn encode_c_string(text: &str, size: usize) -> Vec<u8> {
    let mut buf = vec![0u8; size];
    let bytes = text.as_bytes();
    let n = bytes.len().min(size.saturating_sub(1));
    buf[..n].copy_from_slice(&bytes[..n]);
    buf
}
