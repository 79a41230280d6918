pub const INBOUND_CAP: usize = 256;
pub const OUTBOUND_CAP: usize = 256;
pub const GATEWAY_EVENT_CAP: usize = 4096;

pub enum InboundMsg {
    Text(String),
    PeerClosed,
}

pub enum OutboundMsg {
    Send { msg: RelayReply },
}

pub use simlink_protocol::{
    NumericVarRow, ReconnectOutcome, RelayCommand, RelayReply, TextVarRow, HANDSHAKE_TOKEN,
};
