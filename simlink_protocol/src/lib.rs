use serde::{Deserialize, Serialize};
use std::fmt;

/// First message sent after the relay socket opens.
pub const HANDSHAKE_TOKEN: &str = "ConnectWSClient";

/// Messages the backend sends to the connector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayCommand {
    Connected,
    Close,
    Status,
    Reconnect,
    ButtonPulse { name: String },
    ButtonPress { name: String },
    ButtonRelease { name: String },
    CustomWasm { expr: String },
    GetAircraft,
    GetVar { name: String },
    VarList,
}

impl RelayCommand {
    /// Returns `None` for anything outside the vocabulary, including a known
    /// prefix with an empty payload.
    pub fn parse(text: &str) -> Option<Self> {
        match text {
            "CONNECTED" => return Some(Self::Connected),
            "CLOSE" => return Some(Self::Close),
            "STATUS" => return Some(Self::Status),
            "RECONNECT" => return Some(Self::Reconnect),
            "GET_AIRCRAFT" => return Some(Self::GetAircraft),
            "VAR_LIST" => return Some(Self::VarList),
            _ => {}
        }

        let (verb, payload) = text.split_once(':')?;
        if payload.is_empty() {
            return None;
        }
        let payload = payload.to_string();
        match verb {
            "CMD_BTN" => Some(Self::ButtonPulse { name: payload }),
            "CMD_PRESS" => Some(Self::ButtonPress { name: payload }),
            "CMD_REL" => Some(Self::ButtonRelease { name: payload }),
            "CUSTOM_WASM" => Some(Self::CustomWasm { expr: payload }),
            "GET_VAR" => Some(Self::GetVar { name: payload }),
            _ => None,
        }
    }
}

impl fmt::Display for RelayCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connected => f.write_str("CONNECTED"),
            Self::Close => f.write_str("CLOSE"),
            Self::Status => f.write_str("STATUS"),
            Self::Reconnect => f.write_str("RECONNECT"),
            Self::ButtonPulse { name } => write!(f, "CMD_BTN:{name}"),
            Self::ButtonPress { name } => write!(f, "CMD_PRESS:{name}"),
            Self::ButtonRelease { name } => write!(f, "CMD_REL:{name}"),
            Self::CustomWasm { expr } => write!(f, "CUSTOM_WASM:{expr}"),
            Self::GetAircraft => f.write_str("GET_AIRCRAFT"),
            Self::GetVar { name } => write!(f, "GET_VAR:{name}"),
            Self::VarList => f.write_str("VAR_LIST"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectOutcome {
    /// A simulator connect was started.
    Ok,
    /// The simulator link was already up; nothing was done.
    Connected,
}

/// Messages the connector sends to the backend.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayReply {
    Handshake,
    Status { ready: bool },
    Reconnect(ReconnectOutcome),
    Aircraft(String),
    Var(String),
    /// Snapshot JSON with every `"` already swapped for `'`.
    Vars(String),
}

impl RelayReply {
    pub fn vars_from_json(json: &str) -> Self {
        Self::Vars(json.replace('"', "'"))
    }

    pub fn parse(text: &str) -> Option<Self> {
        if text == HANDSHAKE_TOKEN {
            return Some(Self::Handshake);
        }
        let (verb, payload) = text.split_once(':')?;
        match verb {
            "STATUS" => match payload {
                "TRUE" => Some(Self::Status { ready: true }),
                "FALSE" => Some(Self::Status { ready: false }),
                _ => None,
            },
            "RECONNECT" => match payload {
                "OK" => Some(Self::Reconnect(ReconnectOutcome::Ok)),
                "CONNECTED" => Some(Self::Reconnect(ReconnectOutcome::Connected)),
                _ => None,
            },
            "AIRCRAFT" => Some(Self::Aircraft(payload.to_string())),
            "VAR" => Some(Self::Var(payload.to_string())),
            "VARS" => Some(Self::Vars(payload.to_string())),
            _ => None,
        }
    }
}

impl fmt::Display for RelayReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Handshake => f.write_str(HANDSHAKE_TOKEN),
            Self::Status { ready } => {
                write!(f, "STATUS:{}", if *ready { "TRUE" } else { "FALSE" })
            }
            Self::Reconnect(ReconnectOutcome::Ok) => f.write_str("RECONNECT:OK"),
            Self::Reconnect(ReconnectOutcome::Connected) => f.write_str("RECONNECT:CONNECTED"),
            Self::Aircraft(title) => write!(f, "AIRCRAFT:{title}"),
            Self::Var(value) => write!(f, "VAR:{value}"),
            Self::Vars(json) => write!(f, "VARS:{json}"),
        }
    }
}

// Field names follow the backend's snapshot parser.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct NumericVarRow {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "ID")]
    pub id: u32,
    #[serde(rename = "Data")]
    pub data: f32,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TextVarRow {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "ID")]
    pub id: u32,
    #[serde(rename = "Data")]
    pub data: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_commands() {
        assert_eq!(RelayCommand::parse("STATUS"), Some(RelayCommand::Status));
        assert_eq!(RelayCommand::parse("CONNECTED"), Some(RelayCommand::Connected));
        assert_eq!(RelayCommand::parse("VAR_LIST"), Some(RelayCommand::VarList));
        assert_eq!(RelayCommand::parse("status"), None);
        assert_eq!(RelayCommand::parse("STATUS "), None);
    }

    #[test]
    fn payload_keeps_everything_after_first_colon() {
        assert_eq!(
            RelayCommand::parse("GET_VAR:(A:TITLE, String)"),
            Some(RelayCommand::GetVar {
                name: "(A:TITLE, String)".to_string()
            })
        );
        assert_eq!(
            RelayCommand::parse("CUSTOM_WASM:1 (>K:A32NX.FCU_HDG_INC)"),
            Some(RelayCommand::CustomWasm {
                expr: "1 (>K:A32NX.FCU_HDG_INC)".to_string()
            })
        );
    }

    #[test]
    fn empty_or_unknown_payload_commands_are_ignored() {
        assert_eq!(RelayCommand::parse("CMD_BTN:"), None);
        assert_eq!(RelayCommand::parse("CMD_FOO:BAR"), None);
        assert_eq!(RelayCommand::parse(""), None);
    }

    #[test]
    fn command_display_matches_wire_form() {
        for text in ["CMD_BTN:A32NX_MCDU_1_BTN_A", "CMD_PRESS:X", "CMD_REL:X", "GET_AIRCRAFT"] {
            let cmd = RelayCommand::parse(text).expect("known command");
            assert_eq!(cmd.to_string(), text);
        }
    }

    #[test]
    fn vars_reply_has_no_double_quotes() {
        let reply = RelayReply::vars_from_json(r#"[{"Name":"L:X","ID":3,"Data":1.0}][][]"#);
        let wire = reply.to_string();
        assert!(wire.starts_with("VARS:"));
        assert!(!wire.contains('"'));
        assert!(wire.contains("'Name'"));
    }

    #[test]
    fn replies_format_exactly() {
        assert_eq!(RelayReply::Status { ready: false }.to_string(), "STATUS:FALSE");
        assert_eq!(RelayReply::Status { ready: true }.to_string(), "STATUS:TRUE");
        assert_eq!(
            RelayReply::Reconnect(ReconnectOutcome::Connected).to_string(),
            "RECONNECT:CONNECTED"
        );
        assert_eq!(RelayReply::Reconnect(ReconnectOutcome::Ok).to_string(), "RECONNECT:OK");
        assert_eq!(RelayReply::Handshake.to_string(), HANDSHAKE_TOKEN);
        assert_eq!(
            RelayReply::parse("AIRCRAFT:FLYBYWIRE A320"),
            Some(RelayReply::Aircraft("FLYBYWIRE A320".to_string()))
        );
    }

    #[test]
    fn text_row_without_value_serializes_null() {
        let row = TextVarRow {
            name: "(A:TITLE, String)".to_string(),
            id: 10001,
            data: None,
        };
        let json = serde_json::to_string(&row).unwrap();
        assert_eq!(json, r#"{"Name":"(A:TITLE, String)","ID":10001,"Data":null}"#);
    }
}
