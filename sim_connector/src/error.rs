use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("relay connect failed: {0}")]
    Connect(tungstenite::Error),
    #[error("relay send failed: {0}")]
    Send(tungstenite::Error),
    #[error("relay link is not open")]
    NotOpen,
    #[error("relay outbound queue is full")]
    Busy,
    #[error("relay thread spawn failed: {0}")]
    Spawn(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("simulator unavailable: {0}")]
    Unavailable(String),
    #[error("simulator session is not open")]
    NotOpen,
    #[error("simulator session lost: {0}")]
    SessionLost(String),
}
