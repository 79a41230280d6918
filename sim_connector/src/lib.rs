pub mod config;
pub mod error;
pub mod gateway;
pub mod mock_gateway;
pub mod net;
pub mod protocol;
pub mod registry;
pub mod relay;
pub mod sim;
pub mod supervisor;
pub mod watchdog;

pub use crate::config::{ConnectorArgs, ConnectorConfig};
pub use crate::error::{GatewayError, TransportError};
pub use crate::gateway::{ConnectOutcome, GatewayEvent, SimGateway};
pub use crate::mock_gateway::MockGateway;
pub use crate::net::RelayTransport;
pub use crate::protocol::{InboundMsg, INBOUND_CAP, OUTBOUND_CAP};
pub use crate::registry::{SlotValue, VariableRegistry};
pub use crate::relay::CommandRelay;
pub use crate::sim::{SimLink, SimSession};
pub use crate::supervisor::{ConnectionState, ConnectionSupervisor, ExitReason};
pub use crate::watchdog::ParentWatch;
