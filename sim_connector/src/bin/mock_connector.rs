use anyhow::{anyhow, ensure, Result};
use clap::Parser;
use sim_connector::config::is_websocket_url;
use sim_connector::{ConnectionSupervisor, ConnectorArgs, MockGateway};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn seeded_gateway() -> MockGateway {
    let gateway = MockGateway::new();
    gateway.set_aircraft(
        "FlyByWire A320neo (LEAP)",
        "SimObjects/Airplanes/FlyByWire_A320_NEO/aircraft.cfg",
    );
    gateway.set_lvars(&[
        "A32NX_EFIS_L_OPTION",
        "A32NX_FCU_SPD_MANAGED_DOT",
        "A32NX_ELEC_AC_1_BUS_IS_POWERED",
    ]);
    gateway.set_numeric("A32NX_ELEC_AC_1_BUS_IS_POWERED", 1.0);
    gateway.set_text("(A:ATC ID, String)", "D-AXLA");
    gateway
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init()
        .map_err(|e| anyhow!("tracing init failed: {e}"))?;

    let config = ConnectorArgs::parse().into_config();
    ensure!(
        is_websocket_url(&config.relay_url),
        "relay url must be a ws:// or wss:// url, got {}",
        config.relay_url
    );
    info!(
        relay = %config.relay_url,
        client = %config.client_name,
        "mock_connector starting"
    );

    let mut supervisor = ConnectionSupervisor::new(config, Box::new(seeded_gateway()));
    let reason = supervisor.run();
    info!(?reason, "mock_connector exiting");

    Ok(())
}
