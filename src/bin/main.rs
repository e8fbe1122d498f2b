use attendance::api::{self, AppState};
use attendance::chain::accessor::ContractAccessor;
use attendance::chain::gateway::ChainGateway;
use attendance::chain::mock::MockLedger;
use attendance::clock::{Clock, SystemClock};
use attendance::config::Settings;
use attendance::roles::gate::RoleGate;
use attendance::roles::resolver::RoleResolver;
use log::{info, warn};
use std::sync::Arc;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    env_logger::init();

    // Load configuration
    let settings = Settings::from_env()?;
    if settings.development {
        warn!("Running in development mode: role checks are relaxed");
    }

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    // Chain connection. Failure here is not fatal, the accessor falls back.
    let gateway = Arc::new(ChainGateway::http(settings.gateway_config()));
    if let Err(e) = gateway.connect().await {
        warn!("Starting without chain connection: {}", e);
    }
    gateway.spawn_health_monitor(settings.health_check_interval);

    let mock = Arc::new(MockLedger::with_defaults(clock.clone()));
    let accessor = Arc::new(ContractAccessor::for_contract(
        gateway.clone(),
        mock,
        settings.accessor_config(),
        clock.clone(),
    ));
    accessor.spawn_mode_watcher(settings.mode_poll_interval);
    info!("Contract backend mode: {}", accessor.mode());

    let resolver = Arc::new(RoleResolver::new(
        accessor.clone(),
        settings.emergency_keys.clone(),
        clock,
    ));
    let gate = Arc::new(RoleGate::new(resolver));

    let state = Arc::new(AppState {
        accessor,
        gate,
        contract_address: settings.contract_address,
        development: settings.development,
    });

    let listener = TcpListener::bind(format!("0.0.0.0:{}", settings.port)).await?;
    info!("Listening on: 0.0.0.0:{}", settings.port);
    axum::serve(listener, api::router(state)).await?;

    Ok(())
}
