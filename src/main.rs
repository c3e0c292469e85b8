use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use thiserror::Error;

use crate::achievements::notify::spawn_notification_logger;
use crate::achievements::session::spawn_session_sweeper;
use crate::api::server::{AppState, RouteError};
use crate::constants::SESSION_SWEEP_INTERVAL_SECS;
use crate::util::config::{Config, ConfigErr};
use crate::util::telemetry;

mod achievements;
mod api;
mod backend;
mod constants;
mod energy;
mod proxy;
mod util;

#[derive(Debug, Error)]
enum RunnerErr {
    #[error(transparent)]
    Config(#[from] ConfigErr),

    #[error(transparent)]
    Route(#[from] RouteError),

    #[error(transparent)]
    Std(#[from] Box<dyn std::error::Error>),
}

type Result<T> = core::result::Result<T, RunnerErr>;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;
    let telemetry_registry = telemetry::Telemetry::new(&config)?.register();

    tracing::info!(
        backend_url = %config.backend_url,
        cookie_mode = ?config.cookie_mode,
        energy_max = config.energy_max,
        energy_regen_per_hour = config.energy_regen_per_hour,
        "starting main application"
    );

    let (tx_notify, rx_notify) = tokio::sync::mpsc::unbounded_channel();
    let (tx_ready, rx_ready) = tokio::sync::mpsc::unbounded_channel::<SocketAddr>();

    let state = Arc::new(AppState::from_config(&config, tx_notify)?);

    let mut handles = vec![
        spawn_notification_logger(rx_notify),
        spawn_session_sweeper(
            Arc::downgrade(&state.sessions),
            Duration::from_secs(SESSION_SWEEP_INTERVAL_SECS),
        ),
    ];
    handles.extend(api::server::start_server(&config, state, tx_ready, rx_ready).await?);

    _ = join_all(handles).await;

    telemetry_registry.shutdown();
    Ok(())
}
