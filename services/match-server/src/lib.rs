//! Authoritative Ludo match server.
//!
//! Every match runs in its own actor task that owns a [ludo_execution::TurnController]; the
//! websocket gateway binds connections to a seat and routes their actions to that actor.

mod actor;
pub mod config;
pub mod gateway;
pub mod history;
pub mod metrics;
pub mod store;

pub use config::{Config, ConfigError, ValidatedConfig};
pub use gateway::{router, AppState};
pub use history::HistorySink;
pub use metrics::{Metrics, MetricsSnapshot};
pub use store::{
    dice_factory, Command, DiceFactory, MatchHandle, MatchStore, Reply, Session, StoreError,
    StoreSettings,
};

use anyhow::Context;
use std::{future::Future, sync::Arc};
use tokio::net::TcpListener;
use tracing::info;

/// Wires the store, history sink and metrics described by `config`.
pub fn build(config: &ValidatedConfig, dice: DiceFactory) -> anyhow::Result<AppState> {
    let metrics = Arc::new(Metrics::default());
    let history = match &config.history_path {
        Some(path) => Some(
            HistorySink::start_sqlite(path, config.history_buffer, metrics.clone())
                .with_context(|| format!("start match history at {}", path.display()))?,
        ),
        None => None,
    };
    let store = MatchStore::new(
        config.rules.clone(),
        StoreSettings::from_config(config),
        dice,
        history,
        metrics.clone(),
    );
    Ok(AppState {
        store,
        metrics,
        outbound_buffer: config.outbound_buffer,
        max_message_size: config.max_message_size,
    })
}

/// Serves until `shutdown` resolves, then abandons every running match.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let store = state.store.clone();
    let addr = listener.local_addr().context("listener address")?;
    info!(%addr, "match server listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .context("serve websocket gateway")?;
    store.shutdown_all().await;
    Ok(())
}
