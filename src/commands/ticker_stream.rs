use crate::config::{StartTickerArgs, TickerConfig};
use crate::error::AppError;
use crate::market::api::{BaselineSource, HttpBaseline};
use crate::market::channel::{StreamChannel, StreamConnector, WsConnector};
use crate::market::controller::TickerController;
use crate::market::render::RenderSignal;
use crate::market::store::SnapshotStore;
use crate::market::types::{ConnectionStatus, TickerStatusSnapshot};
use crate::state::{AppState, TickerHandle};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TickerStreamSession {
    pub collection: String,
    pub api_base_url: String,
    pub ws_url: String,
    pub event_capacity: usize,
}

impl TickerStreamSession {
    pub fn from_config(config: &TickerConfig) -> Self {
        Self {
            collection: config.collection.clone(),
            api_base_url: config.api_base_url.clone(),
            ws_url: config.ws_url.clone(),
            event_capacity: config.event_capacity,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TickerStopResult {
    pub stopped: bool,
}

/// What a view layer needs to redraw: the wake-up signal and the store it
/// reads the snapshot and deltas from.
#[derive(Debug, Clone)]
pub struct RenderSubscription {
    pub signal: RenderSignal,
    pub store: SnapshotStore,
}

/// Starts the stream against the websocket and REST endpoints in `args`,
/// falling back to the process configuration.
pub async fn start_ticker_stream(
    state: &AppState<WsConnector>,
    args: Option<StartTickerArgs>,
) -> Result<TickerStreamSession, AppError> {
    let config = match args {
        Some(args) => args.normalize()?,
        None => state.config.clone(),
    };
    let connector = WsConnector::new(config.ws_url.as_str());
    let baseline = HttpBaseline::new(
        state.http.clone(),
        &config.api_base_url,
        &config.collection,
    );
    start_ticker_stream_with(state, config, connector, Arc::new(baseline)).await
}

/// Replaces any running stream with a new controller built from the given
/// collaborators.
pub async fn start_ticker_stream_with<C: StreamConnector, B: BaselineSource>(
    state: &AppState<C>,
    config: TickerConfig,
    connector: C,
    baseline: Arc<B>,
) -> Result<TickerStreamSession, AppError> {
    if let Some(trader_id) = config.trader_id.as_deref() {
        state.session.login(trader_id)?;
    }

    let existing_handle = {
        let mut ticker_slot = state.ticker.lock().await;
        ticker_slot.take()
    };
    if let Some(handle) = existing_handle {
        handle
            .controller
            .shutdown("replaced by a new ticker stream")
            .await;
    }

    let channel = StreamChannel::new(connector, config.event_capacity);
    let controller = TickerController::start(
        config.collection.clone(),
        channel,
        baseline,
        state.session.clone(),
    );
    info!(collection = %config.collection, ws_url = %config.ws_url, "ticker stream started");

    let session = TickerStreamSession::from_config(&config);
    {
        let mut ticker_slot = state.ticker.lock().await;
        *ticker_slot = Some(TickerHandle { controller, config });
    }

    Ok(session)
}

pub async fn stop_ticker_stream<C: StreamConnector>(
    state: &AppState<C>,
) -> Result<TickerStopResult, AppError> {
    let existing_handle = {
        let mut ticker_slot = state.ticker.lock().await;
        ticker_slot.take()
    };

    let Some(handle) = existing_handle else {
        return Ok(TickerStopResult { stopped: false });
    };

    handle.controller.teardown("stream stopped by command");
    let mut final_status = handle.controller.status();
    final_status.connection = ConnectionStatus::Disconnected;
    handle.controller.shutdown("stream stopped by command").await;

    {
        let mut writable = state.last_status.write().await;
        *writable = final_status;
    }

    Ok(TickerStopResult { stopped: true })
}

pub async fn ticker_stream_status<C: StreamConnector>(
    state: &AppState<C>,
) -> Result<TickerStatusSnapshot, AppError> {
    {
        let ticker_slot = state.ticker.lock().await;
        if let Some(handle) = ticker_slot.as_ref() {
            return Ok(handle.controller.status());
        }
    }
    let snapshot = state.last_status.read().await.clone();
    Ok(snapshot)
}

pub async fn reload_baseline<C: StreamConnector>(state: &AppState<C>) -> Result<(), AppError> {
    let ticker_slot = state.ticker.lock().await;
    match ticker_slot.as_ref() {
        Some(handle) => handle.controller.reload(),
        None => Err(AppError::NotRunning),
    }
}

pub async fn subscribe_renders<C: StreamConnector>(
    state: &AppState<C>,
) -> Result<RenderSubscription, AppError> {
    let ticker_slot = state.ticker.lock().await;
    let handle = ticker_slot.as_ref().ok_or(AppError::NotRunning)?;
    Ok(RenderSubscription {
        signal: handle.controller.render_signal(),
        store: handle.controller.store(),
    })
}
