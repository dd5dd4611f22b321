use crate::config::TickerConfig;
use crate::market::channel::{StreamConnector, WsConnector};
use crate::market::controller::TickerController;
use crate::market::types::TickerStatusSnapshot;
use crate::session::SessionContext;
use reqwest::Client;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, RwLock};

pub struct TickerHandle<C: StreamConnector> {
    pub controller: TickerController<C>,
    pub config: TickerConfig,
}

pub struct AppState<C: StreamConnector = WsConnector> {
    pub started_at: Instant,
    pub config: TickerConfig,
    pub session: SessionContext,
    pub http: Client,
    pub ticker: Mutex<Option<TickerHandle<C>>>,
    pub last_status: Arc<RwLock<TickerStatusSnapshot>>,
}

impl<C: StreamConnector> AppState<C> {
    pub fn new(config: TickerConfig) -> Self {
        let last_status = TickerStatusSnapshot::stopped(
            config.collection.clone(),
            Some("stream idle".to_string()),
        );

        Self {
            started_at: Instant::now(),
            session: SessionContext::new(config.trader_id.clone()),
            config,
            http: Client::new(),
            ticker: Mutex::new(None),
            last_status: Arc::new(RwLock::new(last_status)),
        }
    }
}
