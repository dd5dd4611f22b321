use crate::{error::AppError, market::channel::StreamConnector, state::AppState};
use crate::market::types::ConnectionStatus;
use serde::Serialize;
use std::time::Instant;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub uptime_ms: u128,
    pub stream: &'static str,
    pub connection: Option<ConnectionStatus>,
}

pub fn build_health_response(
    started_at: Instant,
    connection: Option<ConnectionStatus>,
) -> HealthResponse {
    HealthResponse {
        status: "ok",
        uptime_ms: started_at.elapsed().as_millis(),
        stream: if connection.is_some() {
            "running"
        } else {
            "stopped"
        },
        connection,
    }
}

pub async fn health<C: StreamConnector>(state: &AppState<C>) -> Result<HealthResponse, AppError> {
    let connection = {
        let ticker_slot = state.ticker.lock().await;
        ticker_slot
            .as_ref()
            .map(|handle| handle.controller.connection_status())
    };
    Ok(build_health_response(state.started_at, connection))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TickerConfig;
    use crate::market::fixtures::ManualConnector;

    #[test]
    fn health_reports_ok_status_and_stream_state() {
        let response = build_health_response(Instant::now(), Some(ConnectionStatus::Connected));

        assert_eq!(response.status, "ok");
        assert_eq!(response.stream, "running");
        assert!(response.uptime_ms <= 1_000);
    }

    #[tokio::test]
    async fn health_without_stream_reports_stopped() {
        let state: AppState<ManualConnector> = AppState::new(TickerConfig::default());

        let response = health(&state).await.expect("health is infallible");

        assert_eq!(response.stream, "stopped");
        assert!(response.connection.is_none());
    }
}
