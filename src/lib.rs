pub mod commands;
pub mod config;
pub mod error;
pub mod logging;
pub mod market;
pub mod session;
pub mod state;

use commands::ticker_stream::{start_ticker_stream, stop_ticker_stream, subscribe_renders};
use config::TickerConfig;
use error::AppError;
use market::store::TickerView;
use state::AppState;
use tracing::info;

/// One table row per tracked stock, in snapshot order.
pub fn render_lines(view: &TickerView) -> Vec<String> {
    view.stocks
        .iter()
        .map(|stock| {
            format!(
                "{:<8} {:<24} {:>12.2} {:>+8.2}% {:>8}",
                stock.id,
                stock.name,
                stock.current_price,
                view.delta_for(&stock.id),
                stock.available_quantity
            )
        })
        .collect()
}

async fn serve(state: AppState) -> Result<(), AppError> {
    let session = start_ticker_stream(&state, None).await?;
    info!(
        collection = %session.collection,
        api = %session.api_base_url,
        ws = %session.ws_url,
        "watching ticker stream"
    );

    let mut subscription = subscribe_renders(&state).await?;
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal?;
                break;
            }
            changed = subscription.signal.changed() => {
                let generation = changed?;
                subscription.store.read(|view| {
                    info!(generation, phase = ?view.phase, count = view.stocks.len(), "render");
                    for line in render_lines(view) {
                        info!("{line}");
                    }
                    if let Some(portfolio) = &view.portfolio {
                        info!(
                            trader = %portfolio.trader_id,
                            cash = portfolio.cash_balance,
                            total_pl = portfolio.total_pl,
                            "portfolio"
                        );
                    }
                });
            }
        }
    }

    let stopped = stop_ticker_stream(&state).await?;
    info!(stopped = stopped.stopped, "ticker stream stopped");
    Ok(())
}

pub fn run() -> Result<(), AppError> {
    let config = TickerConfig::from_env()?;
    logging::init_tracing(&config.log_level);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(serve(AppState::new(config)))
}
