use crate::error::AppError;
use crate::market::api::BaselineSource;
use crate::market::channel::{StreamConnector, TransportFrame, TransportStream};
use crate::market::types::{AccountLedger, Stock, TraderAccount};
use futures_util::StreamExt;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

pub fn stock(id: &str, price: f64) -> Stock {
    Stock {
        id: id.to_string(),
        name: format!("Stock {id}"),
        current_price: price,
        available_quantity: 100,
    }
}

pub fn stocks_payload(collection: &str, stocks: &[(&str, f64)]) -> String {
    let rows: Vec<String> = stocks
        .iter()
        .map(|(id, price)| {
            format!(r#"{{"id":"{id}","name":"Stock {id}","currentPrice":{price:?},"amount":100}}"#)
        })
        .collect();
    format!(r#"{{"type":"{collection}","data":[{}]}}"#, rows.join(","))
}

type FrameSender = mpsc::UnboundedSender<Result<TransportFrame, AppError>>;

#[derive(Default)]
struct ConnectorScript {
    accept_remaining: usize,
    attempts: u64,
    link: Option<FrameSender>,
}

/// Connector whose connections are accepted or refused on demand. Refuses
/// unless `accept_next` queued an acceptance.
#[derive(Clone, Default)]
pub struct ManualConnector {
    script: Arc<Mutex<ConnectorScript>>,
}

impl ManualConnector {
    pub fn accept_next(&self) {
        self.script.lock().accept_remaining += 1;
    }

    pub fn attempts(&self) -> u64 {
        self.script.lock().attempts
    }

    pub fn send_text(&self, text: &str) {
        if let Some(link) = self.script.lock().link.as_ref() {
            let _ = link.send(Ok(TransportFrame::Payload(text.to_string())));
        }
    }

    pub fn send_error(&self) {
        if let Some(link) = self.script.lock().link.as_ref() {
            let _ = link.send(Err(AppError::ChannelClosed("connection reset")));
        }
    }

    pub fn drop_link(&self) {
        self.script.lock().link = None;
    }
}

impl StreamConnector for ManualConnector {
    async fn connect(&self) -> Result<TransportStream, AppError> {
        let receiver = {
            let mut script = self.script.lock();
            script.attempts += 1;
            if script.accept_remaining == 0 {
                return Err(AppError::ChannelClosed("connection refused"));
            }
            script.accept_remaining -= 1;
            let (sender, receiver) = mpsc::unbounded_channel();
            script.link = Some(sender);
            receiver
        };

        let frames = futures_util::stream::unfold(receiver, |mut receiver| async move {
            receiver.recv().await.map(|frame| (frame, receiver))
        });
        Ok(frames.boxed())
    }
}

#[derive(Default)]
struct BaselineScript {
    entities: VecDeque<(Duration, Result<Vec<Stock>, String>)>,
    entity_calls: u64,
    account: Option<TraderAccount>,
    ledger: AccountLedger,
    account_calls: u64,
}

/// Baseline source answering from a queue of scripted responses.
#[derive(Clone, Default)]
pub struct ScriptedBaseline {
    script: Arc<Mutex<BaselineScript>>,
}

impl ScriptedBaseline {
    pub fn push_entities(&self, stocks: Vec<Stock>) {
        self.push_entities_after(Duration::ZERO, stocks);
    }

    pub fn push_entities_after(&self, delay: Duration, stocks: Vec<Stock>) {
        self.script.lock().entities.push_back((delay, Ok(stocks)));
    }

    pub fn push_failure(&self, reason: &str) {
        self.script
            .lock()
            .entities
            .push_back((Duration::ZERO, Err(reason.to_string())));
    }

    pub fn set_account(&self, account: TraderAccount, ledger: AccountLedger) {
        let mut script = self.script.lock();
        script.account = Some(account);
        script.ledger = ledger;
    }

    pub fn entity_calls(&self) -> u64 {
        self.script.lock().entity_calls
    }

    pub fn account_calls(&self) -> u64 {
        self.script.lock().account_calls
    }
}

impl BaselineSource for ScriptedBaseline {
    async fn fetch_entities(&self) -> Result<Vec<Stock>, AppError> {
        let next = {
            let mut script = self.script.lock();
            script.entity_calls += 1;
            script.entities.pop_front()
        };
        let Some((delay, response)) = next else {
            return Err(AppError::InvalidArgument("no scripted baseline".to_string()));
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        response.map_err(AppError::InvalidArgument)
    }

    async fn fetch_account(&self, trader_id: &str) -> Result<TraderAccount, AppError> {
        let mut script = self.script.lock();
        script.account_calls += 1;
        script
            .account
            .clone()
            .filter(|account| account.id == trader_id)
            .ok_or_else(|| AppError::InvalidArgument(format!("unknown trader {trader_id}")))
    }

    async fn fetch_account_ledger(&self, _trader_id: &str) -> Result<AccountLedger, AppError> {
        Ok(self.script.lock().ledger.clone())
    }
}
