use crate::error::AppError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const DEFAULT_COLLECTION: &str = "stocks";
pub const ACCOUNTS_COLLECTION: &str = "traders";
pub const CONNECTION_MESSAGE_TYPE: &str = "connection";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
    Error,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ControllerPhase {
    #[default]
    Loading,
    Live,
    StaleRecovering,
    Stopped,
}

/// A tradable instrument. Identity is `id`; every other field is replaced
/// wholesale on each update.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Stock {
    pub id: String,
    pub name: String,
    pub current_price: f64,
    #[serde(rename = "amount")]
    pub available_quantity: u64,
}

#[derive(Debug, Deserialize)]
pub struct StockWire {
    pub id: String,
    pub name: String,
    #[serde(rename = "currentPrice")]
    pub current_price: f64,
    pub amount: u64,
}

impl TryFrom<StockWire> for Stock {
    type Error = AppError;

    fn try_from(value: StockWire) -> Result<Self, Self::Error> {
        if value.id.is_empty() {
            return Err(AppError::InvalidArgument(
                "stock id must not be empty".to_string(),
            ));
        }
        if !value.current_price.is_finite() || value.current_price < 0.0 {
            return Err(AppError::InvalidArgument(format!(
                "stock '{}' price must be finite and non-negative",
                value.id
            )));
        }

        Ok(Self {
            id: value.id,
            name: value.name,
            current_price: value.current_price,
            available_quantity: value.amount,
        })
    }
}

pub fn stocks_from_wire(payload: Vec<StockWire>) -> Result<Vec<Stock>, AppError> {
    let mut stocks = Vec::with_capacity(payload.len());
    for wire in payload {
        stocks.push(wire.try_into()?);
    }
    Ok(stocks)
}

/// Account-scoped entity: a trader's cash balance and holdings by stock id.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TraderAccount {
    pub id: String,
    pub name: String,
    pub money: f64,
    pub holdings: HashMap<String, i64>,
}

#[derive(Debug, Deserialize)]
pub struct TraderAccountWire {
    pub id: String,
    pub name: String,
    pub money: f64,
    #[serde(default)]
    pub holdings: Option<HashMap<String, i64>>,
}

impl TryFrom<TraderAccountWire> for TraderAccount {
    type Error = AppError;

    fn try_from(value: TraderAccountWire) -> Result<Self, Self::Error> {
        if value.id.is_empty() {
            return Err(AppError::InvalidArgument(
                "trader id must not be empty".to_string(),
            ));
        }
        if !value.money.is_finite() {
            return Err(AppError::InvalidArgument(format!(
                "trader '{}' money must be finite",
                value.id
            )));
        }

        Ok(Self {
            id: value.id,
            name: value.name,
            money: value.money,
            holdings: value.holdings.unwrap_or_default(),
        })
    }
}

pub fn accounts_from_wire(payload: Vec<TraderAccountWire>) -> Result<Vec<TraderAccount>, AppError> {
    let mut accounts = Vec::with_capacity(payload.len());
    for wire in payload {
        accounts.push(wire.try_into()?);
    }
    Ok(accounts)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LedgerTransaction {
    pub id: String,
    pub buyer_id: String,
    pub seller_id: String,
    pub stock_id: String,
    pub price: f64,
    pub quantity: i64,
}

/// Executed transactions of one trader plus the realised profit/loss the
/// backend computed for them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct AccountLedger {
    #[serde(default)]
    pub transactions: Vec<LedgerTransaction>,
    #[serde(default)]
    pub profit_loss: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StreamMessage {
    Connection(ConnectionStatus),
    Entities(Vec<Stock>),
    Accounts(Vec<TraderAccount>),
    Ignored { kind: String },
}

#[derive(Debug, Deserialize)]
struct StreamEnvelopeWire {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    status: Option<ConnectionStatus>,
    #[serde(default)]
    data: Option<simd_json::OwnedValue>,
}

/// Decodes one pushed frame. `collection` names the `type` that carries the
/// tracked entity collection; any other unknown `type` is reported as
/// `Ignored` so callers can skip it.
pub fn parse_stream_message(payload: &mut [u8], collection: &str) -> Result<StreamMessage, AppError> {
    let envelope: StreamEnvelopeWire = simd_json::serde::from_slice(payload)?;

    if envelope.kind == CONNECTION_MESSAGE_TYPE {
        let status = envelope.status.ok_or_else(|| {
            AppError::InvalidArgument("connection message without status".to_string())
        })?;
        return Ok(StreamMessage::Connection(status));
    }

    if envelope.kind == collection {
        let data = envelope.data.ok_or_else(|| {
            AppError::InvalidArgument(format!("'{collection}' message without data"))
        })?;
        let wire: Vec<StockWire> = simd_json::serde::from_owned_value(data)?;
        return Ok(StreamMessage::Entities(stocks_from_wire(wire)?));
    }

    if envelope.kind == ACCOUNTS_COLLECTION {
        let data = envelope.data.ok_or_else(|| {
            AppError::InvalidArgument("'traders' message without data".to_string())
        })?;
        let wire: Vec<TraderAccountWire> = simd_json::serde::from_owned_value(data)?;
        return Ok(StreamMessage::Accounts(accounts_from_wire(wire)?));
    }

    Ok(StreamMessage::Ignored {
        kind: envelope.kind,
    })
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TickerStatusSnapshot {
    pub phase: ControllerPhase,
    pub connection: ConnectionStatus,
    pub collection: String,
    pub entity_count: usize,
    pub loading: bool,
    pub last_error: Option<String>,
    pub account_error: Option<String>,
    pub render_count: u64,
    pub reason: Option<String>,
}

impl TickerStatusSnapshot {
    pub fn stopped(collection: String, reason: Option<String>) -> Self {
        Self {
            phase: ControllerPhase::Stopped,
            connection: ConnectionStatus::Disconnected,
            collection,
            entity_count: 0,
            loading: false,
            last_error: None,
            account_error: None,
            render_count: 0,
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_entity_collection_push() {
        let mut payload = br#"{"type":"stocks","data":[{"id":"1","name":"Acme","currentPrice":150.0,"amount":1000},{"id":"2","name":"Globex","currentPrice":300.5,"amount":0}]}"#.to_vec();
        let message =
            parse_stream_message(&mut payload, DEFAULT_COLLECTION).expect("push should parse");

        let StreamMessage::Entities(stocks) = message else {
            panic!("expected entity push, got {message:?}");
        };
        assert_eq!(stocks.len(), 2);
        assert_eq!(stocks[0].id, "1");
        assert_eq!(stocks[0].current_price, 150.0);
        assert_eq!(stocks[1].available_quantity, 0);
    }

    #[test]
    fn parses_connection_status_message() {
        let mut payload = br#"{"type":"connection","status":"disconnected"}"#.to_vec();
        let message =
            parse_stream_message(&mut payload, DEFAULT_COLLECTION).expect("status should parse");

        assert_eq!(
            message,
            StreamMessage::Connection(ConnectionStatus::Disconnected)
        );
    }

    #[test]
    fn parses_account_push() {
        let mut payload = br#"{"type":"traders","data":[{"id":"t1","name":"Ann","money":5000.0,"holdings":{"1":10}}]}"#.to_vec();
        let message =
            parse_stream_message(&mut payload, DEFAULT_COLLECTION).expect("accounts should parse");

        let StreamMessage::Accounts(accounts) = message else {
            panic!("expected account push, got {message:?}");
        };
        assert_eq!(accounts[0].holdings.get("1"), Some(&10));
    }

    #[test]
    fn ignores_unknown_message_types() {
        let mut payload = br#"{"type":"orders","data":[{"id":"o1"}]}"#.to_vec();
        let message =
            parse_stream_message(&mut payload, DEFAULT_COLLECTION).expect("unknown type is ok");

        assert_eq!(
            message,
            StreamMessage::Ignored {
                kind: "orders".to_string()
            }
        );
    }

    #[test]
    fn honours_configured_collection_name() {
        let mut payload =
            br#"{"type":"instruments","data":[{"id":"9","name":"X","currentPrice":1.0,"amount":1}]}"#
                .to_vec();
        let message = parse_stream_message(&mut payload, "instruments").expect("should parse");

        assert!(matches!(message, StreamMessage::Entities(ref stocks) if stocks.len() == 1));
    }

    #[test]
    fn rejects_negative_prices() {
        let mut payload =
            br#"{"type":"stocks","data":[{"id":"1","name":"Acme","currentPrice":-1.0,"amount":1}]}"#
                .to_vec();

        assert!(parse_stream_message(&mut payload, DEFAULT_COLLECTION).is_err());
    }

    #[test]
    fn rejects_malformed_json() {
        let mut payload = br#"{"type":"stocks","data":[{"id":"1""#.to_vec();

        assert!(parse_stream_message(&mut payload, DEFAULT_COLLECTION).is_err());
    }

    #[test]
    fn rejects_collection_push_without_data() {
        let mut payload = br#"{"type":"stocks"}"#.to_vec();

        assert!(parse_stream_message(&mut payload, DEFAULT_COLLECTION).is_err());
    }
}
