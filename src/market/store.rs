use crate::market::delta::{DeltaMap, PriceMap};
use crate::market::portfolio::PortfolioView;
use crate::market::types::{ControllerPhase, Stock, TraderAccount};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;

/// Everything the view layer draws from: the current entity snapshot with
/// its deltas, the account-scoped collection and the derived portfolio.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TickerView {
    pub phase: ControllerPhase,
    pub stocks: Vec<Stock>,
    pub deltas: DeltaMap,
    #[serde(skip)]
    pub previous_prices: PriceMap,
    pub accounts: Vec<TraderAccount>,
    pub portfolio: Option<PortfolioView>,
    pub loading: bool,
    pub error: Option<String>,
    pub account_error: Option<String>,
    pub reason: Option<String>,
}

impl TickerView {
    pub fn delta_for(&self, stock_id: &str) -> f64 {
        self.deltas.get(stock_id).copied().unwrap_or(0.0)
    }
}

#[derive(Debug, Default)]
struct StoreSlot {
    view: TickerView,
    retired: bool,
}

/// Replace-on-write holder for the current view. All writes happen under one
/// lock so readers never observe a snapshot without its matching deltas.
#[derive(Debug, Clone, Default)]
pub struct SnapshotStore {
    slot: Arc<RwLock<StoreSlot>>,
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read<R>(&self, reader: impl FnOnce(&TickerView) -> R) -> R {
        let readable = self.slot.read();
        reader(&readable.view)
    }

    pub fn snapshot(&self) -> TickerView {
        self.read(TickerView::clone)
    }

    /// Runs `writer` against the view. Returns `None` without touching the
    /// view once the store is retired.
    pub fn update<R>(&self, writer: impl FnOnce(&mut TickerView) -> R) -> Option<R> {
        let mut writable = self.slot.write();
        if writable.retired {
            return None;
        }
        Some(writer(&mut writable.view))
    }

    /// Applies a last write and retires the store under the same lock.
    pub fn retire_with(&self, writer: impl FnOnce(&mut TickerView)) {
        let mut writable = self.slot.write();
        if !writable.retired {
            writer(&mut writable.view);
            writable.retired = true;
        }
    }

    pub fn is_retired(&self) -> bool {
        self.slot.read().retired
    }
}
