use crate::market::types::{AccountLedger, Stock, TraderAccount};
use serde::Serialize;

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HoldingView {
    pub stock_id: String,
    pub stock_name: String,
    pub quantity: i64,
    pub current_price: f64,
    pub current_value: f64,
    pub purchase_price: f64,
    pub unrealized_pl: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioView {
    pub trader_id: String,
    pub trader_name: String,
    pub cash_balance: f64,
    pub holdings: Vec<HoldingView>,
    pub realized_pl: f64,
    pub total_pl: f64,
}

/// Quantity-weighted mean price the trader paid for `stock_id`, or `None`
/// when the ledger has no buy for it.
pub fn average_purchase_price(
    ledger: &AccountLedger,
    trader_id: &str,
    stock_id: &str,
) -> Option<f64> {
    let mut total_cost = 0.0;
    let mut total_quantity = 0_i64;

    for transaction in ledger
        .transactions
        .iter()
        .filter(|transaction| transaction.stock_id == stock_id && transaction.buyer_id == trader_id)
    {
        total_cost += transaction.price * transaction.quantity as f64;
        total_quantity = total_quantity.saturating_add(transaction.quantity);
    }

    if total_quantity > 0 {
        Some(total_cost / total_quantity as f64)
    } else {
        None
    }
}

/// Values every positive holding whose stock is currently tracked. Holdings
/// of unknown stocks are left out until a snapshot carries them.
pub fn build_portfolio(
    account: &TraderAccount,
    ledger: &AccountLedger,
    stocks: &[Stock],
) -> PortfolioView {
    let mut holdings: Vec<HoldingView> = account
        .holdings
        .iter()
        .filter(|(_, quantity)| **quantity > 0)
        .filter_map(|(stock_id, quantity)| {
            let stock = stocks.iter().find(|stock| &stock.id == stock_id)?;
            let current_price = stock.current_price;
            let purchase_price =
                average_purchase_price(ledger, &account.id, stock_id).unwrap_or(current_price);
            let quantity_f = *quantity as f64;
            Some(HoldingView {
                stock_id: stock_id.clone(),
                stock_name: stock.name.clone(),
                quantity: *quantity,
                current_price,
                current_value: quantity_f * current_price,
                purchase_price,
                unrealized_pl: quantity_f * (current_price - purchase_price),
            })
        })
        .collect();
    holdings.sort_unstable_by(|lhs, rhs| lhs.stock_id.cmp(&rhs.stock_id));

    let unrealized: f64 = holdings.iter().map(|holding| holding.unrealized_pl).sum();

    PortfolioView {
        trader_id: account.id.clone(),
        trader_name: account.name.clone(),
        cash_balance: account.money,
        holdings,
        realized_pl: ledger.profit_loss,
        total_pl: ledger.profit_loss + unrealized,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::types::LedgerTransaction;
    use std::collections::HashMap;

    fn stock(id: &str, price: f64) -> Stock {
        Stock {
            id: id.to_string(),
            name: format!("Stock {id}"),
            current_price: price,
            available_quantity: 10,
        }
    }

    fn buy(stock_id: &str, buyer: &str, price: f64, quantity: i64) -> LedgerTransaction {
        LedgerTransaction {
            id: format!("{stock_id}-{price}-{quantity}"),
            buyer_id: buyer.to_string(),
            seller_id: "market".to_string(),
            stock_id: stock_id.to_string(),
            price,
            quantity,
        }
    }

    fn account(holdings: &[(&str, i64)]) -> TraderAccount {
        TraderAccount {
            id: "t1".to_string(),
            name: "Ann".to_string(),
            money: 1_000.0,
            holdings: holdings
                .iter()
                .map(|(id, qty)| (id.to_string(), *qty))
                .collect::<HashMap<_, _>>(),
        }
    }

    #[test]
    fn averages_purchase_price_over_buys_only() {
        let ledger = AccountLedger {
            transactions: vec![
                buy("1", "t1", 100.0, 10),
                buy("1", "t1", 130.0, 20),
                buy("1", "someone-else", 999.0, 50),
            ],
            profit_loss: 0.0,
        };

        assert_eq!(average_purchase_price(&ledger, "t1", "1"), Some(120.0));
        assert_eq!(average_purchase_price(&ledger, "t1", "2"), None);
    }

    #[test]
    fn builds_portfolio_with_unrealized_and_realized_pl() {
        let ledger = AccountLedger {
            transactions: vec![buy("1", "t1", 100.0, 10)],
            profit_loss: 25.0,
        };
        let portfolio = build_portfolio(
            &account(&[("1", 10), ("2", 0), ("unknown", 4)]),
            &ledger,
            &[stock("1", 110.0), stock("2", 50.0)],
        );

        assert_eq!(portfolio.holdings.len(), 1);
        let holding = &portfolio.holdings[0];
        assert_eq!(holding.current_value, 1_100.0);
        assert_eq!(holding.unrealized_pl, 100.0);
        assert_eq!(portfolio.total_pl, 125.0);
        assert_eq!(portfolio.cash_balance, 1_000.0);
    }

    #[test]
    fn falls_back_to_current_price_without_ledger_history() {
        let portfolio = build_portfolio(
            &account(&[("1", 3)]),
            &AccountLedger::default(),
            &[stock("1", 40.0)],
        );

        assert_eq!(portfolio.holdings[0].purchase_price, 40.0);
        assert_eq!(portfolio.total_pl, 0.0);
    }
}
