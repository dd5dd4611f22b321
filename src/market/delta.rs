use crate::market::types::Stock;
use std::collections::HashMap;

pub type PriceMap = HashMap<String, f64>;
pub type DeltaMap = HashMap<String, f64>;

/// Captures `id -> current price` for every entity in `stocks`.
pub fn price_map(stocks: &[Stock]) -> PriceMap {
    stocks
        .iter()
        .map(|stock| (stock.id.clone(), stock.current_price))
        .collect()
}

/// Signed relative change in percent from `previous` to `current`.
///
/// A missing or zero previous price yields `0.0`; no rounding is applied.
pub fn relative_change_pct(previous: Option<f64>, current: f64) -> f64 {
    match previous {
        Some(previous) if previous != 0.0 && previous != current => {
            (current - previous) * 100.0 / previous
        }
        _ => 0.0,
    }
}

/// Computes one delta per current entity. The output key set is exactly the
/// id set of `current`.
pub fn compute_deltas(previous_prices: &PriceMap, current: &[Stock]) -> DeltaMap {
    let mut deltas = DeltaMap::with_capacity(current.len());
    for stock in current {
        let previous = previous_prices.get(&stock.id).copied();
        deltas.insert(
            stock.id.clone(),
            relative_change_pct(previous, stock.current_price),
        );
    }
    deltas
}

pub fn zero_deltas(current: &[Stock]) -> DeltaMap {
    current
        .iter()
        .map(|stock| (stock.id.clone(), 0.0))
        .collect()
}

pub fn has_nonzero_delta(deltas: &DeltaMap) -> bool {
    deltas.values().any(|delta| *delta != 0.0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderDecision {
    Render,
    Suppress,
}

impl RenderDecision {
    pub fn should_render(self) -> bool {
        matches!(self, Self::Render)
    }
}

/// A push is render-worthy when the entity count moved or any price moved.
pub fn push_render_decision(
    previous_count: usize,
    current_count: usize,
    deltas: &DeltaMap,
) -> RenderDecision {
    if previous_count != current_count || has_nonzero_delta(deltas) {
        RenderDecision::Render
    } else {
        RenderDecision::Suppress
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn stock(id: &str, price: f64) -> Stock {
        Stock {
            id: id.to_string(),
            name: format!("Stock {id}"),
            current_price: price,
            available_quantity: 100,
        }
    }

    fn prices(entries: &[(&str, f64)]) -> PriceMap {
        entries
            .iter()
            .map(|(id, price)| (id.to_string(), *price))
            .collect()
    }

    #[test]
    fn computes_positive_and_negative_changes() {
        let previous = prices(&[("1", 150.0), ("2", 300.0)]);
        let current = vec![stock("1", 157.5), stock("2", 285.0)];

        let deltas = compute_deltas(&previous, &current);

        assert_eq!(deltas["1"], 5.0);
        assert_eq!(deltas["2"], -5.0);
    }

    #[test]
    fn unchanged_price_has_zero_delta() {
        let previous = prices(&[("3", 10.0)]);
        let deltas = compute_deltas(&previous, &[stock("3", 10.0)]);

        assert_eq!(deltas["3"], 0.0);
        assert!(!has_nonzero_delta(&deltas));
    }

    #[test]
    fn zero_previous_price_is_never_a_divisor() {
        let previous = prices(&[("1", 0.0)]);
        let deltas = compute_deltas(&previous, &[stock("1", 42.0)]);

        assert_eq!(deltas["1"], 0.0);
        assert!(deltas["1"].is_finite());
    }

    #[test]
    fn new_entity_starts_at_zero() {
        let previous = prices(&[("1", 100.0)]);
        let deltas = compute_deltas(&previous, &[stock("1", 110.0), stock("9", 55.0)]);

        assert_eq!(deltas["9"], 0.0);
        assert!((deltas["1"] - 10.0).abs() < 1e-12);
    }

    #[test]
    fn key_set_matches_current_entities_exactly() {
        let previous = prices(&[("1", 100.0), ("2", 200.0), ("gone", 5.0)]);
        let current = vec![stock("1", 101.0), stock("2", 200.0), stock("new", 1.0)];

        let deltas = compute_deltas(&previous, &current);

        let keys: HashSet<&str> = deltas.keys().map(String::as_str).collect();
        let ids: HashSet<&str> = current.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(keys, ids);
    }

    #[test]
    fn suppresses_render_for_no_op_tick() {
        let deltas = prices(&[("1", 0.0), ("2", 0.0)]);

        assert_eq!(push_render_decision(2, 2, &deltas), RenderDecision::Suppress);
    }

    #[test]
    fn renders_when_count_changes_even_without_price_moves() {
        let deltas = prices(&[("1", 0.0)]);

        assert_eq!(push_render_decision(2, 1, &deltas), RenderDecision::Render);
    }

    #[test]
    fn renders_when_any_delta_is_nonzero() {
        let deltas = prices(&[("1", 0.0), ("2", -0.25)]);

        assert!(push_render_decision(2, 2, &deltas).should_render());
    }
}
