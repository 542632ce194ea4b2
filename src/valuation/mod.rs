//! Values a portfolio in a single target asset by routing every balance through the
//! most favorable chain of conversions available on the listed markets.
//!
//! Each conversion rate `r` becomes a directed edge of weight `-ln(r)`, so the
//! minimum-weight path is the maximum-product conversion route and
//! `exp(-path_weight)` recovers the combined rate. Weights are negative whenever a
//! rate is above one, which rules out Dijkstra; distances come from Bellman-Ford
//! instead, run once against the target over reversed edges.

use std::collections::BTreeMap;

use log::debug;

use crate::exchange::ExchangeError;
use crate::orderbook::vesta::TOLERANCE;

/// Conversion-rate graph over asset names.
///
/// Edge insertion order is deterministic as long as callers feed symbols in a
/// deterministic order, and relaxation follows insertion order, so valuations are
/// reproducible run to run.
#[derive(Clone, Debug, Default)]
pub struct RateGraph {
    nodes: Vec<String>,
    index: BTreeMap<String, usize>,
    edges: Vec<(usize, usize, f64)>,
}

impl RateGraph {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            index: BTreeMap::new(),
            edges: Vec::new(),
        }
    }

    fn node(&mut self, name: &str) -> usize {
        if let Some(idx) = self.index.get(name) {
            return *idx;
        }
        let idx = self.nodes.len();
        self.nodes.push(name.to_string());
        self.index.insert(name.to_string(), idx);
        idx
    }

    /// Adds a conversion from one asset into another at the given rate. Non-positive
    /// rates have no usable logarithm and add nothing.
    pub fn add_rate(&mut self, from: &str, to: &str, rate: f64) {
        if rate <= 0.0 {
            return;
        }
        let from = self.node(from);
        let to = self.node(to);
        self.edges.push((from, to, -rate.ln()));
    }

    /// Shortest-path weight from every node into `target`. Unreachable nodes are
    /// absent from the result.
    fn distances_to(&self, target: &str) -> BTreeMap<String, f64> {
        let mut dist = vec![f64::INFINITY; self.nodes.len()];
        if let Some(target_idx) = self.index.get(target) {
            dist[*target_idx] = 0.0;
        } else {
            return BTreeMap::new();
        }

        //Relax over reversed edges: dist[n] is then the weight of n -> target
        for _ in 1..self.nodes.len().max(2) {
            let mut changed = false;
            for (from, to, weight) in &self.edges {
                let candidate = dist[*to] + weight;
                if candidate < dist[*from] - TOLERANCE {
                    dist[*from] = candidate;
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }

        self.nodes
            .iter()
            .enumerate()
            .filter(|(idx, _)| dist[*idx].is_finite())
            .map(|(idx, name)| (name.clone(), dist[idx]))
            .collect()
    }
}

/// Total portfolio value in `target`, given per-asset totals.
///
/// Zero balances are skipped before reachability is checked, so assets that are
/// merely listed but unfunded can never fail the query. A positive balance with no
/// route into the target is an error.
pub fn portfolio_value(
    graph: &RateGraph,
    balances: &[(String, f64)],
    target: &str,
) -> Result<f64, ExchangeError> {
    let dist = graph.distances_to(target);

    let mut value = 0.0;
    for (asset, total) in balances {
        if *total <= TOLERANCE {
            continue;
        }
        if asset == target {
            value += total;
            continue;
        }
        match dist.get(asset) {
            Some(weight) => {
                debug!(
                    "VALUATION: {} {} converts at {}",
                    total,
                    asset,
                    (-weight).exp()
                );
                value += total * (-weight).exp();
            }
            None => {
                return Err(ExchangeError::NotSupported(format!(
                    "no conversion path from {} to {}",
                    asset, target
                )))
            }
        }
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::{portfolio_value, RateGraph};
    use crate::exchange::ExchangeError;

    fn balances(entries: &[(&str, f64)]) -> Vec<(String, f64)> {
        entries
            .iter()
            .map(|(asset, total)| (asset.to_string(), *total))
            .collect()
    }

    #[test]
    fn test_that_target_balance_maps_to_itself_exactly() {
        let mut graph = RateGraph::new();
        graph.add_rate("ETH", "USDT", 900.0);
        graph.add_rate("USDT", "ETH", 1.0 / 901.0);

        let value =
            portfolio_value(&graph, &balances(&[("ETH", 2.5), ("USDT", 0.0)]), "ETH").unwrap();
        assert_eq!(value, 2.5);
    }

    #[test]
    fn test_that_single_hop_converts_at_the_rate() {
        let mut graph = RateGraph::new();
        graph.add_rate("ETH", "USDT", 900.0);

        let value = portfolio_value(&graph, &balances(&[("ETH", 2.0)]), "USDT").unwrap();
        assert!((value - 1800.0).abs() < 1e-6);
    }

    #[test]
    fn test_that_the_best_route_wins() {
        let mut graph = RateGraph::new();
        //Direct route: 1 XRP -> 0.0009 ETH. Via BTC: 1 XRP -> 0.0001 BTC -> 0.001 ETH
        graph.add_rate("XRP", "ETH", 0.0009);
        graph.add_rate("XRP", "BTC", 0.0001);
        graph.add_rate("BTC", "ETH", 10.0);

        let value = portfolio_value(&graph, &balances(&[("XRP", 1000.0)]), "ETH").unwrap();
        assert!((value - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_that_unreachable_positive_balance_fails() {
        let mut graph = RateGraph::new();
        graph.add_rate("ETH", "USDT", 900.0);

        let result = portfolio_value(&graph, &balances(&[("NANO", 5.0)]), "USDT");
        assert!(matches!(result, Err(ExchangeError::NotSupported(_))));
    }

    #[test]
    fn test_that_unreachable_zero_balance_is_ignored() {
        let mut graph = RateGraph::new();
        graph.add_rate("ETH", "USDT", 900.0);

        let value = portfolio_value(
            &graph,
            &balances(&[("ETH", 1.0), ("NANO", 0.0)]),
            "USDT",
        )
        .unwrap();
        assert!((value - 900.0).abs() < 1e-6);
    }
}
