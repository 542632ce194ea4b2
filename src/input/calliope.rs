use std::collections::{BTreeMap, BTreeSet, HashMap};

use rand::thread_rng;
use rand_distr::{Distribution, Uniform};
use serde::{Deserialize, Serialize};

use crate::clock::DateTime;

/// One OHLCV candle for a symbol at a timestamp. All fields are non-negative.
#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
pub struct Bar {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Field of a [Bar] used as the reference price when generating fills.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceField {
    Open,
    High,
    Low,
    Close,
}

impl Bar {
    pub fn field(&self, field: PriceField) -> f64 {
        match field {
            PriceField::Open => self.open,
            PriceField::High => self.high,
            PriceField::Low => self.low,
            PriceField::Close => self.close,
        }
    }
}

/// The seam between the matching core and any price data format.
///
/// Symbols are strings of the form `Q/B`: a buy on the symbol trades the base asset
/// `B` for the quote asset `Q`, a sell trades `Q` back into `B`. A symbol is
/// supported at a timestamp exactly when [PriceSource::bar] returns a value for it.
pub trait PriceSource {
    fn bar(&self, symbol: &str, date: DateTime) -> Option<Bar>;

    /// Every symbol the source knows about, in a deterministic order. Support at a
    /// given timestamp still has to be checked through [PriceSource::bar].
    fn symbols(&self) -> Vec<String>;

    fn quote_name<'a>(&self, symbol: &'a str) -> &'a str {
        symbol.split('/').next().unwrap_or(symbol)
    }

    fn base_name<'a>(&self, symbol: &'a str) -> &'a str {
        symbol.split('/').nth(1).unwrap_or(symbol)
    }
}

/// In-memory OHLCV store.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct Calliope {
    inner: HashMap<i64, HashMap<String, Bar>>,
    symbols: BTreeSet<String>,
}

impl Calliope {
    pub fn new() -> Self {
        Self {
            inner: HashMap::new(),
            symbols: BTreeSet::new(),
        }
    }

    pub fn add_bar(&mut self, date: i64, symbol: impl Into<String>, bar: Bar) {
        assert!(
            bar.open >= 0.0
                && bar.high >= 0.0
                && bar.low >= 0.0
                && bar.close >= 0.0
                && bar.volume >= 0.0,
            "Bar fields must be non-negative"
        );
        let symbol = symbol.into();
        self.symbols.insert(symbol.clone());
        self.inner.entry(date).or_default().insert(symbol, bar);
    }

    /// Random walk source, useful for tests and benchmarks.
    pub fn random(start: i64, length: i64, step: i64, symbols: Vec<&str>) -> Self {
        let price_dist = Uniform::new(90.0, 100.0);
        let volume_dist = Uniform::new(100.0, 1000.0);
        let mut rng = thread_rng();

        let mut source = Self::new();
        let mut date = start;
        for _ in 0..length {
            for symbol in &symbols {
                let mid = price_dist.sample(&mut rng);
                let volume = volume_dist.sample(&mut rng);
                source.add_bar(
                    date,
                    *symbol,
                    Bar {
                        open: mid,
                        high: mid * 1.01,
                        low: mid * 0.99,
                        close: mid * 1.005,
                        volume,
                    },
                );
            }
            date += step;
        }
        source
    }
}

impl PriceSource for Calliope {
    fn bar(&self, symbol: &str, date: DateTime) -> Option<Bar> {
        self.inner.get(&*date)?.get(symbol).copied()
    }

    fn symbols(&self) -> Vec<String> {
        self.symbols.iter().cloned().collect()
    }
}

/// Bid/ask companion store for the spread slippage models.
///
/// Lookups return the quote closest in time to the requested timestamp, so sparse
/// bid/ask data can sit alongside a dense candle series.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct CalliopeBidAsk {
    inner: HashMap<String, BTreeMap<i64, (f64, f64)>>,
}

impl CalliopeBidAsk {
    pub fn new() -> Self {
        Self {
            inner: HashMap::new(),
        }
    }

    pub fn add_quote(&mut self, date: i64, symbol: impl Into<String>, bid: f64, ask: f64) {
        self.inner
            .entry(symbol.into())
            .or_default()
            .insert(date, (bid, ask));
    }

    pub fn closest(&self, symbol: &str, date: DateTime) -> Option<(f64, f64)> {
        let series = self.inner.get(symbol)?;
        let at = *date;
        let before = series.range(..=at).next_back();
        let after = series.range(at..).next();
        match (before, after) {
            (Some((b_date, b_quote)), Some((a_date, a_quote))) => {
                if at - b_date <= a_date - at {
                    Some(*b_quote)
                } else {
                    Some(*a_quote)
                }
            }
            (Some((_, quote)), None) | (None, Some((_, quote))) => Some(*quote),
            (None, None) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Bar, Calliope, CalliopeBidAsk, PriceSource};
    use crate::clock::DateTime;

    fn bar(price: f64) -> Bar {
        Bar {
            open: price,
            high: price * 1.01,
            low: price * 0.99,
            close: price,
            volume: 1000.0,
        }
    }

    #[test]
    fn test_that_missing_bar_means_unsupported() {
        let mut source = Calliope::new();
        source.add_bar(100, "ABC/DEF", bar(10.0));

        assert!(source.bar("ABC/DEF", DateTime::from(100)).is_some());
        assert!(source.bar("ABC/DEF", DateTime::from(101)).is_none());
        assert!(source.bar("XYZ/DEF", DateTime::from(100)).is_none());
    }

    #[test]
    fn test_that_symbol_names_split() {
        let source = Calliope::new();
        assert_eq!(source.quote_name("XRP/ETH"), "XRP");
        assert_eq!(source.base_name("XRP/ETH"), "ETH");
    }

    #[test]
    fn test_that_bidask_returns_closest_quote() {
        let mut bidask = CalliopeBidAsk::new();
        bidask.add_quote(100, "ABC/DEF", 9.0, 11.0);
        bidask.add_quote(200, "ABC/DEF", 19.0, 21.0);

        assert_eq!(
            bidask.closest("ABC/DEF", DateTime::from(140)),
            Some((9.0, 11.0))
        );
        assert_eq!(
            bidask.closest("ABC/DEF", DateTime::from(160)),
            Some((19.0, 21.0))
        );
        assert_eq!(
            bidask.closest("ABC/DEF", DateTime::from(500)),
            Some((19.0, 21.0))
        );
        assert_eq!(bidask.closest("XYZ/DEF", DateTime::from(100)), None);
    }
}
