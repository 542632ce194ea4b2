//! Slippage models transform the intended price and amount of a fill into what the
//! market would actually have given up.
//!
//! The exchange queries the model once per order per tick and enforces the contract
//! on the result: prices cannot be negative, market orders cannot be partially
//! filled, and resting orders cannot fill more than their remaining amount.

use crate::clock::DateTime;
use crate::input::calliope::{Bar, CalliopeBidAsk};
use crate::orderbook::vesta::{OrderSide, OrderType};

/// Everything a model may condition on when generating a fill.
pub struct FillContext<'a> {
    pub reference_price: f64,
    pub requested_amount: f64,
    pub order_type: OrderType,
    pub side: OrderSide,
    pub symbol: &'a str,
    pub bar: &'a Bar,
    pub timestamp: DateTime,
}

pub trait SlippageModel {
    /// Returns the `(price, amount)` the fill actually executes with.
    fn generate_fill(&self, ctx: &FillContext) -> (f64, f64);
}

/// Fills at the reference price for the full requested amount.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoSlippage;

impl SlippageModel for NoSlippage {
    fn generate_fill(&self, ctx: &FillContext) -> (f64, f64) {
        (ctx.reference_price, ctx.requested_amount)
    }
}

/// Caps non-market fills at a percentage of the bar volume.
///
/// Market orders pass through untouched: the engine requires them to fill whole.
#[derive(Clone, Copy, Debug)]
pub struct VolumeSlippage {
    tradable_rate: f64,
}

impl VolumeSlippage {
    pub fn new(tradable_rate: f64) -> Self {
        Self { tradable_rate }
    }
}

impl Default for VolumeSlippage {
    fn default() -> Self {
        Self::new(2.5)
    }
}

impl SlippageModel for VolumeSlippage {
    fn generate_fill(&self, ctx: &FillContext) -> (f64, f64) {
        if ctx.order_type == OrderType::Market {
            (ctx.reference_price, ctx.requested_amount)
        } else {
            let tradable = ctx.bar.volume * self.tradable_rate / 100.0;
            (ctx.reference_price, ctx.requested_amount.min(tradable))
        }
    }
}

/// Moves the price against the taker by a fraction of the bid/ask spread, using a
/// companion quote store. Falls back to the reference price when the symbol has no
/// bid/ask data.
#[derive(Clone, Debug)]
pub struct SpreadSlippage {
    bidask: CalliopeBidAsk,
    spread_rate: f64,
}

impl SpreadSlippage {
    pub fn new(bidask: CalliopeBidAsk, spread_rate: f64) -> Self {
        Self {
            bidask,
            spread_rate,
        }
    }

    pub fn with_default_rate(bidask: CalliopeBidAsk) -> Self {
        Self::new(bidask, 50.0)
    }

    fn shifted_price(&self, ctx: &FillContext) -> f64 {
        match self.bidask.closest(ctx.symbol, ctx.timestamp) {
            Some((bid, ask)) => {
                let shift = (ask - bid) * self.spread_rate / 100.0;
                match ctx.side {
                    OrderSide::Buy => ctx.reference_price + shift,
                    OrderSide::Sell => ctx.reference_price - shift,
                }
            }
            None => ctx.reference_price,
        }
    }
}

impl SlippageModel for SpreadSlippage {
    fn generate_fill(&self, ctx: &FillContext) -> (f64, f64) {
        (self.shifted_price(ctx), ctx.requested_amount)
    }
}

/// Spread and volume effects combined.
#[derive(Clone, Debug)]
pub struct SpreadVolumeSlippage {
    spread: SpreadSlippage,
    volume: VolumeSlippage,
}

impl SpreadVolumeSlippage {
    pub fn new(bidask: CalliopeBidAsk, spread_rate: f64, tradable_rate: f64) -> Self {
        Self {
            spread: SpreadSlippage::new(bidask, spread_rate),
            volume: VolumeSlippage::new(tradable_rate),
        }
    }

    pub fn with_default_rates(bidask: CalliopeBidAsk) -> Self {
        Self::new(bidask, 0.5, 2.5)
    }
}

impl SlippageModel for SpreadVolumeSlippage {
    fn generate_fill(&self, ctx: &FillContext) -> (f64, f64) {
        let (_, amount) = self.volume.generate_fill(ctx);
        (self.spread.shifted_price(ctx), amount)
    }
}

#[cfg(test)]
mod tests {
    use super::{
        FillContext, NoSlippage, SlippageModel, SpreadSlippage, SpreadVolumeSlippage,
        VolumeSlippage,
    };
    use crate::clock::DateTime;
    use crate::input::calliope::{Bar, CalliopeBidAsk};
    use crate::orderbook::vesta::{OrderSide, OrderType};

    fn ctx<'a>(bar: &'a Bar, order_type: OrderType, side: OrderSide) -> FillContext<'a> {
        FillContext {
            reference_price: 10.0,
            requested_amount: 500.0,
            order_type,
            side,
            symbol: "ABC/DEF",
            bar,
            timestamp: DateTime::from(100),
        }
    }

    fn bar() -> Bar {
        Bar {
            open: 10.0,
            high: 10.5,
            low: 9.5,
            close: 10.2,
            volume: 1000.0,
        }
    }

    #[test]
    fn test_that_identity_model_returns_inputs() {
        let bar = bar();
        let fill = NoSlippage.generate_fill(&ctx(&bar, OrderType::Limit, OrderSide::Buy));
        assert_eq!(fill, (10.0, 500.0));
    }

    #[test]
    fn test_that_volume_model_caps_resting_fills() {
        let bar = bar();
        let model = VolumeSlippage::new(10.0);

        let limit = model.generate_fill(&ctx(&bar, OrderType::Limit, OrderSide::Buy));
        assert_eq!(limit, (10.0, 100.0));

        //Market orders are never capped
        let market = model.generate_fill(&ctx(&bar, OrderType::Market, OrderSide::Buy));
        assert_eq!(market, (10.0, 500.0));
    }

    #[test]
    fn test_that_spread_model_moves_price_against_the_taker() {
        let mut bidask = CalliopeBidAsk::new();
        bidask.add_quote(100, "ABC/DEF", 9.9, 10.1);
        let bar = bar();
        let model = SpreadSlippage::new(bidask, 50.0);

        let buy = model.generate_fill(&ctx(&bar, OrderType::Limit, OrderSide::Buy));
        assert!((buy.0 - 10.1).abs() < 1e-12);

        let sell = model.generate_fill(&ctx(&bar, OrderType::Limit, OrderSide::Sell));
        assert!((sell.0 - 9.9).abs() < 1e-12);
    }

    #[test]
    fn test_that_spread_model_without_quote_falls_back_to_identity() {
        let bar = bar();
        let model = SpreadSlippage::with_default_rate(CalliopeBidAsk::new());
        let fill = model.generate_fill(&ctx(&bar, OrderType::Limit, OrderSide::Buy));
        assert_eq!(fill, (10.0, 500.0));
    }

    #[test]
    fn test_that_combined_model_applies_both_effects() {
        let mut bidask = CalliopeBidAsk::new();
        bidask.add_quote(100, "ABC/DEF", 9.9, 10.1);
        let bar = bar();
        let model = SpreadVolumeSlippage::new(bidask, 50.0, 10.0);

        let (price, amount) = model.generate_fill(&ctx(&bar, OrderType::Limit, OrderSide::Buy));
        assert!((price - 10.1).abs() < 1e-12);
        assert_eq!(amount, 100.0);
    }
}
