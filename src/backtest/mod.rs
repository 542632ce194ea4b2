//! Wires a timer, an exchange and a strategy into the tick loop.
//!
//! The strategy callback runs after each tick has been processed, against a
//! quiescent exchange: fills and listing changes for the tick are already applied,
//! and anything the strategy submits becomes eligible on the next tick. Tick-time
//! errors stop the run and surface to the caller; the driver never retries.

use log::info;

use crate::clock::Timer;
use crate::exchange::iona_v1::IonaV1;
use crate::exchange::ExchangeError;
use crate::input::calliope::PriceSource;

/// A trading strategy driven once per tick.
pub trait Strategy<S: PriceSource> {
    fn on_tick(&mut self, exchange: &mut IonaV1<S>) -> Result<(), ExchangeError>;
}

pub struct BackTest<S: PriceSource> {
    timer: Timer,
    exchange: IonaV1<S>,
    strategy: Box<dyn Strategy<S>>,
}

impl<S: PriceSource> BackTest<S> {
    /// The timer must be the same shared clock the exchange was built with.
    pub fn new(timer: Timer, exchange: IonaV1<S>, strategy: Box<dyn Strategy<S>>) -> Self {
        Self {
            timer,
            exchange,
            strategy,
        }
    }

    /// Runs to the end of the timer and hands the exchange back for inspection.
    pub fn run(mut self) -> Result<IonaV1<S>, ExchangeError> {
        info!("BACKTEST: Starting run at {}", *self.timer.now());
        loop {
            if self.timer.advance() {
                break;
            }
            self.exchange.process()?;
            self.strategy.on_tick(&mut self.exchange)?;
        }
        info!("BACKTEST: Run complete at {}", *self.timer.now());
        Ok(self.exchange)
    }
}

#[cfg(test)]
mod tests {
    use super::{BackTest, Strategy};
    use crate::clock::Timer;
    use crate::exchange::iona_v1::IonaV1;
    use crate::exchange::ExchangeError;
    use crate::input::calliope::{Bar, Calliope};

    struct BuyOnce {
        bought: bool,
    }

    impl Strategy<Calliope> for BuyOnce {
        fn on_tick(&mut self, exchange: &mut IonaV1<Calliope>) -> Result<(), ExchangeError> {
            if !self.bought {
                exchange.create_market_buy_order("ABC/USDT", 10.0)?;
                self.bought = true;
            }
            Ok(())
        }
    }

    #[test]
    fn test_that_the_loop_processes_every_tick() {
        let mut source = Calliope::new();
        for tick in 0..5 {
            source.add_bar(
                100 + tick * 10,
                "ABC/USDT",
                Bar {
                    open: 10.0,
                    high: 10.0,
                    low: 10.0,
                    close: 10.0,
                    volume: 100.0,
                },
            );
        }
        let timer = Timer::new(100, 140, 10);
        let mut exchange = IonaV1::new(source, timer.clone());
        exchange.deposit("USDT", 1000.0).unwrap();

        let backtest = BackTest::new(timer, exchange, Box::new(BuyOnce { bought: false }));
        let exchange = backtest.run().unwrap();

        //The order submitted after the first tick filled on the second
        let closed = exchange.fetch_closed_orders(Some("ABC/USDT"), 0);
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].filled, 10.0);
        assert_eq!(exchange.fetch_balance()["ABC"].total, 9.995);
    }
}
