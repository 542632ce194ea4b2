//! Exchanges are the main interface presented to strategies. They support the full
//! set of account operations used to run a backtest: deposits and withdrawals, order
//! creation and cancellation, balance/ticker/order queries and portfolio valuation.
//! The execution logic itself lives in the per-tick resolver inside the exchange
//! implementation; everything a strategy can observe goes through the facade.

use thiserror::Error;

use crate::orderbook::vesta::OrderId;

/// Failures surfaced to strategies.
///
/// Creation-time failures come back synchronously from facade methods. Tick-time
/// failures bubble out of `process` unhandled: the simulator never retries, the
/// caller decides whether the run continues. Contract violations (processing a tick
/// twice, broken invariants under the debug flag) are panics, not errors.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ExchangeError {
    #[error("not supported: {0}")]
    NotSupported(String),
    #[error("invalid order: {0}")]
    InvalidOrder(String),
    #[error("order {0} not found")]
    OrderNotFound(OrderId),
    #[error("insufficient funds: {0}")]
    InsufficientFunds(String),
    #[error("slippage model violated its contract: {0}")]
    SlippageModelError(String),
}

pub mod iona_v1;
