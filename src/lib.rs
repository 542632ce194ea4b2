//! # What is Lobelia?
//!
//! Lobelia provides a spot-exchange back-end against which users can backtest crypto
//! trading strategies over historical OHLCV candles. The library simulates the account
//! side of an exchange rather than a limit-order-book: balances, reservations, fees,
//! order lifecycles and fills are modelled; resting counterparty depth is not.
//!
//! # Implementation
//!
//! A backtest is composed of:
//! - An input, [Calliope](crate::input::calliope::Calliope) is the in-memory example.
//!   The input produces OHLCV bars and defines the
//!   [PriceSource](crate::input::calliope::PriceSource) seam that exchanges bind to.
//!   A symbol is listed at a timestamp exactly when the input has a bar for it, so the
//!   set of tradable markets can grow and shrink over the run.
//! - An orderbook implementation, [vesta](crate::orderbook::vesta). This holds the
//!   order state machine and the two indices the exchange works with: a FIFO queue of
//!   submitted orders and a book keyed by id, creation time and symbol.
//! - An exchange implementation, [IonaV1](crate::exchange::iona_v1::IonaV1). This is
//!   the interface presented to strategies: deposits and withdrawals, order creation
//!   and cancellation, balance/ticker/order queries, and portfolio valuation in a
//!   target asset.
//! - A slippage model, [slippage](crate::slippage), applied when fills are generated.
//!
//! The flow of Iona is:
//! - orders created during tick `t` only join the queue; nothing matches synchronously
//! - on the next tick, `process` drains the queue (market orders execute, limit orders
//!   start resting, stop-limits wait for their trigger) and then re-examines the open
//!   book for fills
//! - the strategy callback runs after `process` and may enqueue orders for the tick
//!   after
//!
//! Orders are processed strictly in submission order and the open book is walked in
//! creation order, so a backtest is deterministic given the same input, timer and
//! slippage model.
//!
//! [BackTest](crate::backtest::BackTest) wires a [Timer](crate::clock::Timer), an
//! exchange and a [Strategy](crate::backtest::Strategy) into the loop above. Data
//! loading is left to callers: anything that can fill a `Calliope` (or implement
//! `PriceSource`) can drive a run.

pub mod backtest;
pub mod clock;
pub mod exchange;
pub mod input;
pub mod ledger;
pub mod orderbook;
pub mod slippage;
pub mod valuation;
