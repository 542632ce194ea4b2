//! Inputs wrap around a dataset providing a simple transparent interface producing
//! OHLCV bars that exchanges build their operations around.
//!
//! The [PriceSource](crate::input::calliope::PriceSource) trait is the seam between
//! the matching core and any data format: a symbol is listed at a timestamp exactly
//! when the source has a bar for it. Loading from CSV files or venue APIs is left to
//! callers; anything that can fill [Calliope](crate::input::calliope::Calliope) can
//! drive a backtest.
pub mod calliope;
