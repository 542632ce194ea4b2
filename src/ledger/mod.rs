//! Tracks total and reserved balances per asset and the deposit history.
//!
//! Reservations lock the funds an open order would consume at worst: the base-asset
//! notional at the limit price for buys, the quote-asset quantity for sells. Free
//! balance is always `total - reserved` and every mutation keeps
//! `0 <= reserved <= total` per asset. Settlement is atomic per fill so the ledger
//! is consistent between any two public exchange calls.

use std::collections::BTreeMap;

use log::info;
use serde::{Deserialize, Serialize};

use crate::clock::DateTime;
use crate::exchange::ExchangeError;
use crate::orderbook::vesta::TOLERANCE;

/// One signed entry in the deposit history: positive for deposits, negative for
/// withdrawals.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct DepositRecord {
    pub timestamp: DateTime,
    pub asset: String,
    pub amount: f64,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct Ledger {
    total: BTreeMap<String, f64>,
    reserved: BTreeMap<String, f64>,
    history: Vec<DepositRecord>,
}

impl Ledger {
    pub fn new() -> Self {
        Self {
            total: BTreeMap::new(),
            reserved: BTreeMap::new(),
            history: Vec::new(),
        }
    }

    pub fn supports(&self, asset: &str) -> bool {
        self.total.contains_key(asset)
    }

    pub fn assets(&self) -> Vec<String> {
        self.total.keys().cloned().collect()
    }

    pub fn total(&self, asset: &str) -> f64 {
        self.total.get(asset).copied().unwrap_or(0.0)
    }

    pub fn reserved(&self, asset: &str) -> f64 {
        self.reserved.get(asset).copied().unwrap_or(0.0)
    }

    pub fn available(&self, asset: &str) -> f64 {
        self.total(asset) - self.reserved(asset)
    }

    pub fn history(&self) -> &[DepositRecord] {
        &self.history
    }

    /// Creates zero balance entries for a newly listed asset. Idempotent.
    pub fn ensure_asset(&mut self, asset: &str) {
        if !self.total.contains_key(asset) {
            self.total.insert(asset.to_string(), 0.0);
            self.reserved.insert(asset.to_string(), 0.0);
        }
    }

    /// Drops the balance entries of a delisted asset. The asset must already be
    /// fully unwound: nothing reserved, nothing left to withdraw.
    pub fn remove_asset(&mut self, asset: &str) {
        assert!(
            self.reserved(asset).abs() <= TOLERANCE,
            "Cannot remove asset {} with live reservations",
            asset
        );
        assert!(
            self.total(asset).abs() <= TOLERANCE,
            "Cannot remove asset {} with a remaining balance",
            asset
        );
        self.total.remove(asset);
        self.reserved.remove(asset);
    }

    /// Returns the deposited amount, which is zero for non-positive requests.
    pub fn deposit(
        &mut self,
        asset: &str,
        amount: f64,
        now: DateTime,
    ) -> Result<f64, ExchangeError> {
        if amount <= 0.0 {
            return Ok(0.0);
        }
        if !self.supports(asset) {
            return Err(ExchangeError::NotSupported(format!(
                "cannot deposit unlisted asset {}",
                asset
            )));
        }
        *self.total.get_mut(asset).unwrap() += amount;
        self.history.push(DepositRecord {
            timestamp: now,
            asset: asset.to_string(),
            amount,
        });
        info!(
            "LEDGER: Deposited {} {}, total now {}",
            amount,
            asset,
            self.total(asset)
        );
        Ok(amount)
    }

    /// Withdraws up to the free balance and returns what was actually withdrawn.
    pub fn withdraw(
        &mut self,
        asset: &str,
        amount: f64,
        now: DateTime,
    ) -> Result<f64, ExchangeError> {
        if amount <= 0.0 {
            return Ok(0.0);
        }
        if !self.supports(asset) {
            return Err(ExchangeError::NotSupported(format!(
                "cannot withdraw unlisted asset {}",
                asset
            )));
        }
        let withdrawable = self.available(asset);
        let withdrawn = amount.min(withdrawable);
        if withdrawn < amount {
            info!(
                "LEDGER: Withdraw of {} {} clamped to free balance {}",
                amount, asset, withdrawable
            );
        }
        if withdrawn <= 0.0 {
            return Ok(0.0);
        }
        *self.total.get_mut(asset).unwrap() -= withdrawn;
        self.history.push(DepositRecord {
            timestamp: now,
            asset: asset.to_string(),
            amount: -withdrawn,
        });
        Ok(withdrawn)
    }

    /// Withdraws whatever is left of a delisted asset. Every reservation on the
    /// asset has to be unwound before this runs. Returns the amount removed.
    pub fn force_withdraw(&mut self, asset: &str, now: DateTime) -> f64 {
        assert!(
            self.reserved(asset).abs() <= TOLERANCE,
            "Force withdraw of {} with live reservations",
            asset
        );
        let remaining = self.total(asset);
        if remaining.abs() <= TOLERANCE {
            self.total.insert(asset.to_string(), 0.0);
            return 0.0;
        }
        self.total.insert(asset.to_string(), 0.0);
        self.history.push(DepositRecord {
            timestamp: now,
            asset: asset.to_string(),
            amount: -remaining,
        });
        info!("LEDGER: Force withdrew {} {}", remaining, asset);
        remaining
    }

    /// Locks funds for an open order. The caller has already checked the free
    /// balance; breaking the pre-condition here is a matching-engine bug.
    pub fn reserve(&mut self, asset: &str, amount: f64) {
        assert!(
            amount <= self.available(asset) + TOLERANCE,
            "Reserve of {} {} exceeds free balance {}",
            amount,
            asset,
            self.available(asset)
        );
        *self.reserved.get_mut(asset).unwrap() += amount;
    }

    /// Releases locked funds, e.g. on cancellation or when a fill consumes part of
    /// a reservation.
    pub fn release(&mut self, asset: &str, amount: f64) {
        let reserved = self.reserved(asset);
        assert!(
            amount <= reserved + TOLERANCE,
            "Release of {} {} exceeds reservation {}",
            amount,
            asset,
            reserved
        );
        //Snap to zero so float drift cannot leave a phantom reservation behind
        self.reserved
            .insert(asset.to_string(), (reserved - amount).max(0.0));
    }

    /// Settles a buy fill on `Q/B`: the bought quote amount lands net of fees, the
    /// base notional at the fill price is paid, and for resting orders the
    /// reservation taken at the limit price is unwound for the filled amount.
    pub fn settle_buy(
        &mut self,
        quote: &str,
        base: &str,
        price: f64,
        amount: f64,
        fee_rate: f64,
        release_rate: f64,
    ) {
        *self.total.get_mut(quote).unwrap() += amount * (1.0 - fee_rate / 100.0);
        if release_rate > 0.0 {
            self.release(base, amount * release_rate);
        }
        let base_total = self.total.get_mut(base).unwrap();
        *base_total -= price * amount;
        assert!(
            *base_total >= -TOLERANCE,
            "Buy settlement drove {} negative",
            base
        );
    }

    /// Settles a sell fill on `Q/B`: the sold quote amount leaves (releasing its
    /// reservation for resting orders), the base proceeds land net of fees.
    pub fn settle_sell(
        &mut self,
        quote: &str,
        base: &str,
        price: f64,
        amount: f64,
        fee_rate: f64,
        release_amount: f64,
    ) {
        if release_amount > 0.0 {
            self.release(quote, release_amount);
        }
        let quote_total = self.total.get_mut(quote).unwrap();
        *quote_total -= amount;
        assert!(
            *quote_total >= -TOLERANCE,
            "Sell settlement drove {} negative",
            quote
        );
        *self.total.get_mut(base).unwrap() += price * amount * (1.0 - fee_rate / 100.0);
    }
}
