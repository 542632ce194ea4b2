use std::collections::{BTreeMap, BTreeSet};

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::clock::{DateTime, Timer};
use crate::exchange::ExchangeError;
use crate::input::calliope::{Bar, PriceField, PriceSource};
use crate::ledger::{DepositRecord, Ledger};
use crate::orderbook::vesta::{
    Order, OrderBook, OrderId, OrderSide, OrderStatus, OrderType, SubmittedQueue, Transaction,
    TOLERANCE,
};
use crate::slippage::{FillContext, NoSlippage, SlippageModel};
use crate::valuation::{portfolio_value, RateGraph};

/// Display rounding for amounts at the API boundary.
fn round8(value: f64) -> f64 {
    (value * 1e8).round() / 1e8
}

/// Per-asset balance as reported to strategies. `free` is what new orders and
/// withdrawals can draw on, `used` is locked by open orders.
#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
pub struct BalanceRecord {
    pub total: f64,
    pub free: f64,
    pub used: f64,
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
pub struct TransactionInfo {
    pub timestamp: i64,
    pub price: f64,
    pub amount: f64,
}

/// Snapshot of an order as reported to strategies.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct OrderInfo {
    pub id: OrderId,
    pub datetime: String,
    pub timestamp: i64,
    pub status: OrderStatus,
    pub symbol: String,
    #[serde(rename = "type")]
    pub order_type: OrderType,
    pub side: OrderSide,
    pub price: f64,
    pub stop_price: f64,
    pub amount: f64,
    pub filled: f64,
    pub remaining: f64,
    pub transaction: Vec<TransactionInfo>,
    pub fee: BTreeMap<String, f64>,
}

impl From<&Order> for OrderInfo {
    fn from(order: &Order) -> Self {
        Self {
            id: order.id,
            datetime: order.timestamp.isoformat(),
            timestamp: *order.timestamp,
            status: order.status(),
            symbol: order.symbol.clone(),
            order_type: order.order_type,
            side: order.side,
            price: order.price,
            stop_price: order.stop_price,
            amount: round8(order.amount),
            filled: round8(order.filled()),
            remaining: round8(order.remaining()),
            transaction: order
                .transactions()
                .iter()
                .map(|tx| TransactionInfo {
                    timestamp: *tx.timestamp,
                    price: tx.price,
                    amount: round8(tx.amount),
                })
                .collect(),
            fee: order
                .fee()
                .iter()
                .map(|(asset, cost)| (asset.clone(), round8(*cost)))
                .collect(),
        }
    }
}

/// Builds [IonaV1]. The price source and timer are required; everything else has the
/// defaults of the reference configuration: 0.05% fee, open price as the reference
/// for both sides, identity slippage, invariant checking on.
pub struct IonaV1Builder<S: PriceSource> {
    source: S,
    timer: Timer,
    fee_rate: f64,
    buy_price: PriceField,
    sell_price: PriceField,
    slippage: Box<dyn SlippageModel>,
    debug: bool,
}

impl<S: PriceSource> IonaV1Builder<S> {
    pub fn new(source: S, timer: Timer) -> Self {
        Self {
            source,
            timer,
            fee_rate: 0.05,
            buy_price: PriceField::Open,
            sell_price: PriceField::Open,
            slippage: Box::new(NoSlippage),
            debug: true,
        }
    }

    /// Fee taken from the acquiring side of each fill, as a percentage.
    pub fn with_fee_rate(mut self, fee_rate: f64) -> Self {
        assert!(fee_rate >= 0.0, "Fee rate cannot be negative");
        self.fee_rate = fee_rate;
        self
    }

    /// Which OHLC fields buys and sells use as their reference price.
    pub fn with_price_fields(mut self, buy_price: PriceField, sell_price: PriceField) -> Self {
        self.buy_price = buy_price;
        self.sell_price = sell_price;
        self
    }

    pub fn with_slippage(mut self, slippage: Box<dyn SlippageModel>) -> Self {
        self.slippage = slippage;
        self
    }

    /// Toggles the ledger/book invariant verification that runs after every tick.
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn build(self) -> IonaV1<S> {
        let mut exchange = IonaV1 {
            source: self.source,
            timer: self.timer,
            fee_rate: self.fee_rate,
            buy_price: self.buy_price,
            sell_price: self.sell_price,
            slippage: self.slippage,
            debug: self.debug,
            ledger: Ledger::new(),
            submitted: SubmittedQueue::new(),
            open_book: OrderBook::new(),
            closed_book: OrderBook::new(),
            symbols: BTreeSet::new(),
            assets: BTreeSet::new(),
            next_order_id: 0,
            next_transaction_id: 0,
            last_processed: None,
        };
        //Markets listed at the start date are tradable before the first tick runs
        exchange.reconcile_listings(exchange.timer.now());
        exchange
    }
}

/// Spot exchange simulator over OHLCV bars.
///
/// Orders created during tick `t` join the submitted queue and become eligible for
/// matching when `process` runs at `t+1`; nothing matches synchronously with
/// creation, which kills lookahead bias. The exchange owns every order for life:
/// the submitted queue holds it until drained, then exactly one of the open and
/// closed books does.
pub struct IonaV1<S: PriceSource> {
    source: S,
    timer: Timer,
    fee_rate: f64,
    buy_price: PriceField,
    sell_price: PriceField,
    slippage: Box<dyn SlippageModel>,
    debug: bool,
    ledger: Ledger,
    submitted: SubmittedQueue,
    open_book: OrderBook,
    closed_book: OrderBook,
    symbols: BTreeSet<String>,
    assets: BTreeSet<String>,
    next_order_id: OrderId,
    next_transaction_id: u64,
    last_processed: Option<DateTime>,
}

impl<S: PriceSource> IonaV1<S> {
    pub fn builder(source: S, timer: Timer) -> IonaV1Builder<S> {
        IonaV1Builder::new(source, timer)
    }

    /// Default configuration, see [IonaV1Builder].
    pub fn new(source: S, timer: Timer) -> Self {
        IonaV1Builder::new(source, timer).build()
    }

    fn now(&self) -> DateTime {
        self.timer.now()
    }

    fn reference_price(&self, bar: &Bar, side: OrderSide) -> f64 {
        match side {
            OrderSide::Buy => bar.field(self.buy_price),
            OrderSide::Sell => bar.field(self.sell_price),
        }
    }

    // ------------------------------------------------------------------
    // Account operations
    // ------------------------------------------------------------------

    /// Deposits into the account, returning the credited amount. Non-positive
    /// requests credit nothing.
    pub fn deposit(&mut self, asset: &str, amount: f64) -> Result<f64, ExchangeError> {
        let now = self.now();
        self.ledger.deposit(asset, amount, now)
    }

    /// Withdraws up to the free balance, returning what actually left the account.
    pub fn withdraw(&mut self, asset: &str, amount: f64) -> Result<f64, ExchangeError> {
        let now = self.now();
        self.ledger.withdraw(asset, amount, now)
    }

    pub fn fetch_timestamp(&self) -> i64 {
        *self.now()
    }

    pub fn fetch_markets(&self) -> (BTreeSet<String>, BTreeSet<String>) {
        (self.assets.clone(), self.symbols.clone())
    }

    pub fn fetch_ticker(&self, symbol: &str) -> Result<Bar, ExchangeError> {
        self.source.bar(symbol, self.now()).ok_or_else(|| {
            ExchangeError::NotSupported(format!("symbol {} is not listed", symbol))
        })
    }

    pub fn fetch_tickers(&self) -> BTreeMap<String, Bar> {
        let now = self.now();
        self.symbols
            .iter()
            .filter_map(|symbol| {
                self.source
                    .bar(symbol, now)
                    .map(|bar| (symbol.clone(), bar))
            })
            .collect()
    }

    pub fn fetch_balance(&self) -> BTreeMap<String, BalanceRecord> {
        self.ledger
            .assets()
            .into_iter()
            .map(|asset| {
                let record = BalanceRecord {
                    total: round8(self.ledger.total(&asset)),
                    free: round8(self.ledger.available(&asset)),
                    used: round8(self.ledger.reserved(&asset)),
                };
                (asset, record)
            })
            .collect()
    }

    pub fn fetch_deposit_history(&self) -> Vec<DepositRecord> {
        self.ledger
            .history()
            .iter()
            .map(|record| DepositRecord {
                timestamp: record.timestamp,
                asset: record.asset.clone(),
                amount: round8(record.amount),
            })
            .collect()
    }

    /// Total balance expressed in `target` by routing every funded asset through the
    /// most favorable chain of currently listed markets. `include_fee` prices the
    /// trading fee into every hop.
    pub fn fetch_balance_in(
        &self,
        target: &str,
        include_fee: bool,
    ) -> Result<f64, ExchangeError> {
        let now = self.now();
        let multiplier = if include_fee {
            1.0 - self.fee_rate / 100.0
        } else {
            1.0
        };

        let mut graph = RateGraph::new();
        for symbol in &self.symbols {
            if let Some(bar) = self.source.bar(symbol, now) {
                let quote = self.source.quote_name(symbol);
                let base = self.source.base_name(symbol);
                let sell_ref = bar.field(self.sell_price);
                let buy_ref = bar.field(self.buy_price);
                graph.add_rate(quote, base, multiplier * sell_ref);
                if buy_ref > 0.0 {
                    graph.add_rate(base, quote, multiplier / buy_ref);
                }
            }
        }

        let balances: Vec<(String, f64)> = self
            .ledger
            .assets()
            .into_iter()
            .map(|asset| {
                let total = self.ledger.total(&asset);
                (asset, total)
            })
            .collect();
        portfolio_value(&graph, &balances, target).map(round8)
    }

    // ------------------------------------------------------------------
    // Order operations
    // ------------------------------------------------------------------

    fn create_order(
        &mut self,
        symbol: &str,
        side: OrderSide,
        order_type: OrderType,
        amount: f64,
        price: f64,
        stop_price: f64,
    ) -> Result<OrderInfo, ExchangeError> {
        if !self.symbols.contains(symbol) {
            return Err(ExchangeError::InvalidOrder(format!(
                "symbol {} is not listed",
                symbol
            )));
        }
        if amount <= 0.0 {
            return Err(ExchangeError::InvalidOrder(
                "amount must be positive".to_string(),
            ));
        }
        if order_type != OrderType::Market && price <= 0.0 {
            return Err(ExchangeError::InvalidOrder(
                "price must be positive".to_string(),
            ));
        }
        if order_type == OrderType::StopLimit && stop_price <= 0.0 {
            return Err(ExchangeError::InvalidOrder(
                "stop price must be positive".to_string(),
            ));
        }

        let id = self.next_order_id;
        self.next_order_id += 1;
        let quote = self.source.quote_name(symbol).to_string();
        let base = self.source.base_name(symbol).to_string();
        let order = match order_type {
            OrderType::Market => {
                Order::market(id, self.now(), symbol, quote, base, side, amount)
            }
            OrderType::Limit => {
                Order::limit(id, self.now(), symbol, quote, base, side, amount, price)
            }
            OrderType::StopLimit => Order::stop_limit(
                id,
                self.now(),
                symbol,
                quote,
                base,
                side,
                amount,
                price,
                stop_price,
            ),
        };
        info!(
            "EXCHANGE: Submitted {} {} order {} for {} {}",
            side, order_type, id, amount, symbol
        );
        let order_info = OrderInfo::from(&order);
        self.submitted.push(order);
        Ok(order_info)
    }

    pub fn create_market_buy_order(
        &mut self,
        symbol: &str,
        amount: f64,
    ) -> Result<OrderInfo, ExchangeError> {
        self.create_order(symbol, OrderSide::Buy, OrderType::Market, amount, 0.0, 0.0)
    }

    pub fn create_market_sell_order(
        &mut self,
        symbol: &str,
        amount: f64,
    ) -> Result<OrderInfo, ExchangeError> {
        self.create_order(symbol, OrderSide::Sell, OrderType::Market, amount, 0.0, 0.0)
    }

    pub fn create_limit_buy_order(
        &mut self,
        symbol: &str,
        amount: f64,
        price: f64,
    ) -> Result<OrderInfo, ExchangeError> {
        self.create_order(symbol, OrderSide::Buy, OrderType::Limit, amount, price, 0.0)
    }

    pub fn create_limit_sell_order(
        &mut self,
        symbol: &str,
        amount: f64,
        price: f64,
    ) -> Result<OrderInfo, ExchangeError> {
        self.create_order(symbol, OrderSide::Sell, OrderType::Limit, amount, price, 0.0)
    }

    pub fn create_stop_limit_buy_order(
        &mut self,
        symbol: &str,
        amount: f64,
        price: f64,
        stop_price: f64,
    ) -> Result<OrderInfo, ExchangeError> {
        self.create_order(
            symbol,
            OrderSide::Buy,
            OrderType::StopLimit,
            amount,
            price,
            stop_price,
        )
    }

    pub fn create_stop_limit_sell_order(
        &mut self,
        symbol: &str,
        amount: f64,
        price: f64,
        stop_price: f64,
    ) -> Result<OrderInfo, ExchangeError> {
        self.create_order(
            symbol,
            OrderSide::Sell,
            OrderType::StopLimit,
            amount,
            price,
            stop_price,
        )
    }

    /// Cancels an order that is still queued. The order keeps its queue slot and is
    /// drained as a cancellation on the next tick; no funds were reserved yet.
    pub fn cancel_submitted_order(&mut self, order_id: OrderId) -> Result<(), ExchangeError> {
        if self.submitted.cancel(order_id) {
            info!("EXCHANGE: Cancelled submitted order {}", order_id);
            Ok(())
        } else {
            Err(ExchangeError::OrderNotFound(order_id))
        }
    }

    /// Cancels a resting order, refunding the reservation still backing its
    /// unfilled remainder.
    pub fn cancel_open_order(&mut self, order_id: OrderId) -> Result<(), ExchangeError> {
        if !self.open_book.contains(order_id) {
            return Err(ExchangeError::OrderNotFound(order_id));
        }
        self.close_open_order(order_id);
        Ok(())
    }

    /// Releases the remaining reservation of an order in the open book and migrates
    /// it to the closed book as Cancelled.
    fn close_open_order(&mut self, order_id: OrderId) {
        let mut order = self.open_book.remove(order_id).unwrap();
        match order.side {
            OrderSide::Buy => self
                .ledger
                .release(&order.base_name, order.remaining() * order.price),
            OrderSide::Sell => self.ledger.release(&order.quote_name, order.remaining()),
        }
        order.cancel();
        info!("EXCHANGE: Cancelled open order {}", order_id);
        self.closed_book.insert(order);
    }

    pub fn fetch_order(&self, order_id: OrderId) -> Result<OrderInfo, ExchangeError> {
        self.submitted
            .get(order_id)
            .or_else(|| self.open_book.get(order_id))
            .or_else(|| self.closed_book.get(order_id))
            .map(OrderInfo::from)
            .ok_or(ExchangeError::OrderNotFound(order_id))
    }

    pub fn fetch_submitted_order(&self, order_id: OrderId) -> Result<OrderInfo, ExchangeError> {
        self.submitted
            .get(order_id)
            .map(OrderInfo::from)
            .ok_or(ExchangeError::OrderNotFound(order_id))
    }

    pub fn fetch_submitted_orders(&self) -> Vec<OrderInfo> {
        self.submitted.list().into_iter().map(OrderInfo::from).collect()
    }

    /// Open orders in creation order, optionally filtered by symbol; a non-zero
    /// `limit` keeps only the most recent entries. Unknown symbols list nothing.
    pub fn fetch_open_orders(&self, symbol: Option<&str>, limit: usize) -> Vec<OrderInfo> {
        self.open_book
            .list(symbol, limit)
            .into_iter()
            .map(OrderInfo::from)
            .collect()
    }

    pub fn fetch_closed_orders(&self, symbol: Option<&str>, limit: usize) -> Vec<OrderInfo> {
        self.closed_book
            .list(symbol, limit)
            .into_iter()
            .map(OrderInfo::from)
            .collect()
    }

    // ------------------------------------------------------------------
    // Tick processing
    // ------------------------------------------------------------------

    /// Runs one tick: reconciles listings, drains the submitted queue, then
    /// re-examines the open book for triggers and fills.
    ///
    /// Tick-time failures (an order that cannot be funded, a queued order whose
    /// market disappeared, a slippage model breaking its contract) bubble out
    /// unhandled after the offending order is closed as cancelled; the caller
    /// decides whether the run continues. Processing the same timestamp twice is a
    /// driver bug and panics.
    pub fn process(&mut self) -> Result<(), ExchangeError> {
        let now = self.now();
        if let Some(last) = self.last_processed {
            assert!(now > last, "Tick {} already processed", *now);
        }
        self.last_processed = Some(now);
        debug!("EXCHANGE: Processing tick {}", *now);

        self.reconcile_listings(now);
        let drained = self.drain_submitted(now);
        //The open pass still runs when the drain failed part-way: resting orders
        //must not miss their tick because an unrelated submission was bad
        let resolved = self.resolve_open(now);

        if self.debug {
            self.verify_invariants();
        }
        drained.and(resolved)
    }

    /// Detects per-tick listing changes. Newly seen assets get zero balance
    /// entries; removed assets have their open orders cancelled, reservations
    /// refunded and remaining balance implicitly withdrawn before the entries go.
    fn reconcile_listings(&mut self, now: DateTime) {
        let mut symbols = BTreeSet::new();
        let mut assets = BTreeSet::new();
        for symbol in self.source.symbols() {
            if self.source.bar(&symbol, now).is_some() {
                assets.insert(self.source.quote_name(&symbol).to_string());
                assets.insert(self.source.base_name(&symbol).to_string());
                symbols.insert(symbol);
            }
        }

        for asset in assets.difference(&self.assets) {
            info!("EXCHANGE: Listed asset {}", asset);
            self.ledger.ensure_asset(asset);
        }

        let removed: Vec<String> = self.assets.difference(&assets).cloned().collect();
        for asset in removed {
            info!("EXCHANGE: Delisting asset {}", asset);
            for order_id in self.open_book.ids_by_time() {
                let touches = {
                    let order = self.open_book.get(order_id).unwrap();
                    order.quote_name == asset || order.base_name == asset
                };
                if touches {
                    self.close_open_order(order_id);
                }
            }
            assert!(
                self.ledger.reserved(&asset).abs() <= TOLERANCE,
                "Delisting {} left a reservation behind",
                asset
            );
            self.ledger.force_withdraw(&asset, now);
            self.ledger.remove_asset(&asset);
        }

        self.symbols = symbols;
        self.assets = assets;
    }

    /// Drains the submitted queue in FIFO order: market orders execute, limit
    /// orders reserve and start resting, stop-limits reserve and wait.
    fn drain_submitted(&mut self, now: DateTime) -> Result<(), ExchangeError> {
        while let Some(mut order) = self.submitted.pop() {
            if order.status() == OrderStatus::Cancelled {
                self.closed_book.insert(order);
                continue;
            }

            if !self.symbols.contains(&order.symbol) {
                let symbol = order.symbol.clone();
                order.cancel();
                self.closed_book.insert(order);
                return Err(ExchangeError::InvalidOrder(format!(
                    "symbol {} is not listed at {}",
                    symbol, *now
                )));
            }

            match order.order_type {
                OrderType::Market => {
                    if let Err(err) = self.fill_market_order(&mut order, now) {
                        order.cancel();
                        self.closed_book.insert(order);
                        return Err(err);
                    }
                    assert!(
                        order.status() == OrderStatus::Filled,
                        "Market order {} survived its fill",
                        order.id
                    );
                    self.closed_book.insert(order);
                }
                OrderType::Limit | OrderType::StopLimit => {
                    let (asset, required) = match order.side {
                        OrderSide::Buy => (order.base_name.clone(), order.amount * order.price),
                        OrderSide::Sell => (order.quote_name.clone(), order.amount),
                    };
                    if required > self.ledger.available(&asset) + TOLERANCE {
                        let id = order.id;
                        order.cancel();
                        self.closed_book.insert(order);
                        return Err(ExchangeError::InsufficientFunds(format!(
                            "order {} needs {} {} but only {} is free",
                            id,
                            required,
                            asset,
                            self.ledger.available(&asset)
                        )));
                    }
                    self.ledger.reserve(&asset, required);
                    if order.order_type == OrderType::Limit {
                        order.open();
                    } else {
                        order.accept();
                    }
                    self.open_book.insert(order);
                }
            }
        }
        Ok(())
    }

    /// Executes a market order in full against the current bar.
    fn fill_market_order(
        &mut self,
        order: &mut Order,
        now: DateTime,
    ) -> Result<(), ExchangeError> {
        //Drained orders always have a bar: the symbol was just checked against the
        //listed set that reconcile_listings derived from the source
        let bar = self.source.bar(&order.symbol, now).unwrap();
        let reference = self.reference_price(&bar, order.side);
        let (price, amount) = self.slippage.generate_fill(&FillContext {
            reference_price: reference,
            requested_amount: order.remaining(),
            order_type: order.order_type,
            side: order.side,
            symbol: &order.symbol,
            bar: &bar,
            timestamp: now,
        });
        if price < 0.0 || (amount - order.remaining()).abs() > TOLERANCE {
            return Err(ExchangeError::SlippageModelError(format!(
                "market order {} must fill whole at a non-negative price, got ({}, {})",
                order.id, price, amount
            )));
        }

        let (asset, required) = match order.side {
            OrderSide::Buy => (&order.base_name, price * amount),
            OrderSide::Sell => (&order.quote_name, amount),
        };
        if required > self.ledger.available(asset) + TOLERANCE {
            return Err(ExchangeError::InsufficientFunds(format!(
                "market order {} needs {} {} but only {} is free",
                order.id,
                required,
                asset,
                self.ledger.available(asset)
            )));
        }

        Self::apply_fill(
            &mut self.ledger,
            &mut self.next_transaction_id,
            self.fee_rate,
            order,
            price,
            amount,
            now,
        );
        Ok(())
    }

    /// Walks the open book once: accepted stop-limits check their trigger, open
    /// orders attempt a fill. Operates on an id snapshot so migrations to the
    /// closed book during the pass are safe, and visits every order exactly once so
    /// nothing fills twice in a tick.
    fn resolve_open(&mut self, now: DateTime) -> Result<(), ExchangeError> {
        for order_id in self.open_book.ids_by_time() {
            if !self.open_book.contains(order_id) {
                continue;
            }

            let (symbol, side) = {
                let order = self.open_book.get(order_id).unwrap();
                (order.symbol.clone(), order.side)
            };
            //A pair can drop out while both of its assets stay listed; resting
            //orders on it just wait for bars to come back
            let bar = match self.source.bar(&symbol, now) {
                Some(bar) => bar,
                None => continue,
            };
            let reference = self.reference_price(&bar, side);

            {
                let order = self.open_book.get_mut(order_id).unwrap();
                if order.status() == OrderStatus::Accepted {
                    let triggered = match side {
                        OrderSide::Buy => reference >= order.stop_price - TOLERANCE,
                        OrderSide::Sell => reference <= order.stop_price + TOLERANCE,
                    };
                    if !triggered {
                        continue;
                    }
                    info!(
                        "EXCHANGE: Stop-limit order {} triggered at {}",
                        order_id, reference
                    );
                    order.trigger();
                }
            }

            let (order_type, remaining, limit_price) = {
                let order = self.open_book.get(order_id).unwrap();
                (order.order_type, order.remaining(), order.price)
            };
            let (price, amount) = self.slippage.generate_fill(&FillContext {
                reference_price: reference,
                requested_amount: remaining,
                order_type,
                side,
                symbol: &symbol,
                bar: &bar,
                timestamp: now,
            });
            if price < 0.0 || amount > remaining + TOLERANCE {
                return Err(ExchangeError::SlippageModelError(format!(
                    "fill ({}, {}) for order {} breaks the model contract",
                    price, amount, order_id
                )));
            }
            if amount <= TOLERANCE {
                continue;
            }

            //Both sides honor the limit as a worst-case bound: buys execute at the
            //slippage price when it is under the limit, sells execute at the limit
            //itself once the market reaches it
            let execution_price = match side {
                OrderSide::Buy => {
                    if price > limit_price + TOLERANCE {
                        continue;
                    }
                    price
                }
                OrderSide::Sell => {
                    if price < limit_price - TOLERANCE {
                        continue;
                    }
                    limit_price
                }
            };

            let filled = {
                let order = self.open_book.get_mut(order_id).unwrap();
                Self::apply_fill(
                    &mut self.ledger,
                    &mut self.next_transaction_id,
                    self.fee_rate,
                    order,
                    execution_price,
                    amount,
                    now,
                )
            };
            if filled {
                let order = self.open_book.remove(order_id).unwrap();
                self.closed_book.insert(order);
            }
        }
        Ok(())
    }

    /// Applies one fill to the order and settles it in the ledger. Returns true
    /// when the order is now completely filled.
    fn apply_fill(
        ledger: &mut Ledger,
        next_transaction_id: &mut u64,
        fee_rate: f64,
        order: &mut Order,
        price: f64,
        amount: f64,
        now: DateTime,
    ) -> bool {
        let transaction_id = *next_transaction_id;
        *next_transaction_id += 1;
        let transaction = Transaction {
            id: transaction_id,
            timestamp: now,
            symbol: order.symbol.clone(),
            side: order.side,
            price,
            amount,
        };

        match order.side {
            OrderSide::Buy => {
                //Market fills never reserved; resting fills unwind their
                //reservation at the limit price for the filled amount
                let release_rate = if order.order_type == OrderType::Market {
                    0.0
                } else {
                    order.price
                };
                ledger.settle_buy(
                    &order.quote_name,
                    &order.base_name,
                    price,
                    amount,
                    fee_rate,
                    release_rate,
                );
                let fee = amount * fee_rate / 100.0;
                order.pay_fee(order.quote_name.clone(), fee);
            }
            OrderSide::Sell => {
                let release_amount = if order.order_type == OrderType::Market {
                    0.0
                } else {
                    amount
                };
                ledger.settle_sell(
                    &order.quote_name,
                    &order.base_name,
                    price,
                    amount,
                    fee_rate,
                    release_amount,
                );
                let fee = price * amount * fee_rate / 100.0;
                order.pay_fee(order.base_name.clone(), fee);
            }
        }

        info!(
            "EXCHANGE: Filled {} of order {} at {}",
            amount, order.id, price
        );
        order.apply(transaction)
    }

    /// Verifies the bookkeeping invariants that must hold between ticks. Runs under
    /// the debug flag; a violation is a bug in the engine, not in strategy code, so
    /// it aborts the simulation.
    fn verify_invariants(&self) {
        //Reservations must equal exactly what the open book would consume at worst
        let mut expected: BTreeMap<String, f64> = BTreeMap::new();
        for order in self.open_book.list(None, 0) {
            match order.side {
                OrderSide::Buy => {
                    *expected.entry(order.base_name.clone()).or_insert(0.0) +=
                        order.remaining() * order.price
                }
                OrderSide::Sell => {
                    *expected.entry(order.quote_name.clone()).or_insert(0.0) +=
                        order.remaining()
                }
            }
        }
        for asset in self.ledger.assets() {
            let reserved = self.ledger.reserved(&asset);
            let wanted = expected.get(&asset).copied().unwrap_or(0.0);
            assert!(
                (reserved - wanted).abs() <= TOLERANCE,
                "Reserved {} of {} diverges from open orders ({})",
                reserved,
                asset,
                wanted
            );
            assert!(
                reserved >= -TOLERANCE && reserved <= self.ledger.total(&asset) + TOLERANCE,
                "Reservation of {} outside [0, total]",
                asset
            );
        }

        //Every order id lives in exactly one of queue, open book and closed book
        let mut seen = BTreeSet::new();
        let submitted_list = self.submitted.list();
        let all_ids = submitted_list
            .iter()
            .map(|order| order.id)
            .chain(self.open_book.list_ids(None, 0))
            .chain(self.closed_book.list_ids(None, 0));
        for order_id in all_ids {
            assert!(seen.insert(order_id), "Order {} indexed twice", order_id);
        }
        assert!(
            seen.len() as u64 == self.next_order_id,
            "Order ids leaked from the indices"
        );

        //Fill accounting per order, wherever it lives, and flow conservation per
        //asset: totals must equal deposits plus fills net of fees
        let mut flow: BTreeMap<String, f64> = BTreeMap::new();
        for record in self.ledger.history() {
            *flow.entry(record.asset.clone()).or_insert(0.0) += record.amount;
        }
        let books = self
            .submitted
            .list()
            .into_iter()
            .chain(self.open_book.list(None, 0))
            .chain(self.closed_book.list(None, 0));
        for order in books {
            let transacted: f64 = order.transactions().iter().map(|tx| tx.amount).sum();
            assert!(
                (transacted - order.filled()).abs() <= TOLERANCE,
                "Order {} transactions diverge from its filled amount",
                order.id
            );
            assert!(
                order.filled() <= order.amount + TOLERANCE,
                "Order {} overfilled",
                order.id
            );
            assert!(
                (order.status() == OrderStatus::Filled)
                    == ((order.filled() - order.amount).abs() <= TOLERANCE),
                "Order {} status diverges from its filled amount",
                order.id
            );

            for tx in order.transactions() {
                let notional = tx.price * tx.amount;
                match order.side {
                    OrderSide::Buy => {
                        *flow.entry(order.quote_name.clone()).or_insert(0.0) += tx.amount;
                        *flow.entry(order.base_name.clone()).or_insert(0.0) -= notional;
                    }
                    OrderSide::Sell => {
                        *flow.entry(order.quote_name.clone()).or_insert(0.0) -= tx.amount;
                        *flow.entry(order.base_name.clone()).or_insert(0.0) += notional;
                    }
                }
            }
            for (asset, cost) in order.fee() {
                *flow.entry(asset.clone()).or_insert(0.0) -= cost;
            }
        }
        for asset in self.ledger.assets() {
            let expected = flow.get(&asset).copied().unwrap_or(0.0);
            assert!(
                (self.ledger.total(&asset) - expected).abs() <= TOLERANCE,
                "Total {} of {} diverges from its flows ({})",
                self.ledger.total(&asset),
                asset,
                expected
            );
        }
    }
}
