use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::clock::DateTime;

pub type OrderId = u64;

/// Absolute tolerance for every comparison of monetary quantities.
pub const TOLERANCE: f64 = 1e-9;

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl Display for OrderSide {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "buy"),
            OrderSide::Sell => write!(f, "sell"),
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    Market,
    Limit,
    StopLimit,
}

impl Display for OrderType {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            OrderType::Market => write!(f, "market"),
            OrderType::Limit => write!(f, "limit"),
            OrderType::StopLimit => write!(f, "stop_limit"),
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Submitted,
    Accepted,
    Open,
    Filled,
    Cancelled,
}

impl Display for OrderStatus {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            OrderStatus::Submitted => write!(f, "submitted"),
            OrderStatus::Accepted => write!(f, "accepted"),
            OrderStatus::Open => write!(f, "open"),
            OrderStatus::Filled => write!(f, "filled"),
            OrderStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// A single execution against an order. Append-only once created.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Transaction {
    pub id: u64,
    pub timestamp: DateTime,
    pub symbol: String,
    pub side: OrderSide,
    pub price: f64,
    pub amount: f64,
}

/// An order owned by the exchange for its whole life.
///
/// Identity fields never change after construction; state moves through the machine
/// below and nothing transitions out of Filled or Cancelled:
///
/// ```text
/// Submitted --accept Market----> Filled (immediately, one transaction)
/// Submitted --accept Limit-----> Open
/// Submitted --accept StopLimit-> Accepted
/// Accepted  --trigger----------> Open
/// Open      --fill-------------> Open (partial) | Filled (full)
/// Submitted|Accepted|Open --cancel--> Cancelled
/// ```
///
/// Illegal transitions are driver bugs and panic rather than returning errors.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Order {
    pub id: OrderId,
    pub timestamp: DateTime,
    pub symbol: String,
    pub quote_name: String,
    pub base_name: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub amount: f64,
    pub price: f64,
    pub stop_price: f64,
    status: OrderStatus,
    filled: f64,
    transactions: Vec<Transaction>,
    fee: BTreeMap<String, f64>,
}

impl Order {
    #[allow(clippy::too_many_arguments)]
    fn new(
        id: OrderId,
        timestamp: DateTime,
        symbol: impl Into<String>,
        quote_name: impl Into<String>,
        base_name: impl Into<String>,
        side: OrderSide,
        order_type: OrderType,
        amount: f64,
        price: f64,
        stop_price: f64,
    ) -> Self {
        assert!(amount > 0.0, "Order amount must be positive");
        assert!(price >= 0.0, "Order price cannot be negative");
        assert!(stop_price >= 0.0, "Order stop price cannot be negative");
        if order_type == OrderType::Market {
            assert!(price == 0.0, "Market orders carry no price");
        }
        if order_type != OrderType::StopLimit {
            assert!(stop_price == 0.0, "Only stop-limit orders carry a stop price");
        }

        Self {
            id,
            timestamp,
            symbol: symbol.into(),
            quote_name: quote_name.into(),
            base_name: base_name.into(),
            side,
            order_type,
            amount,
            price,
            stop_price,
            status: OrderStatus::Submitted,
            filled: 0.0,
            transactions: Vec::new(),
            fee: BTreeMap::new(),
        }
    }

    pub fn market(
        id: OrderId,
        timestamp: DateTime,
        symbol: impl Into<String>,
        quote_name: impl Into<String>,
        base_name: impl Into<String>,
        side: OrderSide,
        amount: f64,
    ) -> Self {
        Self::new(
            id,
            timestamp,
            symbol,
            quote_name,
            base_name,
            side,
            OrderType::Market,
            amount,
            0.0,
            0.0,
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn limit(
        id: OrderId,
        timestamp: DateTime,
        symbol: impl Into<String>,
        quote_name: impl Into<String>,
        base_name: impl Into<String>,
        side: OrderSide,
        amount: f64,
        price: f64,
    ) -> Self {
        Self::new(
            id,
            timestamp,
            symbol,
            quote_name,
            base_name,
            side,
            OrderType::Limit,
            amount,
            price,
            0.0,
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn stop_limit(
        id: OrderId,
        timestamp: DateTime,
        symbol: impl Into<String>,
        quote_name: impl Into<String>,
        base_name: impl Into<String>,
        side: OrderSide,
        amount: f64,
        price: f64,
        stop_price: f64,
    ) -> Self {
        Self::new(
            id,
            timestamp,
            symbol,
            quote_name,
            base_name,
            side,
            OrderType::StopLimit,
            amount,
            price,
            stop_price,
        )
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn filled(&self) -> f64 {
        self.filled
    }

    pub fn remaining(&self) -> f64 {
        self.amount - self.filled
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    pub fn fee(&self) -> &BTreeMap<String, f64> {
        &self.fee
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.status, OrderStatus::Filled | OrderStatus::Cancelled)
    }

    /// Submitted limit order starts resting.
    pub fn open(&mut self) {
        assert!(
            self.status == OrderStatus::Submitted && self.order_type == OrderType::Limit,
            "Only submitted limit orders open directly"
        );
        self.status = OrderStatus::Open;
    }

    /// Submitted stop-limit order starts waiting for its trigger.
    pub fn accept(&mut self) {
        assert!(
            self.status == OrderStatus::Submitted && self.order_type == OrderType::StopLimit,
            "Only submitted stop-limit orders are accepted"
        );
        self.status = OrderStatus::Accepted;
    }

    /// Accepted stop-limit order triggered; it now rests like a limit order.
    pub fn trigger(&mut self) {
        assert!(
            self.status == OrderStatus::Accepted,
            "Only accepted orders trigger"
        );
        self.status = OrderStatus::Open;
    }

    pub fn cancel(&mut self) {
        assert!(
            matches!(
                self.status,
                OrderStatus::Submitted | OrderStatus::Accepted | OrderStatus::Open
            ),
            "Cannot cancel a closed order"
        );
        self.status = OrderStatus::Cancelled;
    }

    /// Appends the transaction and accumulates the filled amount. Returns true once
    /// the order is completely filled, at which point the status moves to Filled.
    pub fn apply(&mut self, transaction: Transaction) -> bool {
        assert!(
            self.status == OrderStatus::Open
                || (self.status == OrderStatus::Submitted && self.order_type == OrderType::Market),
            "Fills only apply to open orders or draining market orders"
        );
        self.filled += transaction.amount;
        assert!(
            self.filled <= self.amount + TOLERANCE,
            "Order overfilled: {} of {}",
            self.filled,
            self.amount
        );
        self.transactions.push(transaction);

        if (self.amount - self.filled).abs() <= TOLERANCE {
            //Snap to the requested amount so filled == amount holds exactly for
            //queries after repeated partial fills
            self.filled = self.amount;
            self.status = OrderStatus::Filled;
            true
        } else {
            false
        }
    }

    pub fn pay_fee(&mut self, asset: impl Into<String>, cost: f64) {
        *self.fee.entry(asset.into()).or_insert(0.0) += cost;
    }
}

/// FIFO queue of orders submitted during the current tick.
///
/// Owns its orders until the matching engine drains them on the next tick. An order
/// cancelled while still queued keeps its slot and is drained as a cancellation.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct SubmittedQueue {
    inner: VecDeque<Order>,
}

impl SubmittedQueue {
    pub fn new() -> Self {
        Self {
            inner: VecDeque::new(),
        }
    }

    pub fn push(&mut self, order: Order) {
        self.inner.push_back(order);
    }

    pub fn pop(&mut self) -> Option<Order> {
        self.inner.pop_front()
    }

    pub fn get(&self, order_id: OrderId) -> Option<&Order> {
        self.inner.iter().find(|order| order.id == order_id)
    }

    pub fn cancel(&mut self, order_id: OrderId) -> bool {
        for order in self.inner.iter_mut() {
            if order.id == order_id {
                //Cancelling twice is a no-op, not a state-machine violation
                if order.status() != OrderStatus::Cancelled {
                    order.cancel();
                }
                return true;
            }
        }
        false
    }

    pub fn list(&self) -> Vec<&Order> {
        self.inner.iter().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }
}

/// Order store indexed three ways: by id for lookup, by creation order for limited
/// listings, by symbol for per-market queries.
///
/// There is a single owning map; the secondary indices hold ids only, so moving an
/// order between books is a key migration rather than a copy. Ids are monotonic,
/// which makes insertion order and creation-time order the same thing.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct OrderBook {
    inner: HashMap<OrderId, Order>,
    by_time: Vec<OrderId>,
    by_symbol: BTreeMap<String, Vec<OrderId>>,
}

impl OrderBook {
    pub fn new() -> Self {
        Self {
            inner: HashMap::new(),
            by_time: Vec::new(),
            by_symbol: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, order: Order) {
        assert!(
            !self.inner.contains_key(&order.id),
            "Order {} already in book",
            order.id
        );
        //Ids are monotonic, so sorted insertion keeps the indices in creation order
        //even when an order migrates between books out of sequence
        let pos = self.by_time.binary_search(&order.id).unwrap_err();
        self.by_time.insert(pos, order.id);
        let ids = self.by_symbol.entry(order.symbol.clone()).or_default();
        let pos = ids.binary_search(&order.id).unwrap_err();
        ids.insert(pos, order.id);
        self.inner.insert(order.id, order);
    }

    pub fn remove(&mut self, order_id: OrderId) -> Option<Order> {
        let order = self.inner.remove(&order_id)?;
        self.by_time.retain(|id| *id != order_id);
        if let Some(ids) = self.by_symbol.get_mut(&order.symbol) {
            ids.retain(|id| *id != order_id);
            if ids.is_empty() {
                self.by_symbol.remove(&order.symbol);
            }
        }
        Some(order)
    }

    pub fn get(&self, order_id: OrderId) -> Option<&Order> {
        self.inner.get(&order_id)
    }

    pub fn get_mut(&mut self, order_id: OrderId) -> Option<&mut Order> {
        self.inner.get_mut(&order_id)
    }

    pub fn contains(&self, order_id: OrderId) -> bool {
        self.inner.contains_key(&order_id)
    }

    /// Snapshot of ids in creation order. The matching engine iterates over this so
    /// removals during the pass cannot invalidate the traversal.
    pub fn ids_by_time(&self) -> Vec<OrderId> {
        self.by_time.clone()
    }

    fn select(&self, symbol: Option<&str>, limit: usize) -> &[OrderId] {
        let ids: &[OrderId] = match symbol {
            Some(symbol) => self
                .by_symbol
                .get(symbol)
                .map(|ids| ids.as_slice())
                .unwrap_or(&[]),
            None => &self.by_time,
        };
        let skip = if limit > 0 && ids.len() > limit {
            ids.len() - limit
        } else {
            0
        };
        &ids[skip..]
    }

    /// Orders in creation order, optionally filtered by symbol. When `limit` is
    /// non-zero only the most recent `limit` entries are returned. An unknown symbol
    /// produces an empty list.
    pub fn list(&self, symbol: Option<&str>, limit: usize) -> Vec<&Order> {
        self.select(symbol, limit)
            .iter()
            .map(|id| self.inner.get(id).unwrap())
            .collect()
    }

    /// Same selection as [OrderBook::list] but ids only.
    pub fn list_ids(&self, symbol: Option<&str>, limit: usize) -> Vec<OrderId> {
        self.select(symbol, limit).to_vec()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::{Order, OrderBook, OrderSide, OrderStatus, SubmittedQueue, Transaction};
    use crate::clock::DateTime;

    fn limit_buy(id: u64, amount: f64, price: f64) -> Order {
        Order::limit(
            id,
            DateTime::from(100),
            "XRP/ETH",
            "XRP",
            "ETH",
            OrderSide::Buy,
            amount,
            price,
        )
    }

    fn tx(amount: f64, price: f64) -> Transaction {
        Transaction {
            id: 0,
            timestamp: DateTime::from(200),
            symbol: "XRP/ETH".to_string(),
            side: OrderSide::Buy,
            price,
            amount,
        }
    }

    #[test]
    fn test_that_partial_fills_accumulate_until_filled() {
        let mut order = limit_buy(1, 100.0, 0.5);
        order.open();

        assert!(!order.apply(tx(40.0, 0.5)));
        assert_eq!(order.status(), OrderStatus::Open);
        assert_eq!(order.filled(), 40.0);
        assert_eq!(order.remaining(), 60.0);

        assert!(order.apply(tx(60.0, 0.5)));
        assert_eq!(order.status(), OrderStatus::Filled);
        assert_eq!(order.remaining(), 0.0);
        assert_eq!(order.transactions().len(), 2);
    }

    #[test]
    fn test_that_fees_accrue_per_asset() {
        let mut order = limit_buy(1, 100.0, 0.5);
        order.pay_fee("XRP", 0.02);
        order.pay_fee("XRP", 0.03);

        assert_eq!(*order.fee().get("XRP").unwrap(), 0.05);
    }

    #[test]
    #[should_panic]
    fn test_that_cancelling_a_filled_order_panics() {
        let mut order = limit_buy(1, 10.0, 0.5);
        order.open();
        order.apply(tx(10.0, 0.5));
        order.cancel();
    }

    #[test]
    #[should_panic]
    fn test_that_overfilling_panics() {
        let mut order = limit_buy(1, 10.0, 0.5);
        order.open();
        order.apply(tx(11.0, 0.5));
    }

    #[test]
    fn test_that_queue_preserves_submission_order() {
        let mut queue = SubmittedQueue::new();
        queue.push(limit_buy(1, 10.0, 0.5));
        queue.push(limit_buy(2, 10.0, 0.5));
        queue.push(limit_buy(3, 10.0, 0.5));

        assert_eq!(queue.pop().unwrap().id, 1);
        assert_eq!(queue.pop().unwrap().id, 2);
        assert_eq!(queue.pop().unwrap().id, 3);
        assert!(queue.pop().is_none());
    }

    #[test]
    fn test_that_cancelled_queued_order_is_still_drained() {
        let mut queue = SubmittedQueue::new();
        queue.push(limit_buy(1, 10.0, 0.5));

        assert!(queue.cancel(1));
        assert!(!queue.cancel(99));
        let order = queue.pop().unwrap();
        assert_eq!(order.status(), OrderStatus::Cancelled);
    }

    #[test]
    fn test_that_book_listing_respects_limit_and_symbol() {
        let mut book = OrderBook::new();
        book.insert(limit_buy(1, 10.0, 0.5));
        book.insert(limit_buy(2, 10.0, 0.5));
        book.insert(Order::limit(
            3,
            DateTime::from(101),
            "ETH/USDT",
            "ETH",
            "USDT",
            OrderSide::Sell,
            1.0,
            900.0,
        ));

        assert_eq!(book.list(None, 0).len(), 3);
        let last_two: Vec<u64> = book.list(None, 2).iter().map(|o| o.id).collect();
        assert_eq!(last_two, vec![2, 3]);
        assert_eq!(book.list(Some("XRP/ETH"), 0).len(), 2);
        assert!(book.list(Some("NANO/BTC"), 5).is_empty());
    }

    #[test]
    fn test_that_removal_detaches_every_index() {
        let mut book = OrderBook::new();
        book.insert(limit_buy(1, 10.0, 0.5));
        book.insert(limit_buy(2, 10.0, 0.5));

        let removed = book.remove(1).unwrap();
        assert_eq!(removed.id, 1);
        assert!(book.remove(1).is_none());
        assert!(!book.contains(1));
        assert_eq!(book.list(Some("XRP/ETH"), 0).len(), 1);
        assert_eq!(book.ids_by_time(), vec![2]);
    }
}
