//! Orderbooks hold the order state machine and the indices the exchange drives fills
//! through. This is distinct from an exchange as the book only knows about orders,
//! not about balances or listings, and the same book could back other exchange
//! front-ends.
pub mod vesta;
