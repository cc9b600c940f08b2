//! Order book kept on Nostr relays.

pub mod event;
pub mod order;
pub mod relay;
pub mod ws;

pub use event::{unix_now, OrderEvent, OrderTags, OrderType};
pub use order::{BidOrder, Order, OrderBook, OrderSubscription, SaleOrder};
pub use relay::{Filter, RelayConnection, RelayMessage, RelayPool, Subscription};
pub use ws::WsRelay;
