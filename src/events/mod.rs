//! Events Module
//!
//! Cache event notifications and the bus that fans them out.

mod bus;
mod event;

pub use bus::{EventBus, Listener, Subscription};
pub use event::{CacheEvent, CacheEventKind};
