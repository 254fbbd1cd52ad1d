pub mod breaker;
pub mod http;
pub mod memory;
pub mod store;
mod wire;

pub use breaker::{BreakerConfig, CircuitBreakerStore};
pub use http::{HttpContextStore, HttpStoreConfig};
pub use memory::InMemoryContextStore;
pub use store::{ContextInfo, ContextStore};
