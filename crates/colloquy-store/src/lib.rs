pub mod context_map;
pub mod database;
pub mod error;
pub mod local;
pub mod record;
pub mod schema;

pub use context_map::{ContextMap, ContextMapEntry};
pub use database::Database;
pub use error::StoreError;
pub use local::LocalStore;
pub use record::{LocalRecord, RecordSummary};
