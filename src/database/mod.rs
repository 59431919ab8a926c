pub mod manager;
pub mod models;
pub mod query_builder;

pub use manager::{with_retry, with_transaction, DatabaseError, DatabaseManager};
pub use query_builder::{ListQuery, Paged, SqlParam};
