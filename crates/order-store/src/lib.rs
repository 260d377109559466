pub mod error;
pub mod memory;
pub mod postgres;
pub mod store;

pub use error::{Result, StoreError};
pub use memory::{InMemoryOrderStore, InMemoryTransaction};
pub use postgres::{PostgresOrderStore, PostgresTransaction};
pub use store::{OrderStore, StoreTransaction};
