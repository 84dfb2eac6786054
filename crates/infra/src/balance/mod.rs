//! Balance engine boundary.
//!
//! The five mutating operations (limit, balance, open, confirm, cancel) plus
//! two reads are exposed through [`BalanceEngine`]. Transport adapters talk to
//! the trait only, so business rules exist once.

pub mod engine;
pub mod in_memory;
pub mod postgres;

pub use engine::{BalanceEngine, EngineError};
pub use in_memory::InMemoryBalanceEngine;
pub use postgres::PostgresBalanceEngine;
