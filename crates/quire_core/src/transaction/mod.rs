//! Transaction management.
//!
//! Transactions give:
//! - **Atomicity**: an abort compensates every change, and recovery rolls
//!   back transactions that never finished
//! - **Durability**: a commit returns only after its record is flushed

mod manager;
mod state;

pub use manager::TransactionManager;
pub use state::{Transaction, TransactionState};
