// ============================================================================
// Transaction Management Module
// ============================================================================
//
// Snapshot transactions over the MVCC store, and the unit of work that
// scopes an identity map to one transaction.
//
// ============================================================================

pub mod manager;
pub mod state;
pub mod unit_of_work;

pub use manager::TransactionManager;
pub use state::{Transaction, TransactionId, TransactionState};
pub use unit_of_work::{SessionStats, UnitOfWork};
