// Export public modules
pub mod common;
pub mod index;
pub mod storage;
pub mod transaction;

// Re-export key items for convenient access
pub use common::types::{PageId, Rid, TxnId, PAGE_SIZE};
pub use index::btree::BPlusTree;
pub use storage::buffer::{BufferPoolError, BufferPoolManager};
pub use storage::disk::DiskManager;
pub use transaction::{
    IsolationLevel, LockManager, Transaction, TransactionManager, TransactionState,
};
