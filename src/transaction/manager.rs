use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use crate::common::types::TxnId;
use crate::transaction::lock_manager::LockManager;
use crate::transaction::transaction::{IsolationLevel, Transaction, TransactionState};

/// Mints monotonically increasing transaction ids and tracks the active
/// transactions, so the deadlock detector can resolve a victim id back to
/// its transaction.
pub struct TransactionManager {
    next_txn_id: AtomicU32,
    active: Mutex<HashMap<TxnId, Arc<Transaction>>>,
}

impl TransactionManager {
    pub fn new() -> Self {
        Self {
            next_txn_id: AtomicU32::new(0),
            active: Mutex::new(HashMap::new()),
        }
    }

    /// Begin a new transaction at the given isolation level.
    pub fn begin(&self, isolation_level: IsolationLevel) -> Arc<Transaction> {
        let txn_id = self.next_txn_id.fetch_add(1, Ordering::SeqCst);
        let txn = Arc::new(Transaction::new(txn_id, isolation_level));
        self.active.lock().unwrap().insert(txn_id, txn.clone());
        txn
    }

    /// Look up an active transaction by id.
    pub fn get(&self, txn_id: TxnId) -> Option<Arc<Transaction>> {
        self.active.lock().unwrap().get(&txn_id).cloned()
    }

    pub fn active_transaction_ids(&self) -> Vec<TxnId> {
        self.active.lock().unwrap().keys().copied().collect()
    }

    /// Commit: release every lock still held and retire the transaction.
    pub fn commit(&self, txn: &Arc<Transaction>, lock_manager: &LockManager) {
        txn.set_state(TransactionState::Committed);
        lock_manager.release_all(txn);
        self.active.lock().unwrap().remove(&txn.id());
    }

    /// Abort: release every lock still held and retire the transaction.
    /// The state may already be `Aborted` when the deadlock detector or a
    /// failed lock call got here first.
    pub fn abort(&self, txn: &Arc<Transaction>, lock_manager: &LockManager) {
        txn.set_state(TransactionState::Aborted);
        lock_manager.release_all(txn);
        self.active.lock().unwrap().remove(&txn.id());
    }
}

impl Default for TransactionManager {
    fn default() -> Self {
        Self::new()
    }
}
