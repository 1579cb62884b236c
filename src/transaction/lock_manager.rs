use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::Duration;

use log::{debug, info};
use parking_lot::{Condvar, Mutex};

use crate::common::types::{Rid, TxnId};
use crate::transaction::transaction::{
    AbortReason, IsolationLevel, Transaction, TransactionError, TransactionState,
};

/// Default deadlock detection period.
pub const CYCLE_DETECTION_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

struct LockRequest {
    txn: Arc<Transaction>,
    mode: LockMode,
    granted: bool,
}

struct LockRequestQueue {
    queue: VecDeque<LockRequest>,
    cv: Arc<Condvar>,
    upgrading: bool,
}

impl LockRequestQueue {
    fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            cv: Arc::new(Condvar::new()),
            upgrading: false,
        }
    }
}

struct LockTableInner {
    table: HashMap<Rid, LockRequestQueue>,
    waits_for: BTreeMap<TxnId, Vec<TxnId>>,
}

/// Record-level shared/exclusive lock manager enforcing two-phase
/// locking. Waiters block on a per-record condition variable; a
/// background detector aborts the youngest transaction of every
/// waits-for cycle.
pub struct LockManager {
    inner: Mutex<LockTableInner>,
    enable_cycle_detection: AtomicBool,
    detector: Mutex<Option<JoinHandle<()>>>,
}

impl LockManager {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(LockTableInner {
                table: HashMap::new(),
                waits_for: BTreeMap::new(),
            }),
            enable_cycle_detection: AtomicBool::new(false),
            detector: Mutex::new(None),
        }
    }

    /// A shared lock is grantable when no exclusive request sits ahead of
    /// it in the queue, granted or not. Writers therefore never starve
    /// behind a stream of late readers.
    fn grant_shared(queue: &mut LockRequestQueue, txn_id: TxnId) -> bool {
        for request in queue.queue.iter_mut() {
            if request.txn.id() == txn_id {
                request.granted = true;
                return true;
            }
            if request.mode == LockMode::Exclusive {
                return false;
            }
        }
        false
    }

    /// An exclusive lock is grantable only at the front of the queue.
    fn grant_exclusive(queue: &mut LockRequestQueue, txn_id: TxnId) -> bool {
        match queue.queue.front_mut() {
            Some(request) if request.txn.id() == txn_id => {
                request.granted = true;
                true
            }
            _ => false,
        }
    }

    fn abort(txn: &Transaction, reason: AbortReason) -> TransactionError {
        txn.set_state(TransactionState::Aborted);
        TransactionError::Aborted {
            txn_id: txn.id(),
            reason,
        }
    }

    /// Acquire a shared lock on `rid`, blocking until granted. Already
    /// holding a shared (or exclusive) lock on `rid` returns immediately.
    pub fn lock_shared(&self, txn: &Arc<Transaction>, rid: Rid) -> Result<bool, TransactionError> {
        if txn.holds_shared(rid) || txn.holds_exclusive(rid) {
            return Ok(true);
        }
        if txn.isolation_level() == IsolationLevel::ReadUncommitted {
            return Err(Self::abort(txn, AbortReason::LockSharedOnReadUncommitted));
        }
        if txn.state() == TransactionState::Shrinking
            && txn.isolation_level() != IsolationLevel::ReadCommitted
        {
            return Err(Self::abort(txn, AbortReason::LockOnShrinking));
        }

        txn.insert_shared(rid);
        let mut inner = self.inner.lock();
        let queue = inner.table.entry(rid).or_insert_with(LockRequestQueue::new);
        queue.queue.push_back(LockRequest {
            txn: txn.clone(),
            mode: LockMode::Shared,
            granted: false,
        });
        let cv = queue.cv.clone();

        loop {
            if txn.state() == TransactionState::Aborted {
                return Err(TransactionError::Aborted {
                    txn_id: txn.id(),
                    reason: AbortReason::Deadlock,
                });
            }
            if let Some(queue) = inner.table.get_mut(&rid) {
                if Self::grant_shared(queue, txn.id()) {
                    return Ok(true);
                }
            }
            cv.wait(&mut inner);
        }
    }

    /// Acquire an exclusive lock on `rid`, blocking until granted.
    pub fn lock_exclusive(
        &self,
        txn: &Arc<Transaction>,
        rid: Rid,
    ) -> Result<bool, TransactionError> {
        if txn.holds_exclusive(rid) {
            return Ok(true);
        }
        if txn.state() == TransactionState::Shrinking {
            return Err(Self::abort(txn, AbortReason::LockOnShrinking));
        }

        txn.insert_exclusive(rid);
        let mut inner = self.inner.lock();
        let queue = inner.table.entry(rid).or_insert_with(LockRequestQueue::new);
        queue.queue.push_back(LockRequest {
            txn: txn.clone(),
            mode: LockMode::Exclusive,
            granted: false,
        });
        let cv = queue.cv.clone();

        loop {
            if txn.state() == TransactionState::Aborted {
                return Err(TransactionError::Aborted {
                    txn_id: txn.id(),
                    reason: AbortReason::Deadlock,
                });
            }
            if let Some(queue) = inner.table.get_mut(&rid) {
                if Self::grant_exclusive(queue, txn.id()) {
                    return Ok(true);
                }
            }
            cv.wait(&mut inner);
        }
    }

    /// Upgrade a held shared lock to exclusive. Only one upgrade may be
    /// in flight per record; a second one aborts with `UpgradeConflict`.
    pub fn lock_upgrade(
        &self,
        txn: &Arc<Transaction>,
        rid: Rid,
    ) -> Result<bool, TransactionError> {
        if txn.holds_exclusive(rid) {
            return Ok(true);
        }
        if txn.state() == TransactionState::Shrinking {
            return Err(Self::abort(txn, AbortReason::LockOnShrinking));
        }

        let mut inner = self.inner.lock();
        let already_upgrading = {
            let queue = inner.table.entry(rid).or_insert_with(LockRequestQueue::new);
            if queue.upgrading {
                true
            } else {
                queue.upgrading = true;
                false
            }
        };
        if already_upgrading {
            return Err(Self::abort(txn, AbortReason::UpgradeConflict));
        }

        txn.remove_shared(rid);
        txn.insert_exclusive(rid);

        let cv = {
            let queue = inner.table.entry(rid).or_insert_with(LockRequestQueue::new);
            // replace the shared request with an exclusive one placed
            // right after the last exclusive request already queued, so
            // shared holders ahead of it can drain first
            if let Some(position) = queue.queue.iter().position(|r| r.txn.id() == txn.id()) {
                queue.queue.remove(position);
            }
            let insert_at = queue
                .queue
                .iter()
                .rposition(|r| r.mode == LockMode::Exclusive)
                .map(|i| i + 1)
                .unwrap_or(queue.queue.len());
            queue.queue.insert(
                insert_at,
                LockRequest {
                    txn: txn.clone(),
                    mode: LockMode::Exclusive,
                    granted: false,
                },
            );
            queue.cv.clone()
        };

        let result = loop {
            if txn.state() == TransactionState::Aborted {
                break Err(TransactionError::Aborted {
                    txn_id: txn.id(),
                    reason: AbortReason::Deadlock,
                });
            }
            if let Some(queue) = inner.table.get_mut(&rid) {
                if Self::grant_exclusive(queue, txn.id()) {
                    break Ok(true);
                }
            }
            cv.wait(&mut inner);
        };

        if let Some(queue) = inner.table.get_mut(&rid) {
            queue.upgrading = false;
        }
        result
    }

    /// Release a lock on `rid`. Under `REPEATABLE_READ` any release ends
    /// the growing phase; under the weaker levels only an exclusive
    /// release does. Returns `false` if the transaction had no request on
    /// `rid`.
    pub fn unlock(&self, txn: &Arc<Transaction>, rid: Rid) -> bool {
        let was_exclusive = txn.holds_exclusive(rid);
        txn.remove_shared(rid);
        txn.remove_exclusive(rid);
        if txn.state() == TransactionState::Growing
            && (was_exclusive || txn.isolation_level() == IsolationLevel::RepeatableRead)
        {
            txn.set_state(TransactionState::Shrinking);
        }

        let mut inner = self.inner.lock();
        let (removed, empty, cv) = match inner.table.get_mut(&rid) {
            Some(queue) => match queue.queue.iter().position(|r| r.txn.id() == txn.id()) {
                Some(position) => {
                    queue.queue.remove(position);
                    (true, queue.queue.is_empty(), queue.cv.clone())
                }
                None => return false,
            },
            None => return false,
        };

        if empty {
            inner.table.remove(&rid);
        } else {
            // waiters re-evaluate their grant predicates
            cv.notify_all();
        }
        removed
    }

    /// Release every lock a finished transaction still holds or awaits.
    pub fn release_all(&self, txn: &Arc<Transaction>) {
        for rid in txn.locked_rids() {
            self.unlock(txn, rid);
        }
    }

    /// Spawn the background detector with the given period. The thread
    /// holds only a weak reference, so dropping the lock manager stops
    /// it as well.
    pub fn enable_cycle_detection(self: &Arc<Self>, interval: Duration) {
        if self.enable_cycle_detection.swap(true, Ordering::SeqCst) {
            return;
        }
        let weak: Weak<LockManager> = Arc::downgrade(self);
        let handle = std::thread::spawn(move || loop {
            std::thread::sleep(interval);
            let Some(lock_manager) = weak.upgrade() else {
                break;
            };
            if !lock_manager.enable_cycle_detection.load(Ordering::SeqCst) {
                break;
            }
            lock_manager.run_cycle_detection();
        });
        *self.detector.lock() = Some(handle);
        debug!("deadlock detection enabled, period {:?}", interval);
    }

    /// Stop the background detector and join its thread.
    pub fn disable_cycle_detection(&self) {
        self.enable_cycle_detection.store(false, Ordering::SeqCst);
        if let Some(handle) = self.detector.lock().take() {
            let _ = handle.join();
        }
        debug!("deadlock detection disabled");
    }

    /// One detection pass: rebuild the waits-for graph, abort the
    /// youngest transaction on every cycle, and wake the victims so their
    /// pending lock calls observe the abort.
    pub fn run_cycle_detection(&self) {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        inner.waits_for.clear();
        for queue in inner.table.values() {
            let mut granted = Vec::new();
            let mut waiting = Vec::new();
            for request in &queue.queue {
                if request.granted {
                    granted.push(request.txn.id());
                } else {
                    waiting.push(request.txn.id());
                }
            }
            for &waiter in &waiting {
                for &holder in &granted {
                    Self::add_edge(&mut inner.waits_for, waiter, holder);
                }
            }
        }

        let mut victims = Vec::new();
        while let Some(cycle) = Self::find_cycle(&inner.waits_for) {
            // youngest-wins: the largest id on the cycle dies
            let victim = cycle.iter().copied().max().unwrap_or_default();
            inner.waits_for.remove(&victim);
            for successors in inner.waits_for.values_mut() {
                successors.retain(|&t| t != victim);
            }
            victims.push(victim);
        }

        let mut rids_to_wake: HashSet<Rid> = HashSet::new();
        for &victim_id in &victims {
            info!("deadlock: aborting victim transaction {}", victim_id);
            let mut victim_txn = None;
            for queue in inner.table.values() {
                if let Some(request) =
                    queue.queue.iter().find(|r| r.txn.id() == victim_id)
                {
                    victim_txn = Some(request.txn.clone());
                    break;
                }
            }
            let Some(victim_txn) = victim_txn else { continue };
            victim_txn.set_state(TransactionState::Aborted);
            for rid in victim_txn.locked_rids() {
                if let Some(queue) = inner.table.get(&rid) {
                    if queue
                        .queue
                        .iter()
                        .any(|r| r.txn.id() == victim_id && !r.granted)
                    {
                        rids_to_wake.insert(rid);
                    }
                }
            }
        }

        for rid in rids_to_wake {
            if let Some(queue) = inner.table.get(&rid) {
                queue.cv.notify_all();
            }
        }
    }

    /// Current waits-for edges, for inspection and tests.
    pub fn get_edge_list(&self) -> Vec<(TxnId, TxnId)> {
        let inner = self.inner.lock();
        let mut edges = Vec::new();
        for (&from, successors) in &inner.waits_for {
            for &to in successors {
                edges.push((from, to));
            }
        }
        edges
    }

    fn add_edge(waits_for: &mut BTreeMap<TxnId, Vec<TxnId>>, from: TxnId, to: TxnId) {
        let successors = waits_for.entry(from).or_default();
        if let Err(position) = successors.binary_search(&to) {
            successors.insert(position, to);
        }
    }

    /// Deterministic cycle search: depth-first over transaction ids in
    /// ascending order, successors explored in ascending order. Returns
    /// the nodes of the first cycle found.
    fn find_cycle(waits_for: &BTreeMap<TxnId, Vec<TxnId>>) -> Option<Vec<TxnId>> {
        let mut visited = HashSet::new();
        for &start in waits_for.keys() {
            if visited.contains(&start) {
                continue;
            }
            let mut stack = Vec::new();
            let mut on_stack = HashSet::new();
            if let Some(entry) =
                Self::dfs(start, waits_for, &mut visited, &mut stack, &mut on_stack)
            {
                let position = stack.iter().position(|&t| t == entry)?;
                return Some(stack[position..].to_vec());
            }
        }
        None
    }

    fn dfs(
        node: TxnId,
        waits_for: &BTreeMap<TxnId, Vec<TxnId>>,
        visited: &mut HashSet<TxnId>,
        stack: &mut Vec<TxnId>,
        on_stack: &mut HashSet<TxnId>,
    ) -> Option<TxnId> {
        visited.insert(node);
        stack.push(node);
        on_stack.insert(node);

        if let Some(successors) = waits_for.get(&node) {
            for &next in successors {
                if on_stack.contains(&next) {
                    return Some(next);
                }
                if visited.contains(&next) {
                    continue;
                }
                if let Some(entry) = Self::dfs(next, waits_for, visited, stack, on_stack) {
                    return Some(entry);
                }
            }
        }

        on_stack.remove(&node);
        stack.pop();
        None
    }
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for LockManager {
    fn drop(&mut self) {
        self.enable_cycle_detection.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(edges: &[(TxnId, TxnId)]) -> BTreeMap<TxnId, Vec<TxnId>> {
        let mut waits_for = BTreeMap::new();
        for &(from, to) in edges {
            LockManager::add_edge(&mut waits_for, from, to);
        }
        waits_for
    }

    #[test]
    fn test_no_cycle_in_dag() {
        let waits_for = graph(&[(1, 2), (2, 3), (1, 3)]);
        assert!(LockManager::find_cycle(&waits_for).is_none());
    }

    #[test]
    fn test_two_cycle() {
        let waits_for = graph(&[(1, 2), (2, 1)]);
        let cycle = LockManager::find_cycle(&waits_for).unwrap();
        assert_eq!(cycle.len(), 2);
        assert_eq!(*cycle.iter().max().unwrap(), 2);
    }

    #[test]
    fn test_cycle_among_larger_graph() {
        let waits_for = graph(&[(0, 1), (1, 2), (2, 3), (3, 1), (4, 0)]);
        let cycle = LockManager::find_cycle(&waits_for).unwrap();
        let members: HashSet<TxnId> = cycle.into_iter().collect();
        assert_eq!(members, HashSet::from([1, 2, 3]));
    }

    #[test]
    fn test_edge_dedup() {
        let waits_for = graph(&[(1, 2), (1, 2), (1, 3)]);
        assert_eq!(waits_for.get(&1).unwrap(), &vec![2, 3]);
    }
}
