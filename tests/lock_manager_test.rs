use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use ferrodb::transaction::{
    AbortReason, IsolationLevel, LockManager, TransactionManager, TransactionState,
};
use ferrodb::Rid;

mod common;
use common::init_logging;

fn setup() -> (Arc<TransactionManager>, Arc<LockManager>) {
    init_logging();
    (
        Arc::new(TransactionManager::new()),
        Arc::new(LockManager::new()),
    )
}

#[test]
fn test_shared_then_shared_grants_immediately() -> Result<()> {
    let (tm, lm) = setup();
    let r = Rid::new(0, 0);

    let t1 = tm.begin(IsolationLevel::RepeatableRead);
    let t2 = tm.begin(IsolationLevel::RepeatableRead);

    assert!(lm.lock_shared(&t1, r)?);
    assert!(lm.lock_shared(&t2, r)?);
    // re-requesting a held lock is a no-op success
    assert!(lm.lock_shared(&t1, r)?);

    tm.commit(&t1, &lm);
    tm.commit(&t2, &lm);
    Ok(())
}

#[test]
fn test_lock_on_shrinking_aborts() {
    let (tm, lm) = setup();
    let a = Rid::new(0, 1);
    let b = Rid::new(0, 2);

    let txn = tm.begin(IsolationLevel::RepeatableRead);
    lm.lock_shared(&txn, a).unwrap();
    assert!(lm.unlock(&txn, a));
    assert_eq!(txn.state(), TransactionState::Shrinking);

    let err = lm.lock_shared(&txn, b).unwrap_err();
    assert_eq!(err.abort_reason(), AbortReason::LockOnShrinking);
    assert_eq!(txn.state(), TransactionState::Aborted);
    tm.abort(&txn, &lm);
}

#[test]
fn test_shared_lock_under_read_uncommitted_aborts() {
    let (tm, lm) = setup();
    let txn = tm.begin(IsolationLevel::ReadUncommitted);

    let err = lm.lock_shared(&txn, Rid::new(0, 3)).unwrap_err();
    assert_eq!(err.abort_reason(), AbortReason::LockSharedOnReadUncommitted);
    assert_eq!(txn.state(), TransactionState::Aborted);
    tm.abort(&txn, &lm);
}

#[test]
fn test_read_committed_shared_release_keeps_growing() -> Result<()> {
    let (tm, lm) = setup();
    let a = Rid::new(0, 4);
    let b = Rid::new(0, 5);

    let txn = tm.begin(IsolationLevel::ReadCommitted);
    lm.lock_shared(&txn, a)?;
    assert!(lm.unlock(&txn, a));
    assert_eq!(txn.state(), TransactionState::Growing);

    // still free to acquire under READ COMMITTED
    assert!(lm.lock_shared(&txn, b)?);

    // an exclusive release does end the growing phase
    lm.lock_exclusive(&txn, a)?;
    assert!(lm.unlock(&txn, a));
    assert_eq!(txn.state(), TransactionState::Shrinking);

    tm.commit(&txn, &lm);
    Ok(())
}

#[test]
fn test_exclusive_waits_for_shared_release() -> Result<()> {
    let (tm, lm) = setup();
    let r = Rid::new(1, 0);

    let t1 = tm.begin(IsolationLevel::RepeatableRead);
    let t2 = tm.begin(IsolationLevel::RepeatableRead);
    lm.lock_shared(&t1, r)?;

    let (sender, receiver) = std::sync::mpsc::channel();
    let waiter = {
        let lm = lm.clone();
        let tm = tm.clone();
        let t2 = t2.clone();
        std::thread::spawn(move || {
            let granted = lm.lock_exclusive(&t2, r).unwrap();
            sender.send(()).unwrap();
            tm.commit(&t2, &lm);
            granted
        })
    };

    // the writer must still be waiting behind the granted reader
    assert!(receiver
        .recv_timeout(Duration::from_millis(100))
        .is_err());

    assert!(lm.unlock(&t1, r));
    assert!(waiter.join().unwrap());
    tm.commit(&t1, &lm);
    Ok(())
}

#[test]
fn test_upgrade_conflict_aborts_exactly_one() -> Result<()> {
    let (tm, lm) = setup();
    let r = Rid::new(2, 0);

    let t1 = tm.begin(IsolationLevel::RepeatableRead);
    let t2 = tm.begin(IsolationLevel::RepeatableRead);
    lm.lock_shared(&t1, r)?;
    lm.lock_shared(&t2, r)?;

    let mut handles = Vec::new();
    for txn in [t1.clone(), t2.clone()] {
        let lm = lm.clone();
        let tm = tm.clone();
        handles.push(std::thread::spawn(move || {
            match lm.lock_upgrade(&txn, r) {
                Ok(granted) => {
                    assert!(granted);
                    assert!(txn.holds_exclusive(r));
                    tm.commit(&txn, &lm);
                    Ok(())
                }
                Err(err) => {
                    // the loser releases its shared lock so the winner
                    // can drain the queue
                    tm.abort(&txn, &lm);
                    Err(err.abort_reason())
                }
            }
        }));
    }

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let winners = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1);
    let loser = results.iter().find(|r| r.is_err()).unwrap();
    assert_eq!(loser, &Err(AbortReason::UpgradeConflict));
    Ok(())
}

#[test]
fn test_deadlock_detector_aborts_youngest() -> Result<()> {
    let (tm, lm) = setup();
    let r1 = Rid::new(3, 0);
    let r2 = Rid::new(3, 1);

    lm.enable_cycle_detection(Duration::from_millis(20));

    let t1 = tm.begin(IsolationLevel::RepeatableRead);
    let t2 = tm.begin(IsolationLevel::RepeatableRead);
    assert!(t1.id() < t2.id());

    lm.lock_exclusive(&t1, r1)?;
    lm.lock_exclusive(&t2, r2)?;

    let survivor = {
        let lm = lm.clone();
        let tm = tm.clone();
        let t1 = t1.clone();
        std::thread::spawn(move || {
            let result = lm.lock_exclusive(&t1, r2);
            tm.commit(&t1, &lm);
            result
        })
    };
    let victim = {
        let lm = lm.clone();
        let tm = tm.clone();
        let t2 = t2.clone();
        std::thread::spawn(move || {
            let result = lm.lock_exclusive(&t2, r1);
            if result.is_err() {
                tm.abort(&t2, &lm);
            }
            result
        })
    };

    // the younger transaction dies, the older one gets the lock
    let victim_result = victim.join().unwrap();
    assert_eq!(
        victim_result.unwrap_err().abort_reason(),
        AbortReason::Deadlock
    );
    assert!(survivor.join().unwrap()?);

    lm.disable_cycle_detection();
    Ok(())
}

#[test]
fn test_edge_list_reflects_waiters() -> Result<()> {
    let (tm, lm) = setup();
    let r = Rid::new(4, 0);

    let t1 = tm.begin(IsolationLevel::RepeatableRead);
    let t2 = tm.begin(IsolationLevel::RepeatableRead);
    lm.lock_exclusive(&t1, r)?;

    let waiter = {
        let lm = lm.clone();
        let tm = tm.clone();
        let t2 = t2.clone();
        std::thread::spawn(move || {
            lm.lock_exclusive(&t2, r).unwrap();
            tm.commit(&t2, &lm);
        })
    };

    // let the waiter enqueue, then build the graph
    std::thread::sleep(Duration::from_millis(100));
    lm.run_cycle_detection();
    assert_eq!(lm.get_edge_list(), vec![(t2.id(), t1.id())]);

    tm.commit(&t1, &lm);
    waiter.join().unwrap();
    Ok(())
}
