//! Mutual exclusion over the in-memory lease store.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use hydra_lease::{
    Clock, LeaseStore, LockKey, ManualClock, MemoryLeaseStore, ResourceLockKind,
};
use proptest::prelude::*;

const LEASE: Duration = Duration::from_secs(30);

#[tokio::test]
async fn concurrent_candidates_yield_one_holder() {
    let store = Arc::new(MemoryLeaseStore::new());
    let lock = LockKey::default();

    let handles: Vec<_> = (0..16)
        .map(|i| {
            let store = store.clone();
            let lock = lock.clone();
            tokio::spawn(async move {
                store
                    .try_acquire_or_renew(&lock, &format!("replica-{i}"), LEASE)
                    .await
                    .unwrap()
            })
        })
        .collect();

    let mut winners = Vec::new();
    for handle in handles {
        let result = handle.await.unwrap();
        if result.acquired {
            winners.push(result.record.holder_identity);
        }
    }

    assert_eq!(winners.len(), 1, "winners: {winners:?}");
    let stored = store.get(&lock).await.unwrap().unwrap();
    assert_eq!(stored.holder_identity, winners[0]);
}

#[derive(Debug, Clone)]
enum Op {
    Attempt(usize),
    Advance(u64),
    Release(usize),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (0usize..3).prop_map(Op::Attempt),
        2 => (1u64..40).prop_map(Op::Advance),
        1 => (0usize..3).prop_map(Op::Release),
    ]
}

proptest! {
    #[test]
    fn no_two_holders_overlap(ops in prop::collection::vec(op(), 1..60)) {
        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        runtime.block_on(async {
            let clock = Arc::new(ManualClock::default());
            let store = MemoryLeaseStore::with_clock(clock.clone());
            let lock = LockKey::new(ResourceLockKind::EndpointsLeases, "ns", "lock");

            // (holder, instant the holder's grant lapses)
            let mut granted: Option<(String, DateTime<Utc>)> = None;

            for op in ops {
                match op {
                    Op::Attempt(i) => {
                        let identity = format!("replica-{i}");
                        let result = store.try_acquire_or_renew(&lock, &identity, LEASE).await.unwrap();
                        if result.acquired {
                            if let Some((holder, lapses)) = &granted {
                                if holder != &identity {
                                    prop_assert!(clock.now() >= *lapses, "{identity} acquired while {holder} was valid");
                                }
                            }
                            granted = Some((identity, result.record.expires_at()));
                        }
                    }
                    Op::Advance(secs) => clock.advance(Duration::from_secs(secs)),
                    Op::Release(i) => {
                        let identity = format!("replica-{i}");
                        if store.release(&lock, &identity).await.unwrap() {
                            // The holder gave the claim up voluntarily.
                            granted = Some((identity, clock.now()));
                        }
                    }
                }
            }
            Ok(())
        })?;
    }
}
