//! Election behaviour over the in-memory lease store, on paused time.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use hydra_election::{
    ElectionConfig, ElectionError, ElectionHandle, ElectionState, ElectionTiming, LeaderCallbacks,
    LeaderElector,
};
use hydra_lease::{
    Acquisition, LeaseError, LeaseRecord, LeaseStore, LockKey, ManualClock, MemoryLeaseStore,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};

const TIMING: ElectionTiming = ElectionTiming {
    lease_duration: Duration::from_secs(30),
    renew_deadline: Duration::from_secs(15),
    retry_period: Duration::from_secs(5),
};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Event {
    Started,
    Stopped,
    NewLeader(String),
}

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<Event>>,
}

impl Recorder {
    fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    fn transitions(&self) -> Vec<Event> {
        self.events()
            .into_iter()
            .filter(|e| !matches!(e, Event::NewLeader(_)))
            .collect()
    }
}

impl LeaderCallbacks for Recorder {
    fn on_started_leading(&self) {
        self.events.lock().unwrap().push(Event::Started);
    }

    fn on_stopped_leading(&self) {
        self.events.lock().unwrap().push(Event::Stopped);
    }

    fn on_new_leader(&self, identity: &str) {
        self.events
            .lock()
            .unwrap()
            .push(Event::NewLeader(identity.to_string()));
    }
}

/// Wraps a store and injects failures into later calls.
struct FaultyStore {
    inner: MemoryLeaseStore,
    calls: AtomicUsize,
    stall: AtomicBool,
    fail_call: Option<(usize, fn() -> LeaseError)>,
}

impl FaultyStore {
    fn new(inner: MemoryLeaseStore) -> Self {
        Self {
            inner,
            calls: AtomicUsize::new(0),
            stall: AtomicBool::new(false),
            fail_call: None,
        }
    }

    fn failing_on(mut self, call: usize, error: fn() -> LeaseError) -> Self {
        self.fail_call = Some((call, error));
        self
    }
}

#[async_trait]
impl LeaseStore for FaultyStore {
    async fn try_acquire_or_renew(
        &self,
        lock: &LockKey,
        identity: &str,
        duration: Duration,
    ) -> Result<Acquisition, LeaseError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.stall.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if let Some((n, error)) = self.fail_call {
            if call == n {
                return Err(error());
            }
        }
        self.inner.try_acquire_or_renew(lock, identity, duration).await
    }

    async fn get(&self, lock: &LockKey) -> Result<Option<LeaseRecord>, LeaseError> {
        self.inner.get(lock).await
    }

    async fn release(&self, lock: &LockKey, identity: &str) -> Result<bool, LeaseError> {
        self.inner.release(lock, identity).await
    }
}

struct Replica {
    handle: ElectionHandle,
    recorder: Arc<Recorder>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<Result<(), ElectionError>>,
}

fn spawn_replica(store: Arc<dyn LeaseStore>, identity: &str, release_on_cancel: bool) -> Replica {
    let recorder = Arc::new(Recorder::default());
    let mut config = ElectionConfig::new(identity, LockKey::default()).with_timing(TIMING);
    config.release_on_cancel = release_on_cancel;

    let elector = LeaderElector::new(store, config, recorder.clone()).unwrap();
    let handle = elector.handle();
    let (shutdown, shutdown_rx) = watch::channel(false);
    let task = tokio::spawn(elector.run(shutdown_rx));

    Replica {
        handle,
        recorder,
        shutdown,
        task,
    }
}

async fn wait_until(handle: &mut ElectionHandle, pred: impl Fn(&ElectionState) -> bool) {
    while !pred(&handle.state()) {
        assert!(handle.changed().await, "elector exited early");
    }
}

#[tokio::test(start_paused = true)]
async fn single_replica_becomes_leader() {
    let store = Arc::new(MemoryLeaseStore::new());
    let mut replica = spawn_replica(store.clone(), "rep-a", true);

    wait_until(&mut replica.handle, |s| matches!(s, ElectionState::Leader { .. })).await;
    assert!(replica.handle.is_leader());
    assert_eq!(replica.handle.leader().as_deref(), Some("rep-a"));

    // Several renewal cycles later it still leads, with one start event.
    sleep(TIMING.lease_duration * 3).await;
    assert!(replica.handle.is_leader());
    assert_eq!(
        replica.recorder.events(),
        vec![Event::NewLeader("rep-a".into()), Event::Started]
    );

    replica.shutdown.send(true).unwrap();
    replica.task.await.unwrap().unwrap();
    assert!(!replica.handle.is_leader());
    assert_eq!(replica.recorder.transitions(), vec![Event::Started, Event::Stopped]);

    let record = store.get(&LockKey::default()).await.unwrap().unwrap();
    assert_eq!(record.lease_duration_ms, 0, "lease should be released");
}

#[tokio::test(start_paused = true)]
async fn second_replica_follows() {
    let store: Arc<dyn LeaseStore> = Arc::new(MemoryLeaseStore::new());
    let mut a = spawn_replica(store.clone(), "rep-a", true);
    wait_until(&mut a.handle, |s| matches!(s, ElectionState::Leader { .. })).await;

    let mut b = spawn_replica(store.clone(), "rep-b", true);
    wait_until(&mut b.handle, |s| matches!(s, ElectionState::Follower { .. })).await;

    assert!(a.handle.is_leader());
    assert!(!b.handle.is_leader());
    assert_eq!(b.handle.leader().as_deref(), Some("rep-a"));
    assert_eq!(b.recorder.events(), vec![Event::NewLeader("rep-a".into())]);

    // A steps down cleanly; B takes over without waiting for expiry.
    a.shutdown.send(true).unwrap();
    a.task.await.unwrap().unwrap();
    wait_until(&mut b.handle, |s| matches!(s, ElectionState::Leader { .. })).await;
    assert!(b.handle.is_leader());
    assert_eq!(
        b.recorder.events(),
        vec![
            Event::NewLeader("rep-a".into()),
            Event::NewLeader("rep-b".into()),
            Event::Started
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn takeover_waits_for_expiry() {
    let clock = Arc::new(ManualClock::default());
    let store: Arc<dyn LeaseStore> = Arc::new(MemoryLeaseStore::with_clock(clock.clone()));

    let mut a = spawn_replica(store.clone(), "rep-a", false);
    wait_until(&mut a.handle, |s| matches!(s, ElectionState::Leader { .. })).await;
    a.shutdown.send(true).unwrap();
    a.task.await.unwrap().unwrap();

    let mut b = spawn_replica(store.clone(), "rep-b", false);
    wait_until(&mut b.handle, |s| matches!(s, ElectionState::Follower { .. })).await;

    // The abandoned lease is still valid on the store clock.
    sleep(TIMING.retry_period * 2).await;
    assert!(!b.handle.is_leader());

    clock.advance(TIMING.lease_duration);
    wait_until(&mut b.handle, |s| matches!(s, ElectionState::Leader { .. })).await;
    let record = store.get(&LockKey::default()).await.unwrap().unwrap();
    assert_eq!(record.holder_identity, "rep-b");
    assert_eq!(record.leader_transitions, 1);
}

#[tokio::test(start_paused = true)]
async fn stalled_renewal_is_not_trusted_past_deadline() {
    let store = Arc::new(FaultyStore::new(MemoryLeaseStore::new()));
    let mut replica = spawn_replica(store.clone(), "rep-a", false);
    wait_until(&mut replica.handle, |s| matches!(s, ElectionState::Leader { .. })).await;

    let ElectionState::Leader { renew_by, .. } = replica.handle.state() else {
        unreachable!()
    };
    let acquired_at = Instant::now();
    store.stall.store(true, Ordering::SeqCst);

    // Leadership is never claimed at or past the deadline, whatever the
    // in-flight renewal eventually does.
    assert!(renew_by <= acquired_at + TIMING.renew_deadline);
    sleep(TIMING.renew_deadline).await;
    assert!(!replica.handle.is_leader());

    sleep(Duration::from_secs(1)).await;
    assert_eq!(replica.recorder.transitions(), vec![Event::Started, Event::Stopped]);
    assert!(!matches!(replica.handle.state(), ElectionState::Leader { .. }));
}

#[tokio::test(start_paused = true)]
async fn transient_renewal_error_steps_down_then_reacquires() {
    // Call 0 acquires, call 1 is the first renewal.
    let store = Arc::new(
        FaultyStore::new(MemoryLeaseStore::new())
            .failing_on(1, || LeaseError::StoreUnavailable("connection reset".into())),
    );
    let replica = spawn_replica(store.clone(), "rep-a", false);

    sleep(TIMING.retry_period * 4).await;
    assert!(replica.handle.is_leader());
    assert_eq!(
        replica.recorder.transitions(),
        vec![Event::Started, Event::Stopped, Event::Started]
    );
    assert_eq!(replica.handle.leader_term(), Some(2));
}

#[tokio::test(start_paused = true)]
async fn failed_attempt_forgets_the_previous_holder() {
    // Call 0 observes rep-a, call 1 fails.
    let store = Arc::new(
        FaultyStore::new(MemoryLeaseStore::new())
            .failing_on(1, || LeaseError::StoreUnavailable("connection reset".into())),
    );
    store
        .inner
        .try_acquire_or_renew(&LockKey::default(), "rep-a", Duration::from_secs(3600))
        .await
        .unwrap();
    let mut b = spawn_replica(store.clone(), "rep-b", false);

    wait_until(&mut b.handle, |s| matches!(s, ElectionState::Follower { .. })).await;
    assert_eq!(b.handle.leader().as_deref(), Some("rep-a"));

    wait_until(&mut b.handle, |s| *s == ElectionState::Candidate).await;
    assert_eq!(b.handle.leader(), None);

    // The next successful read restores the holder.
    wait_until(&mut b.handle, |s| matches!(s, ElectionState::Follower { .. })).await;
    assert_eq!(b.handle.leader().as_deref(), Some("rep-a"));
}

#[tokio::test(start_paused = true)]
async fn timed_out_attempt_forgets_the_previous_holder() {
    let store = Arc::new(FaultyStore::new(MemoryLeaseStore::new()));
    store
        .inner
        .try_acquire_or_renew(&LockKey::default(), "rep-a", Duration::from_secs(3600))
        .await
        .unwrap();
    let mut b = spawn_replica(store.clone(), "rep-b", false);
    wait_until(&mut b.handle, |s| matches!(s, ElectionState::Follower { .. })).await;

    store.stall.store(true, Ordering::SeqCst);
    wait_until(&mut b.handle, |s| *s == ElectionState::Candidate).await;
    assert_eq!(b.handle.leader(), None);
    assert!(!b.handle.is_leader());
}

#[tokio::test(start_paused = true)]
async fn corrupt_record_aborts_after_stepping_down() {
    let store = Arc::new(FaultyStore::new(MemoryLeaseStore::new()).failing_on(2, || {
        LeaseError::CorruptRecord {
            key: "endpoints/default/open-hydra-api-leader-lock".into(),
            reason: "expected value".into(),
        }
    }));
    let replica = spawn_replica(store.clone(), "rep-a", false);

    let result = replica.task.await.unwrap();
    match result {
        Err(ElectionError::Store(e)) => assert!(e.is_fatal()),
        other => panic!("expected fatal store error, got {other:?}"),
    }
    assert!(!replica.handle.is_leader());
    assert_eq!(replica.recorder.transitions(), vec![Event::Started, Event::Stopped]);
}

#[tokio::test]
async fn invalid_timing_is_rejected() {
    let config = ElectionConfig::new("rep-a", LockKey::default()).with_timing(ElectionTiming {
        lease_duration: Duration::from_secs(10),
        renew_deadline: Duration::from_secs(15),
        retry_period: Duration::from_secs(5),
    });
    let store: Arc<dyn LeaseStore> = Arc::new(MemoryLeaseStore::new());
    let result = LeaderElector::new(store, config, Arc::new(Recorder::default()));
    assert!(matches!(result, Err(ElectionError::InvalidConfig(_))));
}
