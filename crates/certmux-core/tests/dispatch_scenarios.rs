//! End-to-end dispatcher scenarios against an in-memory transport

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use certmux_core::{
    BoxError, CacheConfig, Call, CallScope, DispatchError, Dispatcher, Release, Reply, Transport,
};
use http::{Request, Response};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

#[derive(Debug, thiserror::Error)]
enum StubError {
    #[error("call cancelled")]
    Cancelled,
}

struct Tenant;

struct StubTransport {
    identity: String,
    released: AtomicUsize,
    release_log: Arc<Mutex<Vec<String>>>,
}

impl Release for StubTransport {
    fn release(&self) -> Result<(), BoxError> {
        self.released.fetch_add(1, Ordering::SeqCst);
        self.release_log.lock().push(self.identity.clone());
        Ok(())
    }
}

#[async_trait]
impl Transport<Tenant> for StubTransport {
    type Error = StubError;

    fn send(&self, _call: Call<Tenant>) -> Result<Reply, StubError> {
        Ok(Response::new(Bytes::from(self.identity.clone())))
    }

    async fn send_async(&self, call: Call<Tenant>) -> Result<Reply, StubError> {
        tokio::select! {
            _ = call.cancel.cancelled() => Err(StubError::Cancelled),
            _ = tokio::time::sleep(Duration::from_millis(10)) => {
                Ok(Response::new(Bytes::from(self.identity.clone())))
            }
        }
    }
}

struct Harness {
    dispatcher: Arc<Dispatcher<StubTransport, Tenant>>,
    created: Arc<AtomicUsize>,
    release_log: Arc<Mutex<Vec<String>>>,
}

fn harness(capacity: usize, ttl: Duration) -> Harness {
    let created = Arc::new(AtomicUsize::new(0));
    let release_log = Arc::new(Mutex::new(Vec::new()));
    let config = CacheConfig { capacity, ttl };

    let counter = created.clone();
    let log = release_log.clone();
    let dispatcher = Dispatcher::new(&config, move |identity: &str, _tenant: &Tenant| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(StubTransport {
            identity: identity.to_string(),
            released: AtomicUsize::new(0),
            release_log: log.clone(),
        })
    })
    .unwrap();

    Harness {
        dispatcher: Arc::new(dispatcher),
        created,
        release_log,
    }
}

fn call_as(identity: &str) -> Call<Tenant> {
    Call::new(
        Request::get("/ClientCert").body(Bytes::new()).unwrap(),
        CallScope::new(identity, Arc::new(Tenant)),
    )
}

#[tokio::test]
async fn eleven_identities_evict_exactly_the_first() {
    let h = harness(10, Duration::from_secs(120));

    let first = h.dispatcher.resolve(&call_as("user-0")).unwrap();
    for i in 1..11 {
        let reply = h
            .dispatcher
            .send_async(call_as(&format!("user-{}", i)))
            .await
            .unwrap();
        assert_eq!(reply.body(), &Bytes::from(format!("user-{}", i)));
    }

    let stats = h.dispatcher.stats();
    assert_eq!(stats.entries, 10);
    assert_eq!(stats.evictions, 1);
    assert_eq!(h.created.load(Ordering::SeqCst), 11);
    assert_eq!(first.released.load(Ordering::SeqCst), 1);
    assert_eq!(*h.release_log.lock(), vec!["user-0".to_string()]);

    let live: Vec<String> = h
        .dispatcher
        .cache()
        .snapshot()
        .into_iter()
        .map(|entry| entry.key)
        .collect();
    assert!(!live.contains(&"user-0".to_string()));
}

#[tokio::test(start_paused = true)]
async fn expired_identity_gets_a_fresh_transport() {
    let ttl = Duration::from_secs(120);
    let h = harness(10, ttl);

    let original = h.dispatcher.resolve(&call_as("alice")).unwrap();

    tokio::time::advance(ttl + Duration::from_secs(1)).await;
    h.dispatcher.resolve(&call_as("bob")).unwrap();
    assert_eq!(original.released.load(Ordering::SeqCst), 1);

    tokio::time::advance(ttl).await;
    let renewed = h.dispatcher.resolve(&call_as("alice")).unwrap();
    assert!(!Arc::ptr_eq(&original, &renewed));
    assert_eq!(h.created.load(Ordering::SeqCst), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_first_calls_share_one_transport() {
    let h = harness(10, Duration::from_secs(120));

    let tasks: Vec<_> = (0..32)
        .map(|_| {
            let dispatcher = h.dispatcher.clone();
            tokio::spawn(async move { dispatcher.resolve(&call_as("shared")).unwrap() })
        })
        .collect();

    let mut resolved = Vec::new();
    for task in tasks {
        resolved.push(task.await.unwrap());
    }

    assert_eq!(h.created.load(Ordering::SeqCst), 1);
    assert!(resolved.iter().all(|t| Arc::ptr_eq(t, &resolved[0])));
}

#[tokio::test]
async fn cancellation_reaches_the_inner_transport() {
    let h = harness(10, Duration::from_secs(120));
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = h
        .dispatcher
        .send_async(call_as("alice").with_cancellation(cancel))
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::Transport(StubError::Cancelled)));
}

#[tokio::test]
async fn incomplete_calls_create_nothing() {
    let h = harness(10, Duration::from_secs(120));

    let anonymous = Call::new(
        Request::get("/").body(Bytes::new()).unwrap(),
        CallScope::<Tenant>::empty(),
    );
    let err = h.dispatcher.send_async(anonymous).await.unwrap_err();
    assert!(err.is_precondition());
    assert_eq!(h.created.load(Ordering::SeqCst), 0);
}

#[test]
fn dropping_the_dispatcher_releases_every_transport() {
    let h = harness(10, Duration::from_secs(120));
    let alice = h.dispatcher.resolve(&call_as("alice")).unwrap();
    let bob = h.dispatcher.resolve(&call_as("bob")).unwrap();

    drop(h.dispatcher);
    assert_eq!(alice.released.load(Ordering::SeqCst), 1);
    assert_eq!(bob.released.load(Ordering::SeqCst), 1);
}
