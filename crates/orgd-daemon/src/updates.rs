//! Update fan-out: the registry of live streaming subscribers and the
//! per-connection reactor that feeds each subscriber's transport channel.
//!
//! Ownership: the streaming handler owns its reactor through a
//! [`SubscriptionGuard`]; the registry only holds weak handles, so a
//! subscription never outlives its connection. Dropping the guard is the
//! "rpc done" event.
//!
//! Locking: the registry mutex is held only to mutate or snapshot the handle
//! map; delivery happens on the snapshot, outside the lock. Each reactor has
//! its own mutex over `state` + `queue` + sender, and no I/O happens under
//! either lock.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use orgd_schemas::Update;

/// Capability a registry member offers: an identity and a way to hand it a
/// committed update. Anything implementing this can subscribe.
pub trait UpdateSink: Send + Sync {
    fn id(&self) -> Uuid;
    fn publish(&self, update: Arc<Update>);
    /// Ask the sink to finish its stream; used when the server drains.
    fn close(&self);
}

#[derive(Default)]
pub struct UpdateRegistry {
    sinks: Mutex<HashMap<Uuid, Weak<dyn UpdateSink>>>,
}

impl UpdateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, Weak<dyn UpdateSink>>> {
        self.sinks.lock().expect("registry mutex poisoned")
    }

    pub fn add(&self, sink: Arc<dyn UpdateSink>) {
        debug!("adding subscriber {}", sink.id());
        self.lock().insert(sink.id(), Arc::downgrade(&sink));
    }

    pub fn remove(&self, id: Uuid) {
        debug!("removing subscriber {id}");
        self.lock().remove(&id);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Deliver `update` to every live subscriber.
    ///
    /// The handle set is snapshotted first so no subscriber lock is ever
    /// taken under the registry lock; a handle that died between snapshot
    /// and delivery is skipped.
    pub fn publish(&self, update: Update) {
        let update = Arc::new(update);
        let snapshot: Vec<(Uuid, Weak<dyn UpdateSink>)> = self
            .lock()
            .iter()
            .map(|(id, weak)| (*id, weak.clone()))
            .collect();

        debug!(
            "publishing {} update to {} subscribers",
            update.event_name(),
            snapshot.len()
        );

        for (id, weak) in snapshot {
            match weak.upgrade() {
                Some(sink) => sink.publish(Arc::clone(&update)),
                None => warn!("subscriber {id} disappeared before delivery"),
            }
        }
    }

    /// Close every live subscription and forget the handles. Called after
    /// the listener has stopped so no stream outlives the server.
    pub fn drain(&self) {
        let drained: Vec<Weak<dyn UpdateSink>> =
            self.lock().drain().map(|(_, weak)| weak).collect();
        debug!("draining {} subscribers", drained.len());
        for weak in drained {
            if let Some(sink) = weak.upgrade() {
                sink.close();
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SubscriptionState {
    Ready,
    WaitingOnWrite,
    Done,
}

struct SubscriberInner {
    state: SubscriptionState,
    queue: VecDeque<Arc<Update>>,
    /// Transport side of the stream; capacity 1, so at most one message is
    /// buffered beyond the in-flight write. `None` once the stream finished.
    tx: Option<mpsc::Sender<Arc<Update>>>,
}

/// Per-connection reactor for the streaming updates channel.
///
/// Serializes writes: the queue head corresponds to the in-flight write and
/// is popped on completion, not on start, so a failed write leaves the
/// message available for a future retry policy. The queue itself is
/// unbounded; slow consumers are the publisher's problem.
pub struct Subscriber {
    id: Uuid,
    me: Weak<Subscriber>,
    registry: Weak<UpdateRegistry>,
    inner: Mutex<SubscriberInner>,
}

impl Subscriber {
    /// Create a reactor, register it, and hand back the transport receiver
    /// the streaming response will consume. The returned `Arc` is the only
    /// strong reference; wrap it in a [`SubscriptionGuard`] tied to the
    /// response so the reactor unregisters when the client goes away.
    pub fn attach(registry: &Arc<UpdateRegistry>) -> (Arc<Self>, mpsc::Receiver<Arc<Update>>) {
        let (tx, rx) = mpsc::channel(1);
        let sub = Arc::new_cyclic(|me| Subscriber {
            id: Uuid::new_v4(),
            me: me.clone(),
            registry: Arc::downgrade(registry),
            inner: Mutex::new(SubscriberInner {
                state: SubscriptionState::Ready,
                queue: VecDeque::new(),
                tx: Some(tx),
            }),
        });
        registry.add(sub.clone());
        (sub, rx)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    fn lock(&self) -> MutexGuard<'_, SubscriberInner> {
        self.inner.lock().expect("subscription mutex poisoned")
    }

    /// Transport write completed. On success, pop the written head and start
    /// the next write if one is queued; on failure, finish the stream and
    /// unregister.
    fn write_done(&self, ok: bool) {
        if !ok {
            warn!("stream write to subscriber {} failed; finishing the stream", self.id);
            {
                let mut inner = self.lock();
                inner.state = SubscriptionState::Done;
                inner.queue.clear();
                inner.tx = None;
            }
            if let Some(registry) = self.registry.upgrade() {
                registry.remove(self.id);
            }
            return;
        }

        let mut inner = self.lock();
        inner.queue.pop_front();
        if inner.state != SubscriptionState::WaitingOnWrite {
            // Closed while the write was in flight; nothing left to drive.
            return;
        }
        if inner.queue.is_empty() {
            inner.state = SubscriptionState::Ready;
        } else {
            self.start_write(&mut inner);
        }
    }

    /// Begin the transport write of the current queue head.
    fn start_write(&self, inner: &mut SubscriberInner) {
        let Some(tx) = inner.tx.clone() else { return };
        let Some(head) = inner.queue.front().cloned() else { return };
        let Some(me) = self.me.upgrade() else { return };
        tokio::spawn(async move {
            let ok = tx.send(head).await.is_ok();
            me.write_done(ok);
        });
    }

    #[cfg(test)]
    fn queue_depth(&self) -> usize {
        self.lock().queue.len()
    }
}

impl UpdateSink for Subscriber {
    fn id(&self) -> Uuid {
        self.id
    }

    fn publish(&self, update: Arc<Update>) {
        let mut inner = self.lock();
        match inner.state {
            SubscriptionState::Done => (), // stream finished; drop silently
            SubscriptionState::Ready => {
                inner.queue.push_back(update);
                if inner.queue.len() == 1 {
                    inner.state = SubscriptionState::WaitingOnWrite;
                    self.start_write(&mut inner);
                }
                // A longer queue in Ready means a write is already pending.
            }
            SubscriptionState::WaitingOnWrite => inner.queue.push_back(update),
        }
    }

    fn close(&self) {
        let mut inner = self.lock();
        inner.state = SubscriptionState::Done;
        inner.queue.clear();
        inner.tx = None;
    }
}

/// Owns a reactor for the lifetime of one streaming response. Dropping it is
/// the rpc-done event: the reactor finishes and leaves the registry.
pub struct SubscriptionGuard {
    sub: Arc<Subscriber>,
    registry: Arc<UpdateRegistry>,
}

impl SubscriptionGuard {
    pub fn new(sub: Arc<Subscriber>, registry: Arc<UpdateRegistry>) -> Self {
        Self { sub, registry }
    }

    pub fn id(&self) -> Uuid {
        self.sub.id()
    }
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        debug!("subscriber {} is going away", self.sub.id());
        self.registry.remove(self.sub.id());
        self.sub.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use orgd_schemas::{Date, Update};

    fn color_update(n: u32) -> Update {
        Update::DayColor {
            date: Date::new(2024, 0, n),
            user: Uuid::nil(),
            color: Some(format!("color-{n}")),
        }
    }

    async fn wait_until(mut cond: impl FnMut() -> bool) {
        for _ in 0..200 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached within 1s");
    }

    #[tokio::test]
    async fn updates_arrive_in_publish_order() {
        let registry = Arc::new(UpdateRegistry::new());
        let (_sub, mut rx) = Subscriber::attach(&registry);
        assert_eq!(registry.len(), 1);

        for n in 1..=5 {
            registry.publish(color_update(n));
        }

        for n in 1..=5 {
            let got = tokio::time::timeout(Duration::from_secs(1), rx.recv())
                .await
                .expect("delivery within 1s")
                .expect("stream open");
            assert_eq!(*got, color_update(n));
        }
    }

    #[tokio::test]
    async fn queue_drains_through_single_write_slot() {
        let registry = Arc::new(UpdateRegistry::new());
        let (sub, mut rx) = Subscriber::attach(&registry);

        for n in 1..=3 {
            registry.publish(color_update(n));
        }

        // Without a consumer only one message fits the transport channel;
        // the head of the in-flight write plus the rest stay queued.
        wait_until(|| sub.queue_depth() == 2).await;

        for n in 1..=3 {
            let got = rx.recv().await.expect("stream open");
            assert_eq!(*got, color_update(n));
        }

        // Everything flushed: reactor is idle again.
        wait_until(|| sub.queue_depth() == 0).await;
    }

    #[tokio::test]
    async fn dropped_receiver_finishes_and_unregisters() {
        let registry = Arc::new(UpdateRegistry::new());
        let (sub, rx) = Subscriber::attach(&registry);
        drop(rx);

        registry.publish(color_update(1));

        // The failed write must remove the subscription from the registry.
        wait_until(|| registry.is_empty()).await;

        // Later publishes are silently dropped.
        sub.publish(Arc::new(color_update(2)));
        assert_eq!(sub.queue_depth(), 0);
    }

    #[tokio::test]
    async fn guard_drop_unregisters() {
        let registry = Arc::new(UpdateRegistry::new());
        let (sub, _rx) = Subscriber::attach(&registry);
        let guard = SubscriptionGuard::new(sub, Arc::clone(&registry));
        assert_eq!(registry.len(), 1);

        drop(guard);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn drain_closes_live_subscriptions() {
        let registry = Arc::new(UpdateRegistry::new());
        let (sub, mut rx) = Subscriber::attach(&registry);

        registry.drain();
        assert!(registry.is_empty());

        // Closed reactor accepts no further traffic and the stream ends.
        sub.publish(Arc::new(color_update(1)));
        assert_eq!(sub.queue_depth(), 0);
        assert!(rx.recv().await.is_none());
    }

    struct RecordingSink {
        id: Uuid,
        got: Mutex<Vec<Arc<Update>>>,
    }

    impl UpdateSink for RecordingSink {
        fn id(&self) -> Uuid {
            self.id
        }

        fn publish(&self, update: Arc<Update>) {
            self.got.lock().unwrap().push(update);
        }

        fn close(&self) {}
    }

    #[tokio::test]
    async fn registry_delivers_once_per_sink_and_skips_dead_handles() {
        let registry = Arc::new(UpdateRegistry::new());

        let live: Arc<RecordingSink> = Arc::new(RecordingSink {
            id: Uuid::new_v4(),
            got: Mutex::new(Vec::new()),
        });
        registry.add(live.clone());

        let dead: Arc<RecordingSink> = Arc::new(RecordingSink {
            id: Uuid::new_v4(),
            got: Mutex::new(Vec::new()),
        });
        registry.add(dead.clone());
        drop(dead); // weak handle in the registry goes stale

        registry.publish(color_update(1));

        let got = live.got.lock().unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(*got[0], color_update(1));
    }

    #[tokio::test]
    async fn add_is_idempotent_per_id() {
        let registry = Arc::new(UpdateRegistry::new());
        let sink: Arc<RecordingSink> = Arc::new(RecordingSink {
            id: Uuid::new_v4(),
            got: Mutex::new(Vec::new()),
        });
        registry.add(sink.clone());
        registry.add(sink.clone());
        assert_eq!(registry.len(), 1);

        registry.publish(color_update(1));
        assert_eq!(sink.got.lock().unwrap().len(), 1);

        registry.remove(sink.id);
        registry.remove(sink.id); // no-op when absent
        assert!(registry.is_empty());
    }
}
