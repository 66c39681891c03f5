//! Multi-subscriber stream that carries any number of values followed by at most one
//! terminal failure.
//!
//! Delivery is synchronous: [EventBroadcaster::publish] and [EventBroadcaster::fail] call
//! every observer before returning. The subscriber list is locked only to take a snapshot, so
//! observers are free to subscribe or unsubscribe (themselves or others) while being called.
//! Publishing into or failing the stream that is currently delivering to you is queued and
//! delivered once the current delivery finishes, so every observer sees the same sequence.

use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError, Weak,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, ThreadId},
};

use log::debug;
use tokio::sync::mpsc;
use uuid::Uuid;

pub type SubscriptionId = Uuid;

/// Something that wants to hear about a stream
pub trait StreamObserver<T, E>: Send + Sync {
    /// A new value was published
    fn on_value(&self, value: &T);
    /// The stream closed with `error`, this is the last call the observer will get
    fn on_terminated(&self, error: &E);
}

impl<T, E, O: StreamObserver<T, E> + ?Sized> StreamObserver<T, E> for Arc<O> {
    fn on_value(&self, value: &T) {
        (**self).on_value(value)
    }

    fn on_terminated(&self, error: &E) {
        (**self).on_terminated(error)
    }
}

struct FnObserver<V, F> {
    on_value: V,
    on_terminated: F,
}

impl<T, E, V, F> StreamObserver<T, E> for FnObserver<V, F>
where
    V: Fn(&T) + Send + Sync,
    F: Fn(&E) + Send + Sync,
{
    fn on_value(&self, value: &T) {
        (self.on_value)(value)
    }

    fn on_terminated(&self, error: &E) {
        (self.on_terminated)(error)
    }
}

#[derive(Debug, Clone, PartialEq)]
/// Owned form of a delivery, used by the channel adapter
pub enum StreamEvent<T, E> {
    Value(T),
    Terminated(E),
}

struct ChannelObserver<T, E>(mpsc::UnboundedSender<StreamEvent<T, E>>);

impl<T: Clone + Send, E: Clone + Send> StreamObserver<T, E> for ChannelObserver<T, E> {
    fn on_value(&self, value: &T) {
        // Receiver being gone just means nobody is listening anymore
        self.0.send(StreamEvent::Value(value.clone())).ok();
    }

    fn on_terminated(&self, error: &E) {
        self.0.send(StreamEvent::Terminated(error.clone())).ok();
    }
}

struct Registered<T, E> {
    id: SubscriptionId,
    active: AtomicBool,
    observer: Box<dyn StreamObserver<T, E>>,
}

impl<T, E> Registered<T, E> {
    fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
    }
}

enum Pending<T, E> {
    Value(T),
    Terminated(E),
}

struct StreamState<T, E> {
    /// In subscription order, the [Subscription] owns the other end
    subscribers: Vec<Weak<Registered<T, E>>>,
    terminal: Option<E>,
    delivering: Option<ThreadId>,
    /// Raised by observers on the delivering thread, run after the current delivery
    queued: VecDeque<Pending<T, E>>,
}

struct Shared<T, E> {
    name: &'static str,
    state: Mutex<StreamState<T, E>>,
    /// Held for the whole of a publish or fail so deliveries never interleave
    delivery: Mutex<()>,
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // A panicking observer never leaves the guarded data half-updated
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct DeliveryGuard<'a, T, E> {
    shared: &'a Shared<T, E>,
    _lock: MutexGuard<'a, ()>,
}

impl<T, E> Drop for DeliveryGuard<'_, T, E> {
    fn drop(&mut self) {
        let mut state = lock(&self.shared.state);
        state.delivering = None;
        // Only non-empty if an observer panicked
        state.queued.clear();
    }
}

impl<T, E> Shared<T, E> {
    /// Take the delivery lock, or `None` if this thread is already delivering on this stream
    fn begin_delivery(&self) -> Option<DeliveryGuard<'_, T, E>> {
        let current = thread::current().id();
        if lock(&self.state).delivering == Some(current) {
            return None;
        }
        let guard = lock(&self.delivery);
        lock(&self.state).delivering = Some(current);
        Some(DeliveryGuard {
            shared: self,
            _lock: guard,
        })
    }

    fn remove(&self, target: &Arc<Registered<T, E>>) -> bool {
        target.deactivate();
        let mut state = lock(&self.state);
        let before = state.subscribers.len();
        state
            .subscribers
            .retain(|entry| !std::ptr::eq(entry.as_ptr(), Arc::as_ptr(target)));
        before != state.subscribers.len()
    }

    /// Take a snapshot of live observers, dropping entries whose handle is gone
    fn snapshot(state: &mut StreamState<T, E>) -> Vec<Arc<Registered<T, E>>> {
        let mut live = Vec::with_capacity(state.subscribers.len());
        state.subscribers.retain(|entry| match entry.upgrade() {
            Some(registered) => {
                live.push(registered);
                true
            }
            None => false,
        });
        live
    }

    /// Deliver `first` then anything observers queued while it was being delivered.
    /// Must be called with the delivery lock held.
    fn deliver(&self, first: Pending<T, E>) {
        let mut next = Some(first);
        while let Some(pending) = next {
            match pending {
                Pending::Value(value) => {
                    let targets = Self::snapshot(&mut lock(&self.state));
                    for target in targets {
                        // Checked per observer so one unsubscribing another mid-loop takes effect now
                        if target.is_active() {
                            target.observer.on_value(&value);
                        }
                    }
                }
                Pending::Terminated(error) => {
                    let mut state = lock(&self.state);
                    let targets = Self::snapshot(&mut state);
                    state.subscribers.clear();
                    drop(state);

                    for target in targets {
                        if target.is_active() {
                            target.deactivate();
                            target.observer.on_terminated(&error);
                        }
                    }
                }
            }
            next = lock(&self.state).queued.pop_front();
        }
    }
}

/// Handle representing a single subscriber.
///
/// The broadcaster only holds a weak reference to the observer, so dropping this handle
/// also ends delivery.
pub struct Subscription<T, E> {
    registered: Arc<Registered<T, E>>,
    stream: Weak<Shared<T, E>>,
}

impl<T, E> Subscription<T, E> {
    pub fn id(&self) -> SubscriptionId {
        self.registered.id
    }

    /// Whether this subscription will still receive deliveries
    pub fn is_active(&self) -> bool {
        self.registered.is_active()
    }

    /// Stop receiving deliveries, same as dropping the handle
    pub fn unsubscribe(self) {
        drop(self);
    }

    fn cancel(&self) {
        if let Some(stream) = self.stream.upgrade() {
            if stream.remove(&self.registered) {
                debug!(
                    "Subscription {} removed from {} stream",
                    self.registered.id, stream.name
                );
            }
        } else {
            self.registered.deactivate();
        }
    }
}

impl<T, E> Drop for Subscription<T, E> {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Fan-out of a stream of `T` values ending in at most one `E`.
///
/// Cloning gives another handle to the same stream.
pub struct EventBroadcaster<T, E> {
    shared: Arc<Shared<T, E>>,
}

impl<T, E> Clone for EventBroadcaster<T, E> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T: 'static, E: Clone + 'static> EventBroadcaster<T, E> {
    /// Create an open stream, `name` is only used for logging
    pub fn new(name: &'static str) -> Self {
        Self {
            shared: Arc::new(Shared {
                name,
                state: Mutex::new(StreamState {
                    subscribers: Vec::new(),
                    terminal: None,
                    delivering: None,
                    queued: VecDeque::new(),
                }),
                delivery: Mutex::new(()),
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        self.shared.name
    }

    /// Register a new observer. If the stream already ended the observer is handed the
    /// stored failure right away, values published before subscribing are never replayed.
    pub fn subscribe(&self, observer: impl StreamObserver<T, E> + 'static) -> Subscription<T, E> {
        let registered = Arc::new(Registered {
            id: Uuid::new_v4(),
            active: AtomicBool::new(true),
            observer: Box::new(observer),
        });

        let mut state = lock(&self.shared.state);
        let terminal = state.terminal.clone();
        if terminal.is_none() {
            state.subscribers.push(Arc::downgrade(&registered));
        }
        drop(state);

        debug!(
            "Subscription {} added to {} stream",
            registered.id, self.shared.name
        );

        if let Some(error) = terminal {
            registered.deactivate();
            registered.observer.on_terminated(&error);
        }

        Subscription {
            registered,
            stream: Arc::downgrade(&self.shared),
        }
    }

    /// [Self::subscribe] with a pair of closures
    pub fn subscribe_fn(
        &self,
        on_value: impl Fn(&T) + Send + Sync + 'static,
        on_terminated: impl Fn(&E) + Send + Sync + 'static,
    ) -> Subscription<T, E> {
        self.subscribe(FnObserver {
            on_value,
            on_terminated,
        })
    }

    /// Subscribe through an unbounded channel so the work can happen on another task
    pub fn subscribe_channel(
        &self,
    ) -> (Subscription<T, E>, mpsc::UnboundedReceiver<StreamEvent<T, E>>)
    where
        T: Clone + Send,
        E: Send,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        (self.subscribe(ChannelObserver(tx)), rx)
    }

    /// Remove `subscription` from this stream, returns whether it was subscribed here
    pub fn unsubscribe(&self, subscription: &Subscription<T, E>) -> bool {
        let owned = subscription
            .stream
            .upgrade()
            .is_some_and(|stream| Arc::ptr_eq(&stream, &self.shared));
        if !owned {
            return false;
        }
        let removed = self.shared.remove(&subscription.registered);
        if removed {
            debug!(
                "Subscription {} removed from {} stream",
                subscription.id(),
                self.shared.name
            );
        }
        removed
    }

    /// Deliver `value` to every current subscriber in subscription order.
    /// Does nothing once the stream has ended. Called from an observer of this stream, the
    /// value is delivered after the one currently being delivered.
    pub fn publish(&self, value: T) {
        let Some(_delivery) = self.shared.begin_delivery() else {
            let mut state = lock(&self.shared.state);
            if state.terminal.is_none() {
                debug!("Queueing value published from inside {} stream delivery", self.shared.name);
                state.queued.push_back(Pending::Value(value));
            }
            return;
        };

        if self.is_terminated() {
            debug!("Discarding value on closed {} stream", self.shared.name);
            return;
        }
        self.shared.deliver(Pending::Value(value));
    }

    /// Close the stream with `error` and deliver it to every current subscriber.
    /// Returns `false` if the stream had already ended, in which case nothing happens.
    ///
    /// Called from an observer of this stream, the stream is closed straight away but the
    /// failure reaches subscribers once the current delivery finishes.
    pub fn fail(&self, error: E) -> bool {
        let delivery = self.shared.begin_delivery();

        let mut state = lock(&self.shared.state);
        if state.terminal.is_some() {
            return false;
        }
        state.terminal = Some(error.clone());

        if delivery.is_none() {
            debug!("Deferring failure raised inside {} stream delivery", self.shared.name);
            state.queued.push_back(Pending::Terminated(error));
            return true;
        }
        drop(state);

        self.shared.deliver(Pending::Terminated(error));
        true
    }

    pub fn is_terminated(&self) -> bool {
        lock(&self.shared.state).terminal.is_some()
    }

    /// The failure this stream ended with, if it has
    pub fn termination(&self) -> Option<E> {
        lock(&self.shared.state).terminal.clone()
    }

    /// Number of subscribers still registered
    pub fn subscriber_count(&self) -> usize {
        lock(&self.shared.state)
            .subscribers
            .iter()
            .filter(|entry| entry.upgrade().is_some_and(|r| r.is_active()))
            .count()
    }

    /// A handle that can only subscribe, for handing out to consumers
    pub fn stream(&self) -> EventStream<T, E> {
        EventStream(self.clone())
    }
}

/// Read-only side of an [EventBroadcaster]
pub struct EventStream<T, E>(EventBroadcaster<T, E>);

impl<T, E> Clone for EventStream<T, E> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T: 'static, E: Clone + 'static> EventStream<T, E> {
    pub fn subscribe(&self, observer: impl StreamObserver<T, E> + 'static) -> Subscription<T, E> {
        self.0.subscribe(observer)
    }

    pub fn subscribe_fn(
        &self,
        on_value: impl Fn(&T) + Send + Sync + 'static,
        on_terminated: impl Fn(&E) + Send + Sync + 'static,
    ) -> Subscription<T, E> {
        self.0.subscribe_fn(on_value, on_terminated)
    }

    pub fn subscribe_channel(
        &self,
    ) -> (Subscription<T, E>, mpsc::UnboundedReceiver<StreamEvent<T, E>>)
    where
        T: Clone + Send,
        E: Send,
    {
        self.0.subscribe_channel()
    }

    pub fn unsubscribe(&self, subscription: &Subscription<T, E>) -> bool {
        self.0.unsubscribe(subscription)
    }

    pub fn is_terminated(&self) -> bool {
        self.0.is_terminated()
    }

    pub fn termination(&self) -> Option<E> {
        self.0.termination()
    }
}
