//! Priority-ordered publish/subscribe primitive shared by the layout
//! calculator, the state manager and the orchestrator.
//!
//! Listeners are stored pre-sorted by descending priority, so `emit` only
//! walks a list. A listener that panics is logged and skipped; `emit` never
//! unwinds into its caller.

use std::collections::BTreeMap;
use std::fmt::{Debug, Display, Formatter};
use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use futures::channel::oneshot;
use futures::future::{Either, select};
use futures_timer::Delay;

pub const DEFAULT_MAX_LISTENERS: usize = 10;

/// A payload that can travel over an [`EventEmitter`].
pub trait Event: Clone + Send + Sync + 'static {
    type Kind: Copy + Ord + Debug + Send + Sync + 'static;

    fn kind(&self) -> Self::Kind;
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ListenerId(u64);

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ListenOptions {
    pub priority: i32,
}

impl ListenOptions {
    pub fn priority(priority: i32) -> Self {
        Self { priority }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum WaitError {
    Timeout { event: String, timeout: Duration },
    Closed { event: String },
}

impl Display for WaitError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            WaitError::Timeout { event, timeout } => {
                write!(f, "timed out after {timeout:?} waiting for {event}")
            }
            WaitError::Closed { event } => {
                write!(f, "emitter dropped its listeners while waiting for {event}")
            }
        }
    }
}

impl std::error::Error for WaitError {}

type Listener<E> = Arc<dyn Fn(&E) + Send + Sync>;
type OnceListener<E> = Box<dyn FnOnce(&E) + Send>;

struct PersistentEntry<E> {
    id: ListenerId,
    priority: i32,
    listener: Listener<E>,
}

struct OnceEntry<E> {
    id: ListenerId,
    listener: OnceListener<E>,
}

struct Registry<E: Event> {
    persistent: BTreeMap<E::Kind, Vec<PersistentEntry<E>>>,
    once: BTreeMap<E::Kind, Vec<OnceEntry<E>>>,
    max_listeners: usize,
    next_id: u64,
}

impl<E: Event> Registry<E> {
    fn allocate_id(&mut self) -> ListenerId {
        self.next_id += 1;
        ListenerId(self.next_id)
    }

    fn count(&self, kind: E::Kind) -> usize {
        self.persistent.get(&kind).map_or(0, Vec::len) + self.once.get(&kind).map_or(0, Vec::len)
    }

    fn warn_if_crowded(&self, kind: E::Kind) {
        let count = self.count(kind);
        if self.max_listeners > 0 && count > self.max_listeners {
            tracing::warn!(
                event = ?kind,
                count,
                max_listeners = self.max_listeners,
                "possible listener leak: listener count exceeds the configured maximum"
            );
        }
    }

    fn remove(&mut self, kind: E::Kind, id: ListenerId) -> bool {
        let mut removed = false;
        if let Some(entries) = self.persistent.get_mut(&kind) {
            let before = entries.len();
            entries.retain(|entry| entry.id != id);
            removed |= entries.len() != before;
            if entries.is_empty() {
                self.persistent.remove(&kind);
            }
        }
        if let Some(entries) = self.once.get_mut(&kind) {
            let before = entries.len();
            entries.retain(|entry| entry.id != id);
            removed |= entries.len() != before;
            if entries.is_empty() {
                self.once.remove(&kind);
            }
        }
        removed
    }
}

fn lock<E: Event>(registry: &Mutex<Registry<E>>) -> MutexGuard<'_, Registry<E>> {
    match registry.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Handle returned by [`EventEmitter::on`] and [`EventEmitter::once`].
///
/// Dropping it keeps the listener registered; call [`Subscription::unsubscribe`]
/// to remove it, or convert it with [`Subscription::into_guard`].
pub struct Subscription<E: Event> {
    registry: Weak<Mutex<Registry<E>>>,
    kind: E::Kind,
    id: ListenerId,
}

impl<E: Event> Subscription<E> {
    pub fn id(&self) -> ListenerId {
        self.id
    }

    pub fn kind(&self) -> E::Kind {
        self.kind
    }

    /// Returns `false` when the listener was already gone.
    pub fn unsubscribe(self) -> bool {
        match self.registry.upgrade() {
            Some(registry) => lock(&registry).remove(self.kind, self.id),
            None => false,
        }
    }

    pub fn into_guard(self) -> SubscriptionGuard<E> {
        SubscriptionGuard(Some(self))
    }
}

/// Unsubscribes when dropped.
pub struct SubscriptionGuard<E: Event>(Option<Subscription<E>>);

impl<E: Event> Drop for SubscriptionGuard<E> {
    fn drop(&mut self) {
        if let Some(subscription) = self.0.take() {
            subscription.unsubscribe();
        }
    }
}

pub struct EventEmitter<E: Event> {
    registry: Arc<Mutex<Registry<E>>>,
}

/// Non-owning emitter handle; see [`EventEmitter::downgrade`].
pub(crate) struct WeakEventEmitter<E: Event> {
    registry: Weak<Mutex<Registry<E>>>,
}

impl<E: Event> WeakEventEmitter<E> {
    pub(crate) fn upgrade(&self) -> Option<EventEmitter<E>> {
        self.registry
            .upgrade()
            .map(|registry| EventEmitter { registry })
    }
}

impl<E: Event> Clone for EventEmitter<E> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
        }
    }
}

impl<E: Event> Default for EventEmitter<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Event> EventEmitter<E> {
    pub fn new() -> Self {
        Self::with_max_listeners(DEFAULT_MAX_LISTENERS)
    }

    /// `0` disables the leak warning.
    pub fn with_max_listeners(max_listeners: usize) -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry {
                persistent: BTreeMap::new(),
                once: BTreeMap::new(),
                max_listeners,
                next_id: 0,
            })),
        }
    }

    pub(crate) fn downgrade(&self) -> WeakEventEmitter<E> {
        WeakEventEmitter {
            registry: Arc::downgrade(&self.registry),
        }
    }

    pub fn set_max_listeners(&self, max_listeners: usize) {
        lock(&self.registry).max_listeners = max_listeners;
    }

    pub fn max_listeners(&self) -> usize {
        lock(&self.registry).max_listeners
    }

    pub fn on(
        &self,
        kind: E::Kind,
        listener: impl Fn(&E) + Send + Sync + 'static,
    ) -> Subscription<E> {
        self.on_with(kind, ListenOptions::default(), listener)
    }

    pub fn on_with(
        &self,
        kind: E::Kind,
        options: ListenOptions,
        listener: impl Fn(&E) + Send + Sync + 'static,
    ) -> Subscription<E> {
        let mut registry = lock(&self.registry);
        let id = registry.allocate_id();
        let entries = registry.persistent.entry(kind).or_default();
        // Equal priorities keep registration order.
        let index = entries.partition_point(|entry| entry.priority >= options.priority);
        entries.insert(
            index,
            PersistentEntry {
                id,
                priority: options.priority,
                listener: Arc::new(listener),
            },
        );
        registry.warn_if_crowded(kind);
        Subscription {
            registry: Arc::downgrade(&self.registry),
            kind,
            id,
        }
    }

    pub fn once(&self, kind: E::Kind, listener: impl FnOnce(&E) + Send + 'static) -> Subscription<E> {
        let mut registry = lock(&self.registry);
        let id = registry.allocate_id();
        registry.once.entry(kind).or_default().push(OnceEntry {
            id,
            listener: Box::new(listener),
        });
        registry.warn_if_crowded(kind);
        Subscription {
            registry: Arc::downgrade(&self.registry),
            kind,
            id,
        }
    }

    /// Removes one listener, or every listener of `kind` when `id` is `None`.
    pub fn off(&self, kind: E::Kind, id: Option<ListenerId>) -> bool {
        let mut registry = lock(&self.registry);
        match id {
            Some(id) => registry.remove(kind, id),
            None => {
                let persistent = registry.persistent.remove(&kind).is_some();
                let once = registry.once.remove(&kind).is_some();
                persistent || once
            }
        }
    }

    pub fn remove_all_listeners(&self) {
        let mut registry = lock(&self.registry);
        registry.persistent.clear();
        registry.once.clear();
    }

    pub fn listener_count(&self, kind: E::Kind) -> usize {
        lock(&self.registry).count(kind)
    }

    pub fn event_kinds(&self) -> Vec<E::Kind> {
        let registry = lock(&self.registry);
        let mut kinds = registry
            .persistent
            .keys()
            .chain(registry.once.keys())
            .copied()
            .collect::<Vec<_>>();
        kinds.sort();
        kinds.dedup();
        kinds
    }

    /// Returns `true` when at least one listener ran.
    pub fn emit(&self, event: E) -> bool {
        let kind = event.kind();
        // The lock is released before any listener runs so listeners may
        // subscribe, unsubscribe or emit re-entrantly.
        let (persistent, once) = {
            let mut registry = lock(&self.registry);
            let persistent = registry
                .persistent
                .get(&kind)
                .map(|entries| {
                    entries
                        .iter()
                        .map(|entry| entry.listener.clone())
                        .collect::<Vec<_>>()
                })
                .unwrap_or_default();
            let once = registry.once.remove(&kind).unwrap_or_default();
            (persistent, once)
        };

        let invoked = persistent.len() + once.len();
        for listener in persistent {
            invoke(kind, || listener(&event));
        }
        for entry in once {
            let listener = entry.listener;
            invoke(kind, || listener(&event));
        }
        invoked > 0
    }

    /// Resolves with the next `kind` event, or fails with
    /// [`WaitError::Timeout`] once `timeout` elapses. The one-shot listener is
    /// registered immediately and removed however the future finishes,
    /// including when it is dropped early.
    pub fn wait_for(
        &self,
        kind: E::Kind,
        timeout: Option<Duration>,
    ) -> impl Future<Output = Result<E, WaitError>> + Send + 'static {
        let (sender, receiver) = oneshot::channel::<E>();
        let guard = self
            .once(kind, move |event: &E| {
                let _ = sender.send(event.clone());
            })
            .into_guard();

        async move {
            let _guard = guard;
            let closed = || WaitError::Closed {
                event: format!("{kind:?}"),
            };
            let Some(timeout) = timeout else {
                return receiver.await.map_err(|_| closed());
            };
            match select(receiver, Delay::new(timeout)).await {
                Either::Left((received, _)) => received.map_err(|_| closed()),
                Either::Right(((), _)) => Err(WaitError::Timeout {
                    event: format!("{kind:?}"),
                    timeout,
                }),
            }
        }
    }
}

fn invoke<K: Debug>(kind: K, call: impl FnOnce()) {
    if let Err(payload) = catch_unwind(AssertUnwindSafe(call)) {
        tracing::warn!(
            event = ?kind,
            error = %panic_message(payload.as_ref()).unwrap_or("unknown panic"),
            "event listener panicked"
        );
    }
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> Option<&str> {
    payload
        .downcast_ref::<&'static str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
}
