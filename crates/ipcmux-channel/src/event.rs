//! Multicast events with lazy source activation.
//!
//! An [`Emitter`] fans every fired value out to all live [`EventStream`]s.
//! Optional hooks run when the first subscriber arrives and when the last
//! one leaves; the channel client uses them to send the remote subscribe
//! and unsubscribe requests only while someone is listening.

use std::collections::BTreeMap;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use futures_core::Stream;
use futures_util::StreamExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

type Hook<T> = Box<dyn Fn(&Emitter<T>) + Send + Sync>;

struct Shared<T> {
    listeners: Mutex<Listeners<T>>,
    on_first_listener: Option<Hook<T>>,
    on_last_listener: Option<Hook<T>>,
}

struct Listeners<T> {
    senders: BTreeMap<u64, mpsc::UnboundedSender<T>>,
    next_key: u64,
    disposed: bool,
}

/// The firing side of an event.
///
/// Hooks run while the emitter's listener table is locked, so first/last
/// transitions are observed in order. A hook must not call back into the
/// emitter that invoked it.
pub struct Emitter<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Emitter<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T: Clone + Send + 'static> Emitter<T> {
    pub fn new() -> Self {
        Self::build(None, None)
    }

    /// Create an emitter that calls `on_first` when its listener count goes
    /// from zero to one, and `on_last` when it drops back to zero.
    pub fn with_hooks(
        on_first: impl Fn(&Emitter<T>) + Send + Sync + 'static,
        on_last: impl Fn(&Emitter<T>) + Send + Sync + 'static,
    ) -> Self {
        Self::build(Some(Box::new(on_first)), Some(Box::new(on_last)))
    }

    fn build(on_first_listener: Option<Hook<T>>, on_last_listener: Option<Hook<T>>) -> Self {
        Self {
            shared: Arc::new(Shared {
                listeners: Mutex::new(Listeners {
                    senders: BTreeMap::new(),
                    next_key: 0,
                    disposed: false,
                }),
                on_first_listener,
                on_last_listener,
            }),
        }
    }

    /// The subscribable side of this emitter.
    pub fn event(&self) -> Event<T> {
        Event {
            shared: self.shared.clone(),
        }
    }

    /// Deliver `value` to every current subscriber.
    pub fn fire(&self, value: T) {
        let listeners = self.shared.listeners.lock();
        for sender in listeners.senders.values() {
            let _ = sender.send(value.clone());
        }
    }

    pub fn listener_count(&self) -> usize {
        self.shared.listeners.lock().senders.len()
    }

    /// Run `f` with the current listener count while holding the listener
    /// table, so no hook can run concurrently.
    pub fn with_listener_count<R>(&self, f: impl FnOnce(usize) -> R) -> R {
        let listeners = self.shared.listeners.lock();
        f(listeners.senders.len())
    }

    /// End every subscriber stream. Later subscriptions end immediately.
    pub fn dispose(&self) {
        let mut listeners = self.shared.listeners.lock();
        listeners.disposed = true;
        listeners.senders.clear();
    }

    pub fn is_disposed(&self) -> bool {
        self.shared.listeners.lock().disposed
    }

    pub fn downgrade(&self) -> WeakEmitter<T> {
        WeakEmitter {
            shared: Arc::downgrade(&self.shared),
        }
    }
}

impl<T: Clone + Send + 'static> Default for Emitter<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for Emitter<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Emitter")
            .field("listeners", &self.shared.listeners.lock().senders.len())
            .finish()
    }
}

/// Non-owning handle to an [`Emitter`].
pub struct WeakEmitter<T> {
    shared: Weak<Shared<T>>,
}

impl<T> WeakEmitter<T> {
    pub fn upgrade(&self) -> Option<Emitter<T>> {
        self.shared.upgrade().map(|shared| Emitter { shared })
    }
}

impl<T> Clone for WeakEmitter<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

/// The subscribable side of an [`Emitter`]. Cheap to clone.
pub struct Event<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Event<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T: Clone + Send + 'static> Event<T> {
    /// Attach a new subscriber. Dropping the stream detaches it.
    pub fn subscribe(&self) -> EventStream<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut listeners = self.shared.listeners.lock();
        if listeners.disposed {
            return EventStream {
                rx,
                key: None,
                shared: self.shared.clone(),
            };
        }

        let key = listeners.next_key;
        listeners.next_key += 1;
        listeners.senders.insert(key, tx);
        if listeners.senders.len() == 1 {
            if let Some(hook) = &self.shared.on_first_listener {
                hook(&Emitter {
                    shared: self.shared.clone(),
                });
            }
        }

        EventStream {
            rx,
            key: Some(key),
            shared: self.shared.clone(),
        }
    }
}

impl<T> std::fmt::Debug for Event<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Event").finish_non_exhaustive()
    }
}

/// One subscription to an [`Event`].
///
/// Yields every value fired after it was created, in order. Ends when the
/// emitter is disposed.
pub struct EventStream<T> {
    rx: mpsc::UnboundedReceiver<T>,
    key: Option<u64>,
    shared: Arc<Shared<T>>,
}

impl<T> EventStream<T> {
    /// Receive the next value, or `None` once the emitter is disposed.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }
}

impl<T> Stream for EventStream<T> {
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

impl<T> Drop for EventStream<T> {
    fn drop(&mut self) {
        let Some(key) = self.key.take() else {
            return;
        };
        let mut listeners = self.shared.listeners.lock();
        let removed = listeners.senders.remove(&key).is_some();
        if removed && listeners.senders.is_empty() && !listeners.disposed {
            if let Some(hook) = &self.shared.on_last_listener {
                hook(&Emitter {
                    shared: self.shared.clone(),
                });
            }
        }
    }
}

impl<T> std::fmt::Debug for EventStream<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStream")
            .field("attached", &self.key.is_some())
            .finish()
    }
}

struct RelayState<T> {
    input: Option<Event<T>>,
    pump: Option<JoinHandle<()>>,
}

/// An event whose source can be attached or swapped later.
///
/// Subscribers attach to [`Relay::event`] at any time. While at least one
/// is attached, values from the current input are forwarded to them. When
/// the input ends, or the relay is disposed, every subscriber stream ends.
pub struct Relay<T> {
    emitter: Emitter<T>,
    state: Arc<Mutex<RelayState<T>>>,
}

impl<T: Clone + Send + 'static> Relay<T> {
    pub fn new() -> Self {
        let state = Arc::new(Mutex::new(RelayState {
            input: None,
            pump: None,
        }));

        let on_first = state.clone();
        let on_last = state.clone();
        let emitter = Emitter::with_hooks(
            move |emitter: &Emitter<T>| {
                let mut guard = on_first.lock();
                let state = &mut *guard;
                if let Some(input) = &state.input {
                    state.pump = Some(spawn_pump(input, emitter.downgrade()));
                }
            },
            move |_: &Emitter<T>| {
                if let Some(pump) = on_last.lock().pump.take() {
                    pump.abort();
                }
            },
        );

        Self { emitter, state }
    }

    pub fn event(&self) -> Event<T> {
        self.emitter.event()
    }

    /// Replace the input. Subscribers already attached start receiving from
    /// the new input immediately.
    pub fn set_input(&self, input: Event<T>) {
        self.emitter.with_listener_count(|count| {
            let mut state = self.state.lock();
            if let Some(pump) = state.pump.take() {
                pump.abort();
            }
            if count > 0 {
                state.pump = Some(spawn_pump(&input, self.emitter.downgrade()));
            }
            state.input = Some(input);
        });
    }

    /// End every subscriber stream, now and for later subscriptions.
    pub fn dispose(&self) {
        if let Some(pump) = self.state.lock().pump.take() {
            pump.abort();
        }
        self.emitter.dispose();
    }
}

impl<T: Clone + Send + 'static> Default for Relay<T> {
    fn default() -> Self {
        Self::new()
    }
}

fn spawn_pump<T: Clone + Send + 'static>(input: &Event<T>, target: WeakEmitter<T>) -> JoinHandle<()> {
    let mut source = input.subscribe();
    tokio::spawn(async move {
        while let Some(value) = source.next().await {
            match target.upgrade() {
                Some(emitter) => emitter.fire(value),
                None => return,
            }
        }
        if let Some(emitter) = target.upgrade() {
            emitter.dispose();
        }
    })
}
