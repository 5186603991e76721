use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Weak};

use futures_util::future::{self, FutureExt};
use ipcmux_transport::MessageSender;
use ipcmux_wire::{Request, RequestId, Response, Value};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::channel::{CallFuture, Channel};
use crate::error::{CallError, Result};
use crate::event::{Emitter, Event};
use crate::protocol::{send_message, Protocol};

/// Whether the remote channel server has completed its handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// No Initialize seen yet; requests are queued locally.
    Uninitialized,
    /// Requests go straight to the wire.
    Idle,
}

enum Pending {
    Call(oneshot::Sender<std::result::Result<Value, CallError>>),
    Subscription(Emitter<Value>),
}

struct ClientState {
    handshake: HandshakeState,
    queued: VecDeque<Request>,
    next_request_id: RequestId,
    pending: HashMap<RequestId, Pending>,
    disposed: bool,
}

impl ClientState {
    fn allocate_id(&mut self) -> RequestId {
        let id = self.next_request_id;
        self.next_request_id += 1;
        id
    }

    /// Remove a request that never left the local queue.
    fn unqueue(&mut self, id: RequestId) -> bool {
        let before = self.queued.len();
        self.queued.retain(|request| request.id() != id);
        self.queued.len() != before
    }
}

struct ClientInner {
    state: Mutex<ClientState>,
    sender: MessageSender,
    consumer: Mutex<Option<JoinHandle<()>>>,
}

/// Issues calls and subscriptions against the channels of one remote
/// [`ChannelServer`](crate::ChannelServer).
///
/// Requests issued before the remote handshake arrives are queued and sent
/// in issuance order once it does.
#[derive(Clone)]
pub struct ChannelClient {
    inner: Arc<ClientInner>,
}

impl ChannelClient {
    /// Attach a client to the response side of `protocol`.
    pub fn new(protocol: &Protocol) -> Result<Self> {
        let responses = protocol.take_responses()?;
        let inner = Arc::new(ClientInner {
            state: Mutex::new(ClientState {
                handshake: HandshakeState::Uninitialized,
                queued: VecDeque::new(),
                next_request_id: 0,
                pending: HashMap::new(),
                disposed: false,
            }),
            sender: protocol.sender(),
            consumer: Mutex::new(None),
        });

        let consumer = tokio::spawn(consume(Arc::downgrade(&inner), responses));
        *inner.consumer.lock() = Some(consumer);

        Ok(Self { inner })
    }

    /// Proxy for the remote channel `name`.
    pub fn get_channel(&self, name: impl Into<String>) -> ChannelProxy {
        ChannelProxy {
            client: self.clone(),
            name: name.into(),
        }
    }

    pub fn state(&self) -> HandshakeState {
        self.inner.state.lock().handshake
    }

    /// Number of calls and subscriptions awaiting the remote side.
    pub fn pending_requests(&self) -> usize {
        self.inner.state.lock().pending.len()
    }

    /// Invoke `command` on the remote `channel`.
    ///
    /// The request is issued (or queued) immediately, not when the returned
    /// future is first polled. Dropping the future before it settles cancels
    /// the call.
    pub fn call(&self, channel: &str, command: &str, arg: Value, token: CancellationToken) -> CallFuture {
        if token.is_cancelled() {
            return future::ready(Err(CallError::Canceled)).boxed();
        }

        let (tx, rx) = oneshot::channel();
        let id = {
            let mut state = self.inner.state.lock();
            if state.disposed {
                return future::ready(Err(CallError::Canceled)).boxed();
            }
            let id = state.allocate_id();
            state.pending.insert(id, Pending::Call(tx));
            self.inner.dispatch(
                &mut state,
                Request::Call {
                    id,
                    channel: channel.to_owned(),
                    command: command.to_owned(),
                    arg,
                },
            );
            id
        };
        debug!(id, channel, command, "call");

        let guard = PendingCall {
            inner: Arc::downgrade(&self.inner),
            id,
        };
        async move {
            let _guard = guard;
            tokio::select! {
                biased;
                outcome = rx => outcome.unwrap_or(Err(CallError::Canceled)),
                () = token.cancelled() => Err(CallError::Canceled),
            }
        }
        .boxed()
    }

    /// Subscription point for `event` on the remote `channel`.
    ///
    /// The remote subscribe request goes out when the first local subscriber
    /// attaches; the unsubscribe request when the last one detaches. Every
    /// activation uses a fresh request id.
    pub fn listen(&self, channel: &str, event: &str, arg: Value) -> Event<Value> {
        let current: Arc<Mutex<Option<RequestId>>> = Arc::new(Mutex::new(None));

        let on_first = {
            let inner = Arc::downgrade(&self.inner);
            let current = current.clone();
            let channel = channel.to_owned();
            let event = event.to_owned();
            move |emitter: &Emitter<Value>| {
                let Some(inner) = inner.upgrade() else {
                    return;
                };
                let mut state = inner.state.lock();
                if state.disposed {
                    return;
                }
                let id = state.allocate_id();
                state
                    .pending
                    .insert(id, Pending::Subscription(emitter.clone()));
                inner.dispatch(
                    &mut state,
                    Request::Listen {
                        id,
                        channel: channel.clone(),
                        event: event.clone(),
                        arg: arg.clone(),
                    },
                );
                *current.lock() = Some(id);
                debug!(id, channel = %channel, event = %event, "listen");
            }
        };

        let on_last = {
            let inner = Arc::downgrade(&self.inner);
            move |_: &Emitter<Value>| {
                let Some(id) = current.lock().take() else {
                    return;
                };
                if let Some(inner) = inner.upgrade() {
                    inner.unlisten(id);
                }
            }
        };

        let emitter = Emitter::with_hooks(on_first, on_last);
        if self.inner.state.lock().disposed {
            emitter.dispose();
        }
        emitter.event()
    }

    /// Fail every pending call with [`CallError::Canceled`], end every
    /// subscription and stop reading responses. Idempotent.
    ///
    /// Also happens on its own when the connection closes.
    pub fn dispose(&self) {
        self.inner.dispose();
    }
}

impl std::fmt::Debug for ChannelClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("ChannelClient")
            .field("handshake", &state.handshake)
            .field("pending", &state.pending.len())
            .field("queued", &state.queued.len())
            .finish()
    }
}

/// Cancels its call when dropped, unless the call already settled.
struct PendingCall {
    inner: Weak<ClientInner>,
    id: RequestId,
}

impl Drop for PendingCall {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.cancel_call(self.id);
        }
    }
}

async fn consume(inner: Weak<ClientInner>, mut responses: mpsc::UnboundedReceiver<Response>) {
    while let Some(response) = responses.recv().await {
        let Some(inner) = inner.upgrade() else {
            return;
        };
        inner.on_response(response);
    }
    if let Some(inner) = inner.upgrade() {
        debug!("response stream ended");
        inner.dispose();
    }
}

impl ClientInner {
    fn dispose(&self) {
        let pending = {
            let mut state = self.state.lock();
            if state.disposed {
                return;
            }
            state.disposed = true;
            state.queued.clear();
            std::mem::take(&mut state.pending)
        };
        if let Some(consumer) = self.consumer.lock().take() {
            consumer.abort();
        }

        debug!(count = pending.len(), "disposing channel client");
        for (_, work) in pending {
            match work {
                Pending::Call(tx) => {
                    let _ = tx.send(Err(CallError::Canceled));
                }
                Pending::Subscription(emitter) => emitter.dispose(),
            }
        }
    }

    /// Send `request` now, or queue it until the handshake completes.
    fn dispatch(&self, state: &mut ClientState, request: Request) {
        match state.handshake {
            HandshakeState::Idle => self.send(&request),
            HandshakeState::Uninitialized => {
                trace!(id = request.id(), "queueing request until initialized");
                state.queued.push_back(request);
            }
        }
    }

    fn send(&self, request: &Request) {
        send_message(&self.sender, request.encode());
    }

    fn on_response(&self, response: Response) {
        match response {
            Response::Initialize => {
                let mut state = self.state.lock();
                if state.handshake == HandshakeState::Idle {
                    debug!("ignoring repeated initialize");
                    return;
                }
                state.handshake = HandshakeState::Idle;
                let queued = std::mem::take(&mut state.queued);
                debug!(queued = queued.len(), "channel server initialized");
                for request in &queued {
                    self.send(request);
                }
            }
            Response::Success { id, data } => self.settle(id, Ok(data)),
            Response::Error { id, error } => self.settle(id, Err(CallError::from(error))),
            Response::ErrorObj { id, data } => self.settle(id, Err(CallError::Rejected(data))),
            Response::EventFire { id, data } => {
                let emitter = match self.state.lock().pending.get(&id) {
                    Some(Pending::Subscription(emitter)) => emitter.clone(),
                    _ => {
                        trace!(id, "event for unknown subscription");
                        return;
                    }
                };
                emitter.fire(data);
            }
        }
    }

    fn settle(&self, id: RequestId, outcome: std::result::Result<Value, CallError>) {
        let tx = {
            let mut state = self.state.lock();
            if !matches!(state.pending.get(&id), Some(Pending::Call(_))) {
                trace!(id, "response for unknown call");
                return;
            }
            match state.pending.remove(&id) {
                Some(Pending::Call(tx)) => tx,
                _ => return,
            }
        };
        let _ = tx.send(outcome);
    }

    fn cancel_call(&self, id: RequestId) {
        let mut state = self.state.lock();
        if !matches!(state.pending.get(&id), Some(Pending::Call(_))) {
            return;
        }
        state.pending.remove(&id);
        if state.unqueue(id) {
            trace!(id, "dropped queued call");
        } else {
            debug!(id, "cancel");
            self.send(&Request::Cancel { id });
        }
    }

    fn unlisten(&self, id: RequestId) {
        let mut state = self.state.lock();
        if state.disposed {
            return;
        }
        state.pending.remove(&id);
        if state.unqueue(id) {
            trace!(id, "dropped queued subscription");
        } else {
            debug!(id, "unlisten");
            self.send(&Request::Unlisten { id });
        }
    }
}

/// Client-side proxy for one named remote channel.
#[derive(Debug, Clone)]
pub struct ChannelProxy {
    client: ChannelClient,
    name: String,
}

impl ChannelProxy {
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Channel for ChannelProxy {
    fn call(&self, command: &str, arg: Value, token: CancellationToken) -> CallFuture {
        self.client.call(&self.name, command, arg, token)
    }

    fn listen(&self, event: &str, arg: Value) -> Event<Value> {
        self.client.listen(&self.name, event, arg)
    }
}

#[cfg(test)]
mod tests {
    use futures_util::StreamExt;
    use ipcmux_transport::{memory, Transport};

    use super::*;

    struct Harness {
        client: ChannelClient,
        remote: Transport,
    }

    impl Harness {
        fn new() -> Self {
            let (local, remote) = memory::pair();
            let protocol = Protocol::new(local);
            let client = ChannelClient::new(&protocol).unwrap();
            Self { client, remote }
        }

        fn respond(&self, response: Response) {
            self.remote.send(response.encode().unwrap()).unwrap();
        }

        async fn initialized() -> Self {
            let h = Self::new();
            h.respond(Response::Initialize);
            while h.client.state() != HandshakeState::Idle {
                tokio::task::yield_now().await;
            }
            h
        }

        async fn request(&mut self) -> Request {
            Request::decode(&self.remote.recv().await.unwrap()).unwrap()
        }
    }

    #[tokio::test]
    async fn calls_wait_for_the_handshake() {
        let mut h = Harness::new();
        let first = h.client.call("c", "one", Value::Absent, CancellationToken::new());
        let second = h.client.call("c", "two", Value::Absent, CancellationToken::new());
        assert_eq!(h.client.state(), HandshakeState::Uninitialized);

        h.respond(Response::Initialize);
        let Request::Call { id: a, command, .. } = h.request().await else {
            panic!("expected a call");
        };
        assert_eq!(command, "one");
        let Request::Call { id: b, command, .. } = h.request().await else {
            panic!("expected a call");
        };
        assert_eq!(command, "two");
        assert!(a < b);

        h.respond(Response::Success {
            id: b,
            data: Value::from("second"),
        });
        h.respond(Response::Success {
            id: a,
            data: Value::from("first"),
        });
        assert_eq!(first.await, Ok(Value::from("first")));
        assert_eq!(second.await, Ok(Value::from("second")));
    }

    #[tokio::test]
    async fn errors_are_classified() {
        let mut h = Harness::initialized().await;
        let structured = h.client.call("c", "x", Value::Absent, CancellationToken::new());
        let opaque = h.client.call("c", "y", Value::Absent, CancellationToken::new());
        let canceled = h.client.call("c", "z", Value::Absent, CancellationToken::new());
        let ids: Vec<RequestId> = vec![
            h.request().await.id(),
            h.request().await.id(),
            h.request().await.id(),
        ];

        h.respond(Response::Error {
            id: ids[0],
            error: ipcmux_wire::RemoteError::new("TypeError", "bad"),
        });
        h.respond(Response::ErrorObj {
            id: ids[1],
            data: Value::from(5u64),
        });
        h.respond(Response::Error {
            id: ids[2],
            error: ipcmux_wire::RemoteError::canceled(),
        });

        assert!(matches!(structured.await, Err(CallError::Remote(e)) if e.name == "TypeError"));
        assert_eq!(opaque.await, Err(CallError::Rejected(Value::from(5u64))));
        assert_eq!(canceled.await, Err(CallError::Canceled));
    }

    #[tokio::test]
    async fn duplicate_and_unknown_responses_are_ignored() {
        let mut h = Harness::initialized().await;
        let call = h.client.call("c", "x", Value::Absent, CancellationToken::new());
        let id = h.request().await.id();

        h.respond(Response::Success {
            id: 999,
            data: Value::from("stray"),
        });
        h.respond(Response::Success {
            id,
            data: Value::from("once"),
        });
        h.respond(Response::Success {
            id,
            data: Value::from("twice"),
        });
        assert_eq!(call.await, Ok(Value::from("once")));
        assert_eq!(h.client.pending_requests(), 0);
    }

    #[tokio::test]
    async fn precanceled_token_sends_nothing() {
        let mut h = Harness::initialized().await;
        let token = CancellationToken::new();
        token.cancel();
        assert_eq!(
            h.client.call("c", "x", Value::Absent, token).await,
            Err(CallError::Canceled)
        );

        let probe = h.client.call("c", "probe", Value::Absent, CancellationToken::new());
        let Request::Call { command, .. } = h.request().await else {
            panic!("expected a call");
        };
        assert_eq!(command, "probe");
        drop(probe);
    }

    #[tokio::test]
    async fn cancel_sends_exactly_one_cancel() {
        let mut h = Harness::initialized().await;
        let token = CancellationToken::new();
        let call = h.client.call("c", "slow", Value::Absent, token.clone());
        let id = h.request().await.id();

        token.cancel();
        assert_eq!(call.await, Err(CallError::Canceled));
        token.cancel();

        assert_eq!(h.request().await, Request::Cancel { id });
        let probe = h.client.call("c", "probe", Value::Absent, CancellationToken::new());
        assert!(matches!(h.request().await, Request::Call { .. }));
        drop(probe);
    }

    #[tokio::test]
    async fn canceling_a_queued_call_never_reaches_the_wire() {
        let mut h = Harness::new();
        let dropped = h.client.call("c", "dropped", Value::Absent, CancellationToken::new());
        let kept = h.client.call("c", "kept", Value::Absent, CancellationToken::new());
        drop(dropped);

        h.respond(Response::Initialize);
        let Request::Call { command, .. } = h.request().await else {
            panic!("expected a call");
        };
        assert_eq!(command, "kept");
        drop(kept);
        assert_eq!(h.request().await, Request::Cancel { id: 1 });
    }

    #[tokio::test]
    async fn settled_call_is_not_canceled() {
        let mut h = Harness::initialized().await;
        let token = CancellationToken::new();
        let call = h.client.call("c", "x", Value::Absent, token.clone());
        let id = h.request().await.id();
        h.respond(Response::Success {
            id,
            data: Value::Absent,
        });
        assert_eq!(call.await, Ok(Value::Absent));
        token.cancel();

        let probe = h.client.call("c", "probe", Value::Absent, CancellationToken::new());
        assert!(matches!(h.request().await, Request::Call { .. }));
        drop(probe);
    }

    #[tokio::test]
    async fn listen_multiplexes_subscribers() {
        let mut h = Harness::initialized().await;
        let event = h.client.listen("c", "ticks", Value::Absent);
        assert!(h.client.pending_requests() == 0);

        let mut a = event.subscribe();
        let mut b = event.subscribe();
        let Request::Listen { id, event: name, .. } = h.request().await else {
            panic!("expected a listen");
        };
        assert_eq!(name, "ticks");

        h.respond(Response::EventFire {
            id,
            data: Value::from(1u64),
        });
        assert_eq!(a.next().await, Some(Value::from(1u64)));
        assert_eq!(b.next().await, Some(Value::from(1u64)));

        drop(a);
        drop(b);
        assert_eq!(h.request().await, Request::Unlisten { id });

        let _c = event.subscribe();
        let Request::Listen { id: again, .. } = h.request().await else {
            panic!("expected a listen");
        };
        assert!(again > id);
    }

    #[tokio::test]
    async fn dispose_cancels_everything() {
        let h = Harness::initialized().await;
        let call = h.client.call("c", "x", Value::Absent, CancellationToken::new());
        let mut events = h.client.listen("c", "e", Value::Absent).subscribe();

        h.client.dispose();
        h.client.dispose();
        assert_eq!(call.await, Err(CallError::Canceled));
        assert_eq!(events.next().await, None);
        assert_eq!(
            h.client
                .call("c", "late", Value::Absent, CancellationToken::new())
                .await,
            Err(CallError::Canceled)
        );
        let mut late = h.client.listen("c", "e", Value::Absent).subscribe();
        assert_eq!(late.next().await, None);
    }

    #[tokio::test]
    async fn connection_loss_cancels_pending_calls() {
        let h = Harness::initialized().await;
        let call = h.client.call("c", "x", Value::Absent, CancellationToken::new());
        let mut events = h.client.listen("c", "e", Value::Absent).subscribe();

        h.remote.close();
        assert_eq!(call.await, Err(CallError::Canceled));
        assert_eq!(events.next().await, None);
        assert_eq!(h.client.pending_requests(), 0);
    }
}
