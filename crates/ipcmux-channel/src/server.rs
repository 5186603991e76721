use std::collections::HashMap;
use std::sync::{Arc, Weak};

use futures_util::future::{self, FutureExt};
use futures_util::StreamExt;
use ipcmux_transport::MessageSender;
use ipcmux_wire::{Request, RequestId, Response, Value};
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::channel::ServerChannel;
use crate::error::{CallError, Result};
use crate::protocol::{send_message, Protocol};

pub(crate) type ChannelMap<C> = HashMap<String, Arc<dyn ServerChannel<C>>>;

/// Work the server is doing on behalf of one request id.
enum Active {
    Call(CancellationToken),
    Listen(JoinHandle<()>),
}

impl Active {
    fn dispose(self) {
        match self {
            Active::Call(token) => token.cancel(),
            Active::Listen(task) => task.abort(),
        }
    }
}

struct ServerInner<C> {
    ctx: C,
    sender: MessageSender,
    channels: RwLock<ChannelMap<C>>,
    active: Mutex<HashMap<RequestId, Active>>,
    disposed: CancellationToken,
    consumer: Mutex<Option<JoinHandle<()>>>,
}

/// Hosts named channels and answers the requests of one remote client.
///
/// Sends the Initialize handshake as soon as it is constructed.
pub struct ChannelServer<C = String> {
    inner: Arc<ServerInner<C>>,
}

impl<C> Clone for ChannelServer<C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<C: Send + Sync + 'static> ChannelServer<C> {
    /// Attach a server to the request side of `protocol`.
    pub fn new(protocol: &Protocol, ctx: C) -> Result<Self> {
        Self::with_channels(protocol, ctx, ChannelMap::new())
    }

    /// Like [`ChannelServer::new`], with channels registered before the
    /// first request can be dispatched.
    pub(crate) fn with_channels(protocol: &Protocol, ctx: C, channels: ChannelMap<C>) -> Result<Self> {
        let requests = protocol.take_requests()?;
        let inner = Arc::new(ServerInner {
            ctx,
            sender: protocol.sender(),
            channels: RwLock::new(channels),
            active: Mutex::new(HashMap::new()),
            disposed: CancellationToken::new(),
            consumer: Mutex::new(None),
        });

        inner.send(&Response::Initialize);
        let consumer = tokio::spawn(consume(Arc::downgrade(&inner), requests));
        *inner.consumer.lock() = Some(consumer);

        Ok(Self { inner })
    }

    /// Register `channel` under `name`, replacing any previous registration.
    pub fn register_channel(&self, name: impl Into<String>, channel: impl ServerChannel<C>) {
        self.register_shared_channel(name, Arc::new(channel));
    }

    pub fn register_shared_channel(&self, name: impl Into<String>, channel: Arc<dyn ServerChannel<C>>) {
        let name = name.into();
        debug!(channel = %name, "registering channel");
        self.inner.channels.write().insert(name, channel);
    }
}

impl<C> ChannelServer<C> {
    /// Context value identifying the remote peer.
    pub fn ctx(&self) -> &C {
        &self.inner.ctx
    }

    /// Number of calls and subscriptions currently being served.
    pub fn active_requests(&self) -> usize {
        self.inner.active.lock().len()
    }

    /// Stop answering requests and tear down every call and subscription in
    /// flight. Idempotent; also happens when the connection closes.
    pub fn dispose(&self) {
        self.inner.dispose();
    }
}

impl<C> ServerInner<C> {
    fn dispose(&self) {
        if self.disposed.is_cancelled() {
            return;
        }
        self.disposed.cancel();
        if let Some(consumer) = self.consumer.lock().take() {
            consumer.abort();
        }
        let active: Vec<Active> = self.active.lock().drain().map(|(_, a)| a).collect();
        debug!(count = active.len(), "disposing channel server");
        for work in active {
            work.dispose();
        }
    }
}

impl<C> std::fmt::Debug for ChannelServer<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelServer")
            .field("channels", &self.inner.channels.read().len())
            .field("active", &self.inner.active.lock().len())
            .finish()
    }
}

async fn consume<C: Send + Sync + 'static>(
    inner: Weak<ServerInner<C>>,
    mut requests: mpsc::UnboundedReceiver<Request>,
) {
    while let Some(request) = requests.recv().await {
        let Some(inner) = inner.upgrade() else {
            return;
        };
        inner.on_request(request);
    }
    if let Some(inner) = inner.upgrade() {
        debug!("request stream ended");
        inner.dispose();
    }
}

impl<C: Send + Sync + 'static> ServerInner<C> {
    fn send(&self, response: &Response) {
        send_message(&self.sender, response.encode());
    }

    fn channel(&self, name: &str) -> Option<Arc<dyn ServerChannel<C>>> {
        self.channels.read().get(name).cloned()
    }

    fn on_request(self: &Arc<Self>, request: Request) {
        match request {
            Request::Call {
                id,
                channel,
                command,
                arg,
            } => self.on_call(id, &channel, &command, arg),
            Request::Listen {
                id,
                channel,
                event,
                arg,
            } => self.on_listen(id, &channel, &event, arg),
            Request::Cancel { id } | Request::Unlisten { id } => {
                match self.active.lock().remove(&id) {
                    Some(work) => {
                        trace!(id, "disposing active request");
                        work.dispose();
                    }
                    None => trace!(id, "nothing active for request"),
                }
            }
        }
    }

    fn on_call(self: &Arc<Self>, id: RequestId, channel: &str, command: &str, arg: Value) {
        let cancel = self.disposed.child_token();
        let call = match self.channel(channel) {
            Some(target) => target.call(&self.ctx, command, arg, cancel.clone()),
            None => future::ready(Err(CallError::unknown_channel(channel))).boxed(),
        };
        debug!(id, channel, command, "call");

        self.active.lock().insert(id, Active::Call(cancel));
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            let outcome = call.await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            inner.active.lock().remove(&id);
            if inner.disposed.is_cancelled() {
                return;
            }
            let response = match outcome {
                Ok(data) => Response::Success { id, data },
                Err(err) => err.into_response(id),
            };
            inner.send(&response);
        });
    }

    fn on_listen(self: &Arc<Self>, id: RequestId, channel: &str, event: &str, arg: Value) {
        let Some(target) = self.channel(channel) else {
            warn!(id, channel, event, "subscribe to unknown channel");
            return;
        };
        let mut stream = match target.listen(&self.ctx, event, arg) {
            Ok(stream) => stream,
            Err(err) => {
                warn!(id, channel, event, error = %err, "subscribe rejected");
                return;
            }
        };
        debug!(id, channel, event, "listen");

        let weak = Arc::downgrade(self);
        let mut active = self.active.lock();
        let forward = tokio::spawn(async move {
            while let Some(data) = stream.next().await {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                inner.send(&Response::EventFire { id, data });
            }
            if let Some(inner) = weak.upgrade() {
                inner.active.lock().remove(&id);
            }
        });
        active.insert(id, Active::Listen(forward));
    }
}
