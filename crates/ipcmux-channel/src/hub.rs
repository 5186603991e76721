use std::fmt::Display;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_core::Stream;
use futures_util::future::FutureExt;
use futures_util::StreamExt;
use ipcmux_transport::ClientConnection;
use ipcmux_wire::Value;
use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::channel::{CallFuture, Channel, ServerChannel};
use crate::client::ChannelClient;
use crate::error::{CallError, IpcError, Result};
use crate::event::{Event, Relay};
use crate::protocol::Protocol;
use crate::router::ClientRouter;
use crate::server::{ChannelMap, ChannelServer};

/// One live client of an [`IpcServer`].
pub struct Connection<C> {
    id: u64,
    ctx: C,
    client: ChannelClient,
    server: ChannelServer<C>,
}

impl<C> Connection<C> {
    /// Hub-local connection number, unique for the hub's lifetime.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The context value the client announced when it connected.
    pub fn ctx(&self) -> &C {
        &self.ctx
    }

    /// Client for the channels this connection serves.
    pub fn client(&self) -> &ChannelClient {
        &self.client
    }
}

impl<C: std::fmt::Debug> std::fmt::Debug for Connection<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("ctx", &self.ctx)
            .finish_non_exhaustive()
    }
}

/// A set of live connections that routers can choose from.
pub trait ConnectionHub<C>: Send + Sync {
    /// Snapshot of the current connections, oldest first.
    fn connections(&self) -> Vec<Arc<Connection<C>>>;

    /// Receiver that observes a change each time a connection is added or
    /// removed. The current value is already marked seen. Closed once the
    /// hub is disposed.
    fn changes(&self) -> watch::Receiver<u64>;
}

struct HubInner<C> {
    channels: RwLock<ChannelMap<C>>,
    connections: Mutex<Vec<Arc<Connection<C>>>>,
    changes_tx: Mutex<Option<watch::Sender<u64>>>,
    changes_rx: watch::Receiver<u64>,
    next_connection_id: AtomicU64,
    shutdown: CancellationToken,
}

impl<C> ConnectionHub<C> for HubInner<C>
where
    C: Send + Sync + 'static,
{
    fn connections(&self) -> Vec<Arc<Connection<C>>> {
        self.connections.lock().clone()
    }

    fn changes(&self) -> watch::Receiver<u64> {
        let mut rx = self.changes_rx.clone();
        let _ = rx.borrow_and_update();
        rx
    }
}

/// Server-side hub accepting many peer connections.
///
/// Every connection gets its own channel server, pre-loaded with all
/// channels registered on the hub, and a channel client the hub can route
/// calls through. Dropping the hub disposes it.
pub struct IpcServer<C = String> {
    inner: Arc<HubInner<C>>,
}

impl<C> IpcServer<C>
where
    C: Clone + TryFrom<Value> + Send + Sync + 'static,
    C::Error: Display,
{
    /// Start accepting the connections yielded by `incoming`.
    pub fn new<S>(incoming: S) -> Self
    where
        S: Stream<Item = ClientConnection> + Send + 'static,
    {
        let (changes_tx, changes_rx) = watch::channel(0);
        let inner = Arc::new(HubInner {
            channels: RwLock::new(ChannelMap::new()),
            connections: Mutex::new(Vec::new()),
            changes_tx: Mutex::new(Some(changes_tx)),
            changes_rx,
            next_connection_id: AtomicU64::new(1),
            shutdown: CancellationToken::new(),
        });

        tokio::spawn(accept_loop(inner.clone(), incoming));
        Self { inner }
    }

    /// Register `channel` on every current and future connection.
    pub fn register_channel(&self, name: impl Into<String>, channel: impl ServerChannel<C>) {
        let name = name.into();
        let channel: Arc<dyn ServerChannel<C>> = Arc::new(channel);

        let mut channels = self.inner.channels.write();
        for connection in self.inner.connections.lock().iter() {
            connection
                .server
                .register_shared_channel(name.clone(), channel.clone());
        }
        debug!(channel = %name, "registered hub channel");
        channels.insert(name, channel);
    }

    /// Proxy for the channel `name`, served by whichever connection `router`
    /// picks for each call or subscription.
    pub fn get_channel(
        &self,
        name: impl Into<String>,
        router: Arc<dyn ClientRouter<C>>,
    ) -> RoutedChannel<C> {
        RoutedChannel {
            hub: self.inner.clone(),
            name: name.into(),
            router,
        }
    }

    pub fn connections(&self) -> Vec<Arc<Connection<C>>> {
        self.inner.connections()
    }

    pub fn changes(&self) -> watch::Receiver<u64> {
        self.inner.changes()
    }

    /// Stop accepting, drop every connection and wake waiting routers with
    /// [`CallError::Canceled`]. Idempotent.
    pub fn dispose(&self) {
        dispose_hub(&self.inner);
    }
}

fn dispose_hub<C>(inner: &HubInner<C>) {
    if inner.shutdown.is_cancelled() {
        return;
    }
    inner.shutdown.cancel();
    let connections = std::mem::take(&mut *inner.connections.lock());
    info!(connections = connections.len(), "disposing hub");
    for connection in connections {
        connection.client.dispose();
        connection.server.dispose();
    }
    inner.changes_tx.lock().take();
}

impl<C> Drop for IpcServer<C> {
    fn drop(&mut self) {
        dispose_hub(&self.inner);
    }
}

impl<C> std::fmt::Debug for IpcServer<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IpcServer")
            .field("connections", &self.inner.connections.lock().len())
            .field("channels", &self.inner.channels.read().len())
            .finish()
    }
}

async fn accept_loop<C, S>(inner: Arc<HubInner<C>>, incoming: S)
where
    C: Clone + TryFrom<Value> + Send + Sync + 'static,
    C::Error: Display,
    S: Stream<Item = ClientConnection> + Send + 'static,
{
    let mut incoming = std::pin::pin!(incoming);
    loop {
        let next = tokio::select! {
            () = inner.shutdown.cancelled() => break,
            next = incoming.next() => next,
        };
        let Some(connection) = next else {
            debug!("connection source ended");
            break;
        };
        tokio::spawn(serve_connection(inner.clone(), connection));
    }
}

async fn serve_connection<C>(inner: Arc<HubInner<C>>, incoming: ClientConnection)
where
    C: Clone + TryFrom<Value> + Send + Sync + 'static,
    C::Error: Display,
{
    let ClientConnection {
        mut transport,
        disconnected,
    } = incoming;

    let hello = tokio::select! {
        () = inner.shutdown.cancelled() => None,
        hello = transport.recv() => hello,
    };
    let Some(hello) = hello else {
        debug!("client left before announcing itself");
        return;
    };
    let ctx = match read_context::<C>(&hello) {
        Ok(ctx) => ctx,
        Err(err) => {
            warn!(error = %err, "dropping client with invalid context");
            transport.close();
            return;
        }
    };

    let protocol = Protocol::new(transport);
    let id = inner.next_connection_id.fetch_add(1, Ordering::Relaxed);
    let connection = {
        let channels = inner.channels.read();
        let attached = ChannelServer::with_channels(&protocol, ctx.clone(), channels.clone())
            .and_then(|server| Ok((server, ChannelClient::new(&protocol)?)));
        let (server, client) = match attached {
            Ok(pair) => pair,
            Err(err) => {
                warn!(error = %err, "failed to attach connection");
                protocol.close();
                return;
            }
        };
        let connection = Arc::new(Connection {
            id,
            ctx,
            client,
            server,
        });
        if inner.shutdown.is_cancelled() {
            connection.client.dispose();
            connection.server.dispose();
            protocol.close();
            return;
        }
        inner.connections.lock().push(connection.clone());
        connection
    };
    info!(connection = id, "client connected");
    notify_change(&inner);

    tokio::select! {
        () = disconnected.cancelled() => {}
        () = inner.shutdown.cancelled() => {}
    }

    inner.connections.lock().retain(|c| c.id != id);
    connection.client.dispose();
    connection.server.dispose();
    protocol.close();
    info!(connection = id, "client disconnected");
    notify_change(&inner);
}

fn read_context<C>(hello: &[u8]) -> Result<C>
where
    C: TryFrom<Value>,
    C::Error: Display,
{
    let value = ipcmux_wire::decode(hello)?;
    C::try_from(value).map_err(|err| IpcError::InvalidContext(err.to_string()))
}

fn notify_change<C>(inner: &HubInner<C>) {
    if let Some(tx) = inner.changes_tx.lock().as_ref() {
        tx.send_modify(|generation| *generation += 1);
    }
}

/// Hub-side proxy that routes each call or subscription to one connection.
pub struct RoutedChannel<C> {
    hub: Arc<HubInner<C>>,
    name: String,
    router: Arc<dyn ClientRouter<C>>,
}

impl<C> Channel for RoutedChannel<C>
where
    C: Send + Sync + 'static,
{
    fn call(&self, command: &str, arg: Value, token: CancellationToken) -> CallFuture {
        let hub = self.hub.clone();
        let router = self.router.clone();
        let name = self.name.clone();
        let command = command.to_owned();
        async move {
            let connection = tokio::select! {
                routed = router.route_call(&*hub, &command, &arg) => routed?,
                () = token.cancelled() => return Err(CallError::Canceled),
            };
            debug!(connection = connection.id, channel = %name, command = %command, "routed call");
            connection.client.call(&name, &command, arg, token).await
        }
        .boxed()
    }

    fn listen(&self, event: &str, arg: Value) -> Event<Value> {
        let relay = Relay::new();
        let output = relay.event();

        let hub = self.hub.clone();
        let router = self.router.clone();
        let name = self.name.clone();
        let event = event.to_owned();
        tokio::spawn(async move {
            match router.route_event(&*hub, &event, &arg).await {
                Ok(connection) => {
                    debug!(connection = connection.id, channel = %name, event = %event, "routed listen");
                    relay.set_input(connection.client.listen(&name, &event, arg));
                }
                Err(err) => {
                    debug!(channel = %name, event = %event, error = %err, "listen not routed");
                    relay.dispose();
                }
            }
        });
        output
    }
}

impl<C> std::fmt::Debug for RoutedChannel<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoutedChannel")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
