use ipcmux_transport::Transport;
use ipcmux_wire::Value;

use crate::channel::ServerChannel;
use crate::client::{ChannelClient, ChannelProxy};
use crate::error::Result;
use crate::protocol::Protocol;
use crate::server::ChannelServer;

/// A symmetric endpoint: serves channels to, and consumes channels from,
/// the process on the other end of one connection.
///
/// On construction the peer writes its context value as a single codec
/// value. A [`IpcServer`](crate::IpcServer) on the other end reads it to
/// identify the connection.
#[derive(Debug)]
pub struct IpcPeer<C = String> {
    protocol: Protocol,
    client: ChannelClient,
    server: ChannelServer<C>,
}

impl<C> IpcPeer<C>
where
    C: Clone + Into<Value> + Send + Sync + 'static,
{
    /// Announce `ctx` on `transport` and start serving and consuming channels.
    pub fn new(transport: Transport, ctx: C) -> Result<Self> {
        let hello = ipcmux_wire::encode(&ctx.clone().into())?;
        transport.send(hello)?;

        let protocol = Protocol::new(transport);
        let client = ChannelClient::new(&protocol)?;
        let server = ChannelServer::new(&protocol, ctx)?;
        Ok(Self {
            protocol,
            client,
            server,
        })
    }

    /// Connect to a hub listening on a Unix domain socket.
    #[cfg(unix)]
    pub async fn connect(path: impl AsRef<std::path::Path>, ctx: C) -> Result<Self> {
        let transport = ipcmux_transport::UnixSocketListener::connect(path.as_ref()).await?;
        tracing::info!(path = ?path.as_ref(), "connected to hub");
        Self::new(transport, ctx)
    }

    pub fn register_channel(&self, name: impl Into<String>, channel: impl ServerChannel<C>) {
        self.server.register_channel(name, channel);
    }

    pub fn get_channel(&self, name: impl Into<String>) -> ChannelProxy {
        self.client.get_channel(name)
    }

    pub fn client(&self) -> &ChannelClient {
        &self.client
    }

    pub fn server(&self) -> &ChannelServer<C> {
        &self.server
    }

    /// Fires once the connection closes from either side.
    pub fn closed(&self) -> tokio_util::sync::CancellationToken {
        self.protocol.closed_token()
    }

    /// Tear down both sides and close the connection. Idempotent.
    pub fn dispose(&self) {
        self.client.dispose();
        self.server.dispose();
        self.protocol.close();
    }
}
