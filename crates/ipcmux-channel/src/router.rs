use std::sync::Arc;

use futures_util::future::{BoxFuture, FutureExt};
use ipcmux_wire::Value;

use crate::error::CallError;
use crate::hub::{Connection, ConnectionHub};

/// Routed connection, or [`CallError::Canceled`] if the hub went away first.
pub type RouteFuture<'a, C> = BoxFuture<'a, Result<Arc<Connection<C>>, CallError>>;

/// Picks the connection that serves a routed call or subscription.
pub trait ClientRouter<C>: Send + Sync + 'static {
    fn route_call<'a>(
        &'a self,
        hub: &'a dyn ConnectionHub<C>,
        command: &'a str,
        arg: &'a Value,
    ) -> RouteFuture<'a, C>;

    fn route_event<'a>(
        &'a self,
        hub: &'a dyn ConnectionHub<C>,
        event: &'a str,
        arg: &'a Value,
    ) -> RouteFuture<'a, C>;
}

/// Routes everything to the first connection whose context satisfies a
/// predicate, waiting for one to connect if none does yet.
pub struct StaticRouter<C> {
    predicate: Box<dyn Fn(&C) -> bool + Send + Sync>,
}

impl<C: Send + Sync + 'static> StaticRouter<C> {
    pub fn new(predicate: impl Fn(&C) -> bool + Send + Sync + 'static) -> Self {
        Self {
            predicate: Box::new(predicate),
        }
    }

    /// Resolve to the first matching connection, re-checking every time the
    /// hub's connection set changes.
    pub async fn route(&self, hub: &dyn ConnectionHub<C>) -> Result<Arc<Connection<C>>, CallError> {
        let mut changes = hub.changes();
        loop {
            if let Some(connection) = hub
                .connections()
                .into_iter()
                .find(|connection| (self.predicate)(connection.ctx()))
            {
                return Ok(connection);
            }
            changes.changed().await.map_err(|_| CallError::Canceled)?;
        }
    }
}

impl<C: Send + Sync + 'static> ClientRouter<C> for StaticRouter<C> {
    fn route_call<'a>(
        &'a self,
        hub: &'a dyn ConnectionHub<C>,
        _command: &'a str,
        _arg: &'a Value,
    ) -> RouteFuture<'a, C> {
        self.route(hub).boxed()
    }

    fn route_event<'a>(
        &'a self,
        hub: &'a dyn ConnectionHub<C>,
        _event: &'a str,
        _arg: &'a Value,
    ) -> RouteFuture<'a, C> {
        self.route(hub).boxed()
    }
}

impl<C> std::fmt::Debug for StaticRouter<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticRouter").finish_non_exhaustive()
    }
}
