use std::{sync::Arc, time::Duration};

use futures_util::future::join_all;
use tracing::{debug, error};

use crate::{
    models::ServerEvent,
    registry::{Connection, ConnectionRegistry, DeliveryError},
};

/// Best-effort fan-out over the registry. Any failed send evicts and closes the
/// recipient; nothing is retried.
#[derive(Debug, Clone)]
pub struct MessageRouter {
    registry: Arc<ConnectionRegistry>,
    send_timeout: Duration,
}

impl MessageRouter {
    pub fn new(registry: Arc<ConnectionRegistry>, send_timeout: Duration) -> Self {
        Self { registry, send_timeout }
    }

    /// Sends `event` to everyone in the room at call time and returns how many
    /// sends succeeded. Sends run concurrently so a stalled peer only costs its
    /// own timeout.
    pub async fn broadcast(&self, room: &str, event: &ServerEvent) -> usize {
        let Some(frame) = encode(room, event) else {
            return 0;
        };

        let sends = self
            .registry
            .snapshot(room)
            .into_iter()
            .map(|(identity, connection)| {
                let frame = frame.clone();
                async move {
                    self.send(room, identity.as_str(), &connection, frame)
                        .await
                        .is_ok()
                }
            });

        join_all(sends).await.into_iter().filter(|delivered| *delivered).count()
    }

    /// `false` both when `target` is not in the room and when the send to it
    /// failed; only the latter evicts.
    pub async fn deliver_private(&self, room: &str, target: &str, event: &ServerEvent) -> bool {
        let Some(connection) = self.registry.lookup(room, target) else {
            debug!(room, target, "private recipient not connected");
            return false;
        };
        let Some(frame) = encode(room, event) else {
            return false;
        };

        self.send(room, target, &connection, frame).await.is_ok()
    }

    pub async fn send(
        &self,
        room: &str,
        identity: &str,
        connection: &Connection,
        frame: String,
    ) -> Result<(), DeliveryError> {
        let result = connection.send(frame, self.send_timeout).await;
        if let Err(err) = &result {
            debug!(room, username = identity, connection = %connection.id(), error = %err, "evicting dead connection");
            self.registry.release(room, identity, connection.id());
            connection.close();
        }
        result
    }
}

fn encode(room: &str, event: &ServerEvent) -> Option<String> {
    event
        .encode()
        .inspect_err(|err| error!(room, error = %err, "failed to encode event"))
        .ok()
}
