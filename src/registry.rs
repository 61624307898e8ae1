use std::{collections::HashMap, time::Duration};

use dashmap::{DashMap, mapref::entry::Entry};
use thiserror::Error;
use tokio::sync::mpsc::{self, error::SendTimeoutError};
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::debug;
use uuid::Uuid;

use crate::models::Identity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DeliveryError {
    #[error("connection is closed")]
    Closed,
    #[error("send timed out")]
    TimedOut,
}

/// Handle to one client. Frames go into a bounded queue drained by the
/// connection's writer; closing cancels both the writer and the reader.
#[derive(Debug, Clone)]
pub struct Connection {
    id: Uuid,
    outbound: mpsc::Sender<String>,
    closed: CancellationToken,
}

impl Connection {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<String>) {
        let (outbound, receiver) = mpsc::channel(capacity.max(1));
        let connection = Self {
            id: Uuid::now_v7(),
            outbound,
            closed: CancellationToken::new(),
        };
        (connection, receiver)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub async fn send(&self, frame: String, timeout: Duration) -> Result<(), DeliveryError> {
        if self.closed.is_cancelled() {
            return Err(DeliveryError::Closed);
        }

        self.outbound
            .send_timeout(frame, timeout)
            .await
            .map_err(|err| match err {
                SendTimeoutError::Timeout(_) => DeliveryError::TimedOut,
                SendTimeoutError::Closed(_) => DeliveryError::Closed,
            })
    }

    pub fn close(&self) {
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled() || self.outbound.is_closed()
    }

    pub fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.closed.cancelled()
    }

    pub(crate) fn close_signal(&self) -> CancellationToken {
        self.closed.clone()
    }
}

type Peers = HashMap<Identity, Connection>;

/// room -> identity -> connection. A room key exists only while it has at
/// least one entry; each room sits behind its own shard lock.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    rooms: DashMap<String, Peers>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admits `connection` as `identity` in `room`. A connection already bound
    /// to the same pair is closed and replaced.
    pub fn connect(&self, room: &str, identity: Identity, connection: Connection) {
        let (opened, superseded) = match self.rooms.entry(room.to_owned()) {
            Entry::Occupied(mut peers) => (false, peers.get_mut().insert(identity.clone(), connection)),
            Entry::Vacant(slot) => {
                slot.insert(HashMap::from([(identity.clone(), connection)]));
                (true, None)
            }
        };

        // room_count takes every shard lock, so only after the entry is released
        if opened {
            debug!(room, rooms = self.room_count(), "room opened");
        }
        if let Some(previous) = superseded {
            debug!(room, username = %identity, connection = %previous.id(), "closing superseded connection");
            previous.close();
        }
    }

    pub fn disconnect(&self, room: &str, identity: &str) {
        self.remove_where(room, identity, |_| true);
    }

    /// Like [`disconnect`](Self::disconnect), but only while the entry still
    /// holds the connection with `connection_id`.
    pub fn release(&self, room: &str, identity: &str, connection_id: Uuid) -> bool {
        self.remove_where(room, identity, |connection| connection.id() == connection_id)
    }

    pub fn snapshot(&self, room: &str) -> Vec<(Identity, Connection)> {
        self.rooms
            .get(room)
            .map(|peers| {
                peers
                    .iter()
                    .map(|(identity, connection)| (identity.clone(), connection.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn lookup(&self, room: &str, identity: &str) -> Option<Connection> {
        self.rooms.get(room)?.get(identity).cloned()
    }

    #[cfg(test)]
    pub fn is_occupied(&self, room: &str) -> bool {
        self.rooms.contains_key(room)
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    fn remove_where(
        &self,
        room: &str,
        identity: &str,
        matches: impl FnOnce(&Connection) -> bool,
    ) -> bool {
        {
            let Some(mut peers) = self.rooms.get_mut(room) else {
                return false;
            };
            if !peers.get(identity).is_some_and(matches) {
                return false;
            }
            peers.remove(identity);
        }

        if self.rooms.remove_if(room, |_, peers| peers.is_empty()).is_some() {
            debug!(room, rooms = self.room_count(), "room closed");
        }
        true
    }
}
