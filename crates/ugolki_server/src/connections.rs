//! Registry of live participant connections per session.

use crate::protocol::ServerMessage;
use crate::session::{GameId, UserId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tracing::{debug, instrument, trace};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier of one socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, derive_more::Display)]
#[display("conn-{}", _0)]
pub struct ConnectionId(u64);

/// Sending half of a participant's socket.
///
/// Messages are queued on an unbounded channel and written out by the
/// transport, so sending never blocks the session that produced them.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    tx: mpsc::UnboundedSender<ServerMessage>,
}

impl ConnectionHandle {
    /// Creates a handle and the receiver the transport drains.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ServerMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = ConnectionId(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed));
        (Self { id, tx }, rx)
    }

    /// Returns the connection id.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queues a message. Returns `false` if the socket has gone away.
    pub fn send(&self, message: ServerMessage) -> bool {
        let delivered = self.tx.send(message).is_ok();
        if !delivered {
            debug!(connection = %self.id, "Dropped message for closed connection");
        }
        delivered
    }
}

type Table = HashMap<GameId, HashMap<UserId, ConnectionHandle>>;

/// `(session, participant) -> connection` table.
///
/// Purely in-memory; rebuilt as participants reconnect.
#[derive(Debug, Clone, Default)]
pub struct ConnectionRegistry {
    table: Arc<Mutex<Table>>,
}

impl ConnectionRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self) -> MutexGuard<'_, Table> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers (or replaces) a participant's connection for a session.
    #[instrument(skip(self, handle), fields(connection = %handle.id()))]
    pub fn register(&self, game_id: GameId, user_id: UserId, handle: ConnectionHandle) {
        self.table()
            .entry(game_id)
            .or_default()
            .insert(user_id, handle);
        debug!("Connection registered");
    }

    /// Stable copy of a session's connections.
    pub fn snapshot(&self, game_id: GameId) -> Vec<(UserId, ConnectionHandle)> {
        self.table()
            .get(&game_id)
            .map(|connections| {
                connections
                    .iter()
                    .map(|(user_id, handle)| (*user_id, handle.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Sends a message to every connection of a session.
    pub fn broadcast(&self, game_id: GameId, message: &ServerMessage) -> usize {
        self.broadcast_except(game_id, message, None)
    }

    /// Sends a message to every connection of a session except `skip`.
    ///
    /// Iterates over a snapshot so concurrent connects and disconnects never
    /// observe a half-updated set.
    pub fn broadcast_except(
        &self,
        game_id: GameId,
        message: &ServerMessage,
        skip: Option<UserId>,
    ) -> usize {
        let delivered = self
            .snapshot(game_id)
            .into_iter()
            .filter(|(user_id, _)| Some(*user_id) != skip)
            .filter(|(_, handle)| handle.send(message.clone()))
            .count();
        trace!(game_id, delivered, "Broadcast sent");
        delivered
    }

    /// Removes one socket from every session it is registered in.
    ///
    /// Entries registered by a newer socket of the same user are left alone.
    /// Returns the sessions the socket was removed from.
    #[instrument(skip(self))]
    pub fn remove_connection(&self, user_id: UserId, connection: ConnectionId) -> Vec<GameId> {
        let mut table = self.table();
        let mut affected = Vec::new();

        for (game_id, connections) in table.iter_mut() {
            if connections
                .get(&user_id)
                .is_some_and(|handle| handle.id() == connection)
            {
                connections.remove(&user_id);
                affected.push(*game_id);
            }
        }

        table.retain(|_, connections| !connections.is_empty());
        affected.sort_unstable();
        debug!(sessions = ?affected, "Connection removed");
        affected
    }

    /// Checks whether any participant of a session is connected.
    pub fn has_connections(&self, game_id: GameId) -> bool {
        self.table()
            .get(&game_id)
            .is_some_and(|connections| !connections.is_empty())
    }

    /// Participants currently connected to a session.
    pub fn connected_users(&self, game_id: GameId) -> Vec<UserId> {
        let mut users: Vec<UserId> = self
            .snapshot(game_id)
            .into_iter()
            .map(|(user_id, _)| user_id)
            .collect();
        users.sort_unstable();
        users
    }
}
