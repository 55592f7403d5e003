//! C4: connection registry (spec.md §3, §4.4).
//!
//! Owns every `Connection`, issuing ids on insert. Mutex ordering note
//! (spec.md §5): this registry's lock is always taken after the
//! parameter engine's and before the arbitrator's, never the reverse.
//!
//! Each entry also owns an outbound packet queue: PARAM_UPDATE (C8) and
//! key/command delivery (C5, C7) are computed by whichever task is
//! holding the registry lock at the time, then handed to the
//! connection's own task through this queue rather than written to the
//! socket directly from someone else's task.

use brlapi_core::connection::{Connection, ConnectionId};
use brlapi_core::packet::Packet;
use std::collections::HashMap;
use tokio::sync::mpsc;

struct Entry {
    conn: Connection,
    outbox: mpsc::UnboundedSender<Packet>,
}

#[derive(Default)]
pub struct Registry {
    entries: HashMap<ConnectionId, Entry>,
    next_id: u64,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new connection, returning its id and the receiving
    /// end of its outbound packet queue. The connection's own task
    /// should drain the receiver and write whatever arrives to its
    /// socket.
    pub fn insert(&mut self) -> (ConnectionId, mpsc::UnboundedReceiver<Packet>) {
        let id = ConnectionId::from_raw(self.next_id);
        self.next_id += 1;
        let (outbox, rx) = mpsc::unbounded_channel();
        self.entries.insert(
            id,
            Entry {
                conn: Connection::new(id),
                outbox,
            },
        );
        (id, rx)
    }

    pub fn remove(&mut self, id: ConnectionId) -> Option<Connection> {
        self.entries.remove(&id).map(|entry| entry.conn)
    }

    pub fn get(&self, id: ConnectionId) -> Option<&Connection> {
        self.entries.get(&id).map(|entry| &entry.conn)
    }

    pub fn get_mut(&mut self, id: ConnectionId) -> Option<&mut Connection> {
        self.entries.get_mut(&id).map(|entry| &mut entry.conn)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ConnectionId, &Connection)> {
        self.entries.iter().map(|(id, entry)| (id, &entry.conn))
    }

    /// Pushes `packet` onto `id`'s outbound queue. Returns `false` if
    /// the connection is gone or its task has stopped reading — the
    /// caller has nothing useful to do about either case.
    pub fn send(&self, id: ConnectionId, packet: Packet) -> bool {
        match self.entries.get(&id) {
            Some(entry) => entry.outbox.send(packet).is_ok(),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use brlapi_core::packet::PacketType;

    #[test]
    fn insert_assigns_increasing_ids() {
        let mut registry = Registry::new();
        let (a, _) = registry.insert();
        let (b, _) = registry.insert();
        assert_ne!(a, b);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn remove_drops_the_connection() {
        let mut registry = Registry::new();
        let (id, _) = registry.insert();
        assert!(registry.remove(id).is_some());
        assert!(registry.get(id).is_none());
    }

    #[test]
    fn send_delivers_to_the_connections_own_queue() {
        let mut registry = Registry::new();
        let (id, mut rx) = registry.insert();
        assert!(registry.send(id, Packet::empty(PacketType::Ack)));
        let delivered = rx.try_recv().unwrap();
        assert_eq!(delivered.ptype, PacketType::Ack);
    }

    #[test]
    fn send_to_an_unknown_connection_fails() {
        let registry = Registry::new();
        assert!(!registry.send(ConnectionId::from_raw(0), Packet::empty(PacketType::Ack)));
    }
}
