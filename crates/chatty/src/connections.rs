use std::{
    collections::HashMap,
    os::{fd::AsRawFd, unix::net::UnixStream},
    sync::Arc,
};

use chatty_proto::{NICK_WIRE_LEN, Nick};

/// One occupied entry of the connected-user table.
#[derive(Debug, Clone, Copy)]
pub struct Slot {
    pub nick: Nick,
    pub fd: i32,
}

/// Registry of live sockets plus the fixed connected-user table.
///
/// Every accepted socket lives in `streams` from accept until disconnect;
/// a slot is occupied only once the socket is bound to a nickname. Both are
/// covered by the single mutex wrapped around this struct in `ServerState`,
/// which is also what serialises writes to any client socket.
///
/// The slot table is the "who is online" projection: answering `UsrList`
/// never walks the user catalogue.
#[derive(Debug)]
pub struct Connections {
    streams: HashMap<i32, Arc<UnixStream>>,
    slots: Vec<Option<Slot>>,
}

impl Connections {
    pub fn new(max_connections: usize) -> Self {
        Self { streams: HashMap::new(), slots: vec![None; max_connections] }
    }

    /// Tracks a freshly accepted socket; returns its descriptor.
    pub fn add_stream(&mut self, stream: UnixStream) -> i32 {
        let fd = stream.as_raw_fd();
        self.streams.insert(fd, Arc::new(stream));
        fd
    }

    pub fn stream(&self, fd: i32) -> Option<Arc<UnixStream>> {
        self.streams.get(&fd).cloned()
    }

    /// Drops the socket from the registry. The returned `Arc` closes the
    /// descriptor once the last in-flight sender lets go of it.
    pub fn remove_stream(&mut self, fd: i32) -> Option<Arc<UnixStream>> {
        self.streams.remove(&fd)
    }

    /// Binds `nick` to `fd` in the first free slot.
    pub fn bind_slot(&mut self, nick: Nick, fd: i32) -> Option<usize> {
        let free = self.slots.iter().position(Option::is_none)?;
        self.slots[free] = Some(Slot { nick, fd });
        Some(free)
    }

    /// Clears the slot occupied by `fd`, returning the nick it was bound to.
    pub fn clear_slot(&mut self, fd: i32) -> Option<Nick> {
        for slot in &mut self.slots {
            if slot.as_ref().is_some_and(|s| s.fd == fd) {
                return slot.take().map(|s| s.nick);
            }
        }
        None
    }

    /// Whether `fd` is bound to a nickname (i.e. the client is online).
    pub fn is_bound(&self, fd: i32) -> bool {
        self.slots.iter().flatten().any(|s| s.fd == fd)
    }

    pub fn nick_of(&self, fd: i32) -> Option<Nick> {
        self.slots.iter().flatten().find(|s| s.fd == fd).map(|s| s.nick)
    }

    pub fn online_count(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    /// Packed online-user list: one zero-padded name field per entry.
    pub fn packed_online_list(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.online_count() * NICK_WIRE_LEN);
        for slot in self.slots.iter().flatten() {
            out.extend_from_slice(&slot.nick.to_wire());
        }
        out
    }
}
