use std::{
    io,
    os::{
        fd::AsRawFd,
        unix::net::{UnixListener, UnixStream},
    },
    sync::Arc,
    time::Duration,
};

use chatty_proto::{Message, Nick, Op, send_message};
use mio::{Events, Interest, Poll, Token, unix::SourceFd};
use tracing::{debug, warn};

use crate::server::{RunFlags, ServerState};

/// How long one poll round may sleep; bounds the latency of stop and dump
/// flag observation.
const POLL_TIMEOUT: Duration = Duration::from_millis(100);

/// Single-threaded owner of the readiness set.
///
/// A client socket is either registered here or held by exactly one worker,
/// never both: readable sockets are deregistered before they are pushed on
/// the ready queue, and workers re-register them once the request is done.
pub(crate) struct Dispatcher<'a> {
    poll: &'a mut Poll,
    listener: &'a UnixListener,
    listener_fd: i32,
    state: &'a Arc<ServerState>,
    flags: &'a RunFlags,
}

impl<'a> Dispatcher<'a> {
    pub(crate) fn new(
        poll: &'a mut Poll,
        listener: &'a UnixListener,
        state: &'a Arc<ServerState>,
        flags: &'a RunFlags,
    ) -> Self {
        let listener_fd = listener.as_raw_fd();
        Self { poll, listener, listener_fd, state, flags }
    }

    pub(crate) fn run(&mut self) {
        let mut events = Events::with_capacity(128);

        while !self.flags.should_stop() {
            if self.flags.take_dump() {
                self.dump_stats();
            }

            match self.poll.poll(&mut events, Some(POLL_TIMEOUT)) {
                Ok(()) => {}
                Err(ref err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => panic!("readiness poll failed: {err}"),
            }

            for event in events.iter() {
                let fd = event.token().0 as i32;
                if fd == self.listener_fd {
                    self.accept_clients();
                } else {
                    // Ownership moves to a worker: out of the set first so
                    // the socket cannot be dispatched twice.
                    let _ = self.state.registry.deregister(&mut SourceFd(&fd));
                    self.state.ready.push(fd);
                }
            }
        }
    }

    fn accept_clients(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, _addr)) => self.admit(stream),
                Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => panic!("accept failed: {err}"),
            }
        }
    }

    fn admit(&mut self, stream: UnixStream) {
        let online = self.state.stats.snapshot().nonline as usize;
        if online >= self.state.cfg.max_connections {
            warn!("refusing connection, server full");
            let refusal =
                Message::new(Op::Fail, Nick::empty(), Nick::empty(), b"server full".to_vec());
            let _ = send_message(&mut &stream, &refusal);
            self.state.stats.add_error();
            return;
        }

        // Workers read with blocking semantics; only the readiness set is
        // event driven.
        if let Err(err) = stream.set_nonblocking(false) {
            warn!(?err, "couldn't restore blocking mode on accepted socket");
            return;
        }

        let fd = self.state.lock_connections().add_stream(stream);
        if let Err(err) =
            self.state.registry.register(&mut SourceFd(&fd), Token(fd as usize), Interest::READABLE)
        {
            warn!(?err, fd, "couldn't watch accepted socket");
            self.state.lock_connections().remove_stream(fd);
            return;
        }
        debug!(fd, "client accepted");
    }

    fn dump_stats(&self) {
        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(&self.state.cfg.stat_file_name)
            .unwrap_or_else(|err| panic!("cannot open stats file: {err}"));
        self.state
            .stats
            .dump(&mut file)
            .unwrap_or_else(|err| panic!("cannot write stats file: {err}"));
        debug!(path = %self.state.cfg.stat_file_name.display(), "statistics dumped");
    }
}
