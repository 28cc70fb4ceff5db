mod dispatcher;
mod handlers;
mod worker;

use std::{
    io,
    os::{fd::AsRawFd, unix::net::UnixListener},
    path::Path,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    thread,
};

use chatty_proto::Message;
use chatty_sync::{MemberList, ReadyQueue, RingBuffer, ShardMap};
use mio::{Interest, Poll, Registry, Token, unix::SourceFd};
use tracing::{debug, error, info};

use crate::{config::Config, connections::Connections, stats::Stats};

/// A registered user: bounded message history plus the socket currently
/// bound to the nickname, if any.
#[derive(Debug)]
pub(crate) struct UserRecord {
    pub(crate) history: RingBuffer<Message>,
    pub(crate) fd: Option<i32>,
}

impl UserRecord {
    pub(crate) fn new(history_capacity: usize) -> Self {
        Self { history: RingBuffer::new(history_capacity), fd: None }
    }
}

/// Everything the dispatcher and the workers share.
pub(crate) struct ServerState {
    pub(crate) cfg: Config,
    pub(crate) users: ShardMap<UserRecord>,
    pub(crate) groups: ShardMap<Arc<MemberList>>,
    pub(crate) connections: Mutex<Connections>,
    pub(crate) ready: ReadyQueue<i32>,
    pub(crate) stats: Stats,
    /// Handle for re-arming and dropping client sockets in the readiness
    /// set; cloned from the dispatcher's poll.
    pub(crate) registry: Registry,
}

impl ServerState {
    pub(crate) fn lock_connections(&self) -> std::sync::MutexGuard<'_, Connections> {
        self.connections.lock().expect("connections lock poisoned")
    }
}

/// Externally driven lifecycle switches.
///
/// The signal handlers only flip these flags; the dispatcher observes them
/// between poll rounds.
#[derive(Clone, Default)]
pub struct RunFlags {
    stop: Arc<AtomicUsize>,
    dump: Arc<AtomicBool>,
}

impl RunFlags {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flag set to the signal number by SIGINT/SIGQUIT/SIGTERM.
    pub fn stop_flag(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.stop)
    }

    /// Flag set by SIGUSR1 to request a statistics dump.
    pub fn dump_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.dump)
    }

    pub fn request_stop(&self) {
        self.stop.store(1, Ordering::Relaxed);
    }

    pub fn should_stop(&self) -> bool {
        self.stop.load(Ordering::Relaxed) != 0
    }

    pub fn request_dump(&self) {
        self.dump.store(true, Ordering::Relaxed);
    }

    pub(crate) fn take_dump(&self) -> bool {
        self.dump.swap(false, Ordering::Relaxed)
    }
}

/// The chat server: a bound listener plus its shared state, not yet
/// serving. `run` blocks until the stop flag is raised.
pub struct Server {
    state: Arc<ServerState>,
    poll: Poll,
    listener: UnixListener,
}

impl Server {
    /// Binds the socket, prepares the spill directory and the readiness
    /// set. A stale socket file from a previous run is removed first.
    pub fn bind(cfg: Config) -> io::Result<Self> {
        let _ = std::fs::remove_file(&cfg.unix_path);
        std::fs::create_dir_all(&cfg.dir_name)?;

        let listener = UnixListener::bind(&cfg.unix_path)?;
        listener.set_nonblocking(true)?;

        let poll = Poll::new()?;
        let listener_fd = listener.as_raw_fd();
        poll.registry().register(
            &mut SourceFd(&listener_fd),
            Token(listener_fd as usize),
            Interest::READABLE,
        )?;
        let registry = poll.registry().try_clone()?;

        let state = Arc::new(ServerState {
            connections: Mutex::new(Connections::new(cfg.max_connections)),
            users: ShardMap::new(),
            groups: ShardMap::new(),
            ready: ReadyQueue::new(),
            stats: Stats::new(),
            registry,
            cfg,
        });

        Ok(Self { state, poll, listener })
    }

    pub fn socket_path(&self) -> &Path {
        &self.state.cfg.unix_path
    }

    /// Serves until `flags` requests a stop, then tears everything down:
    /// workers are joined, the listener is closed and the socket path
    /// unlinked.
    pub fn run(self, flags: &RunFlags) -> io::Result<()> {
        let Self { state, mut poll, listener } = self;

        let mut workers = Vec::with_capacity(state.cfg.threads_in_pool);
        for i in 0..state.cfg.threads_in_pool {
            let state = Arc::clone(&state);
            let handle = thread::Builder::new()
                .name(format!("worker-{i}"))
                .spawn(move || worker::run(&state))?;
            workers.push(handle);
        }

        info!(
            path = %state.cfg.unix_path.display(),
            workers = state.cfg.threads_in_pool,
            "server listening"
        );

        dispatcher::Dispatcher::new(&mut poll, &listener, &state, flags).run();

        debug!("draining ready queue");
        state.ready.clear();
        state.ready.close();
        let mut worker_panicked = false;
        for handle in workers {
            if handle.join().is_err() {
                worker_panicked = true;
            }
        }

        drop(listener);
        let _ = std::fs::remove_file(&state.cfg.unix_path);

        // A panicked worker means a fatal runtime failure, not a clean
        // shutdown; the caller must exit nonzero.
        if worker_panicked {
            error!("worker thread panicked");
            return Err(io::Error::other("worker thread panicked"));
        }
        info!("shutdown complete");
        Ok(())
    }
}
