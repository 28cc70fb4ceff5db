use std::{
    io::{self, Write},
    sync::Mutex,
    time::{SystemTime, UNIX_EPOCH},
};

/// The seven runtime counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Counters {
    pub nusers: u64,
    pub nonline: u64,
    pub ndelivered: u64,
    pub nnotdelivered: u64,
    pub nfiledelivered: u64,
    pub nfilenotdelivered: u64,
    pub nerrors: u64,
}

/// Batch of counter increments accumulated outside the stats lock.
///
/// Handlers collect deltas while they hold connection and catalogue locks
/// and apply them afterwards in one lock take, so the stats mutex is never
/// acquired below those locks.
#[derive(Debug, Default, Clone, Copy)]
pub struct StatsDelta {
    pub delivered: u64,
    pub not_delivered: u64,
    pub file_delivered: u64,
    pub file_not_delivered: u64,
    pub errors: u64,
}

impl StatsDelta {
    pub fn error() -> Self {
        Self { errors: 1, ..Self::default() }
    }

    pub fn is_zero(&self) -> bool {
        self.delivered == 0 &&
            self.not_delivered == 0 &&
            self.file_delivered == 0 &&
            self.file_not_delivered == 0 &&
            self.errors == 0
    }
}

/// Counter store behind a single mutex.
#[derive(Debug, Default)]
pub struct Stats {
    inner: Mutex<Counters>,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Counters {
        *self.inner.lock().expect("stats lock poisoned")
    }

    pub fn apply(&self, delta: StatsDelta) {
        if delta.is_zero() {
            return;
        }
        let mut c = self.inner.lock().expect("stats lock poisoned");
        c.ndelivered += delta.delivered;
        c.nnotdelivered += delta.not_delivered;
        c.nfiledelivered += delta.file_delivered;
        c.nfilenotdelivered += delta.file_not_delivered;
        c.nerrors += delta.errors;
    }

    pub fn add_error(&self) {
        self.apply(StatsDelta::error());
    }

    pub fn user_registered(&self) {
        self.inner.lock().expect("stats lock poisoned").nusers += 1;
    }

    pub fn user_removed(&self) {
        let mut c = self.inner.lock().expect("stats lock poisoned");
        c.nusers = c.nusers.saturating_sub(1);
    }

    pub fn client_online(&self) {
        self.inner.lock().expect("stats lock poisoned").nonline += 1;
    }

    pub fn client_offline(&self) {
        let mut c = self.inner.lock().expect("stats lock poisoned");
        c.nonline = c.nonline.saturating_sub(1);
    }

    /// Appends one dump line: unix timestamp, then the counters in fixed
    /// order.
    pub fn dump(&self, w: &mut impl Write) -> io::Result<()> {
        let ts = SystemTime::now().duration_since(UNIX_EPOCH).map_or(0, |d| d.as_secs());
        let c = self.snapshot();
        writeln!(
            w,
            "{ts} - {} {} {} {} {} {} {}",
            c.nusers,
            c.nonline,
            c.ndelivered,
            c.nnotdelivered,
            c.nfiledelivered,
            c.nfilenotdelivered,
            c.nerrors
        )
    }
}
