use std::io;

use thiserror::Error;

/// Outcome classification for socket I/O.
///
/// `Closed` covers both an orderly shutdown (0-byte read) and the errno
/// family that means the peer is gone; callers run the disconnect path and
/// carry on. `Malformed` means the peer sent bytes that cannot be a frame;
/// it is handled like a disconnect. `Io` is everything else and is treated
/// as fatal upstream.
#[derive(Error, Debug)]
pub enum NetError {
    #[error("peer disconnected")]
    Closed,
    #[error("malformed frame: {0}")]
    Malformed(&'static str),
    #[error("i/o error")]
    Io(#[source] io::Error),
}

impl NetError {
    /// Buckets an `io::Error` into `Closed` or `Io`.
    pub fn classify(err: io::Error) -> Self {
        if is_disconnect(&err) { Self::Closed } else { Self::Io(err) }
    }

    pub fn is_disconnect(&self) -> bool {
        matches!(self, Self::Closed | Self::Malformed(_))
    }
}

fn is_disconnect(err: &io::Error) -> bool {
    use io::ErrorKind;

    matches!(
        err.kind(),
        ErrorKind::BrokenPipe |
            ErrorKind::ConnectionReset |
            ErrorKind::ConnectionAborted |
            ErrorKind::ConnectionRefused |
            ErrorKind::NotConnected |
            ErrorKind::UnexpectedEof
    ) || err.raw_os_error() == Some(libc::EBADF)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disconnect_kinds_map_to_closed() {
        for kind in [
            io::ErrorKind::BrokenPipe,
            io::ErrorKind::ConnectionReset,
            io::ErrorKind::ConnectionAborted,
            io::ErrorKind::ConnectionRefused,
        ] {
            assert!(matches!(NetError::classify(kind.into()), NetError::Closed));
        }
    }

    #[test]
    fn bad_descriptor_maps_to_closed() {
        let err = io::Error::from_raw_os_error(libc::EBADF);
        assert!(matches!(NetError::classify(err), NetError::Closed));
    }

    #[test]
    fn other_errors_stay_io() {
        let err = io::Error::new(io::ErrorKind::OutOfMemory, "enomem");
        assert!(matches!(NetError::classify(err), NetError::Io(_)));
    }
}
