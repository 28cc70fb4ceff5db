use std::{io, os::unix::net::UnixStream, path::Path, thread, time::Duration};

/// Client-side connection opener.
///
/// The server may still be unlinking a stale socket or not yet listening
/// when a client starts, so connection refusals and a missing path are
/// retried up to `attempts` times with `pause` between tries. Any other
/// error is returned immediately.
pub fn open_connection(path: &Path, attempts: u32, pause: Duration) -> io::Result<UnixStream> {
    let mut tries = 0;
    loop {
        match UnixStream::connect(path) {
            Ok(stream) => return Ok(stream),
            Err(err)
                if tries < attempts &&
                    matches!(
                        err.kind(),
                        io::ErrorKind::NotFound | io::ErrorKind::ConnectionRefused
                    ) =>
            {
                tries += 1;
                thread::sleep(pause);
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::os::unix::net::UnixListener;

    use super::*;

    #[test]
    fn connects_once_the_listener_appears() {
        let dir = std::env::temp_dir().join(format!("chatty-connect-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("late.sock");

        let bind_path = path.clone();
        let binder = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            UnixListener::bind(bind_path).unwrap()
        });

        let stream = open_connection(&path, 20, Duration::from_millis(20));
        assert!(stream.is_ok());

        drop(binder.join().unwrap());
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn gives_up_after_the_retry_budget() {
        let path = Path::new("/nonexistent/chatty-never.sock");
        let err = open_connection(path, 2, Duration::from_millis(5)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
