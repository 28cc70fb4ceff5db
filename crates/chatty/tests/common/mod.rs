//! Test harness: a real server on a temp socket plus a minimal blocking
//! client speaking the wire protocol.

#![allow(dead_code)]

use std::{
    io::Read,
    os::unix::net::UnixStream,
    path::PathBuf,
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use chatty::{Config, RunFlags, Server};
use chatty_proto::{
    Message, NICK_WIRE_LEN, Nick, Op, open_connection, read_message, send_data, send_message,
};
use tempfile::TempDir;

pub struct TestServer {
    pub socket: PathBuf,
    pub files_dir: PathBuf,
    pub stats_path: PathBuf,
    flags: RunFlags,
    handle: Option<JoinHandle<std::io::Result<()>>>,
    _dir: TempDir,
}

impl TestServer {
    pub fn start() -> Self {
        Self::start_with(|_| {})
    }

    pub fn start_with(tweak: impl FnOnce(&mut Config)) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut cfg = Config {
            unix_path: dir.path().join("chatty.sock"),
            max_connections: 8,
            threads_in_pool: 4,
            max_msg_size: 128,
            max_file_size: 4,
            max_hist_msgs: 3,
            dir_name: dir.path().join("files"),
            stat_file_name: dir.path().join("chatty.stats"),
        };
        tweak(&mut cfg);

        let socket = cfg.unix_path.clone();
        let files_dir = cfg.dir_name.clone();
        let stats_path = cfg.stat_file_name.clone();

        let server = Server::bind(cfg).expect("bind server");
        let flags = RunFlags::new();
        let run_flags = flags.clone();
        let handle = thread::spawn(move || server.run(&run_flags));

        Self { socket, files_dir, stats_path, flags, handle: Some(handle), _dir: dir }
    }

    pub fn connect_raw(&self) -> UnixStream {
        let stream =
            open_connection(&self.socket, 10, Duration::from_millis(50)).expect("connect");
        stream.set_read_timeout(Some(Duration::from_secs(5))).expect("read timeout");
        stream
    }

    /// Triggers a stats dump and returns the counters of the freshly
    /// appended line: `[nusers, nonline, ndelivered, nnotdelivered,
    /// nfiledelivered, nfilenotdelivered, nerrors]`.
    pub fn dump_counters(&self) -> [u64; 7] {
        let before = std::fs::read_to_string(&self.stats_path).unwrap_or_default().lines().count();
        self.flags.request_dump();

        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let text = std::fs::read_to_string(&self.stats_path).unwrap_or_default();
            let lines: Vec<&str> = text.lines().collect();
            if lines.len() > before {
                let fields: Vec<&str> = lines.last().unwrap().split_whitespace().collect();
                assert_eq!(fields.len(), 9, "dump line shape: {lines:?}");
                assert_eq!(fields[1], "-");
                let mut out = [0u64; 7];
                for (slot, field) in out.iter_mut().zip(&fields[2..]) {
                    *slot = field.parse().expect("numeric counter");
                }
                return out;
            }
            assert!(Instant::now() < deadline, "no stats dump appeared");
            thread::sleep(Duration::from_millis(10));
        }
    }

    pub fn stop(mut self) {
        if let Some(handle) = self.handle.take() {
            self.flags.request_stop();
            handle.join().expect("server thread").expect("server result");
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.flags.request_stop();
            let _ = handle.join();
        }
    }
}

pub fn nick(s: &str) -> Nick {
    Nick::try_from(s).expect("test nick")
}

/// Splits a packed user-list payload into names.
pub fn parse_user_list(payload: &[u8]) -> Vec<String> {
    assert_eq!(payload.len() % NICK_WIRE_LEN, 0, "packed list length");
    payload
        .chunks(NICK_WIRE_LEN)
        .map(|chunk| {
            let end = chunk.iter().position(|&b| b == 0).unwrap_or(chunk.len());
            String::from_utf8(chunk[..end].to_vec()).expect("utf-8 nick")
        })
        .collect()
}

pub struct Client {
    stream: UnixStream,
    pub nick: String,
}

impl Client {
    /// Plain connection, no registration.
    pub fn connect(server: &TestServer) -> Self {
        Self { stream: server.connect_raw(), nick: String::new() }
    }

    /// Connects and registers `name`, asserting the `Ok` + user-list reply.
    pub fn register(server: &TestServer, name: &str) -> Self {
        let mut client = Self::connect(server);
        client.nick = name.to_owned();
        client.request(Op::Register, "", b"");
        let reply = client.expect(Op::Ok);
        assert!(
            parse_user_list(&reply.payload).iter().any(|n| n == name),
            "user list should contain the new nick"
        );
        client
    }

    /// Reconnects an existing nickname on a fresh socket.
    pub fn reconnect(server: &TestServer, name: &str) -> Self {
        let mut client = Self::connect(server);
        client.nick = name.to_owned();
        client.request(Op::Connect, "", b"");
        client.expect(Op::Ok);
        client
    }

    pub fn request(&mut self, op: Op, receiver: &str, payload: &[u8]) {
        let msg = Message::new(op, nick(&self.nick), nick(receiver), payload.to_vec());
        send_message(&mut self.stream, &msg).expect("send request");
    }

    /// Second data frame of a PostFile exchange.
    pub fn send_file_bytes(&mut self, bytes: &[u8]) {
        send_data(&mut self.stream, Nick::empty(), bytes).expect("send file bytes");
    }

    /// Raw request with an arbitrary opcode byte.
    pub fn request_raw_op(&mut self, raw_op: u8) {
        let msg = Message {
            op: raw_op,
            sender: nick(&self.nick),
            receiver: Nick::empty(),
            payload: Vec::new(),
        };
        send_message(&mut self.stream, &msg).expect("send raw request");
    }

    pub fn recv(&mut self) -> Message {
        read_message(&mut self.stream).expect("read reply")
    }

    pub fn expect(&mut self, op: Op) -> Message {
        let msg = self.recv();
        assert_eq!(msg.op(), Ok(op), "unexpected reply {msg:?}");
        msg
    }

    /// Sends a text and asserts the single ack.
    pub fn post_txt_ok(&mut self, to: &str, text: &str) {
        self.request(Op::PostTxt, to, text.as_bytes());
        self.expect(Op::Ok);
    }

    /// Orderly disconnect: the server closes the socket.
    pub fn disconnect(mut self) {
        self.request(Op::Disconnect, "", b"");
        // The server replies nothing; wait for the close.
        let mut scratch = [0u8; 1];
        let _ = self.stream.read(&mut scratch);
    }

    /// Asserts the server closed this connection.
    pub fn expect_closed(mut self) {
        assert!(
            read_message(&mut self.stream).is_err(),
            "connection should have been closed by the server"
        );
    }
}
