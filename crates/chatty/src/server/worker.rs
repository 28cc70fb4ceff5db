use chatty_proto::{NetError, Op, read_message};
use tracing::{debug, info, warn};

use crate::server::{ServerState, handlers};

/// Worker loop: pull a ready socket, serve exactly one request, hand the
/// socket back to the readiness set. Exits when the ready queue is closed.
pub(crate) fn run(state: &ServerState) {
    while let Some(fd) = state.ready.pop() {
        // The stream can be gone if another thread disconnected this client
        // between readiness and now.
        let Some(stream) = state.lock_connections().stream(fd) else {
            continue;
        };

        let msg = match read_message(&mut &*stream) {
            Ok(msg) => msg,
            Err(NetError::Closed | NetError::Malformed(_)) => {
                debug!(fd, "peer closed");
                handlers::disconnect_client(state, fd);
                continue;
            }
            Err(NetError::Io(err)) => {
                panic!("unrecoverable read error on client {fd}: {err}")
            }
        };

        let mut still_connected = true;
        match msg.op() {
            Ok(op) if op.is_client_request() => {
                if msg.sender.is_empty() {
                    // Spurious request; nothing sensible to answer.
                    info!(fd, op = %op, "ignoring request with empty sender");
                } else {
                    handlers::dispatch(op, fd, &msg, state, &stream, &mut still_connected);
                }
            }
            _ => {
                warn!(fd, op = msg.op, "invalid opcode");
                state.stats.add_error();
                handlers::reply_status(state, fd, &stream, Op::Fail, "invalid message", &mut still_connected);
            }
        }

        if still_connected {
            handlers::rearm(state, fd);
        }
    }
}
