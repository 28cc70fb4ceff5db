use std::{os::unix::net::UnixStream, sync::Arc};

use chatty_proto::{Message, NetError, Nick, Op, read_data, send_message};
use chatty_sync::{MemberError, MemberList};
use mio::{Interest, Token, unix::SourceFd};
use tracing::{debug, info, warn};

use crate::{
    connections::Connections,
    server::{ServerState, UserRecord},
    stats::StatsDelta,
};

/// Entry point for one validated client request. `still_connected` must end
/// up `false` whenever the requester's socket is no longer usable, so the
/// worker knows not to re-arm it.
pub(crate) fn dispatch(
    op: Op,
    fd: i32,
    msg: &Message,
    state: &ServerState,
    stream: &Arc<UnixStream>,
    still_connected: &mut bool,
) {
    match op {
        Op::Register => register(state, fd, msg, stream, still_connected),
        Op::Connect => bind_online(state, fd, stream, msg.sender, still_connected),
        Op::PostTxt => post_txt(state, fd, msg, stream, still_connected),
        Op::PostTxtAll => post_txt_all(state, fd, msg, stream, still_connected),
        Op::PostFile => post_file(state, fd, msg, stream, still_connected),
        Op::GetFile => get_file(state, fd, msg, stream, still_connected),
        Op::GetPrevMsgs => get_prev_msgs(state, fd, msg, stream, still_connected),
        Op::UsrList => send_user_list(state, fd, stream, msg.sender, still_connected),
        Op::Unregister => unregister(state, fd, msg, stream, still_connected),
        Op::Disconnect => {
            disconnect_client(state, fd);
            *still_connected = false;
        }
        Op::CreateGroup => create_group(state, fd, msg, stream, still_connected),
        Op::AddGroup => add_group(state, fd, msg, stream, still_connected),
        Op::DelGroup => del_group(state, fd, msg, stream, still_connected),
        _ => unreachable!("dispatch called with a non-client opcode"),
    }
}

/// Sends `msg` to the requester; a dead peer turns into a disconnect
/// instead of an error reply loop.
fn send_to_requester(
    state: &ServerState,
    fd: i32,
    stream: &UnixStream,
    msg: &Message,
    still_connected: &mut bool,
) {
    match send_message(&mut &*stream, msg) {
        Ok(()) => {}
        Err(NetError::Closed | NetError::Malformed(_)) => {
            debug!(fd, "requester gone mid-reply");
            disconnect_client(state, fd);
            *still_connected = false;
        }
        Err(NetError::Io(err)) => {
            panic!("unrecoverable write error on client {fd}: {err}")
        }
    }
}

/// Status frame (ack or error) with a short human-readable payload.
pub(crate) fn reply_status(
    state: &ServerState,
    fd: i32,
    stream: &UnixStream,
    op: Op,
    text: &str,
    still_connected: &mut bool,
) {
    let reply = Message::new(op, Nick::empty(), Nick::empty(), text.as_bytes().to_vec());
    send_to_requester(state, fd, stream, &reply, still_connected);
}

/// Error reply plus the error counter bump that goes with it.
fn reply_error(
    state: &ServerState,
    fd: i32,
    stream: &UnixStream,
    op: Op,
    text: &str,
    still_connected: &mut bool,
) {
    state.stats.add_error();
    reply_status(state, fd, stream, op, text, still_connected);
}

/// Puts the socket back into the readiness set once a request is done.
pub(crate) fn rearm(state: &ServerState, fd: i32) {
    if let Err(err) =
        state.registry.register(&mut SourceFd(&fd), Token(fd as usize), Interest::READABLE)
    {
        warn!(?err, fd, "couldn't re-arm client socket");
        disconnect_client(state, fd);
    }
}

/// The disconnect routine: frees the connected-user slot, unbinds the
/// registered record, forgets the stream and takes the socket out of the
/// readiness set. Safe to call for sockets that were never bound or are
/// already gone.
pub(crate) fn disconnect_client(state: &ServerState, fd: i32) {
    let (nick, stream) = {
        let mut conns = state.lock_connections();
        let nick = conns.clear_slot(fd);
        if let Some(nick) = nick {
            state.users.with(&nick, |rec| {
                if let Some(rec) = rec {
                    if rec.fd == Some(fd) {
                        rec.fd = None;
                    }
                }
            });
        }
        (nick, conns.remove_stream(fd))
    };

    // Only bound sockets were counted online.
    if nick.is_some() {
        state.stats.client_offline();
    }

    let _ = state.registry.deregister(&mut SourceFd(&fd));
    if stream.is_some() {
        debug!(fd, nick = nick.as_deref().unwrap_or(""), "client disconnected");
    }
}

fn register(
    state: &ServerState,
    fd: i32,
    msg: &Message,
    stream: &UnixStream,
    still_connected: &mut bool,
) {
    let record = UserRecord::new(state.cfg.max_hist_msgs);
    match state.users.insert_if_absent(&msg.sender, record) {
        Err(_rejected) => {
            info!(nick = %msg.sender, "nickname already registered");
            reply_error(
                state,
                fd,
                stream,
                Op::NickAlready,
                "nickname already registered",
                still_connected,
            );
        }
        Ok(()) => {
            state.stats.user_registered();
            info!(nick = %msg.sender, "registered");
            bind_online(state, fd, stream, msg.sender, still_connected);
        }
    }
}

enum BindOutcome {
    Bound,
    Unknown,
    AlreadyOnline,
    SocketBusy,
    TableFull,
}

/// The Connect operation (also the tail of Register): ties the socket to
/// the nickname, occupies a slot and answers with the online-user list.
fn bind_online(
    state: &ServerState,
    fd: i32,
    stream: &UnixStream,
    nick: Nick,
    still_connected: &mut bool,
) {
    let outcome = {
        let mut conns = state.lock_connections();
        // One slot per socket: a bound socket cannot take a second nick.
        if conns.is_bound(fd) {
            BindOutcome::SocketBusy
        } else {
            match state.users.get(&nick) {
                None => BindOutcome::Unknown,
                Some(mut rec) => {
                    if rec.fd.is_some() {
                        BindOutcome::AlreadyOnline
                    } else if conns.bind_slot(nick, fd).is_some() {
                        rec.fd = Some(fd);
                        BindOutcome::Bound
                    } else {
                        BindOutcome::TableFull
                    }
                }
            }
        }
    };

    match outcome {
        BindOutcome::Unknown => {
            reply_error(state, fd, stream, Op::NickUnknown, "nickname does not exist", still_connected);
        }
        BindOutcome::AlreadyOnline => {
            reply_error(state, fd, stream, Op::Fail, "nickname already connected", still_connected);
        }
        BindOutcome::SocketBusy => {
            reply_error(state, fd, stream, Op::Fail, "socket already bound to a nickname", still_connected);
        }
        BindOutcome::TableFull => {
            reply_error(state, fd, stream, Op::Fail, "server full", still_connected);
        }
        BindOutcome::Bound => {
            state.stats.client_online();
            debug!(nick = %nick, fd, "online");
            send_user_list(state, fd, stream, nick, still_connected);
        }
    }
}

/// `Ok` reply whose payload is the packed list of online nicknames.
fn send_user_list(
    state: &ServerState,
    fd: i32,
    stream: &UnixStream,
    receiver: Nick,
    still_connected: &mut bool,
) {
    let payload = state.lock_connections().packed_online_list();
    let reply = Message::new(Op::Ok, Nick::empty(), receiver, payload);
    send_to_requester(state, fd, stream, &reply, still_connected);
}

/// Per-request delivery bookkeeping, applied to the stats only after the
/// connection and catalogue locks are released.
#[derive(Default)]
struct RouteOutcome {
    delta: StatsDelta,
    /// Recipients whose socket broke while we were sending to them.
    dropped: Vec<i32>,
}

/// Inserts the frame into the recipient's history, then attempts the online
/// send. History first: a crash between the two loses nothing.
fn deliver(
    conns: &Connections,
    rec: &mut UserRecord,
    frame: &Message,
    is_file: bool,
    out: &mut RouteOutcome,
) {
    drop(rec.history.push(frame.clone()));

    let target = rec.fd.and_then(|pfd| conns.stream(pfd).map(|s| (pfd, s)));
    let sent = match target {
        Some((pfd, stream)) => match send_message(&mut &*stream, frame) {
            Ok(()) => true,
            Err(NetError::Closed | NetError::Malformed(_)) => {
                out.dropped.push(pfd);
                false
            }
            Err(NetError::Io(err)) => {
                panic!("unrecoverable write error delivering to client {pfd}: {err}")
            }
        },
        None => false,
    };

    if is_file {
        if sent {
            out.delta.file_delivered += 1;
        } else {
            out.delta.file_not_delivered += 1;
        }
    } else if sent {
        out.delta.delivered += 1;
    } else {
        out.delta.not_delivered += 1;
    }
}

/// Applies the accumulated outcome: counters, then disconnects for every
/// recipient that broke mid-send.
fn settle(state: &ServerState, fd: i32, outcome: RouteOutcome, still_connected: &mut bool) {
    state.stats.apply(outcome.delta);
    for dropped_fd in outcome.dropped {
        if dropped_fd == fd {
            *still_connected = false;
        }
        disconnect_client(state, dropped_fd);
    }
}

/// Group-first routing shared by PostTxt and PostFile: if the receiver
/// names a group the sender belongs to, fan out to every member; otherwise
/// deliver to the single named user. Exactly one `Ok` ack goes back to the
/// requester however many recipients matched.
fn route_and_ack(
    state: &ServerState,
    fd: i32,
    stream: &UnixStream,
    sender: Nick,
    receiver: Nick,
    deliver_op: Op,
    payload: Vec<u8>,
    still_connected: &mut bool,
) {
    let is_file = deliver_op == Op::FileMessage;
    let mut outcome = RouteOutcome::default();

    let group = state.groups.get(&receiver).map(|g| Arc::clone(&g));
    if let Some(group) = group {
        if !group.contains(&sender) {
            reply_error(state, fd, stream, Op::Fail, "not a member of the group", still_connected);
            return;
        }

        let members = group.values();
        let conns = state.lock_connections();
        for member in &members {
            // Text keeps the group name in the receiver field; file
            // notifications name the actual recipient.
            let frame_receiver = if is_file {
                Nick::try_from(member.as_str()).unwrap_or_default()
            } else {
                receiver
            };
            let frame = Message::new(deliver_op, sender, frame_receiver, payload.clone());
            match state.users.get(member) {
                Some(mut rec) => deliver(&conns, &mut rec, &frame, is_file, &mut outcome),
                // Member unregistered since the snapshot; skip it.
                None => outcome.delta.errors += 1,
            }
        }
        drop(conns);
    } else {
        let known = {
            let conns = state.lock_connections();
            match state.users.get(&receiver) {
                Some(mut rec) => {
                    let frame = Message::new(deliver_op, sender, receiver, payload);
                    deliver(&conns, &mut rec, &frame, is_file, &mut outcome);
                    true
                }
                None => false,
            }
        };
        if !known {
            reply_error(state, fd, stream, Op::NickUnknown, "nickname does not exist", still_connected);
            return;
        }
    }

    settle(state, fd, outcome, still_connected);
    if *still_connected {
        reply_status(state, fd, stream, Op::Ok, "", still_connected);
    }
}

/// Rejects requests from sockets that never completed Connect.
fn require_online(
    state: &ServerState,
    fd: i32,
    stream: &UnixStream,
    still_connected: &mut bool,
) -> bool {
    if state.lock_connections().is_bound(fd) {
        return true;
    }
    reply_error(state, fd, stream, Op::Fail, "sender is not connected", still_connected);
    false
}

fn post_txt(
    state: &ServerState,
    fd: i32,
    msg: &Message,
    stream: &UnixStream,
    still_connected: &mut bool,
) {
    if !require_online(state, fd, stream, still_connected) {
        return;
    }
    if msg.payload.len() > state.cfg.max_msg_size {
        reply_error(state, fd, stream, Op::MsgTooLong, "message too long", still_connected);
        return;
    }
    route_and_ack(
        state,
        fd,
        stream,
        msg.sender,
        msg.receiver,
        Op::TxtMessage,
        msg.payload.clone(),
        still_connected,
    );
}

fn post_txt_all(
    state: &ServerState,
    fd: i32,
    msg: &Message,
    stream: &UnixStream,
    still_connected: &mut bool,
) {
    if !require_online(state, fd, stream, still_connected) {
        return;
    }
    if msg.payload.len() > state.cfg.max_msg_size {
        reply_error(state, fd, stream, Op::MsgTooLong, "message too long", still_connected);
        return;
    }

    let mut outcome = RouteOutcome::default();
    {
        let conns = state.lock_connections();
        state.users.for_each(|nick, rec| {
            let receiver = Nick::try_from(nick).unwrap_or_default();
            let frame = Message::new(Op::TxtMessage, msg.sender, receiver, msg.payload.clone());
            deliver(&conns, rec, &frame, false, &mut outcome);
        });
    }

    settle(state, fd, outcome, still_connected);
    if *still_connected {
        reply_status(state, fd, stream, Op::Ok, "", still_connected);
    }
}

/// Extracts the basename of the client-supplied file path. The stored name
/// never escapes the spill directory.
fn file_basename(payload: &[u8]) -> Option<String> {
    let raw = payload.split(|&b| b == 0).next().unwrap_or_default();
    let name = std::str::from_utf8(raw).ok()?;
    let base = std::path::Path::new(name).file_name()?.to_str()?;
    Some(base.to_owned())
}

fn post_file(
    state: &ServerState,
    fd: i32,
    msg: &Message,
    stream: &UnixStream,
    still_connected: &mut bool,
) {
    if !require_online(state, fd, stream, still_connected) {
        return;
    }

    // Second framed block: the file bytes follow the name frame.
    let body = match read_data(&mut &*stream) {
        Ok(body) => body,
        Err(NetError::Closed | NetError::Malformed(_)) => {
            debug!(fd, "peer closed mid file transfer");
            disconnect_client(state, fd);
            *still_connected = false;
            return;
        }
        Err(NetError::Io(err)) => {
            panic!("unrecoverable read error on client {fd}: {err}")
        }
    };

    let Some(base) = file_basename(&msg.payload) else {
        reply_error(state, fd, stream, Op::Fail, "bad file name", still_connected);
        return;
    };

    if body.payload.len() > state.cfg.max_file_bytes() {
        reply_error(state, fd, stream, Op::MsgTooLong, "file too big", still_connected);
        return;
    }

    let path = state.cfg.dir_name.join(&base);
    std::fs::write(&path, &body.payload)
        .unwrap_or_else(|err| panic!("cannot store file {}: {err}", path.display()));
    debug!(file = %base, bytes = body.payload.len(), "file stored");

    route_and_ack(
        state,
        fd,
        stream,
        msg.sender,
        msg.receiver,
        Op::FileMessage,
        base.into_bytes(),
        still_connected,
    );
}

fn get_file(
    state: &ServerState,
    fd: i32,
    msg: &Message,
    stream: &UnixStream,
    still_connected: &mut bool,
) {
    let Some(base) = file_basename(&msg.payload) else {
        reply_error(state, fd, stream, Op::Fail, "bad file name", still_connected);
        return;
    };

    match std::fs::read(state.cfg.dir_name.join(&base)) {
        Ok(bytes) => {
            let reply = Message::new(Op::Ok, Nick::empty(), msg.sender, bytes);
            send_to_requester(state, fd, stream, &reply, still_connected);
        }
        Err(err) => {
            debug!(file = %base, ?err, "file fetch failed");
            reply_error(state, fd, stream, Op::Fail, "no such file", still_connected);
        }
    }
}

fn get_prev_msgs(
    state: &ServerState,
    fd: i32,
    msg: &Message,
    stream: &UnixStream,
    still_connected: &mut bool,
) {
    let history = state.users.get(&msg.sender).map(|rec| rec.history.snapshot());
    let Some(history) = history else {
        reply_error(state, fd, stream, Op::NickUnknown, "nickname does not exist", still_connected);
        return;
    };

    let count = (history.len() as u64).to_le_bytes().to_vec();
    let head = Message::new(Op::Ok, Nick::empty(), msg.sender, count);
    send_to_requester(state, fd, stream, &head, still_connected);

    for stored in &history {
        if !*still_connected {
            break;
        }
        send_to_requester(state, fd, stream, stored, still_connected);
    }
}

fn unregister(
    state: &ServerState,
    fd: i32,
    msg: &Message,
    stream: &UnixStream,
    still_connected: &mut bool,
) {
    // Clients name the nickname to drop in the receiver field; an empty
    // field means "myself".
    let target = if msg.receiver.is_empty() { msg.sender } else { msg.receiver };

    let Some(record) = state.users.remove(&target) else {
        reply_error(state, fd, stream, Op::NickUnknown, "nickname does not exist", still_connected);
        return;
    };

    // The nick must not linger in any membership list.
    state.groups.for_each(|_, list| {
        let _ = list.remove(&target);
    });

    state.stats.user_removed();
    info!(nick = %target, "unregistered");

    let self_removal = record.fd == Some(fd);
    if let Some(target_fd) = record.fd {
        if target_fd != fd {
            disconnect_client(state, target_fd);
        }
    }

    reply_status(state, fd, stream, Op::Ok, "", still_connected);

    // Only a self-unregister closes the requester's connection, and only
    // after the ack: the defined order for this operation. Dropping
    // somebody else leaves the requester's session untouched.
    if self_removal {
        disconnect_client(state, fd);
        *still_connected = false;
    }
}

fn create_group(
    state: &ServerState,
    fd: i32,
    msg: &Message,
    stream: &UnixStream,
    still_connected: &mut bool,
) {
    if msg.receiver.is_empty() {
        reply_error(state, fd, stream, Op::Fail, "bad group name", still_connected);
        return;
    }

    let members = MemberList::new();
    let _ = members.insert(&msg.sender);
    match state.groups.insert_if_absent(&msg.receiver, Arc::new(members)) {
        Ok(()) => {
            info!(group = %msg.receiver, creator = %msg.sender, "group created");
            reply_status(state, fd, stream, Op::Ok, "", still_connected);
        }
        Err(_) => {
            reply_error(state, fd, stream, Op::Fail, "group already exists", still_connected);
        }
    }
}

fn add_group(
    state: &ServerState,
    fd: i32,
    msg: &Message,
    stream: &UnixStream,
    still_connected: &mut bool,
) {
    let group = state.groups.get(&msg.receiver).map(|g| Arc::clone(&g));
    let Some(group) = group else {
        reply_error(state, fd, stream, Op::Fail, "group does not exist", still_connected);
        return;
    };

    match group.insert(&msg.sender) {
        Ok(()) => {
            debug!(group = %msg.receiver, nick = %msg.sender, "joined group");
            reply_status(state, fd, stream, Op::Ok, "", still_connected);
        }
        Err(MemberError::AlreadyPresent) => {
            reply_error(state, fd, stream, Op::Fail, "already in the group", still_connected);
        }
        Err(MemberError::NotFound) => unreachable!("insert cannot report NotFound"),
    }
}

fn del_group(
    state: &ServerState,
    fd: i32,
    msg: &Message,
    stream: &UnixStream,
    still_connected: &mut bool,
) {
    let group = state.groups.get(&msg.receiver).map(|g| Arc::clone(&g));
    let Some(group) = group else {
        reply_error(state, fd, stream, Op::Fail, "group does not exist", still_connected);
        return;
    };

    match group.remove(&msg.sender) {
        Ok(()) => {
            debug!(group = %msg.receiver, nick = %msg.sender, "left group");
            reply_status(state, fd, stream, Op::Ok, "", still_connected);
        }
        Err(MemberError::NotFound) => {
            reply_error(state, fd, stream, Op::Fail, "not in the group", still_connected);
        }
        Err(MemberError::AlreadyPresent) => unreachable!("remove cannot report AlreadyPresent"),
    }
}
