//! Wire protocol of the chatty server: opcodes, fixed-width nicknames and
//! the three-frame codec spoken over the local stream socket.

mod codec;
mod connect;
mod error;
mod nick;
mod ops;

pub use codec::{
    Body, DATA_HEADER_SIZE, HEADER_SIZE, Header, MAX_FRAME_LEN, Message, read_data, read_header,
    read_message, send_data, send_header, send_message,
};
pub use connect::open_connection;
pub use error::NetError;
pub use nick::{MAX_NAME, NICK_WIRE_LEN, Nick, NickError};
pub use ops::{OP_CLIENT_END, Op, UnknownOp};
