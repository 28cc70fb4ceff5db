use strum::Display;
use thiserror::Error;

/// First opcode value that is not a client request. Anything at or above
/// this in an incoming header is rejected with a `Fail` reply.
pub const OP_CLIENT_END: u8 = 13;

/// Operation codes carried in the message header.
///
/// Client requests occupy `0..OP_CLIENT_END`; `TxtMessage`/`FileMessage` are
/// server-originated deliveries; the `Ok`..`MsgTooLong` block are status
/// replies.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Op {
    Register = 0,
    Connect = 1,
    PostTxt = 2,
    PostTxtAll = 3,
    PostFile = 4,
    GetFile = 5,
    GetPrevMsgs = 6,
    UsrList = 7,
    Unregister = 8,
    Disconnect = 9,
    CreateGroup = 10,
    AddGroup = 11,
    DelGroup = 12,

    TxtMessage = 20,
    FileMessage = 21,

    Ok = 30,
    Fail = 31,
    NickAlready = 32,
    NickUnknown = 33,
    MsgTooLong = 34,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("unknown opcode {0}")]
pub struct UnknownOp(pub u8);

impl Op {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn is_client_request(self) -> bool {
        (self as u8) < OP_CLIENT_END
    }
}

impl TryFrom<u8> for Op {
    type Error = UnknownOp;

    fn try_from(raw: u8) -> Result<Self, UnknownOp> {
        let op = match raw {
            0 => Self::Register,
            1 => Self::Connect,
            2 => Self::PostTxt,
            3 => Self::PostTxtAll,
            4 => Self::PostFile,
            5 => Self::GetFile,
            6 => Self::GetPrevMsgs,
            7 => Self::UsrList,
            8 => Self::Unregister,
            9 => Self::Disconnect,
            10 => Self::CreateGroup,
            11 => Self::AddGroup,
            12 => Self::DelGroup,
            20 => Self::TxtMessage,
            21 => Self::FileMessage,
            30 => Self::Ok,
            31 => Self::Fail,
            32 => Self::NickAlready,
            33 => Self::NickUnknown,
            34 => Self::MsgTooLong,
            other => return Err(UnknownOp(other)),
        };
        Ok(op)
    }
}
