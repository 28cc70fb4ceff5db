//! Concurrent containers backing the chatty server: the per-user message
//! history, the dispatcher→worker hand-off queue, the sharded catalogues and
//! the group membership lists.

mod map;
mod members;
mod queue;
mod ring;

pub use map::{ShardMap, ValueGuard};
pub use members::{MemberError, MemberList};
pub use queue::ReadyQueue;
pub use ring::RingBuffer;
