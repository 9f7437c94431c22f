#![warn(missing_docs)]
//! Wire protocol and update routing between the authoritative world and its clients.

mod codec;
mod protocol;
mod subscription;

pub use codec::*;
pub use protocol::*;
pub use subscription::*;
