//! Channel abstraction for message I/O.

pub mod channel;
pub mod telegram;

pub use channel::*;
pub use telegram::{TelegramApi, TelegramMemberGrant, TelegramMessenger};
