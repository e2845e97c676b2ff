//! Signup Bot: account registration over private chat.

pub mod bot;
pub mod channels;
pub mod config;
pub mod error;
pub mod privilege;
pub mod registration;
pub mod store;
