//! Discord module: the presence sink, spoken over Discord's local RPC socket.

pub mod activity;
pub mod client;
pub mod ipc;

pub use client::DiscordIpcSink;
pub use ipc::DiscordError;
