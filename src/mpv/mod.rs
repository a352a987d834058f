//! mpv module: the player side of the engine, spoken over mpv's JSON IPC.

pub mod connection;
pub mod events;
pub mod property;

pub use connection::{MpvConnection, attach, connect};
pub use events::{EventInjector, MpvEvents};
