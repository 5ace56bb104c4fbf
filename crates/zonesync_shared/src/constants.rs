//! Protocol and scheduling constants.
//!
//! Both ends of a connection must agree on the message sizes. The polling
//! values are defaults; `WorldConfig` can override them per process.

/// Default port a world server listens on.
pub const DEFAULT_PORT: u16 = 7777;

/// Cadence of the server and client polling loops, in milliseconds.
pub const POLL_INTERVAL_MS: u64 = 10;

/// Messages drained from the server's poll group per receive call.
pub const SERVER_POLL_BATCH: usize = 16;

/// Messages drained from the client's world connection per receive call.
pub const CLIENT_POLL_BATCH: usize = 1;

/// Size of a mini message: tag + one u32.
pub const MINI_MESSAGE_LEN: usize = 5;

/// Size of a small message: tag + two u32.
pub const SMALL_MESSAGE_LEN: usize = 9;

/// Longest name or path an entity-info message can carry.
pub const MAX_STRING_LEN: usize = u16::MAX as usize;
