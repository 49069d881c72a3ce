//! Serial RPC Transport
//!
//! This crate provides async framed remote calls to a camera device over a
//! serial link, plus the raw bulk-read used after a call announces a
//! payload.

mod client;
mod error;
pub mod protocol;

pub use client::{available_ports, LinkState, RpcClient, RpcTransport};
pub use error::RpcError;

/// Default per-call reply deadline
pub const DEFAULT_CALL_TIMEOUT_MS: u64 = 1000;
