//! # huddle-shared
//!
//! Types shared by the store and the realtime gateway: typed identifiers,
//! the WebSocket wire protocol, and signed session credentials.

pub mod constants;
pub mod error;
pub mod protocol;
pub mod session;
pub mod types;

pub use error::{ErrorCode, ProtocolError, SessionError};
