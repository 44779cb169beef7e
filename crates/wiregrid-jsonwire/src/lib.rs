//! wiregrid-jsonwire — the JSON wire protocol as the grid sees it.
//!
//! - [`message`] — response envelopes and new-session classification
//! - [`exchange`] — one-shot HTTP/1.1 exchanges with a node, shared with the proxy
//! - [`client`] — per-class automation clients that wipe a node's sessions

pub mod client;
pub mod error;
pub mod exchange;
pub mod message;

pub use client::{DEFAULT_CALL_TIMEOUT, NodeClient, SeleniumClient, WdaClient};
pub use error::{WireError, WireResult};
pub use message::{Message, SessionEntry, Sessions, created_session_id};
