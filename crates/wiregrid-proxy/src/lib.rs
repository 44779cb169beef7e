//! wiregrid-proxy — moves protocol traffic between clients and nodes.
//!
//! # Components
//!
//! - **`transport`** — one proxied exchange with one node, with body-based
//!   new-session classification
//! - **`dispatcher`** — create-session: reserve, reset, forward, evict and
//!   retry until a node creates the session or capacity runs out
//! - **`affinity`** — forwards calls on an existing session to its node

pub mod affinity;
pub mod dispatcher;
pub mod error;
pub mod transport;

#[cfg(test)]
mod test_support;

pub use affinity::{SESSION_PREFIX, SessionRouter};
pub use dispatcher::{CreatedSession, Dispatcher};
pub use error::{DispatchError, DispatchResult};
pub use transport::{CapturedResponse, SessionTransport, TransportOutcome};
