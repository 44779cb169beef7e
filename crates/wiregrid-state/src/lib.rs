//! wiregrid-state — embedded state store for WireGrid.
//!
//! Backed by [redb](https://docs.rs/redb), persists the two record kinds
//! the grid needs across restarts:
//!
//! - **node records** — address and declared capabilities of every
//!   registered node, used to re-seed the pool at startup
//! - **session affinity records** — `session id → node address`, used to
//!   route every follow-up protocol call to the node that created the session
//!
//! Values are JSON-serialized into redb's `&[u8]` columns. The
//! `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`).

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::{AffinityStore, StateStore};
pub use types::*;
