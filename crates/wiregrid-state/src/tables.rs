//! redb table definitions for the WireGrid state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized records).

use redb::TableDefinition;

/// Node records keyed by `{host}:{port}`.
pub const NODES: TableDefinition<&str, &[u8]> = TableDefinition::new("nodes");

/// Session affinity records keyed by session id.
pub const SESSIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("sessions");
