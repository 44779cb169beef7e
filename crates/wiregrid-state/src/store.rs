//! StateStore — redb-backed persistence for WireGrid.
//!
//! Typed CRUD over node records and session affinity records. The store
//! supports both on-disk and in-memory backends (the latter for tests and
//! for `connection = "memory"`).

use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use wiregrid_core::Capabilities;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Storage boundary used by the dispatch path.
///
/// Routing for follow-up protocol calls only needs these four operations;
/// keeping them behind a trait lets the dispatcher be exercised against
/// any backend.
pub trait AffinityStore: Send + Sync {
    /// Remember that `session_id` lives on `node_address`.
    fn record_session_node(&self, session_id: &str, node_address: &str) -> StateResult<()>;

    /// Which node owns `session_id`, if any.
    fn lookup_node(&self, session_id: &str) -> StateResult<Option<String>>;

    /// Drop a single session's record. Returns true if it existed.
    fn forget_session(&self, session_id: &str) -> StateResult<bool>;

    /// Drop a node record together with every session pointing at it.
    /// Returns the number of session records removed.
    fn forget_node(&self, node_address: &str) -> StateResult<u32>;
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store.
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Open according to a `db.connection` config value.
    pub fn connect(connection: &str) -> StateResult<Self> {
        match connection.trim() {
            "" | "memory" => Self::open_in_memory(),
            path => Self::open(Path::new(path)),
        }
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(NODES).map_err(map_err!(Table))?;
        txn.open_table(SESSIONS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Nodes ──────────────────────────────────────────────────────

    /// Insert or update a node record.
    pub fn put_node(&self, node: &NodeRecord) -> StateResult<()> {
        let value = serde_json::to_vec(node).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(NODES).map_err(map_err!(Table))?;
            table
                .insert(node.address.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(address = %node.address, "node record stored");
        Ok(())
    }

    /// Convenience wrapper stamping `registered_at` with the current time.
    pub fn register_node(&self, address: &str, capabilities: &Capabilities) -> StateResult<()> {
        self.put_node(&NodeRecord {
            address: address.to_string(),
            capabilities: capabilities.clone(),
            registered_at: epoch_secs(),
        })
    }

    /// Get a node record by address.
    pub fn get_node(&self, address: &str) -> StateResult<Option<NodeRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(NODES).map_err(map_err!(Table))?;
        match table.get(address).map_err(map_err!(Read))? {
            Some(guard) => {
                let node: NodeRecord =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(node))
            }
            None => Ok(None),
        }
    }

    /// List all node records, oldest registration first.
    pub fn list_nodes(&self) -> StateResult<Vec<NodeRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(NODES).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let node: NodeRecord =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(node);
        }
        results.sort_by(|a, b| {
            a.registered_at
                .cmp(&b.registered_at)
                .then_with(|| a.address.cmp(&b.address))
        });
        Ok(results)
    }

    /// Delete a node record. Returns true if it existed.
    pub fn delete_node(&self, address: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(NODES).map_err(map_err!(Table))?;
            existed = table.remove(address).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%address, existed, "node record deleted");
        Ok(existed)
    }

    // ── Sessions ───────────────────────────────────────────────────

    /// Insert or update a session affinity record.
    pub fn put_session(&self, record: &SessionRecord) -> StateResult<()> {
        let value = serde_json::to_vec(record).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(SESSIONS).map_err(map_err!(Table))?;
            table
                .insert(record.session_id.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(session_id = %record.session_id, node = %record.node_address, "session stored");
        Ok(())
    }

    /// Get a session affinity record by session id.
    pub fn get_session(&self, session_id: &str) -> StateResult<Option<SessionRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(SESSIONS).map_err(map_err!(Table))?;
        match table.get(session_id).map_err(map_err!(Read))? {
            Some(guard) => {
                let record: SessionRecord =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// List every session hosted on `node_address`.
    pub fn list_sessions_for_node(&self, node_address: &str) -> StateResult<Vec<SessionRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(SESSIONS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let record: SessionRecord =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            if record.node_address == node_address {
                results.push(record);
            }
        }
        Ok(results)
    }

    /// Delete a session record. Returns true if it existed.
    pub fn delete_session(&self, session_id: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(SESSIONS).map_err(map_err!(Table))?;
            existed = table.remove(session_id).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(existed)
    }

    /// Delete every session hosted on a node. Returns number deleted.
    pub fn delete_sessions_for_node(&self, node_address: &str) -> StateResult<u32> {
        // Collect keys in a read transaction first.
        let keys: Vec<String> = self
            .list_sessions_for_node(node_address)?
            .into_iter()
            .map(|r| r.session_id)
            .collect();
        if keys.is_empty() {
            return Ok(0);
        }
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let count = keys.len() as u32;
        {
            let mut table = txn.open_table(SESSIONS).map_err(map_err!(Table))?;
            for key in &keys {
                table.remove(key.as_str()).map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(count)
    }
}

impl AffinityStore for StateStore {
    fn record_session_node(&self, session_id: &str, node_address: &str) -> StateResult<()> {
        self.put_session(&SessionRecord {
            session_id: session_id.to_string(),
            node_address: node_address.to_string(),
            created_at: epoch_secs(),
        })
    }

    fn lookup_node(&self, session_id: &str) -> StateResult<Option<String>> {
        Ok(self.get_session(session_id)?.map(|r| r.node_address))
    }

    fn forget_session(&self, session_id: &str) -> StateResult<bool> {
        self.delete_session(session_id)
    }

    fn forget_node(&self, node_address: &str) -> StateResult<u32> {
        let removed = self.delete_sessions_for_node(node_address)?;
        self.delete_node(node_address)?;
        Ok(removed)
    }
}

/// Current Unix epoch in seconds.
fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
