//! Automation clients: list and force-close the sessions of a node.
//!
//! The grid only needs enough of each protocol to wipe a node clean
//! before handing it to a new session. Which client speaks to a node is
//! decided by the reserved node's [`NodeClass`].

use std::time::Duration;

use http::Method;
use tracing::{debug, info};

use wiregrid_core::NodeClass;

use crate::error::{WireError, WireResult};
use crate::exchange::call_json;
use crate::message::{Message, SessionEntry, Sessions};

/// Per-call bound on every client request.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(10);

fn check(message: Message) -> WireResult<Message> {
    if message.is_ok() {
        Ok(message)
    } else {
        Err(WireError::Protocol {
            status: message.status,
            message: message.error_message(),
        })
    }
}

// ── Selenium ───────────────────────────────────────────────────

/// Selenium standalone / node speaking the JSON wire protocol under `/wd/hub`.
#[derive(Debug, Clone)]
pub struct SeleniumClient {
    address: String,
    timeout: Duration,
}

impl SeleniumClient {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub async fn sessions(&self) -> WireResult<Sessions> {
        let sessions: Sessions =
            call_json(&self.address, Method::GET, "/wd/hub/sessions", self.timeout).await?;
        if sessions.status != 0 {
            return Err(WireError::Protocol {
                status: sessions.status,
                message: "listing sessions failed".to_string(),
            });
        }
        Ok(sessions)
    }

    pub async fn close_session(&self, session_id: &str) -> WireResult<Message> {
        let path = format!("/wd/hub/session/{session_id}");
        check(call_json(&self.address, Method::DELETE, &path, self.timeout).await?)
    }
}

// ── WebDriverAgent ─────────────────────────────────────────────

/// WebDriverAgent on an iOS device. Holds at most one session, reported
/// by `GET /status`.
#[derive(Debug, Clone)]
pub struct WdaClient {
    address: String,
    timeout: Duration,
}

impl WdaClient {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub async fn sessions(&self) -> WireResult<Sessions> {
        let status = check(call_json(&self.address, Method::GET, "/status", self.timeout).await?)?;
        let value = status
            .session_id
            .filter(|id| !id.is_empty())
            .map(|id| SessionEntry {
                id,
                capabilities: serde_json::Value::Null,
            })
            .into_iter()
            .collect();
        Ok(Sessions { status: 0, value })
    }

    pub async fn close_session(&self, session_id: &str) -> WireResult<Message> {
        let path = format!("/session/{session_id}");
        check(call_json(&self.address, Method::DELETE, &path, self.timeout).await?)
    }
}

// ── Dispatch ───────────────────────────────────────────────────

/// Client for one node, picked by node class.
#[derive(Debug, Clone)]
pub enum NodeClient {
    Selenium(SeleniumClient),
    Wda(WdaClient),
}

impl NodeClient {
    pub fn for_class(class: NodeClass, address: impl Into<String>) -> Self {
        match class {
            NodeClass::Default => NodeClient::Selenium(SeleniumClient::new(address)),
            NodeClass::Wda => NodeClient::Wda(WdaClient::new(address)),
        }
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        match self {
            NodeClient::Selenium(c) => NodeClient::Selenium(c.with_timeout(timeout)),
            NodeClient::Wda(c) => NodeClient::Wda(c.with_timeout(timeout)),
        }
    }

    pub fn address(&self) -> &str {
        match self {
            NodeClient::Selenium(c) => c.address(),
            NodeClient::Wda(c) => c.address(),
        }
    }

    pub async fn sessions(&self) -> WireResult<Sessions> {
        match self {
            NodeClient::Selenium(c) => c.sessions().await,
            NodeClient::Wda(c) => c.sessions().await,
        }
    }

    pub async fn close_session(&self, session_id: &str) -> WireResult<Message> {
        match self {
            NodeClient::Selenium(c) => c.close_session(session_id).await,
            NodeClient::Wda(c) => c.close_session(session_id).await,
        }
    }

    /// Close every session on the node. Returns how many were closed.
    pub async fn remove_all_sessions(&self) -> WireResult<usize> {
        let sessions = self.sessions().await?;
        for session in &sessions.value {
            self.close_session(&session.id).await?;
            debug!(node = %self.address(), session_id = %session.id, "closed leftover session");
        }
        if !sessions.value.is_empty() {
            info!(node = %self.address(), count = sessions.value.len(), "node wiped of leftover sessions");
        }
        Ok(sessions.value.len())
    }
}
