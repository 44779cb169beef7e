//! Shared types used across WireGrid crates.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Capability key that selects the node class and automation client.
pub const PLATFORM_NAME: &str = "platformName";

/// Platform marker for WebDriverAgent (iOS) nodes.
pub const WDA_PLATFORM: &str = "WDA";

/// A set of capability name → value pairs.
///
/// Used both for what a client requests and for what a node declares.
/// Ordered so that debug output and persisted records are stable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Capabilities(BTreeMap<String, serde_json::Value>);

impl Capabilities {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.get(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &serde_json::Value)> {
        self.0.iter()
    }

    /// Whether these (node-declared) capabilities satisfy `request`.
    ///
    /// Every requested key must be present here with an equal value.
    /// Keys declared by the node but absent from the request are ignored.
    pub fn satisfies(&self, request: &Capabilities) -> bool {
        request
            .0
            .iter()
            .all(|(key, wanted)| self.0.get(key) == Some(wanted))
    }

    /// The node class these capabilities belong to.
    pub fn node_class(&self) -> NodeClass {
        NodeClass::from_capabilities(self)
    }
}

impl From<BTreeMap<String, serde_json::Value>> for Capabilities {
    fn from(map: BTreeMap<String, serde_json::Value>) -> Self {
        Self(map)
    }
}

impl FromIterator<(String, serde_json::Value)> for Capabilities {
    fn from_iter<I: IntoIterator<Item = (String, serde_json::Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Quota-accounting class of a node, derived from `platformName`.
///
/// Closed set: each class maps to exactly one automation client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum NodeClass {
    /// Selenium-compatible JSON wire nodes.
    Default,
    /// WebDriverAgent nodes.
    Wda,
}

impl NodeClass {
    pub const ALL: [NodeClass; 2] = [NodeClass::Default, NodeClass::Wda];

    pub fn from_capabilities(caps: &Capabilities) -> Self {
        match caps.get(PLATFORM_NAME).and_then(|v| v.as_str()) {
            Some(WDA_PLATFORM) => NodeClass::Wda,
            _ => NodeClass::Default,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeClass::Default => "default",
            NodeClass::Wda => WDA_PLATFORM,
        }
    }
}

impl fmt::Display for NodeClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error for a strategy type that names no known node class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownNodeClass(pub String);

impl fmt::Display for UnknownNodeClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown node class {:?} (expected \"default\" or \"WDA\")", self.0)
    }
}

impl std::error::Error for UnknownNodeClass {}

impl FromStr for NodeClass {
    type Err = UnknownNodeClass;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "default" => Ok(NodeClass::Default),
            WDA_PLATFORM => Ok(NodeClass::Wda),
            other => Err(UnknownNodeClass(other.to_string())),
        }
    }
}

impl TryFrom<String> for NodeClass {
    type Error = UnknownNodeClass;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<NodeClass> for String {
    fn from(class: NodeClass) -> Self {
        class.as_str().to_string()
    }
}
