//! Keyspace response bodies: the node tree and action kinds
//!
//! Pure data + parsing; no I/O. Nodes are constructed fresh from each
//! response and never mutated afterwards.

use serde::{Deserialize, Serialize};

/// One node of the hierarchical keyspace.
///
/// A directory node has `dir == true` and a meaningless `value`; its
/// `nodes` list is only populated when the request asked for recursion.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub key: String,
    #[serde(default)]
    pub dir: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default)]
    pub created_index: u64,
    #[serde(default)]
    pub modified_index: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<i64>,
    /// Expiry timestamp as reported by the store, informational only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nodes: Option<Vec<Node>>,
}

impl Node {
    /// Last path segment of this node's key.
    pub fn last_segment(&self) -> &str {
        self.key.rsplit('/').next().unwrap_or(&self.key)
    }
}

/// Action kind reported with each keyspace event.
///
/// The wire field is an open string enum; unknown spellings are kept in
/// `Unknown` so newer store versions do not break the watch loop.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(from = "String", into = "String")]
pub enum Action {
    Create,
    Set,
    Update,
    Get,
    Delete,
    Expire,
    CompareAndSwap,
    CompareAndDelete,
    Unknown(String),
}

impl Action {
    pub fn as_str(&self) -> &str {
        match self {
            Action::Create => "create",
            Action::Set => "set",
            Action::Update => "update",
            Action::Get => "get",
            Action::Delete => "delete",
            Action::Expire => "expire",
            Action::CompareAndSwap => "compareAndSwap",
            Action::CompareAndDelete => "compareAndDelete",
            Action::Unknown(s) => s,
        }
    }

    /// Actions that introduce or refresh a key.
    pub fn is_add(&self) -> bool {
        matches!(
            self,
            Action::Create | Action::Set | Action::Update | Action::Get | Action::CompareAndSwap
        )
    }

    /// Actions that remove a key.
    pub fn is_remove(&self) -> bool {
        matches!(
            self,
            Action::Delete | Action::Expire | Action::CompareAndDelete
        )
    }
}

impl From<String> for Action {
    fn from(s: String) -> Self {
        match s.as_str() {
            "create" => Action::Create,
            "set" => Action::Set,
            "update" => Action::Update,
            "get" => Action::Get,
            "delete" => Action::Delete,
            "expire" => Action::Expire,
            "compareAndSwap" => Action::CompareAndSwap,
            "compareAndDelete" => Action::CompareAndDelete,
            _ => Action::Unknown(s),
        }
    }
}

impl From<Action> for String {
    fn from(a: Action) -> Self {
        a.as_str().to_string()
    }
}

/// Success body: an action plus the affected node (and its prior state).
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KvSuccess {
    pub action: Action,
    pub node: Node,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev_node: Option<Node>,
}

/// Error body returned by the store.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KvError {
    pub error_code: i64,
    pub message: String,
    #[serde(default)]
    pub cause: String,
    #[serde(default)]
    pub index: u64,
}
