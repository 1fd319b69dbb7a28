//! Wire and domain types shared by the daemon, the datastore layer, and the
//! client: the node tree, the day diary, tenants/users, and the `Update`
//! messages fanned out to streaming subscribers.
//!
//! These types are `Serialize + Deserialize` so they can be JSON-encoded by
//! Axum and decoded by the client and by tests. No business logic lives here
//! beyond field defaults and enum name mappings.
//!
//! Absent-uuid convention: `uuid` fields that a client may leave out (a node
//! or tenant it wants the server to mint an id for) default to the nil uuid.
//! Server replies always carry real ids.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod date;
pub mod error;

pub use date::Date;
pub use error::{ErrorCode, ServiceError};

fn default_true() -> bool {
    true
}

// ---------------------------------------------------------------------------
// Nodes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeKind {
    #[default]
    Folder,
    Project,
    Action,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Folder => "FOLDER",
            NodeKind::Project => "PROJECT",
            NodeKind::Action => "ACTION",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "FOLDER" => Some(NodeKind::Folder),
            "PROJECT" => Some(NodeKind::Project),
            "ACTION" => Some(NodeKind::Action),
            _ => None,
        }
    }
}

/// A user-owned tree element (project / folder / action).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    #[serde(default = "Uuid::nil")]
    pub uuid: Uuid,
    /// Owning user; filled in by the server from the request identity.
    #[serde(default = "Uuid::nil")]
    pub user: Uuid,
    pub name: String,
    #[serde(default)]
    pub kind: NodeKind,
    #[serde(default)]
    pub descr: Option<String>,
    #[serde(default = "default_true")]
    pub active: bool,
    /// Parent node id; `None` = root level.
    #[serde(default)]
    pub parent: Option<Uuid>,
    /// Strictly increasing per row; bumped by 1 on every successful mutation.
    #[serde(default)]
    pub version: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateNodeReq {
    pub node: Node,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MoveNodeReq {
    pub uuid: Uuid,
    /// New parent; `None` moves the node to the root level.
    #[serde(default)]
    pub parent_uuid: Option<Uuid>,
}

/// Reply for `GetNodes`: the full per-user tree under a synthetic root.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeTree {
    pub root: NodeTreeItem,
}

/// One tree level. The root item has no `node`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeTreeItem {
    #[serde(default)]
    pub node: Option<Node>,
    #[serde(default)]
    pub children: Vec<NodeTreeItem>,
}

// ---------------------------------------------------------------------------
// Day diary
// ---------------------------------------------------------------------------

/// Per-date summary row: color plus presence flags for notes/report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Day {
    pub date: Date,
    #[serde(default = "Uuid::nil")]
    pub user: Uuid,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub has_notes: bool,
    #[serde(default)]
    pub has_report: bool,
}

/// A day with its full notes/report bodies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompleteDay {
    pub day: Day,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub report: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Month {
    pub year: i32,
    /// 0-based, matching `Date.month`.
    pub month: u32,
    pub days: Vec<Day>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetColorReq {
    pub date: Date,
    /// Empty string clears the color.
    #[serde(default)]
    pub color: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayColorDefinition {
    pub id: Uuid,
    pub name: String,
    pub color: String,
    /// Higher scores rank first in the catalog listing.
    pub score: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DayColorDefinitions {
    pub day_colors: Vec<DayColorDefinition>,
}

// ---------------------------------------------------------------------------
// Tenants / users
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TenantKind {
    Guest,
    Regular,
}

impl TenantKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TenantKind::Guest => "GUEST",
            TenantKind::Regular => "REGULAR",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserKind {
    Regular,
    Admin,
}

impl UserKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserKind::Regular => "REGULAR",
            UserKind::Admin => "ADMIN",
        }
    }
}

/// Tenant as submitted / returned by `CreateTenant`. `kind` and `active` are
/// optional on input; the server fills the defaults it actually persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    #[serde(default = "Uuid::nil")]
    pub uuid: Uuid,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub kind: Option<TenantKind>,
    #[serde(default)]
    pub descr: Option<String>,
    #[serde(default)]
    pub active: Option<bool>,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    #[serde(default = "Uuid::nil")]
    pub uuid: Uuid,
    /// Owning tenant; assigned by the server during `CreateTenant`.
    #[serde(default = "Uuid::nil")]
    pub tenant: Uuid,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub kind: Option<UserKind>,
    #[serde(default)]
    pub active: Option<bool>,
    #[serde(default)]
    pub descr: Option<String>,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTenantReq {
    pub tenant: Tenant,
    #[serde(default)]
    pub users: Vec<User>,
}

// ---------------------------------------------------------------------------
// Updates (streamed to subscribers)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeOp {
    Added,
    Updated,
    Moved,
    Deleted,
}

/// One committed mutation, delivered to every live subscriber. Carries enough
/// data for a client to apply the change locally without re-fetching.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Update {
    DayColor {
        date: Date,
        user: Uuid,
        color: Option<String>,
    },
    Day(CompleteDay),
    Node {
        op: NodeOp,
        node: Node,
    },
}

impl Update {
    /// Stable event name, used as the SSE event type on the stream.
    pub fn event_name(&self) -> &'static str {
        match self {
            Update::DayColor { .. } => "day_color",
            Update::Day(_) => "day",
            Update::Node { .. } => "node",
        }
    }
}

// ---------------------------------------------------------------------------
// Generic replies
// ---------------------------------------------------------------------------

/// Reply for every mutating call. `error` is `OK` on success; validation and
/// lookup failures arrive here with a 200 transport status so clients can
/// read the structured code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusReply {
    pub error: ErrorCode,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub node: Option<Node>,
    #[serde(default)]
    pub tenant: Option<Tenant>,
}

impl StatusReply {
    pub fn ok() -> Self {
        Self {
            error: ErrorCode::Ok,
            message: String::new(),
            node: None,
            tenant: None,
        }
    }

    pub fn with_node(node: Node) -> Self {
        Self {
            node: Some(node),
            ..Self::ok()
        }
    }

    pub fn with_tenant(tenant: Tenant) -> Self {
        Self {
            tenant: Some(tenant),
            ..Self::ok()
        }
    }
}

impl From<ServiceError> for StatusReply {
    fn from(err: ServiceError) -> Self {
        Self {
            error: err.code,
            message: err.message,
            node: None,
            tenant: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInfo {
    pub properties: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub service: String,
    pub version: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_serde_tags_match_event_names() {
        let update = Update::DayColor {
            date: Date::new(2024, 2, 15),
            user: Uuid::new_v4(),
            color: Some("red".into()),
        };
        let json: serde_json::Value = serde_json::to_value(&update).unwrap();
        assert_eq!(json["type"], "day_color");
        assert_eq!(update.event_name(), "day_color");

        let node_update = Update::Node {
            op: NodeOp::Added,
            node: Node {
                uuid: Uuid::new_v4(),
                user: Uuid::new_v4(),
                name: "inbox".into(),
                kind: NodeKind::Folder,
                descr: None,
                active: true,
                parent: None,
                version: 0,
            },
        };
        let json = serde_json::to_value(&node_update).unwrap();
        assert_eq!(json["type"], "node");
        assert_eq!(json["op"], "ADDED");
    }

    #[test]
    fn update_round_trips_through_json() {
        let update = Update::Day(CompleteDay {
            day: Day {
                date: Date::new(2024, 0, 1),
                user: Uuid::new_v4(),
                color: None,
                has_notes: true,
                has_report: false,
            },
            notes: Some("walked the dog".into()),
            report: None,
        });
        let json = serde_json::to_string(&update).unwrap();
        let back: Update = serde_json::from_str(&json).unwrap();
        assert_eq!(back, update);
    }

    #[test]
    fn node_defaults_fill_absent_fields() {
        let node: Node = serde_json::from_str(r#"{"name": "Errands"}"#).unwrap();
        assert!(node.uuid.is_nil());
        assert!(node.active);
        assert_eq!(node.kind, NodeKind::Folder);
        assert_eq!(node.parent, None);
        assert_eq!(node.version, 0);
    }

    #[test]
    fn node_kind_names_are_stable() {
        for kind in [NodeKind::Folder, NodeKind::Project, NodeKind::Action] {
            assert_eq!(NodeKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(NodeKind::parse("NOTE"), None);
    }
}
