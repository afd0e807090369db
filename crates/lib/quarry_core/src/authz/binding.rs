//! Static tool bindings: tool name → required resource, action, roles.
//!
//! The registry is typed rather than stringly: a tool is either public or
//! carries a binding, and every dispatchable name has exactly one entry.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Resource classes guarded by the authorization engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    WebSearch,
    VectorDb,
    Database,
}

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::WebSearch => "web_search",
            ResourceType::VectorDb => "vector_db",
            ResourceType::Database => "database",
        }
    }
}

/// Actions a grant can allow.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Read,
    Write,
    Delete,
}

/// Authorization requirements of one tool.
#[derive(Debug, Clone)]
pub struct ToolBinding {
    pub resource_type: ResourceType,
    pub action: Action,
    pub minimum_roles: Vec<String>,
    /// Argument key the concrete resource name is derived from; tools
    /// without an argument-derived resource use `"*"`.
    pub resource_arg: Option<&'static str>,
    /// Whether results vary per principal (cache fingerprint includes the
    /// principal scope only for these).
    pub principal_varying: bool,
    /// Whether results may be cached at all. Side-effecting tools are never
    /// cacheable.
    pub cacheable: bool,
}

/// How a tool is exposed.
#[derive(Debug, Clone)]
pub enum ToolVisibility {
    /// No authentication or authorization required.
    Public,
    /// Requires an authenticated principal satisfying the binding.
    Authenticated(ToolBinding),
}

/// Registry of tool bindings, keyed by tool name.
#[derive(Debug, Clone, Default)]
pub struct Bindings {
    entries: BTreeMap<String, ToolVisibility>,
}

impl Bindings {
    pub fn empty() -> Self {
        Self::default()
    }

    /// The built-in tool set.
    pub fn builtin() -> Self {
        let mut b = Self::default();
        b.insert_public("health_check");
        b.insert(
            "search_web",
            ToolBinding {
                resource_type: ResourceType::WebSearch,
                action: Action::Read,
                minimum_roles: vec!["user".into(), "admin".into()],
                resource_arg: None,
                principal_varying: false,
                cacheable: true,
            },
        );
        b.insert(
            "search_vectors",
            ToolBinding {
                resource_type: ResourceType::VectorDb,
                action: Action::Write,
                minimum_roles: vec!["admin".into()],
                resource_arg: Some("collection"),
                principal_varying: false,
                cacheable: true,
            },
        );
        b.insert(
            "search_database",
            ToolBinding {
                resource_type: ResourceType::Database,
                action: Action::Write,
                minimum_roles: vec!["admin".into()],
                resource_arg: Some("table"),
                principal_varying: true,
                cacheable: true,
            },
        );
        b.insert(
            "search_all",
            ToolBinding {
                resource_type: ResourceType::WebSearch,
                action: Action::Read,
                minimum_roles: vec!["admin".into()],
                resource_arg: None,
                principal_varying: false,
                cacheable: true,
            },
        );
        b
    }

    pub fn insert(&mut self, tool: &str, binding: ToolBinding) {
        self.entries
            .insert(tool.to_string(), ToolVisibility::Authenticated(binding));
    }

    pub fn insert_public(&mut self, tool: &str) {
        self.entries
            .insert(tool.to_string(), ToolVisibility::Public);
    }

    pub fn get(&self, tool: &str) -> Option<&ToolVisibility> {
        self.entries.get(tool)
    }

    pub fn binding(&self, tool: &str) -> Option<&ToolBinding> {
        match self.entries.get(tool) {
            Some(ToolVisibility::Authenticated(b)) => Some(b),
            _ => None,
        }
    }

    pub fn is_public(&self, tool: &str) -> bool {
        matches!(self.entries.get(tool), Some(ToolVisibility::Public))
    }

    pub fn tool_names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(|s| s.as_str())
    }

    /// Derive the concrete resource name a call addresses.
    pub fn resource_name(&self, tool: &str, arguments: &Value) -> String {
        match self.binding(tool).and_then(|b| b.resource_arg) {
            Some(key) => arguments
                .get(key)
                .and_then(|v| v.as_str())
                .unwrap_or("*")
                .to_string(),
            None => "*".to_string(),
        }
    }
}
