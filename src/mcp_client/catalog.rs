//! Tool catalog — namespaced tool descriptors with a per-server TTL cache.
//!
//! Tool names are exposed as `"server_id.raw_name"` (e.g.
//! `"filesystem.read_file"`). Discovery is triggered by the supervisor only;
//! catalog reads never talk to a server.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use tokio::time::Instant;

use super::classify::{classify_category, is_dangerous};
use super::errors::McpError;
use super::registry::ConnectionRegistry;
use super::transport::McpTransport;
use super::types::{McpToolDefinition, ToolDescriptor};

/// Default lifetime of a cached tool list.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);

// ─── Naming ─────────────────────────────────────────────────────────────────

/// Build the caller-facing name of a server tool.
pub fn namespaced_name(connection_id: &str, raw_name: &str) -> String {
    format!("{connection_id}.{raw_name}")
}

/// Split a namespaced tool name on its first `.` into `(server_id, raw_name)`.
///
/// Names without a `.`, or with an empty side, are [`McpError::InvalidToolName`].
pub fn parse_tool_name(name: &str) -> Result<(&str, &str), McpError> {
    match name.split_once('.') {
        Some((server, tool)) if !server.is_empty() && !tool.is_empty() => Ok((server, tool)),
        _ => Err(McpError::InvalidToolName {
            name: name.to_string(),
        }),
    }
}

// ─── Discovery ──────────────────────────────────────────────────────────────

/// Map raw server tools into descriptors. Repeated raw names keep the first
/// definition so namespaced names stay unique.
pub fn build_descriptors(connection_id: &str, tools: Vec<McpToolDefinition>) -> Vec<ToolDescriptor> {
    let mut seen = HashSet::new();
    let mut descriptors = Vec::with_capacity(tools.len());

    for tool in tools {
        if !seen.insert(tool.name.clone()) {
            tracing::warn!(
                server = connection_id,
                tool = %tool.name,
                "server listed a tool twice, keeping the first definition"
            );
            continue;
        }
        descriptors.push(ToolDescriptor {
            namespaced_name: namespaced_name(connection_id, &tool.name),
            category: classify_category(&tool.name, &tool.description),
            dangerous: is_dangerous(&tool.name, &tool.description),
            requires_confirmation: true,
            raw_name: tool.name,
            connection_id: connection_id.to_string(),
            description: tool.description,
            input_schema: tool.input_schema,
        });
    }

    descriptors
}

/// Query a server's tools and build their descriptors.
pub async fn discover_tools(
    connection_id: &str,
    transport: &dyn McpTransport,
) -> Result<Vec<ToolDescriptor>, McpError> {
    let raw = transport.list_tools().await?;
    let descriptors = build_descriptors(connection_id, raw);
    tracing::debug!(server = connection_id, tools = descriptors.len(), "discovered tools");
    Ok(descriptors)
}

// ─── ToolCatalog ────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct CachedTools {
    tools: Vec<ToolDescriptor>,
    cached_at: Instant,
}

/// Per-server cache of discovered tool descriptors.
#[derive(Debug)]
pub struct ToolCatalog {
    cache: HashMap<String, CachedTools>,
    ttl: Duration,
}

impl Default for ToolCatalog {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_TTL)
    }
}

impl ToolCatalog {
    pub fn new(ttl: Duration) -> Self {
        Self {
            cache: HashMap::new(),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Replace the cached tools for a server.
    pub fn store(&mut self, connection_id: &str, tools: Vec<ToolDescriptor>) {
        self.cache.insert(
            connection_id.to_string(),
            CachedTools {
                tools,
                cached_at: Instant::now(),
            },
        );
    }

    pub fn invalidate(&mut self, connection_id: &str) {
        self.cache.remove(connection_id);
    }

    /// Whether the server has no cache entry younger than the TTL.
    pub fn is_expired(&self, connection_id: &str) -> bool {
        self.cached(connection_id).is_none()
    }

    /// Cached tools for a server, if still fresh.
    pub fn cached(&self, connection_id: &str) -> Option<&[ToolDescriptor]> {
        self.cache
            .get(connection_id)
            .filter(|entry| entry.cached_at.elapsed() < self.ttl)
            .map(|entry| entry.tools.as_slice())
    }

    /// Tools of one connected server: the fresh cache, else the live list on
    /// the connection record. Disconnected or failed servers expose nothing.
    pub fn server_tools(&self, registry: &ConnectionRegistry, connection_id: &str) -> Vec<ToolDescriptor> {
        let Some(conn) = registry.get(connection_id).filter(|c| c.is_connected()) else {
            return Vec::new();
        };
        match self.cached(connection_id) {
            Some(tools) => tools.to_vec(),
            None => conn.tools.clone(),
        }
    }

    /// Tools across every connected server, sorted by namespaced name.
    pub fn all_tools(&self, registry: &ConnectionRegistry) -> Vec<ToolDescriptor> {
        let mut seen = HashSet::new();
        let mut tools: Vec<ToolDescriptor> = registry
            .connected_ids()
            .iter()
            .flat_map(|id| self.server_tools(registry, id))
            .filter(|tool| seen.insert(tool.namespaced_name.clone()))
            .collect();
        tools.sort_by(|a, b| a.namespaced_name.cmp(&b.namespaced_name));
        tools
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp_client::classify::ToolCategory;
    use crate::mcp_client::types::{ConnectionStatus, ServerConfig};

    fn raw(name: &str, description: &str) -> McpToolDefinition {
        McpToolDefinition {
            name: name.to_string(),
            description: description.to_string(),
            input_schema: serde_json::json!({"type": "object"}),
        }
    }

    fn registry_with(ids: &[(&str, ConnectionStatus)]) -> ConnectionRegistry {
        let mut registry = ConnectionRegistry::new();
        for (id, status) in ids {
            registry.upsert_connecting(&ServerConfig::new(id, "cmd")).status = *status;
        }
        registry
    }

    #[test]
    fn test_parse_tool_name_round_trip() {
        for (server, tool) in [("fs", "read_file"), ("git", "log.oneline"), ("a", "b")] {
            let name = namespaced_name(server, tool);
            assert_eq!(parse_tool_name(&name).unwrap(), (server, tool));
        }
    }

    #[test]
    fn test_parse_tool_name_rejects_unqualified() {
        for bad in ["read_file", "", ".read_file", "fs."] {
            assert!(matches!(
                parse_tool_name(bad),
                Err(McpError::InvalidToolName { .. })
            ));
        }
    }

    #[test]
    fn test_build_descriptors_classifies_and_flags() {
        let tools = build_descriptors(
            "fs",
            vec![raw("read_file", "Read a file"), raw("delete_file", "Delete a file")],
        );
        assert_eq!(tools.len(), 2);
        assert_eq!(tools[0].namespaced_name, "fs.read_file");
        assert_eq!(tools[0].category, ToolCategory::Filesystem);
        assert!(!tools[0].dangerous);
        assert!(tools[1].dangerous);
        assert!(tools.iter().all(|t| t.requires_confirmation));
    }

    #[test]
    fn test_build_descriptors_drops_duplicates() {
        let tools = build_descriptors("fs", vec![raw("read", "first"), raw("read", "second")]);
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].description, "first");
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_expires_after_ttl() {
        let mut catalog = ToolCatalog::new(Duration::from_secs(10));
        catalog.store("fs", build_descriptors("fs", vec![raw("read_file", "")]));
        assert!(!catalog.is_expired("fs"));

        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(catalog.is_expired("fs"));
        assert!(catalog.cached("fs").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_tools_falls_back_to_live_list() {
        let mut registry = registry_with(&[("fs", ConnectionStatus::Connected)]);
        registry.get_mut("fs").unwrap().tools =
            build_descriptors("fs", vec![raw("live_tool", "")]);

        let mut catalog = ToolCatalog::new(Duration::from_secs(10));
        catalog.store("fs", build_descriptors("fs", vec![raw("cached_tool", "")]));
        assert_eq!(catalog.server_tools(&registry, "fs")[0].raw_name, "cached_tool");

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(catalog.server_tools(&registry, "fs")[0].raw_name, "live_tool");
    }

    #[test]
    fn test_all_tools_unique_and_only_connected() {
        let mut registry = registry_with(&[
            ("a", ConnectionStatus::Connected),
            ("b", ConnectionStatus::Connected),
            ("c", ConnectionStatus::Error),
        ]);
        for id in ["a", "b", "c"] {
            registry.get_mut(id).unwrap().tools =
                build_descriptors(id, vec![raw("search", ""), raw("fetch", "")]);
        }

        let catalog = ToolCatalog::default();
        let tools = catalog.all_tools(&registry);
        assert_eq!(tools.len(), 4);

        let names: HashSet<&str> = tools.iter().map(|t| t.namespaced_name.as_str()).collect();
        assert_eq!(names.len(), tools.len());
        assert!(!names.contains("c.search"));
        assert!(catalog.server_tools(&registry, "c").is_empty());
        assert!(catalog.server_tools(&registry, "missing").is_empty());
    }
}
