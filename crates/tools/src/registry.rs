use std::collections::HashMap;
use std::sync::Arc;

use ao_domain::ToolDefinition;

use crate::trait_def::Tool;

/// Name → tool lookup, built once per engine. One pass resolves the filtered catalog a
/// provider is told about, a second pass resolves a single call by name at dispatch time.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    order: Vec<String>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        ToolRegistry::default()
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if !self.tools.contains_key(&name) {
            self.order.push(name.clone());
        }
        self.tools.insert(name, tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Builds the filtered catalog a provider is told about. Order is stable (registration
    /// order), filtered to `enabled_tools` when non-empty; an empty `enabled_tools` list means
    /// unrestricted.
    pub fn definitions(&self, enabled_tools: &[String]) -> Vec<ToolDefinition> {
        self.order
            .iter()
            .filter(|name| enabled_tools.is_empty() || enabled_tools.iter().any(|e| e == *name))
            .filter_map(|name| self.tools.get(name))
            .map(|tool| tool.spec())
            .collect()
    }
}
