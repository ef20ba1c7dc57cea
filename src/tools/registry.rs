//! Name → tool mapping consulted by planning and execution.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::ConfigError;
use crate::pipeline::types::{Item, ToolCall, ToolPlan, ToolResult};
use crate::retry::RetryPolicy;
use crate::tools::tool::Tool;

/// Registry of available tools, built once at startup.
///
/// Iteration is in name order, which keeps planning deterministic.
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
    retry: RetryPolicy,
}

impl ToolRegistry {
    pub fn new(retry: RetryPolicy) -> Self {
        Self {
            tools: BTreeMap::new(),
            retry,
        }
    }

    /// Register a tool. A later registration under the same name replaces the earlier one.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), tool).is_some() {
            warn!(tool = %name, "Replaced previously registered tool");
        } else {
            debug!("Registered tool: {}", name);
        }
    }

    pub fn with(mut self, tool: Arc<dyn Tool>) -> Self {
        self.register(tool);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn has(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    pub fn count(&self) -> usize {
        self.tools.len()
    }

    /// One call per applicable tool, in name order.
    pub fn plan(&self, item: &Item) -> ToolPlan {
        self.tools
            .values()
            .filter_map(|tool| {
                tool.plan(item).map(|arguments| ToolCall {
                    tool: tool.name().to_string(),
                    arguments,
                })
            })
            .collect()
    }

    /// Run one tool. Execution failures become failed results; only an
    /// unregistered name is an error.
    pub async fn invoke(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolResult, ConfigError> {
        let tool = self.get(name).ok_or_else(|| ConfigError::UnknownTool {
            name: name.to_string(),
        })?;

        let outcome = self
            .retry
            .run(name, || tool.execute(arguments.clone()))
            .await;

        Ok(match outcome {
            Ok(output) => {
                debug!(
                    tool = name,
                    elapsed_ms = output.duration.as_millis() as u64,
                    "Tool succeeded"
                );
                ToolResult::ok(name, output.result)
            }
            Err(e) => {
                warn!(tool = name, error = %e, "Tool failed");
                ToolResult::failed(name, e.to_string())
            }
        })
    }
}
