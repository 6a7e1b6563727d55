use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use super::output::ToolOutput;
use crate::providers::utils::is_valid_function_name;
use crate::errors::{AgentError, AgentResult};
use crate::models::tool::{Tool, ToolCall};

/// Executes one tool with already parsed arguments
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, arguments: Map<String, Value>) -> AgentResult<ToolOutput>;
}

/// Adapts an async closure into a [`ToolHandler`]
pub struct FnHandler<F>(pub F);

#[async_trait]
impl<F, Fut> ToolHandler for FnHandler<F>
where
    F: Fn(Map<String, Value>) -> Fut + Send + Sync,
    Fut: Future<Output = AgentResult<ToolOutput>> + Send,
{
    async fn call(&self, arguments: Map<String, Value>) -> AgentResult<ToolOutput> {
        (self.0)(arguments).await
    }
}

#[derive(Clone)]
pub struct ToolSpec {
    pub tool: Tool,
    pub requires_confirmation: bool,
    pub handler: Arc<dyn ToolHandler>,
}

impl ToolSpec {
    pub fn new<H: ToolHandler + 'static>(tool: Tool, handler: H) -> Self {
        Self {
            tool,
            requires_confirmation: false,
            handler: Arc::new(handler),
        }
    }

    pub fn from_fn<F, Fut>(tool: Tool, f: F) -> Self
    where
        F: Fn(Map<String, Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = AgentResult<ToolOutput>> + Send + 'static,
    {
        Self::new(tool, FnHandler(f))
    }

    /// Gate execution of this tool behind human confirmation
    pub fn with_confirmation(mut self) -> Self {
        self.requires_confirmation = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.tool.name
    }

    /// Parse the call's arguments and run the handler
    pub async fn invoke(&self, call: &ToolCall) -> AgentResult<ToolOutput> {
        let arguments = call.parse_arguments()?;
        self.handler.call(arguments).await
    }
}

impl std::fmt::Debug for ToolSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolSpec")
            .field("tool", &self.tool)
            .field("requires_confirmation", &self.requires_confirmation)
            .finish_non_exhaustive()
    }
}

/// The fixed set of tools offered to the model, and their confirmation policy
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    specs: Vec<ToolSpec>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new(specs: Vec<ToolSpec>) -> AgentResult<Self> {
        let mut index = HashMap::new();
        for (position, spec) in specs.iter().enumerate() {
            // Names go upstream verbatim, a sanitized name would never match on lookup
            if !is_valid_function_name(&spec.tool.name) {
                return Err(AgentError::Internal(format!(
                    "Invalid tool name: {}",
                    spec.tool.name
                )));
            }
            if index.insert(spec.tool.name.clone(), position).is_some() {
                return Err(AgentError::Internal(format!(
                    "Duplicate tool name: {}",
                    spec.tool.name
                )));
            }
        }
        Ok(Self { specs, index })
    }

    pub fn lookup(&self, name: &str) -> Option<&ToolSpec> {
        self.index.get(name).map(|position| &self.specs[*position])
    }

    /// The tools advertised to the model, in registration order
    pub fn catalogue(&self) -> Vec<Tool> {
        self.specs.iter().map(|spec| spec.tool.clone()).collect()
    }

    /// The catalogue in the OpenAI tool schema, annotated with the confirmation policy
    pub fn describe(&self) -> Vec<Value> {
        self.specs
            .iter()
            .map(|spec| {
                json!({
                    "type": "function",
                    "function": {
                        "name": spec.tool.name,
                        "description": spec.tool.description,
                        "parameters": spec.tool.parameters,
                    },
                    "requires_confirmation": spec.requires_confirmation,
                })
            })
            .collect()
    }
}
