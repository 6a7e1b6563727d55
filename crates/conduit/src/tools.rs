//! Tools the agent can hand to a model, and the collaborators they work against.

pub mod files;
pub mod output;
pub mod registry;
pub mod vfs;
pub mod web;

use std::sync::Arc;

use reqwest::Client;

pub use output::ToolOutput;
pub use registry::{ToolHandler, ToolRegistry, ToolSpec};
pub use vfs::{LocalVfs, Vfs};

use crate::errors::AgentResult;

/// The standard catalogue: the workspace file tools plus `web_fetch`
pub fn builtin_registry(vfs: Arc<dyn Vfs>, client: Client) -> AgentResult<ToolRegistry> {
    let mut specs = files::file_tools(vfs);
    specs.push(web::WebFetch::new(client).spec());
    ToolRegistry::new(specs)
}
