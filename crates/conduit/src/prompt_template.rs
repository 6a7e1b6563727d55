use serde::Serialize;
use tera::{Context, Error as TeraError, Tera};

use crate::models::tool::Tool;

const SYSTEM_PROMPT: &str = include_str!("prompts/system.md");

pub fn load_prompt<T: Serialize>(template: &str, context_data: &T) -> Result<String, TeraError> {
    let mut tera = Tera::default();
    tera.add_raw_template("inline_template", template)?;
    let context = Context::from_serialize(context_data)?;
    let rendered = tera.render("inline_template", &context)?;
    Ok(rendered)
}

#[derive(Debug, Serialize)]
struct SystemPromptContext<'a> {
    tools: &'a [Tool],
    current_path: Option<&'a str>,
}

/// Render the system prompt that opens every turn
pub fn system_prompt(tools: &[Tool], current_path: Option<&str>) -> Result<String, TeraError> {
    let context = SystemPromptContext {
        tools,
        current_path: current_path.filter(|path| !path.trim().is_empty()),
    };
    Ok(load_prompt(SYSTEM_PROMPT, &context)?.trim().to_string())
}
