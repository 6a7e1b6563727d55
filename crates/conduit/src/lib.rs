pub mod agent;
pub mod errors;
pub mod events;
pub mod models;
pub mod prompt_template;
pub mod providers;
pub mod resolver;
pub mod tools;
